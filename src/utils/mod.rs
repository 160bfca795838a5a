pub mod randomness;

pub use randomness::Randomness;
