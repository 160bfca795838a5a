pub mod config;
pub mod engines;
pub mod error;
pub mod genome;
pub mod problem;
pub mod types;
pub mod utils;

pub use error::{EngineError, Result};
