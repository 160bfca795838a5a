pub mod mutation;
pub mod search;
