pub mod action;
pub mod evaluated;
pub mod gene;
pub mod individual;

pub use action::{Action, AuthInfo, DbAction, Param, ResourceCall};
pub use evaluated::{EvaluatedIndividual, FitnessValue};
pub use gene::{Gene, GeneKind};
pub use individual::Individual;
