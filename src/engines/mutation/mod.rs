pub mod gene_mutator;
pub mod impact;
pub mod resource;
pub mod standard;
pub mod weight_control;

pub use impact::{Impact, ImpactInfo};
pub use resource::{MutationType, ResourceStructureMutator};
pub use standard::{Evaluator, MutatedGeneSpecification, Mutator};
pub use weight_control::MutationWeightControl;
