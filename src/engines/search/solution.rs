use crate::error::Result;
use crate::genome::EvaluatedIndividual;
use crate::types::TargetId;
use serde::{Deserialize, Serialize};

/// The final test suite handed to a writer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub individuals: Vec<EvaluatedIndividual>,
    pub covered_targets: Vec<TargetId>,
}

impl Solution {
    pub fn new(individuals: Vec<EvaluatedIndividual>, covered_targets: Vec<TargetId>) -> Self {
        Self {
            individuals,
            covered_targets,
        }
    }

    pub fn size(&self) -> usize {
        self.individuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    /// Total number of main actions over all tests
    pub fn number_of_actions(&self) -> usize {
        self.individuals.iter().map(|ei| ei.size()).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
