use super::traits::{check_probability, ConfigSection};
use crate::error::EngineError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Maximum number of main (non-SQL) actions in one test
    pub max_test_size: usize,
    /// Upper bound on how many calls or rows one size-handling edit adds or removes.
    /// 0 disables size handling altogether.
    pub max_size_of_handling_resource: usize,
    pub prob_of_handling_length: f64,
    pub prob_of_enabling_resource_dependency_heuristics: f64,
    pub enable_adaptive_resource_structure_mutation: bool,
    /// Upper bound on rows one SQL_ADD inserts for a table
    pub max_sql_actions_per_resource: usize,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_test_size: 10,
            max_size_of_handling_resource: 0,
            prob_of_handling_length: 0.0,
            prob_of_enabling_resource_dependency_heuristics: 0.5,
            enable_adaptive_resource_structure_mutation: false,
            max_sql_actions_per_resource: 5,
        }
    }
}

impl ResourceConfig {
    pub fn size_handling_enabled(&self) -> bool {
        self.max_size_of_handling_resource > 0
    }
}

impl ConfigSection for ResourceConfig {
    fn section_name() -> &'static str {
        "resource"
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.max_test_size == 0 {
            return Err(EngineError::Configuration(
                "max_test_size must be at least 1".to_string(),
            ));
        }
        if self.max_sql_actions_per_resource == 0 {
            return Err(EngineError::Configuration(
                "max_sql_actions_per_resource must be at least 1".to_string(),
            ));
        }
        check_probability("prob_of_handling_length", self.prob_of_handling_length)?;
        check_probability(
            "prob_of_enabling_resource_dependency_heuristics",
            self.prob_of_enabling_resource_dependency_heuristics,
        )?;
        Ok(())
    }
}
