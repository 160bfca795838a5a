use super::traits::{check_probability, ConfigSection};
use crate::error::EngineError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoppingCriterion {
    /// Wall-clock budget in seconds
    Time { max_seconds: u64 },
    /// Budget on the number of executed actions
    FitnessEvaluations { max_action_evaluations: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub stopping_criterion: StoppingCriterion,
    pub seed: Option<u64>,

    /// Fraction of the budget after which the search switches to focused mode
    pub focused_search_activation_time: f64,
    pub prob_of_random_sampling: f64,
    pub start_number_of_mutations: usize,
    pub end_number_of_mutations: usize,
    pub archive_target_limit: usize,

    /// Requests per minute towards the system under test, 0 disables limiting
    pub rate_per_minute: u32,
    /// Upper bound on a single rate limiter wait, in milliseconds
    pub max_rate_limiter_wait_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            stopping_criterion: StoppingCriterion::FitnessEvaluations {
                max_action_evaluations: 1000,
            },
            seed: None,
            focused_search_activation_time: 0.5,
            prob_of_random_sampling: 0.5,
            start_number_of_mutations: 1,
            end_number_of_mutations: 10,
            archive_target_limit: 10,
            rate_per_minute: 0,
            max_rate_limiter_wait_ms: 5_000,
        }
    }
}

impl ConfigSection for SearchConfig {
    fn section_name() -> &'static str {
        "search"
    }

    fn validate(&self) -> Result<(), EngineError> {
        check_probability("focused_search_activation_time", self.focused_search_activation_time)?;
        check_probability("prob_of_random_sampling", self.prob_of_random_sampling)?;
        if self.start_number_of_mutations == 0 || self.end_number_of_mutations == 0 {
            return Err(EngineError::Configuration(
                "Number of mutations must be at least 1".to_string(),
            ));
        }
        if self.archive_target_limit == 0 {
            return Err(EngineError::Configuration(
                "Archive target limit must be at least 1".to_string(),
            ));
        }
        match self.stopping_criterion {
            StoppingCriterion::Time { max_seconds: 0 }
            | StoppingCriterion::FitnessEvaluations { max_action_evaluations: 0 } => {
                Err(EngineError::Configuration(
                    "Search budget must be positive".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}
