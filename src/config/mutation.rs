use super::traits::{check_probability, ConfigSection};
use crate::error::EngineError;
use crate::types::{ImpactWeighting, SubsetGeneSelectionStrategy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    /// Chance of a structural edit instead of a value mutation, when one applies
    pub structure_mutation_probability: f64,
    pub gene_selection_strategy: SubsetGeneSelectionStrategy,
    /// Use learned impacts when choosing which genes of an individual to mutate
    pub enable_adaptive_gene_selection: bool,
    pub impact_weighting: ImpactWeighting,
    /// Expected number of genes mutated per individual-level mutation
    pub weight_based_mutation_rate: f64,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            structure_mutation_probability: 0.5,
            gene_selection_strategy: SubsetGeneSelectionStrategy::Default,
            enable_adaptive_gene_selection: false,
            impact_weighting: ImpactWeighting::Ratio,
            weight_based_mutation_rate: 1.0,
        }
    }
}

impl ConfigSection for MutationConfig {
    fn section_name() -> &'static str {
        "mutation"
    }

    fn validate(&self) -> Result<(), EngineError> {
        check_probability("structure_mutation_probability", self.structure_mutation_probability)?;
        if self.weight_based_mutation_rate <= 0.0 {
            return Err(EngineError::Configuration(
                "weight_based_mutation_rate must be positive".to_string(),
            ));
        }
        if self.gene_selection_strategy == SubsetGeneSelectionStrategy::AdaptiveWeight
            && !self.enable_adaptive_gene_selection
        {
            return Err(EngineError::Configuration(
                "ADAPTIVE_WEIGHT gene selection requires enable_adaptive_gene_selection".to_string(),
            ));
        }
        Ok(())
    }
}
