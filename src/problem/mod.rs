//! Collaborators the search engine consumes but does not implement:
//! sampling, fitness evaluation and resource/dependency lookups.

pub mod cluster;
pub mod dependency;

use crate::error::Result;
use crate::genome::{DbAction, EvaluatedIndividual, Individual, ResourceCall};
use crate::types::TargetId;
use crate::utils::randomness::Randomness;
use std::collections::BTreeSet;

pub use cluster::{ResourceCluster, ResourceNode, TableSchema};
pub use dependency::DependencyGraph;

/// Supplier of fresh individuals
pub trait Sampler {
    /// Next individual, seeded ones first when the sampler has any
    fn sample(&mut self, rng: &mut Randomness) -> Result<Individual>;

    fn sample_at_random(&mut self, rng: &mut Randomness) -> Result<Individual>;

    /// Whether mandatory seeded individuals are still pending
    fn has_special_init(&self) -> bool {
        false
    }

    /// Whether the individual returned last was the final seeded one
    fn is_last_seeded_individual(&self) -> bool {
        false
    }

    fn feedback(&mut self, _evaluated: &EvaluatedIndividual) {}
}

/// Executes an individual against the system under test
pub trait FitnessFunction {
    /// `None` means the execution failed and yields no fitness
    fn calculate_coverage(
        &mut self,
        individual: Individual,
        targets: &BTreeSet<TargetId>,
    ) -> Option<EvaluatedIndividual>;
}

/// Resource templates and database tables of the system under test
pub trait ResourceManager {
    fn resource_keys(&self) -> Vec<String>;

    /// Template names available for a resource, e.g. `POST-GET`
    fn templates(&self, key: &str) -> Vec<String>;

    /// Template that creates the resource, if there is one
    fn creation_template(&self, key: &str) -> Option<String>;

    /// Number of actions a call of `template` has
    fn template_size(&self, key: &str, template: &str) -> Option<usize>;

    /// Fewest actions any call of any resource needs
    fn min_call_size(&self) -> Option<usize> {
        self.resource_keys()
            .iter()
            .flat_map(|key| {
                self.templates(key)
                    .into_iter()
                    .filter_map(move |t| self.template_size(key, &t))
            })
            .min()
    }

    /// A fresh call of `key`, from `template` or a random template, with at most `max_actions` actions
    fn sample_call(
        &self,
        key: &str,
        template: Option<&str>,
        max_actions: usize,
        rng: &mut Randomness,
    ) -> Result<Option<ResourceCall>>;

    /// Every template of every resource already appears in the individual
    fn covers_all(&self, individual: &Individual) -> bool {
        let present: BTreeSet<(String, String)> = individual
            .resource_calls()
            .iter()
            .map(|c| (c.resource_key.clone(), c.template.clone()))
            .collect();
        self.resource_keys().iter().all(|key| {
            self.templates(key)
                .into_iter()
                .all(|t| present.contains(&(key.clone(), t)))
        })
    }

    fn tables(&self) -> Vec<String>;

    /// `num` insertions into `table`, preceded by any rows their foreign keys need
    /// that `existing` does not already provide
    fn create_db_actions(
        &self,
        table: &str,
        num: usize,
        existing: &[DbAction],
        rng: &mut Randomness,
    ) -> Result<Vec<DbAction>>;
}

/// Learned dependencies among resources and tables, consumed as a lookup
pub trait DependencyManager {
    fn is_dependency_not_empty(&self) -> bool;

    /// Resources that must exist before `key` is meaningful
    fn dependencies_of(&self, key: &str) -> BTreeSet<String>;

    /// Tables whose content affects `key`
    fn related_tables(&self, key: &str) -> BTreeSet<String>;
}
