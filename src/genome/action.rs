use super::gene::Gene;
use crate::error::Result;
use crate::utils::randomness::Randomness;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Credentials an action is executed with, shared by the actions of one test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub gene: Gene,
}

impl Param {
    pub fn new(name: impl Into<String>, gene: Gene) -> Self {
        Self { name: name.into(), gene }
    }
}

/// One call towards the system under test, e.g. `POST:/users`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub params: Vec<Param>,
    pub auth: Option<AuthInfo>,
}

impl Action {
    pub fn new(name: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            name: name.into(),
            params,
            auth: None,
        }
    }

    pub fn see_genes(&self) -> impl Iterator<Item = &Gene> {
        self.params.iter().map(|p| &p.gene)
    }

    pub fn see_genes_mut(&mut self) -> impl Iterator<Item = &mut Gene> {
        self.params.iter_mut().map(|p| &mut p.gene)
    }

    /// Copy of this action with fresh gene identities, randomized and initialized
    pub fn instantiate(&self, rng: &mut Randomness) -> Result<Action> {
        let mut action = self.clone();
        for param in action.params.iter_mut() {
            let mut gene = param.gene.copy_with_fresh_ids();
            gene.do_initialize(Some(rng))?;
            param.gene = gene;
        }
        Ok(action)
    }
}

/// Insertion of one row, used to set up the database before the main actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbAction {
    pub table: String,
    pub genes: Vec<Gene>,
}

impl DbAction {
    pub fn new(table: impl Into<String>, genes: Vec<Gene>) -> Self {
        Self {
            table: table.into(),
            genes,
        }
    }

    pub fn primary_keys(&self) -> Vec<u64> {
        self.genes
            .iter()
            .flat_map(Gene::flat_view)
            .filter_map(Gene::primary_key_id)
            .collect()
    }

    pub fn foreign_key_references(&self) -> Vec<u64> {
        self.genes
            .iter()
            .flat_map(Gene::flat_view)
            .filter_map(Gene::foreign_key_reference)
            .collect()
    }

    pub fn references_any(&self, primary_keys: &[u64]) -> bool {
        self.foreign_key_references()
            .iter()
            .any(|fk| primary_keys.contains(fk))
    }
}

/// A group of actions on one resource, treated as a unit by structural mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceCall {
    pub resource_key: String,
    /// Name of the template the call was sampled from, e.g. `POST-GET`
    pub template: String,
    pub actions: Vec<Action>,
    pub deletable: bool,
    /// Keys of resources that must appear earlier in the test for this call to make sense
    pub depends_on: BTreeSet<String>,
}

impl ResourceCall {
    pub fn new(resource_key: impl Into<String>, template: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            resource_key: resource_key.into(),
            template: template.into(),
            actions,
            deletable: true,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn with_dependency(mut self, key: impl Into<String>) -> Self {
        self.depends_on.insert(key.into());
        self
    }

    pub fn action_size(&self) -> usize {
        self.actions.len()
    }

    pub fn depends_on_key(&self, key: &str) -> bool {
        self.depends_on.contains(key)
    }

    pub fn set_auth(&mut self, auth: &AuthInfo) {
        for action in self.actions.iter_mut() {
            action.auth = Some(auth.clone());
        }
    }

    pub fn see_genes(&self) -> impl Iterator<Item = &Gene> {
        self.actions.iter().flat_map(Action::see_genes)
    }

    /// Copy of a template call with fresh, randomized genes
    pub fn instantiate(&self, rng: &mut Randomness) -> Result<ResourceCall> {
        let actions = self
            .actions
            .iter()
            .map(|a| a.instantiate(rng))
            .collect::<Result<Vec<_>>>()?;
        Ok(ResourceCall {
            actions,
            ..self.clone()
        })
    }
}
