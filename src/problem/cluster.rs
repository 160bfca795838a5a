use super::ResourceManager;
use crate::error::{EngineError, Result};
use crate::genome::{Action, DbAction, Gene, GeneKind, Individual, ResourceCall};
use crate::utils::randomness::Randomness;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// How deep missing foreign key targets are created recursively
const MAX_REFERENCE_DEPTH: usize = 5;

const MAX_SAMPLING_ATTEMPTS: usize = 50;

/// One resource of the system under test with the call templates that exercise it
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub key: String,
    templates: BTreeMap<String, Vec<Action>>,
    creation_template: Option<String>,
    depends_on: BTreeSet<String>,
}

impl ResourceNode {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            templates: BTreeMap::new(),
            creation_template: None,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn with_template(mut self, name: impl Into<String>, actions: Vec<Action>) -> Self {
        self.templates.insert(name.into(), actions);
        self
    }

    /// Register a template that creates the resource
    pub fn with_creation_template(mut self, name: impl Into<String>, actions: Vec<Action>) -> Self {
        let name = name.into();
        self.creation_template = Some(name.clone());
        self.with_template(name, actions)
    }

    pub fn depends_on(mut self, key: impl Into<String>) -> Self {
        self.depends_on.insert(key.into());
        self
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.depends_on
    }

    fn instantiate(&self, template: &str, rng: &mut Randomness) -> Result<ResourceCall> {
        let actions = self.templates.get(template).ok_or_else(|| {
            EngineError::Sampling(format!("no template {} for resource {}", template, self.key))
        })?;
        let mut call = ResourceCall::new(self.key.clone(), template, actions.clone());
        call.depends_on = self.depends_on.clone();
        call.instantiate(rng)
    }
}

/// Column genes of one table; primary and foreign keys are expressed as sql key genes
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Gene>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Gene>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }
}

/// In-memory catalogue of resources and tables
#[derive(Debug, Clone, Default)]
pub struct ResourceCluster {
    nodes: BTreeMap<String, ResourceNode>,
    tables: BTreeMap<String, TableSchema>,
}

impl ResourceCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: ResourceNode) {
        self.nodes.insert(node.key.clone(), node);
    }

    pub fn add_table(&mut self, table: TableSchema) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn node(&self, key: &str) -> Option<&ResourceNode> {
        self.nodes.get(key)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// A fresh call of a random resource
    pub fn sample_random_call(&self, max_actions: usize, rng: &mut Randomness) -> Result<Option<ResourceCall>> {
        let keys: Vec<&String> = self.nodes.keys().collect();
        match rng.choose(&keys) {
            Some(key) => self.sample_call(key, None, max_actions, rng),
            None => Ok(None),
        }
    }

    /// A grouped individual made of random calls, ordered so that dependencies come first
    pub fn sample_individual(&self, max_actions: usize, rng: &mut Randomness) -> Result<Individual> {
        let mut individual = Individual::new(Vec::new(), Vec::new());
        let target = rng.next_usize(1, max_actions.max(1));
        let mut attempts = 0;
        while individual.size() < target && attempts < MAX_SAMPLING_ATTEMPTS {
            attempts += 1;
            let remaining = max_actions - individual.size();
            let Some(call) = self.sample_random_call(remaining, rng)? else {
                break;
            };
            let Some((lowest, highest)) = individual.valid_insertion_range(&call) else {
                continue;
            };
            individual.add_resource_call(rng.next_usize(lowest, highest), call);
        }
        if individual.resource_calls().is_empty() {
            return Err(EngineError::Sampling(
                "no resource call fits in the action budget".to_string(),
            ));
        }
        Ok(individual)
    }

    fn create_row(
        &self,
        table: &str,
        existing: &[DbAction],
        created: &mut Vec<DbAction>,
        depth: usize,
        rng: &mut Randomness,
    ) -> Result<()> {
        let schema = self
            .tables
            .get(table)
            .ok_or_else(|| EngineError::Sampling(format!("unknown table {}", table)))?;

        let mut columns = Vec::with_capacity(schema.columns.len());
        for column in &schema.columns {
            let mut gene = column.copy_with_fresh_ids();
            gene.do_initialize(Some(&mut *rng))?;
            columns.push(gene);
        }

        for gene in columns.iter_mut() {
            let target = match gene.kind() {
                GeneKind::SqlForeignKey { target_table, .. } => target_table.clone(),
                _ => continue,
            };
            let pks: Vec<u64> = existing
                .iter()
                .chain(created.iter())
                .filter(|db| db.table == target)
                .flat_map(DbAction::primary_keys)
                .collect();
            let reference = match rng.choose(&pks) {
                Some(pk) => Some(*pk),
                None if depth < MAX_REFERENCE_DEPTH => {
                    debug!("creating a {} row referenced by {}", target, table);
                    self.create_row(&target, existing, created, depth + 1, rng)?;
                    created
                        .iter()
                        .rev()
                        .find(|db| db.table == target)
                        .and_then(|db| db.primary_keys().first().copied())
                }
                None => None,
            };
            gene.set_foreign_key_reference(reference)?;
        }

        created.push(DbAction::new(table, columns));
        Ok(())
    }
}

impl ResourceManager for ResourceCluster {
    fn resource_keys(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    fn templates(&self, key: &str) -> Vec<String> {
        self.nodes
            .get(key)
            .map(|n| n.templates.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn creation_template(&self, key: &str) -> Option<String> {
        self.nodes.get(key).and_then(|n| n.creation_template.clone())
    }

    fn template_size(&self, key: &str, template: &str) -> Option<usize> {
        self.nodes
            .get(key)
            .and_then(|n| n.templates.get(template))
            .map(Vec::len)
    }

    fn sample_call(
        &self,
        key: &str,
        template: Option<&str>,
        max_actions: usize,
        rng: &mut Randomness,
    ) -> Result<Option<ResourceCall>> {
        let node = self
            .nodes
            .get(key)
            .ok_or_else(|| EngineError::Sampling(format!("unknown resource {}", key)))?;
        let fitting: Vec<&String> = node
            .templates
            .iter()
            .filter(|(_, actions)| actions.len() <= max_actions)
            .map(|(name, _)| name)
            .collect();

        let chosen = match template {
            Some(t) if fitting.iter().any(|f| f.as_str() == t) => Some(t.to_string()),
            _ => rng.choose(&fitting).map(|t| t.to_string()),
        };
        chosen.map(|t| node.instantiate(&t, rng)).transpose()
    }

    fn tables(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    fn create_db_actions(
        &self,
        table: &str,
        num: usize,
        existing: &[DbAction],
        rng: &mut Randomness,
    ) -> Result<Vec<DbAction>> {
        let mut created = Vec::new();
        for _ in 0..num {
            self.create_row(table, existing, &mut created, 0, rng)?;
        }
        Ok(created)
    }
}
