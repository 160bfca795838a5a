use super::DependencyManager;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Resource and table dependencies, e.g. learned from responses or derived from the schema
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    resources: BTreeMap<String, BTreeSet<String>>,
    tables: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `dependent` needs `required` to exist first
    pub fn add_dependency(&mut self, dependent: impl Into<String>, required: impl Into<String>) {
        let (dependent, required) = (dependent.into(), required.into());
        if dependent != required {
            self.resources.entry(dependent).or_default().insert(required);
        }
    }

    pub fn add_related_table(&mut self, key: impl Into<String>, table: impl Into<String>) {
        self.tables.entry(key.into()).or_default().insert(table.into());
    }

    /// Resources that directly depend on `key`
    pub fn dependents_of(&self, key: &str) -> BTreeSet<String> {
        self.resources
            .iter()
            .filter(|(_, required)| required.contains(key))
            .map(|(dependent, _)| dependent.clone())
            .collect()
    }
}

impl DependencyManager for DependencyGraph {
    fn is_dependency_not_empty(&self) -> bool {
        !self.resources.is_empty() || !self.tables.is_empty()
    }

    fn dependencies_of(&self, key: &str) -> BTreeSet<String> {
        self.resources.get(key).cloned().unwrap_or_default()
    }

    fn related_tables(&self, key: &str) -> BTreeSet<String> {
        self.tables.get(key).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let mut graph = DependencyGraph::new();
        assert!(!graph.is_dependency_not_empty());

        graph.add_dependency("/orders", "/users");
        graph.add_dependency("/users", "/users");
        graph.add_related_table("/orders", "orders");

        assert!(graph.is_dependency_not_empty());
        assert!(graph.dependencies_of("/orders").contains("/users"));
        assert!(graph.dependencies_of("/users").is_empty());
        assert_eq!(graph.dependents_of("/users").len(), 1);
        assert!(graph.related_tables("/orders").contains("orders"));
    }
}
