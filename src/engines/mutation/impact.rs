use super::resource::MutationType;
use super::standard::MutatedGeneSpecification;
use crate::types::{GeneId, ImpactWeighting};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Weight of an element that was never manipulated
const UNVISITED_WEIGHT: f64 = 1.0;
/// Lowest weight a visited element can get with ratio weighting
const MIN_RATIO_WEIGHT: f64 = 0.05;

/// How manipulating one element has affected fitness so far
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Impact {
    pub times_to_manipulate: u32,
    /// Manipulations after which any target score changed
    pub times_of_impact: u32,
    /// Manipulations after which some target score improved
    pub times_of_improvement: u32,
    pub times_consecutive_no_impact: u32,
}

impl Impact {
    pub fn count(&mut self, impactful: bool, improved: bool) {
        self.times_to_manipulate += 1;
        if impactful {
            self.times_of_impact += 1;
            self.times_consecutive_no_impact = 0;
        } else {
            self.times_consecutive_no_impact += 1;
        }
        if improved {
            self.times_of_improvement += 1;
        }
    }

    pub fn is_impactful(&self) -> bool {
        self.times_of_impact > 0
    }

    pub fn weight(&self, mode: ImpactWeighting) -> f64 {
        match mode {
            ImpactWeighting::Counter => 1.0 + self.times_of_improvement as f64,
            ImpactWeighting::Ratio => {
                if self.times_to_manipulate == 0 {
                    UNVISITED_WEIGHT
                } else {
                    (self.times_of_improvement as f64 / self.times_to_manipulate as f64)
                        .max(MIN_RATIO_WEIGHT)
                }
            }
        }
    }
}

/// Selection weight of an element, unvisited elements get a baseline
pub fn selection_weight(impact: Option<&Impact>, mode: ImpactWeighting) -> f64 {
    impact.map_or(UNVISITED_WEIGHT, |i| i.weight(mode))
}

/// Impact records carried along the lineage of an individual.
///
/// Gene records are keyed by gene id, which copies preserve, so a mutated
/// offspring inherits what was learned on its parent.
#[derive(Debug, Clone, Default)]
pub struct ImpactInfo {
    genes: HashMap<GeneId, Impact>,
    structure: BTreeMap<MutationType, Impact>,
    resource_size: BTreeMap<String, Impact>,
    table_size: BTreeMap<String, Impact>,
}

impl ImpactInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gene_impact(&self, id: GeneId) -> Option<&Impact> {
        self.genes.get(&id)
    }

    pub fn has_any_gene_impact(&self, ids: &[GeneId]) -> bool {
        ids.iter().any(|id| self.genes.contains_key(id))
    }

    pub fn structure_impact(&self, kind: MutationType) -> Option<&Impact> {
        self.structure.get(&kind)
    }

    pub fn resource_size_impact(&self, key: &str) -> Option<&Impact> {
        self.resource_size.get(key)
    }

    pub fn table_size_impact(&self, table: &str) -> Option<&Impact> {
        self.table_size.get(table)
    }

    pub fn any_resource_size_impact(&self) -> bool {
        self.resource_size.values().any(Impact::is_impactful)
    }

    pub fn any_sql_table_size_impact(&self) -> bool {
        self.table_size.values().any(Impact::is_impactful)
    }

    /// Record the outcome of one mutation
    pub fn update(&mut self, spec: &MutatedGeneSpecification, impactful: bool, improved: bool) {
        for id in &spec.mutated_genes {
            self.genes.entry(*id).or_default().count(impactful, improved);
        }
        if let Some(kind) = spec.structure {
            self.structure.entry(kind).or_default().count(impactful, improved);
            if kind.is_sql() {
                for table in &spec.tables {
                    self.table_size
                        .entry(table.clone())
                        .or_default()
                        .count(impactful, improved);
                }
            } else if kind.changes_size() {
                for key in &spec.resource_keys {
                    self.resource_size
                        .entry(key.clone())
                        .or_default()
                        .count(impactful, improved);
                }
            }
        }
    }

    /// Forget genes that are no longer part of the individual
    pub fn retain_genes(&mut self, existing: &HashSet<GeneId>) {
        self.genes.retain(|id, _| existing.contains(id));
    }

    pub fn number_of_gene_records(&self) -> usize {
        self.genes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighting_modes() {
        let mut impact = Impact::default();
        assert_eq!(impact.weight(ImpactWeighting::Ratio), 1.0);
        impact.count(true, true);
        impact.count(false, false);
        impact.count(false, false);
        impact.count(true, false);

        assert_eq!(impact.times_to_manipulate, 4);
        assert_eq!(impact.times_of_impact, 2);
        assert_eq!(impact.times_consecutive_no_impact, 0);
        assert_eq!(impact.weight(ImpactWeighting::Counter), 2.0);
        assert!((impact.weight(ImpactWeighting::Ratio) - 0.25).abs() < 1e-9);

        let mut useless = Impact::default();
        useless.count(false, false);
        assert_eq!(useless.weight(ImpactWeighting::Ratio), MIN_RATIO_WEIGHT);
    }

    #[test]
    fn test_update_from_specification() {
        let mut info = ImpactInfo::new();
        let spec = MutatedGeneSpecification {
            mutated_genes: vec![GeneId(7)],
            structure: Some(MutationType::Add),
            resource_keys: vec!["users".to_string()],
            tables: vec![],
            size_handled: true,
        };
        info.update(&spec, true, true);

        assert!(info.gene_impact(GeneId(7)).is_some());
        assert!(info.any_resource_size_impact());
        assert!(!info.any_sql_table_size_impact());
        assert_eq!(info.structure_impact(MutationType::Add).map(|i| i.times_of_improvement), Some(1));

        info.retain_genes(&HashSet::new());
        assert_eq!(info.number_of_gene_records(), 0);
    }
}
