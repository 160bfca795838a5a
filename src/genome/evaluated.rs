use super::individual::Individual;
use crate::engines::mutation::impact::ImpactInfo;
use crate::types::TargetId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Heuristic score of a covered target
pub const MAX_VALUE: f64 = 1.0;

/// Score in [0, 1] for each target an individual reached, 1 meaning covered
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitnessValue {
    scores: BTreeMap<TargetId, f64>,
}

impl FitnessValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the heuristic of a target, zero scores are not stored
    pub fn update_target(&mut self, target: TargetId, value: f64) {
        let value = value.clamp(0.0, MAX_VALUE);
        if value > 0.0 {
            self.scores.insert(target, value);
        } else {
            self.scores.remove(&target);
        }
    }

    pub fn heuristic(&self, target: TargetId) -> f64 {
        self.scores.get(&target).copied().unwrap_or(0.0)
    }

    pub fn does_cover(&self, target: TargetId) -> bool {
        self.heuristic(target) >= MAX_VALUE
    }

    pub fn covered_targets(&self) -> Vec<TargetId> {
        self.scores
            .iter()
            .filter(|(_, v)| **v >= MAX_VALUE)
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn reached_targets(&self) -> impl Iterator<Item = (TargetId, f64)> + '_ {
        self.scores.iter().map(|(t, v)| (*t, *v))
    }

    pub fn compute_fitness_score(&self) -> f64 {
        self.scores.values().sum()
    }

    /// At least as good as `other` on every target `other` reaches
    pub fn subsumes(&self, other: &FitnessValue) -> bool {
        other
            .scores
            .iter()
            .all(|(t, v)| self.heuristic(*t) >= *v)
    }

    /// Strictly better than `other` on at least one target
    pub fn reach_more_than(&self, other: &FitnessValue) -> bool {
        self.scores.iter().any(|(t, v)| *v > other.heuristic(*t))
    }

    /// Any target scored differently
    pub fn differs_from(&self, other: &FitnessValue) -> bool {
        self.reach_more_than(other) || other.reach_more_than(self)
    }
}

/// An individual together with the outcome of executing it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatedIndividual {
    pub individual: Individual,
    pub fitness: FitnessValue,
    #[serde(skip)]
    pub impact: Option<ImpactInfo>,
}

impl EvaluatedIndividual {
    pub fn new(individual: Individual, fitness: FitnessValue) -> Self {
        Self {
            individual,
            fitness,
            impact: None,
        }
    }

    pub fn with_impact(mut self, impact: ImpactInfo) -> Self {
        self.impact = Some(impact);
        self
    }

    pub fn size(&self) -> usize {
        self.individual.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fitness(scores: &[(TargetId, f64)]) -> FitnessValue {
        let mut f = FitnessValue::new();
        for (t, v) in scores {
            f.update_target(*t, *v);
        }
        f
    }

    #[test]
    fn test_subsumes_and_reach_more() {
        let a = fitness(&[(1, 1.0), (2, 0.5)]);
        let b = fitness(&[(1, 1.0), (2, 0.3)]);
        let c = fitness(&[(3, 0.1)]);

        assert!(a.subsumes(&b));
        assert!(!b.subsumes(&a));
        assert!(a.reach_more_than(&b));
        assert!(!a.subsumes(&c));
        assert!(c.reach_more_than(&a));
        assert!(a.subsumes(&a));
        assert!(!a.differs_from(&a.clone()));
    }

    #[test]
    fn test_scores_are_clamped() {
        let f = fitness(&[(1, 3.0), (2, -1.0), (3, 0.2)]);
        assert_eq!(f.covered_targets(), vec![1]);
        assert_eq!(f.heuristic(2), 0.0);
        assert!((f.compute_fitness_score() - 1.2).abs() < 1e-9);
    }
}
