use super::solution::Solution;
use crate::error::{EngineError, Result};
use crate::genome::EvaluatedIndividual;
use crate::types::TargetId;
use crate::utils::randomness::Randomness;
use log::{debug, info};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Per-target populations of the best individuals found so far.
///
/// A covered target keeps exactly one individual, the shortest seen covering it.
/// A target that is only reached keeps up to `limit` individuals ranked by
/// heuristic score, then by size.
pub struct Archive {
    populations: BTreeMap<TargetId, Vec<EvaluatedIndividual>>,
    sampling_counters: BTreeMap<TargetId, u32>,
    limit: usize,
    seeded_covered_targets: Option<usize>,
}

impl Archive {
    pub fn new(limit: usize) -> Self {
        Self {
            populations: BTreeMap::new(),
            sampling_counters: BTreeMap::new(),
            limit: limit.max(1),
            seeded_covered_targets: None,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.populations.values().all(|p| p.is_empty())
    }

    pub fn population(&self, target: TargetId) -> &[EvaluatedIndividual] {
        self.populations.get(&target).map(Vec::as_slice).unwrap_or(&[])
    }

    fn is_covered(&self, target: TargetId) -> bool {
        self.population(target)
            .iter()
            .any(|ei| ei.fitness.does_cover(target))
    }

    /// Whether `candidate` reaches a target never reached before or covers one not yet covered
    pub fn would_reach_new_target(&self, candidate: &EvaluatedIndividual) -> bool {
        candidate.fitness.reached_targets().any(|(target, _)| {
            self.population(target).is_empty()
                || (candidate.fitness.does_cover(target) && !self.is_covered(target))
        })
    }

    /// Store `candidate` in every population it improves. Returns whether any did.
    pub fn add_if_needed(&mut self, candidate: &EvaluatedIndividual) -> Result<bool> {
        let mut key: Option<String> = None;
        let mut added = false;

        let reached: Vec<(TargetId, f64)> = candidate.fitness.reached_targets().collect();
        for (target, value) in reached {
            let improved = if self.is_covered(target) {
                self.replace_covering(target, candidate)
            } else if candidate.fitness.does_cover(target) {
                self.populations.insert(target, vec![candidate.clone()]);
                true
            } else {
                if key.is_none() {
                    key = Some(candidate.individual.canonical_string()?);
                }
                let key = key.as_deref().unwrap_or_default();
                self.insert_partial(target, value, key, candidate)?
            };

            if improved {
                self.sampling_counters.insert(target, 0);
                added = true;
            }
        }
        Ok(added)
    }

    fn replace_covering(&mut self, target: TargetId, candidate: &EvaluatedIndividual) -> bool {
        if !candidate.fitness.does_cover(target) {
            return false;
        }
        let population = self.populations.entry(target).or_default();
        let shorter = population
            .first()
            .map(|current| candidate.size() < current.size())
            .unwrap_or(true);
        if shorter {
            *population = vec![candidate.clone()];
        }
        shorter
    }

    fn insert_partial(
        &mut self,
        target: TargetId,
        value: f64,
        key: &str,
        candidate: &EvaluatedIndividual,
    ) -> Result<bool> {
        let limit = self.limit;
        let population = self.populations.entry(target).or_default();
        for existing in population.iter() {
            if existing.individual.canonical_string()? == key {
                return Ok(false);
            }
        }

        if population.len() < limit {
            population.push(candidate.clone());
            return Ok(true);
        }

        let Some(worst) = worst_index(population, target) else {
            return Ok(false);
        };
        let worst_value = population[worst].fitness.heuristic(target);
        let better = value > worst_value
            || (value == worst_value && candidate.size() < population[worst].size());
        if better {
            population[worst] = candidate.clone();
        }
        Ok(better)
    }

    /// Pick an individual to mutate, favouring uncovered targets that were sampled least
    pub fn sample_individual(&mut self, rng: &mut Randomness) -> Result<EvaluatedIndividual> {
        let uncovered = self.not_covered_targets();
        let target = if uncovered.is_empty() {
            let covered = self.covered_targets();
            *rng.choose(&covered).ok_or(EngineError::EmptyArchive)?
        } else {
            let lowest = uncovered
                .iter()
                .map(|t| self.sampling_counter(*t))
                .min()
                .unwrap_or(0);
            let least_sampled: Vec<TargetId> = uncovered
                .into_iter()
                .filter(|t| self.sampling_counter(*t) == lowest)
                .collect();
            *rng.choose(&least_sampled).ok_or(EngineError::EmptyArchive)?
        };

        *self.sampling_counters.entry(target).or_insert(0) += 1;
        let chosen = rng
            .choose(self.population(target))
            .ok_or(EngineError::EmptyArchive)?;
        Ok(chosen.clone())
    }

    pub fn sampling_counter(&self, target: TargetId) -> u32 {
        self.sampling_counters.get(&target).copied().unwrap_or(0)
    }

    /// Lower the per-target capacity, dropping the weakest individuals of reached targets
    pub fn shrink_to(&mut self, limit: usize) {
        let limit = limit.max(1);
        if limit >= self.limit {
            return;
        }
        debug!("archive target limit {} -> {}", self.limit, limit);
        self.limit = limit;
        for (target, population) in self.populations.iter_mut() {
            if population.len() > limit {
                population.sort_by(|a, b| compare_for_target(b, a, *target));
                population.truncate(limit);
            }
        }
    }

    pub fn covered_targets(&self) -> Vec<TargetId> {
        self.populations
            .keys()
            .copied()
            .filter(|t| self.is_covered(*t))
            .collect()
    }

    pub fn number_of_covered_targets(&self) -> usize {
        self.covered_targets().len()
    }

    /// Targets reached by at least one individual but not yet covered
    pub fn not_covered_targets(&self) -> Vec<TargetId> {
        self.populations
            .iter()
            .filter(|(_, p)| !p.is_empty())
            .map(|(t, _)| *t)
            .filter(|t| !self.is_covered(*t))
            .collect()
    }

    pub fn number_of_reached_targets(&self) -> usize {
        self.populations.values().filter(|p| !p.is_empty()).count()
    }

    /// Remember how many targets the seeded individuals alone cover
    pub fn record_seeded_coverage(&mut self) {
        let covered = self.number_of_covered_targets();
        info!("seeded individuals cover {} targets", covered);
        self.seeded_covered_targets = Some(covered);
    }

    pub fn seeded_covered_targets(&self) -> Option<usize> {
        self.seeded_covered_targets
    }

    /// Individuals covering at least one target, without duplicates
    pub fn extract_solution(&self) -> Result<Solution> {
        let covered: BTreeSet<TargetId> = self.covered_targets().into_iter().collect();
        let mut seen = HashSet::new();
        let mut individuals = Vec::new();
        for target in &covered {
            for ei in self.population(*target) {
                if seen.insert(ei.individual.canonical_string()?) {
                    individuals.push(ei.clone());
                }
            }
        }
        Ok(Solution::new(individuals, covered.into_iter().collect()))
    }
}

/// Greater is better: higher heuristic, then smaller size
fn compare_for_target(a: &EvaluatedIndividual, b: &EvaluatedIndividual, target: TargetId) -> Ordering {
    a.fitness
        .heuristic(target)
        .partial_cmp(&b.fitness.heuristic(target))
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.size().cmp(&a.size()))
}

fn worst_index(population: &[EvaluatedIndividual], target: TargetId) -> Option<usize> {
    population
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| compare_for_target(a, b, target))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::{Action, FitnessValue, Gene, Individual, Param};

    fn individual(rng: &mut Randomness, calls: usize) -> Individual {
        let actions = (0..calls)
            .map(|i| {
                Action::new(
                    format!("GET:/items/{}", i),
                    vec![Param::new("id", Gene::integer("id", 0, 1_000_000))],
                )
                .instantiate(rng)
                .unwrap()
            })
            .collect();
        Individual::from_actions(actions)
    }

    fn evaluated(rng: &mut Randomness, calls: usize, scores: &[(TargetId, f64)]) -> EvaluatedIndividual {
        let mut fitness = FitnessValue::new();
        for (t, v) in scores {
            fitness.update_target(*t, *v);
        }
        EvaluatedIndividual::new(individual(rng, calls), fitness)
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let mut rng = Randomness::new(Some(3));
        let mut archive = Archive::new(3);
        for i in 0..10 {
            let ei = evaluated(&mut rng, 1, &[(1, 0.05 * (i + 1) as f64)]);
            archive.add_if_needed(&ei).unwrap();
            assert!(archive.population(1).len() <= 3);
        }
        let best = archive
            .population(1)
            .iter()
            .map(|ei| ei.fitness.heuristic(1))
            .fold(0.0, f64::max);
        assert!((best - 0.5).abs() < 1e-9);

        archive.shrink_to(1);
        assert_eq!(archive.population(1).len(), 1);
        assert!((archive.population(1)[0].fitness.heuristic(1) - 0.5).abs() < 1e-9);

        archive.shrink_to(4);
        assert_eq!(archive.limit(), 1);
        archive.add_if_needed(&evaluated(&mut rng, 1, &[(1, 0.9)])).unwrap();
        assert_eq!(archive.population(1).len(), 1);
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let mut rng = Randomness::new(Some(3));
        let mut archive = Archive::new(5);
        let ei = evaluated(&mut rng, 2, &[(1, 0.3)]);
        assert!(archive.add_if_needed(&ei).unwrap());
        assert!(!archive.add_if_needed(&ei.clone()).unwrap());
        assert_eq!(archive.population(1).len(), 1);
    }

    #[test]
    fn test_covered_target_keeps_shortest() {
        let mut rng = Randomness::new(Some(3));
        let mut archive = Archive::new(5);
        let partial = evaluated(&mut rng, 1, &[(7, 0.4)]);
        let long = evaluated(&mut rng, 3, &[(7, 1.0)]);
        let short = evaluated(&mut rng, 1, &[(7, 1.0)]);

        archive.add_if_needed(&partial).unwrap();
        assert!(archive.would_reach_new_target(&long));
        assert!(archive.add_if_needed(&long).unwrap());
        assert_eq!(archive.covered_targets(), vec![7]);
        assert!(!archive.would_reach_new_target(&short));

        assert!(archive.add_if_needed(&short).unwrap());
        assert!(!archive.add_if_needed(&long).unwrap());
        assert_eq!(archive.population(7).len(), 1);
        assert_eq!(archive.population(7)[0].size(), 1);
    }

    #[test]
    fn test_sampling_prefers_least_sampled_uncovered() {
        let mut rng = Randomness::new(Some(3));
        let mut archive = Archive::new(5);
        assert!(matches!(
            archive.sample_individual(&mut rng),
            Err(EngineError::EmptyArchive)
        ));

        archive.add_if_needed(&evaluated(&mut rng, 1, &[(1, 1.0)])).unwrap();
        archive.add_if_needed(&evaluated(&mut rng, 1, &[(2, 0.2)])).unwrap();
        archive.add_if_needed(&evaluated(&mut rng, 1, &[(3, 0.2)])).unwrap();

        archive.sample_individual(&mut rng).unwrap();
        archive.sample_individual(&mut rng).unwrap();
        assert_eq!(archive.sampling_counter(1), 0);
        assert_eq!(archive.sampling_counter(2), 1);
        assert_eq!(archive.sampling_counter(3), 1);

        archive.add_if_needed(&evaluated(&mut rng, 1, &[(2, 0.6)])).unwrap();
        assert_eq!(archive.sampling_counter(2), 0);
    }

    #[test]
    fn test_solution_contains_covering_individuals_once() {
        let mut rng = Randomness::new(Some(3));
        let mut archive = Archive::new(5);
        let both = evaluated(&mut rng, 1, &[(1, 1.0), (2, 1.0)]);
        archive.add_if_needed(&both).unwrap();
        archive.add_if_needed(&evaluated(&mut rng, 1, &[(3, 0.5)])).unwrap();

        let solution = archive.extract_solution().unwrap();
        assert_eq!(solution.size(), 1);
        assert_eq!(solution.covered_targets, vec![1, 2]);
        assert_eq!(archive.not_covered_targets(), vec![3]);
    }
}
