use super::impact::{selection_weight, ImpactInfo};
use crate::error::{EngineError, Result};
use crate::genome::Gene;
use crate::types::{ImpactWeighting, SubsetGeneSelectionStrategy};
use crate::utils::randomness::Randomness;
use log::trace;

/// Chooses which genes or structural edits a mutation applies to
#[derive(Debug, Clone)]
pub struct MutationWeightControl {
    weighting: ImpactWeighting,
}

impl MutationWeightControl {
    pub fn new(weighting: ImpactWeighting) -> Self {
        Self { weighting }
    }

    pub fn weighting(&self) -> ImpactWeighting {
        self.weighting
    }

    /// Each candidate is kept with probability `min(1, num_of_group * w / total)`,
    /// so on average about `num_of_group` candidates are returned.
    /// With `force_not_empty`, an empty draw falls back to one weighted pick.
    pub fn select_subset_with_weight<T: Clone>(
        &self,
        candidates: &[(T, f64)],
        force_not_empty: bool,
        num_of_group: f64,
        rng: &mut Randomness,
    ) -> Vec<T> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let total: f64 = candidates.iter().map(|(_, w)| w.max(0.0)).sum();
        let uniform = total <= 0.0;
        let n = candidates.len() as f64;

        let mut selected: Vec<T> = candidates
            .iter()
            .filter(|(_, w)| {
                let p = if uniform {
                    num_of_group / n
                } else {
                    num_of_group * w.max(0.0) / total
                };
                rng.next_bool(p.min(1.0))
            })
            .map(|(c, _)| c.clone())
            .collect();

        if selected.is_empty() && force_not_empty {
            let picked = if uniform {
                rng.choose(candidates).map(|(c, _)| c.clone())
            } else {
                rng.choose_weighted(candidates).cloned()
            };
            selected.extend(picked);
        }
        selected
    }

    /// Pick the inner genes a composite mutation delegates to.
    /// Returned values index into `genes`.
    pub fn select_sub_genes(
        &self,
        genes: &[&Gene],
        strategy: SubsetGeneSelectionStrategy,
        impact: Option<&ImpactInfo>,
        rng: &mut Randomness,
    ) -> Result<Vec<usize>> {
        if genes.is_empty() {
            return Ok(Vec::new());
        }
        let selected = match strategy {
            SubsetGeneSelectionStrategy::Default => {
                vec![rng.next_usize(0, genes.len() - 1)]
            }
            SubsetGeneSelectionStrategy::DeterministicWeight => self.deterministic(genes, rng),
            SubsetGeneSelectionStrategy::AdaptiveWeight => {
                let impact = impact.ok_or_else(|| {
                    EngineError::MissingImpact(format!(
                        "adaptive selection among {} genes requires impact info",
                        genes.len()
                    ))
                })?;
                let ids: Vec<_> = genes.iter().map(|g| g.id()).collect();
                if impact.has_any_gene_impact(&ids) {
                    let weighted: Vec<(usize, f64)> = ids
                        .iter()
                        .enumerate()
                        .map(|(i, id)| (i, selection_weight(impact.gene_impact(*id), self.weighting)))
                        .collect();
                    self.select_subset_with_weight(&weighted, true, 1.0, rng)
                } else {
                    trace!("no impact recorded yet, falling back to static weights");
                    self.deterministic(genes, rng)
                }
            }
        };

        if selected.is_empty() {
            return Err(EngineError::EmptySelection {
                strategy: strategy.to_string(),
                candidates: genes.len(),
            });
        }
        Ok(selected)
    }

    fn deterministic(&self, genes: &[&Gene], rng: &mut Randomness) -> Vec<usize> {
        let weighted: Vec<(usize, f64)> = genes
            .iter()
            .enumerate()
            .map(|(i, g)| (i, g.mutation_weight()))
            .collect();
        self.select_subset_with_weight(&weighted, true, 1.0, rng)
    }
}
