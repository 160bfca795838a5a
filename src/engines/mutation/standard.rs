use super::gene_mutator::{standard_mutation, GeneMutationContext};
use super::impact::{selection_weight, ImpactInfo};
use super::resource::{MutationType, ResourceStructureMutator};
use super::weight_control::MutationWeightControl;
use crate::config::MutationConfig;
use crate::engines::search::archive::Archive;
use crate::error::Result;
use crate::genome::{EvaluatedIndividual, Gene, Individual};
use crate::types::{GeneFilter, GeneId, SubsetGeneSelectionStrategy};
use crate::utils::randomness::Randomness;
use log::{debug, trace};

/// What one mutation changed, used to update impacts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutatedGeneSpecification {
    pub mutated_genes: Vec<GeneId>,
    pub structure: Option<MutationType>,
    /// Resources added, removed or moved by a structural mutation
    pub resource_keys: Vec<String>,
    /// Tables whose insertions were added or removed
    pub tables: Vec<String>,
    pub size_handled: bool,
}

impl MutatedGeneSpecification {
    pub fn is_structural(&self) -> bool {
        self.structure.is_some()
    }
}

/// The running search as seen by a mutator evaluating its offspring
pub trait Evaluator {
    fn should_continue_search(&self) -> bool;

    /// `None` when the execution failed
    fn evaluate(&mut self, individual: Individual) -> Option<EvaluatedIndividual>;
}

/// Individual-level mutation: either one structural edit or value mutation of a gene subset
pub struct Mutator {
    config: MutationConfig,
    mwc: MutationWeightControl,
    structure: Option<ResourceStructureMutator>,
}

impl Mutator {
    pub fn new(config: MutationConfig, structure: Option<ResourceStructureMutator>) -> Self {
        let mwc = MutationWeightControl::new(config.impact_weighting);
        Self {
            config,
            mwc,
            structure,
        }
    }

    pub fn structure_mutator(&self) -> Option<&ResourceStructureMutator> {
        self.structure.as_ref()
    }

    fn adaptive_gene_selection(&self) -> bool {
        self.config.enable_adaptive_gene_selection
            && self.config.gene_selection_strategy == SubsetGeneSelectionStrategy::AdaptiveWeight
    }

    /// Mutated copy of `current`; the original is left untouched
    pub fn mutate(
        &self,
        current: &EvaluatedIndividual,
        focused_search: bool,
        rng: &mut Randomness,
    ) -> Result<(Individual, MutatedGeneSpecification)> {
        let mut copy = current.individual.clone();
        let mut spec = MutatedGeneSpecification::default();
        let impact = current.impact.as_ref();

        if let Some(structure) = &self.structure {
            if structure.can_apply(&copy) && rng.next_bool(self.config.structure_mutation_probability) {
                let kind = structure.mutate_structure(&mut copy, impact, focused_search, rng, &mut spec)?;
                trace!("structure mutation {} applied", kind);
                return Ok((copy, spec));
            }
        }

        let selected = self.select_genes_to_mutate(&copy, impact, rng)?;
        if selected.is_empty() {
            debug!("individual has no mutable gene");
            return Ok((copy, spec));
        }

        let strategy = self.config.gene_selection_strategy;
        for id in selected {
            let mut ctx = GeneMutationContext::new(rng, &self.mwc, strategy, impact);
            if let Some(gene) = copy.find_gene_mut(id) {
                standard_mutation(gene, &mut ctx)?;
            }
            spec.mutated_genes.extend(ctx.mutated);
            copy.sync_binding_genes_from(id);
        }
        Ok((copy, spec))
    }

    /// Top-level genes to mutate, about `weight_based_mutation_rate` of them on average
    fn select_genes_to_mutate(
        &self,
        individual: &Individual,
        impact: Option<&ImpactInfo>,
        rng: &mut Randomness,
    ) -> Result<Vec<GeneId>> {
        let candidates: Vec<&Gene> = individual
            .see_genes(GeneFilter::All)
            .into_iter()
            .filter(|g| g.is_mutable())
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let weighted: Vec<(GeneId, f64)> = match self.config.gene_selection_strategy {
            SubsetGeneSelectionStrategy::Default => candidates.iter().map(|g| (g.id(), 1.0)).collect(),
            SubsetGeneSelectionStrategy::DeterministicWeight => candidates
                .iter()
                .map(|g| (g.id(), g.mutation_weight()))
                .collect(),
            SubsetGeneSelectionStrategy::AdaptiveWeight => {
                let impact = impact.filter(|_| self.adaptive_gene_selection()).ok_or_else(|| {
                    crate::error::EngineError::MissingImpact(
                        "adaptive gene selection requires impact info on the individual".to_string(),
                    )
                })?;
                candidates
                    .iter()
                    .map(|g| (g.id(), selection_weight(impact.gene_impact(g.id()), self.mwc.weighting())))
                    .collect()
            }
        };
        Ok(self
            .mwc
            .select_subset_with_weight(&weighted, true, self.config.weight_based_mutation_rate, rng))
    }

    /// Mutate `individual` up to `upper_bound` times, evaluating each offspring.
    /// An offspring replaces the current one when it reaches a new target or is
    /// not subsumed by it. Returns the last accepted individual.
    pub fn mutate_and_save<E: Evaluator>(
        &self,
        upper_bound: usize,
        individual: EvaluatedIndividual,
        archive: &mut Archive,
        evaluator: &mut E,
        focused_search: bool,
        rng: &mut Randomness,
    ) -> Result<EvaluatedIndividual> {
        let mut current = individual;
        for _ in 0..upper_bound {
            if !evaluator.should_continue_search() {
                break;
            }
            let (mutated, spec) = self.mutate(&current, focused_search, rng)?;
            let Some(mut evaluated) = evaluator.evaluate(mutated) else {
                continue;
            };

            let impactful = evaluated.fitness.differs_from(&current.fitness);
            let improved = evaluated.fitness.reach_more_than(&current.fitness);
            if let Some(impact) = current.impact.as_mut() {
                impact.update(&spec, impactful, improved);
                let mut inherited = impact.clone();
                inherited.retain_genes(&evaluated.individual.gene_ids());
                evaluated.impact = Some(inherited);
            }

            let reach_new = archive.would_reach_new_target(&evaluated);
            let accepted = reach_new || !current.fitness.subsumes(&evaluated.fitness);
            archive.add_if_needed(&evaluated)?;
            if accepted {
                trace!("mutation accepted (new target: {})", reach_new);
                current = evaluated;
            }
        }
        Ok(current)
    }
}
