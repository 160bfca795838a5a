use super::impact::ImpactInfo;
use super::weight_control::MutationWeightControl;
use crate::error::{EngineError, Result};
use crate::genome::Gene;
use crate::types::{GeneId, SubsetGeneSelectionStrategy};
use crate::utils::randomness::Randomness;
use log::debug;

/// Extra attempts allowed when a mutated gene fails its post-condition
pub const MAX_MUTATION_CHECK_RETRIES: usize = 3;

/// Everything a recursive gene mutation needs besides the gene itself
pub struct GeneMutationContext<'a> {
    pub rng: &'a mut Randomness,
    pub mwc: &'a MutationWeightControl,
    pub strategy: SubsetGeneSelectionStrategy,
    pub impact: Option<&'a ImpactInfo>,
    /// Ids of the genes whose value changed, innermost first
    pub mutated: Vec<GeneId>,
}

impl<'a> GeneMutationContext<'a> {
    pub fn new(
        rng: &'a mut Randomness,
        mwc: &'a MutationWeightControl,
        strategy: SubsetGeneSelectionStrategy,
        impact: Option<&'a ImpactInfo>,
    ) -> Self {
        Self {
            rng,
            mwc,
            strategy,
            impact,
            mutated: Vec::new(),
        }
    }
}

/// Mutate `gene`, delegating to a selected subset of its inner genes when it has any.
///
/// Binding genes are not synchronized here: they may live anywhere in the
/// individual, so the caller syncs from the mutated gene afterwards.
pub fn standard_mutation(gene: &mut Gene, ctx: &mut GeneMutationContext<'_>) -> Result<()> {
    gene.check_initialized()?;

    let candidates = gene.candidates_internal_genes(ctx.rng);
    if candidates.is_empty() {
        if !gene.mutate(ctx.rng) {
            return Err(EngineError::UnimplementedLeafMutation(format!(
                "{} ({})",
                gene.name(),
                gene.type_name()
            )));
        }
        ctx.mutated.push(gene.id());
        return Ok(());
    }

    let selected = {
        let children = gene.children();
        let refs: Vec<&Gene> = candidates.iter().map(|i| &children[*i]).collect();
        ctx.mwc
            .select_sub_genes(&refs, ctx.strategy, ctx.impact, ctx.rng)?
            .into_iter()
            .map(|i| candidates[i])
            .collect::<Vec<_>>()
    };

    for index in selected {
        let mut attempts = 0;
        loop {
            standard_mutation(&mut gene.children_mut()[index], ctx)?;
            attempts += 1;
            if gene.mutation_check() || attempts > MAX_MUTATION_CHECK_RETRIES {
                break;
            }
        }
        if !gene.mutation_check() {
            debug!(
                "{} still invalid after {} attempts, repairing",
                gene.name(),
                attempts
            );
            gene.repair();
        }
    }
    ctx.mutated.push(gene.id());
    Ok(())
}
