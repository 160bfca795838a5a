use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one coverage objective
pub type TargetId = u32;

static NEXT_GENE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_PK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a gene inside one individual.
///
/// Copies keep the id of their original, so a binding expressed as a set of
/// ids resolves to the copied genes when looked up in the copied individual.
/// Freshly built genes always get a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeneId(pub u64);

impl GeneId {
    pub fn fresh() -> Self {
        GeneId(NEXT_GENE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Unique id carried by SQL primary key genes and referenced by foreign keys
pub fn fresh_primary_key_id() -> u64 {
    NEXT_PK_ID.fetch_add(1, Ordering::Relaxed)
}

/// How internal genes are chosen when a composite gene is mutated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubsetGeneSelectionStrategy {
    Default,
    DeterministicWeight,
    AdaptiveWeight,
}

impl std::fmt::Display for SubsetGeneSelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubsetGeneSelectionStrategy::Default => "DEFAULT",
            SubsetGeneSelectionStrategy::DeterministicWeight => "DETERMINISTIC_WEIGHT",
            SubsetGeneSelectionStrategy::AdaptiveWeight => "ADAPTIVE_WEIGHT",
        };
        write!(f, "{}", s)
    }
}

/// How impact records are turned into selection weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImpactWeighting {
    /// Number of times a manipulation improved any of the targets
    Counter,
    /// Improvements divided by manipulations
    Ratio,
}

/// Which part of an individual to look at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneFilter {
    All,
    NoInit,
    OnlyInit,
}
