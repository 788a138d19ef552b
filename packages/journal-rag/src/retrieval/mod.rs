//! Retrieval strategies.
//!
//! Four execution paths share one capability, [`RetrievalStrategy`]:
//! - [`MetadataStrategy`]: structured lookup, optionally count-only
//! - [`SemanticStrategy`]: cosine ranking over stored embeddings
//! - [`HybridStrategy`]: metadata pre-filter, then restricted semantic ranking
//! - [`AnalyticalStrategy`]: per-period hybrid retrieval over time buckets

pub mod analytical;
pub mod hybrid;
pub mod metadata;
pub mod semantic;

pub use analytical::AnalyticalStrategy;
pub use hybrid::HybridStrategy;
pub use metadata::MetadataStrategy;
pub use semantic::SemanticStrategy;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::query::{QueryCategory, QueryFilters};
use crate::types::retrieval::{BucketResult, RetrievalCandidate};

/// Everything a strategy needs to run one search.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    /// Text to embed (the classifier's reformulation or the raw query)
    pub query_text: &'a str,

    pub filters: &'a QueryFilters,

    pub limit: usize,

    pub min_score: f32,

    /// Also compute the total number of metadata matches
    pub count: bool,
}

/// Raw result of one strategy run, before the router assembles an outcome.
#[derive(Debug, Clone, Default)]
pub struct StrategyOutput {
    pub candidates: Vec<RetrievalCandidate>,
    pub filter_fallback: bool,
    pub count: Option<u64>,
    pub buckets: Vec<BucketResult>,
    pub skipped_embeddings: usize,

    /// The strategy itself could not do its job fully (e.g. no dated articles)
    pub degraded: bool,
}

impl StrategyOutput {
    pub fn from_candidates(candidates: Vec<RetrievalCandidate>) -> Self {
        Self {
            candidates,
            ..Default::default()
        }
    }
}

/// One way of turning a classified query into ranked candidates.
#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    /// The query category this strategy serves.
    fn kind(&self) -> QueryCategory;

    /// Run the search.
    async fn retrieve(&self, request: &SearchRequest<'_>) -> Result<StrategyOutput>;
}
