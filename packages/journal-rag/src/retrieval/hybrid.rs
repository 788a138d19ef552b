//! Metadata pre-filter followed by semantic ranking inside the matches.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::retrieval::{
    MetadataStrategy, RetrievalStrategy, SearchRequest, SemanticStrategy, StrategyOutput,
};
use crate::types::config::{ArticleFilter, PartialFilterPolicy};
use crate::types::query::{QueryCategory, QueryFilters};
use crate::types::retrieval::RetrievalCandidate;

/// Upper bound on metadata matches used to restrict the semantic pass.
pub const METADATA_PREFILTER_CAP: usize = 10_000;

/// Output of one hybrid search.
#[derive(Debug, Clone, Default)]
pub struct HybridResults {
    pub candidates: Vec<RetrievalCandidate>,

    /// The filter matched nothing and a relaxed or unrestricted search ran instead
    pub filter_fallback: bool,

    pub skipped_embeddings: usize,
}

/// Hybrid retrieval.
#[derive(Clone)]
pub struct HybridStrategy {
    metadata: MetadataStrategy,
    semantic: SemanticStrategy,
    policy: PartialFilterPolicy,
}

impl HybridStrategy {
    pub fn new(
        metadata: MetadataStrategy,
        semantic: SemanticStrategy,
        policy: PartialFilterPolicy,
    ) -> Self {
        Self {
            metadata,
            semantic,
            policy,
        }
    }

    pub fn metadata(&self) -> &MetadataStrategy {
        &self.metadata
    }

    pub fn semantic(&self) -> &SemanticStrategy {
        &self.semantic
    }

    /// Filter, then rank the matches by similarity to `query_text`.
    ///
    /// When the filters match nothing, falls back to the full corpus and sets
    /// `filter_fallback`.
    pub async fn search(
        &self,
        filters: &QueryFilters,
        query_text: &str,
        limit: usize,
        min_score: f32,
    ) -> Result<HybridResults> {
        let query_embedding = self.semantic.embed_query(query_text).await?;
        let filter = self.metadata.filter_for(filters);
        self.search_embedded(&filter, &query_embedding, limit, min_score, true)
            .await
    }

    /// Hybrid search with a prepared filter and query embedding.
    ///
    /// With `fallback_to_corpus` false an empty filter match yields an empty
    /// result instead of an unrestricted search.
    pub async fn search_embedded(
        &self,
        filter: &ArticleFilter,
        query_embedding: &[f32],
        limit: usize,
        min_score: f32,
        fallback_to_corpus: bool,
    ) -> Result<HybridResults> {
        if filter.is_unrestricted() {
            let results = self
                .semantic
                .search_embedded(query_embedding, None, limit, min_score)
                .await?;
            return Ok(HybridResults {
                candidates: results.candidates,
                filter_fallback: false,
                skipped_embeddings: results.skipped_embeddings,
            });
        }

        let mut ids = self.matching_ids(filter).await?;
        let mut filter_fallback = false;

        if ids.is_empty() && self.policy == PartialFilterPolicy::Relax {
            for partial in filter.split_fields() {
                ids.extend(self.matching_ids(&partial).await?);
            }
            if !ids.is_empty() {
                warn!(
                    filter = ?filter,
                    relaxed_matches = ids.len(),
                    "No article matches every filter, using single-field matches"
                );
                filter_fallback = true;
            }
        }

        if ids.is_empty() {
            if !fallback_to_corpus {
                debug!(filter = ?filter, "Filters matched nothing");
                return Ok(HybridResults::default());
            }
            warn!(filter = ?filter, "Filters matched nothing, searching the full corpus");
            let results = self
                .semantic
                .search_embedded(query_embedding, None, limit, min_score)
                .await?;
            return Ok(HybridResults {
                candidates: results.candidates,
                filter_fallback: true,
                skipped_embeddings: results.skipped_embeddings,
            });
        }

        let results = self
            .semantic
            .search_embedded(query_embedding, Some(&ids), limit, min_score)
            .await?;
        debug!(
            prefiltered = ids.len(),
            matches = results.candidates.len(),
            filter_fallback,
            "Hybrid search"
        );
        Ok(HybridResults {
            candidates: results.candidates,
            filter_fallback,
            skipped_embeddings: results.skipped_embeddings,
        })
    }

    async fn matching_ids(&self, filter: &ArticleFilter) -> Result<HashSet<String>> {
        Ok(self
            .metadata
            .search_filter(filter, Some(METADATA_PREFILTER_CAP))
            .await?
            .into_iter()
            .map(|c| c.article_id)
            .collect())
    }
}

#[async_trait]
impl RetrievalStrategy for HybridStrategy {
    fn kind(&self) -> QueryCategory {
        QueryCategory::Hybrid
    }

    async fn retrieve(&self, request: &SearchRequest<'_>) -> Result<StrategyOutput> {
        let results = self
            .search(
                request.filters,
                request.query_text,
                request.limit,
                request.min_score,
            )
            .await?;

        let count = if request.count && !request.filters.is_empty() {
            Some(self.metadata.count(request.filters).await?)
        } else {
            None
        };

        Ok(StrategyOutput {
            candidates: results.candidates,
            filter_fallback: results.filter_fallback,
            count,
            skipped_embeddings: results.skipped_embeddings,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_store, MockEmbedder};
    use crate::types::config::AuthorMatch;
    use std::sync::Arc;

    fn strategy(policy: PartialFilterPolicy) -> HybridStrategy {
        let store = Arc::new(sample_store());
        let embedder = Arc::new(
            MockEmbedder::default()
                .with_embedding("energia", vec![1.0, 0.0, 0.0, 0.0])
                .with_embedding("Ucraina guerra", vec![0.0, 1.0, 0.0, 0.0]),
        );
        HybridStrategy::new(
            MetadataStrategy::new(store.clone(), AuthorMatch::CaseInsensitive),
            SemanticStrategy::new(store, embedder),
            policy,
        )
    }

    #[tokio::test]
    async fn test_restricts_to_filtered_articles() {
        let filters = QueryFilters::new().with_author("Mario Rossi");
        let results = strategy(PartialFilterPolicy::Strict)
            .search(&filters, "Ucraina guerra", 10, 0.0)
            .await
            .unwrap();
        assert!(!results.filter_fallback);
        assert_eq!(results.candidates[0].article_id, "rossi-2023-ucraina");
        assert!(results
            .candidates
            .iter()
            .all(|c| c.article_id.starts_with("rossi-")));
    }

    #[tokio::test]
    async fn test_zero_matches_equals_unrestricted_semantic() {
        let s = strategy(PartialFilterPolicy::Strict);
        let filters = QueryFilters::new()
            .with_author("Giulia Verdi")
            .with_categories(["energia"]);

        let hybrid = s.search(&filters, "energia", 10, 0.3).await.unwrap();
        let semantic = s.semantic().search("energia", None, 10, 0.3).await.unwrap();

        assert!(hybrid.filter_fallback);
        assert_eq!(hybrid.candidates, semantic.candidates);
    }

    #[tokio::test]
    async fn test_relax_policy_uses_single_field_matches() {
        let filters = QueryFilters::new()
            .with_author("Giulia Verdi")
            .with_categories(["energia"]);
        let results = strategy(PartialFilterPolicy::Relax)
            .search(&filters, "energia", 10, 0.0)
            .await
            .unwrap();

        assert!(results.filter_fallback);
        let ids: HashSet<_> = results
            .candidates
            .iter()
            .map(|c| c.article_id.as_str())
            .collect();
        let expected: HashSet<_> = [
            "verdi-2022-ucraina",
            "rossi-2021-energia",
            "bianchi-2023-rinnovabili",
        ]
        .into();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_no_corpus_fallback_when_disabled() {
        let s = strategy(PartialFilterPolicy::Strict);
        let filter = ArticleFilter {
            author: Some("Nessuno".into()),
            ..Default::default()
        };
        let results = s
            .search_embedded(&filter, &[1.0, 0.0, 0.0, 0.0], 10, 0.0, false)
            .await
            .unwrap();
        assert!(results.candidates.is_empty());
        assert!(!results.filter_fallback);
    }
}
