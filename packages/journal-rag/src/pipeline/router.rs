//! Query routing: classification in, retrieval outcome out.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Result;
use crate::retrieval::{
    AnalyticalStrategy, HybridStrategy, MetadataStrategy, RetrievalStrategy, SearchRequest,
    SemanticStrategy,
};
use crate::traits::{ai::Embedder, store::ArticleStore};
use crate::types::config::RagConfig;
use crate::types::query::{QueryCategory, QueryClassification};
use crate::types::retrieval::RetrievalOutcome;

/// Dispatches a classified query to its retrieval strategy.
pub struct QueryRouter {
    metadata: MetadataStrategy,
    semantic: SemanticStrategy,
    hybrid: HybridStrategy,
    analytical: AnalyticalStrategy,
    config: RagConfig,
}

impl QueryRouter {
    /// Build the four strategies over shared resources.
    pub fn new(store: Arc<dyn ArticleStore>, embedder: Arc<dyn Embedder>, config: RagConfig) -> Self {
        let metadata = MetadataStrategy::new(store.clone(), config.author_match);
        let semantic = SemanticStrategy::new(store.clone(), embedder);
        let hybrid = HybridStrategy::new(
            metadata.clone(),
            semantic.clone(),
            config.partial_filter_policy,
        );
        let analytical = AnalyticalStrategy::new(
            hybrid.clone(),
            store,
            config.analytical_time_bucket,
            config.analytical_bucket_limit,
        );
        Self {
            metadata,
            semantic,
            hybrid,
            analytical,
            config,
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The strategy serving a category.
    pub fn strategy_for(&self, category: QueryCategory) -> &dyn RetrievalStrategy {
        match category {
            QueryCategory::Metadata => &self.metadata,
            QueryCategory::Semantic => &self.semantic,
            QueryCategory::Hybrid => &self.hybrid,
            QueryCategory::Analytical => &self.analytical,
        }
    }

    /// Category that will actually run.
    ///
    /// Semantic queries carrying filters run as hybrid only when
    /// `semantic_filter_hint` is enabled.
    pub fn effective_category(&self, classification: &QueryClassification) -> QueryCategory {
        match classification.category {
            QueryCategory::Semantic
                if self.config.semantic_filter_hint && !classification.filters.is_empty() =>
            {
                QueryCategory::Hybrid
            }
            category => category,
        }
    }

    /// Execute the retrieval a classification calls for.
    pub async fn route(
        &self,
        classification: &QueryClassification,
        raw_query: &str,
    ) -> Result<RetrievalOutcome> {
        let category = self.effective_category(classification);
        let query_text = classification.search_text(raw_query);

        if category != QueryCategory::Metadata && query_text.trim().is_empty() {
            debug!(category = ?category, "Nothing to embed, returning empty outcome");
            return Ok(RetrievalOutcome::empty(category));
        }

        let request = SearchRequest {
            query_text,
            filters: &classification.filters,
            limit: self.config.max_results,
            min_score: self.config.min_similarity_score,
            count: classification.requires_count,
        };

        let strategy = self.strategy_for(category);
        debug!(
            strategy = ?strategy.kind(),
            query = %query_text,
            filters = ?classification.filters,
            "Routing query"
        );
        let output = strategy.retrieve(&request).await?;

        let degraded = output.degraded || output.filter_fallback || output.candidates.is_empty();
        info!(
            strategy = ?category,
            candidates = output.candidates.len(),
            degraded,
            filter_fallback = output.filter_fallback,
            count = ?output.count,
            "Retrieval complete"
        );

        Ok(RetrievalOutcome {
            candidates: output.candidates,
            strategy_used: category,
            degraded,
            filter_fallback: output.filter_fallback,
            count: output.count,
            buckets: output.buckets,
            skipped_embeddings: output.skipped_embeddings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_store, MockEmbedder};
    use crate::types::query::QueryFilters;

    fn router(config: RagConfig) -> QueryRouter {
        let embedder = MockEmbedder::default()
            .with_embedding("energia rinnovabile", vec![1.0, 0.0, 0.0, 0.0])
            .with_embedding("guerra", vec![0.0, 1.0, 0.0, 0.0]);
        QueryRouter::new(Arc::new(sample_store()), Arc::new(embedder), config)
    }

    #[test]
    fn test_dispatch_table_covers_every_category() {
        let r = router(RagConfig::default());
        for category in QueryCategory::ALL {
            assert_eq!(r.strategy_for(category).kind(), category);
        }
    }

    #[tokio::test]
    async fn test_metadata_count_route() {
        let classification = QueryClassification::new(
            QueryCategory::Metadata,
            QueryFilters::new().with_author("Mario Rossi"),
            0.95,
        )
        .counting();
        let outcome = router(RagConfig::default())
            .route(&classification, "Quanti articoli ha scritto Mario Rossi?")
            .await
            .unwrap();
        assert_eq!(outcome.strategy_used, QueryCategory::Metadata);
        assert_eq!(outcome.count, Some(3));
        assert_eq!(outcome.candidates.len(), 3);
        assert!(!outcome.degraded);
    }

    #[tokio::test]
    async fn test_semantic_ignores_filters_without_hint() {
        let mut classification = QueryClassification::new(
            QueryCategory::Semantic,
            QueryFilters::new().with_author("Giulia Verdi"),
            0.9,
        );
        classification.semantic_query = Some("energia rinnovabile".into());

        let outcome = router(RagConfig::default())
            .route(&classification, "energia")
            .await
            .unwrap();
        assert_eq!(outcome.strategy_used, QueryCategory::Semantic);
        assert_eq!(outcome.candidates[0].article_id, "bianchi-2023-rinnovabili");

        let hinted = router(
            RagConfig::default()
                .with_semantic_filter_hint()
                .with_min_similarity_score(0.1),
        );
        let outcome = hinted.route(&classification, "energia").await.unwrap();
        assert_eq!(outcome.strategy_used, QueryCategory::Hybrid);
        assert_eq!(outcome.article_ids(), vec!["verdi-2022-ucraina"]);
    }

    #[tokio::test]
    async fn test_empty_result_is_degraded() {
        let classification =
            QueryClassification::new(QueryCategory::Semantic, QueryFilters::new(), 0.9);
        let outcome = router(RagConfig::default().with_min_similarity_score(1.0))
            .route(&classification, "guerra")
            .await
            .unwrap();
        assert!(outcome.candidates.is_empty());
        assert!(outcome.degraded);
        assert!(!outcome.filter_fallback);
    }

    #[tokio::test]
    async fn test_analytical_route_returns_buckets() {
        let classification =
            QueryClassification::new(QueryCategory::Analytical, QueryFilters::new(), 0.8);
        let outcome = router(RagConfig::default().with_min_similarity_score(0.5))
            .route(&classification, "guerra")
            .await
            .unwrap();
        assert_eq!(outcome.buckets.len(), 3);
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(outcome.strategy_used, QueryCategory::Analytical);
    }
}
