//! The engine - main entry point for answering questions.
//!
//! Owns the shared store, embedder and language model and runs each query
//! through classify → route → synthesize. Queries are independent; nothing
//! is carried between calls.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::error::{RagError, Result};
use crate::pipeline::{AnswerSynthesizer, QueryClassifier, QueryRouter};
use crate::traits::{
    ai::{Embedder, LanguageModel},
    store::ArticleStore,
};
use crate::types::{
    answer::AnswerResult,
    article::CorpusStatistics,
    config::RagConfig,
    query::QueryClassification,
    retrieval::RetrievalOutcome,
};

/// Question answering over a journal article archive.
///
/// # Example
///
/// ```rust,ignore
/// let rag = JournalRag::new(store, embedder, model);
///
/// let answer = rag.query("Quanti articoli ha scritto Mario Rossi?").await?;
/// println!("{} {:?}", answer.text, answer.citations);
/// ```
pub struct JournalRag {
    store: Arc<dyn ArticleStore>,
    classifier: QueryClassifier,
    router: QueryRouter,
    synthesizer: AnswerSynthesizer,
    config: RagConfig,
}

impl JournalRag {
    /// Create an engine with the default configuration.
    pub fn new(
        store: Arc<dyn ArticleStore>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self::build(store, embedder, model, RagConfig::default())
    }

    /// Create with custom configuration. Fails if the configuration is invalid.
    pub fn with_config(
        store: Arc<dyn ArticleStore>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
        config: RagConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(store, embedder, model, config))
    }

    fn build(
        store: Arc<dyn ArticleStore>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
        config: RagConfig,
    ) -> Self {
        Self {
            classifier: QueryClassifier::new(model.clone(), &config),
            router: QueryRouter::new(store.clone(), embedder, config.clone()),
            synthesizer: AnswerSynthesizer::new(model, &config),
            store,
            config,
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ArticleStore> {
        &self.store
    }

    // =========================================================================
    // Primitives
    // =========================================================================

    /// Classify a query without retrieving anything. Never fails.
    pub async fn classify(&self, query: &str) -> QueryClassification {
        self.classifier.classify(query).await
    }

    /// Classify and retrieve, skipping synthesis.
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalOutcome> {
        let classification = self.classify(query).await;
        self.router.route(&classification, query).await
    }

    /// Retrieve for an existing classification.
    pub async fn retrieve_classified(
        &self,
        classification: &QueryClassification,
        query: &str,
    ) -> Result<RetrievalOutcome> {
        self.router.route(classification, query).await
    }

    /// Corpus-wide statistics from the store.
    pub async fn statistics(&self) -> Result<CorpusStatistics> {
        self.store.statistics().await
    }

    // =========================================================================
    // High-Level API
    // =========================================================================

    /// Full pipeline: classify, retrieve, synthesize.
    ///
    /// Retrieval errors (embedding provider down, store failure) are returned;
    /// classifier and synthesis model failures are absorbed into the result.
    pub async fn query(&self, query: &str) -> Result<AnswerResult> {
        let query_id = Uuid::new_v4();
        let span = info_span!("query", %query_id);
        self.run(query).instrument(span).await
    }

    /// Run [`query`](Self::query), aborting when `cancel` fires.
    pub async fn query_with_cancel(
        &self,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<AnswerResult> {
        tokio::select! {
            result = self.query(query) => result,
            _ = cancel.cancelled() => Err(RagError::Cancelled),
        }
    }

    async fn run(&self, query: &str) -> Result<AnswerResult> {
        debug!(query = %query, "Answering query");

        let classification = self.classifier.classify(query).await;
        let outcome = self.router.route(&classification, query).await?;

        let ids: Vec<String> = self
            .synthesizer
            .context_candidates(&outcome)
            .iter()
            .map(|c| c.article_id.clone())
            .collect();
        let articles = if ids.is_empty() {
            Vec::new()
        } else {
            self.store.get_articles(&ids).await?
        };

        let answer = self
            .synthesizer
            .synthesize(query, &classification, &outcome, &articles)
            .await;

        info!(
            category = ?classification.category,
            strategy = ?answer.strategy_used,
            status = ?answer.status,
            citations = answer.citations.len(),
            confidence = answer.confidence,
            "Query answered"
        );
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_store, MockEmbedder, MockLanguageModel};
    use crate::types::answer::AnswerStatus;
    use crate::types::query::QueryCategory;
    use std::time::Duration;

    fn engine(model: MockLanguageModel) -> JournalRag {
        JournalRag::new(
            Arc::new(sample_store()),
            Arc::new(MockEmbedder::default()),
            Arc::new(model),
        )
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = JournalRag::with_config(
            Arc::new(sample_store()),
            Arc::new(MockEmbedder::default()),
            Arc::new(MockLanguageModel::new()),
            RagConfig::default().with_max_results(0),
        );
        assert!(matches!(result, Err(RagError::Config { .. })));
    }

    #[tokio::test]
    async fn test_empty_query_returns_no_matches() {
        let model = MockLanguageModel::new();
        let rag = engine(model.clone());

        let answer = rag.query("   ").await.unwrap();
        assert_eq!(answer.status, AnswerStatus::NoMatches);
        assert_eq!(answer.confidence, 0.0);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_statistics() {
        let stats = engine(MockLanguageModel::new()).statistics().await.unwrap();
        assert_eq!(stats.total_articles, 6);
        assert_eq!(stats.unique_authors, 4);
    }

    #[tokio::test]
    async fn test_cancelled_query() {
        let model = MockLanguageModel::new().with_delay(Duration::from_secs(5));
        let rag = engine(model);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = rag
            .query_with_cancel("Cosa scrive Mario Rossi?", cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Cancelled));
    }

    #[tokio::test]
    async fn test_retrieve_skips_synthesis() {
        let model = MockLanguageModel::new().with_reply(
            r#"{"category": "metadata", "confidence": 0.9, "requires_count": true, "filters": {"author": "Mario Rossi"}}"#,
        );
        let rag = engine(model.clone());

        let outcome = rag.retrieve("Quanti articoli ha scritto Mario Rossi?").await.unwrap();
        assert_eq!(outcome.strategy_used, QueryCategory::Metadata);
        assert_eq!(outcome.count, Some(3));
        assert_eq!(model.call_count(), 1);
    }
}
