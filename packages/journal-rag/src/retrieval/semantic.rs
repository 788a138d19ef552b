//! Similarity ranking over whole-article embeddings.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::{RagError, Result};
use crate::retrieval::{RetrievalStrategy, SearchRequest, StrategyOutput};
use crate::traits::ai::Embedder;
use crate::traits::store::{cosine_similarity, ArticleStore};
use crate::types::article::EmbeddingEntry;
use crate::types::query::QueryCategory;
use crate::types::retrieval::{sort_candidates, RetrievalCandidate};

/// Corpus size above which scoring is split into batches on the blocking pool.
pub const SCORING_BATCH_SIZE: usize = 2048;

/// Ranked semantic matches plus the number of articles that could not be scored.
#[derive(Debug, Clone, Default)]
pub struct SemanticResults {
    pub candidates: Vec<RetrievalCandidate>,
    pub skipped_embeddings: usize,
}

/// Cosine-similarity retrieval.
#[derive(Clone)]
pub struct SemanticStrategy {
    store: Arc<dyn ArticleStore>,
    embedder: Arc<dyn Embedder>,
}

impl SemanticStrategy {
    pub fn new(store: Arc<dyn ArticleStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Embed the query text.
    ///
    /// Provider failures and wrong-sized vectors both surface as
    /// [`RagError::EmbeddingUnavailable`].
    pub async fn embed_query(&self, query_text: &str) -> Result<Vec<f32>> {
        let embedding = self
            .embedder
            .embed(query_text)
            .await
            .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?;

        let expected = self.embedder.dimension();
        if embedding.len() != expected {
            return Err(RagError::EmbeddingUnavailable(format!(
                "query embedding has {} components, provider declares {}",
                embedding.len(),
                expected
            )));
        }
        Ok(embedding)
    }

    /// Rank articles by similarity to `query_text`.
    ///
    /// With `candidate_ids` only those articles are scored. Matches below
    /// `min_score` are dropped; an empty result is returned as-is.
    pub async fn search(
        &self,
        query_text: &str,
        candidate_ids: Option<&HashSet<String>>,
        limit: usize,
        min_score: f32,
    ) -> Result<SemanticResults> {
        let query_embedding = self.embed_query(query_text).await?;
        self.search_embedded(&query_embedding, candidate_ids, limit, min_score)
            .await
    }

    /// Same as [`search`](Self::search) with a precomputed query embedding.
    pub async fn search_embedded(
        &self,
        query_embedding: &[f32],
        candidate_ids: Option<&HashSet<String>>,
        limit: usize,
        min_score: f32,
    ) -> Result<SemanticResults> {
        let expected = self.embedder.dimension();
        let mut skipped = 0usize;

        let entries: Vec<EmbeddingEntry> = self
            .store
            .all_embeddings()
            .await?
            .into_iter()
            .filter(|e| candidate_ids.map_or(true, |ids| ids.contains(&e.article_id)))
            .filter(|e| {
                if e.embedding.len() == expected {
                    return true;
                }
                let mismatch = RagError::EmbeddingDimensionMismatch {
                    article_id: e.article_id.clone(),
                    expected,
                    actual: e.embedding.len(),
                };
                warn!(error = %mismatch, "Skipping article in semantic ranking");
                skipped += 1;
                false
            })
            .collect();

        let scanned = entries.len();
        let mut candidates = score_entries(query_embedding, entries, min_score).await?;
        sort_candidates(&mut candidates);
        candidates.truncate(limit);

        debug!(
            scanned,
            matches = candidates.len(),
            skipped,
            restricted = candidate_ids.is_some(),
            "Semantic search"
        );

        Ok(SemanticResults {
            candidates,
            skipped_embeddings: skipped,
        })
    }
}

/// Score entries against the query, keeping those at or above `min_score`.
///
/// Large inputs are split into [`SCORING_BATCH_SIZE`] batches scored
/// concurrently on the blocking pool. Output order is not meaningful; callers sort.
async fn score_entries(
    query: &[f32],
    entries: Vec<EmbeddingEntry>,
    min_score: f32,
) -> Result<Vec<RetrievalCandidate>> {
    if entries.len() <= SCORING_BATCH_SIZE {
        return Ok(score_batch(query, &entries, min_score));
    }

    let query: Arc<[f32]> = Arc::from(query);
    let mut batches = Vec::new();
    let mut rest = entries;
    while !rest.is_empty() {
        let tail = rest.split_off(rest.len().min(SCORING_BATCH_SIZE));
        batches.push(std::mem::replace(&mut rest, tail));
    }

    let tasks = batches.into_iter().map(|batch| {
        let query = Arc::clone(&query);
        tokio::task::spawn_blocking(move || score_batch(&query, &batch, min_score))
    });

    let mut candidates = Vec::new();
    for joined in join_all(tasks).await {
        let scored =
            joined.map_err(|e| RagError::store(format!("scoring task failed: {e}")))?;
        candidates.extend(scored);
    }
    Ok(candidates)
}

fn score_batch(query: &[f32], entries: &[EmbeddingEntry], min_score: f32) -> Vec<RetrievalCandidate> {
    entries
        .iter()
        .filter_map(|entry| {
            let score = cosine_similarity(query, &entry.embedding);
            (score >= min_score).then(|| {
                RetrievalCandidate::scored(entry.article_id.clone(), score, entry.publication_date)
            })
        })
        .collect()
}

#[async_trait]
impl RetrievalStrategy for SemanticStrategy {
    fn kind(&self) -> QueryCategory {
        QueryCategory::Semantic
    }

    async fn retrieve(&self, request: &SearchRequest<'_>) -> Result<StrategyOutput> {
        let results = self
            .search(request.query_text, None, request.limit, request.min_score)
            .await?;
        Ok(StrategyOutput {
            skipped_embeddings: results.skipped_embeddings,
            ..StrategyOutput::from_candidates(results.candidates)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::testing::{sample_store, MockEmbedder};
    use crate::types::article::Article;

    fn strategy(embedder: MockEmbedder) -> SemanticStrategy {
        SemanticStrategy::new(Arc::new(sample_store()), Arc::new(embedder))
    }

    #[tokio::test]
    async fn test_ranks_by_similarity() {
        let embedder = MockEmbedder::default().with_embedding("energia", vec![1.0, 0.0, 0.0, 0.0]);
        let results = strategy(embedder)
            .search("energia", None, 10, 0.5)
            .await
            .unwrap();
        let ids: Vec<_> = results
            .candidates
            .iter()
            .map(|c| c.article_id.as_str())
            .collect();
        assert_eq!(ids, vec!["bianchi-2023-rinnovabili", "rossi-2021-energia"]);
        assert!(results.candidates.iter().all(|c| c.score.unwrap() >= 0.5));
    }

    #[tokio::test]
    async fn test_min_score_drops_weak_matches() {
        let store = MemoryStore::with_articles([
            Article::new("A", "a", "").with_embedding(vec![0.4, (1.0f32 - 0.16).sqrt()]),
            Article::new("B", "b", "").with_embedding(vec![0.1, (1.0f32 - 0.01).sqrt()]),
        ]);
        let embedder = MockEmbedder::new(2).with_embedding("q", vec![1.0, 0.0]);
        let semantic = SemanticStrategy::new(Arc::new(store), Arc::new(embedder));

        let results = semantic.search("q", None, 10, 0.2).await.unwrap();
        assert_eq!(results.candidates.len(), 1);
        assert_eq!(results.candidates[0].article_id, "A");
        assert!((results.candidates[0].score.unwrap() - 0.4).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_restricted_search_only_scores_candidates() {
        let embedder = MockEmbedder::default().with_embedding("guerra", vec![0.0, 1.0, 0.0, 0.0]);
        let ids: HashSet<String> = ["rossi-2023-ucraina".to_string()].into();
        let results = strategy(embedder)
            .search("guerra", Some(&ids), 10, 0.0)
            .await
            .unwrap();
        assert_eq!(results.candidates.len(), 1);
        assert_eq!(results.candidates[0].article_id, "rossi-2023-ucraina");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_skipped() {
        let store = sample_store();
        store
            .insert_article(Article::new("legacy", "Vecchio", "").with_embedding(vec![1.0; 8]))
            .unwrap();
        let embedder = MockEmbedder::default().with_embedding("energia", vec![1.0, 0.0, 0.0, 0.0]);
        let semantic = SemanticStrategy::new(Arc::new(store), Arc::new(embedder));

        let results = semantic.search("energia", None, 10, 0.0).await.unwrap();
        assert_eq!(results.skipped_embeddings, 1);
        assert!(results
            .candidates
            .iter()
            .all(|c| c.article_id != "legacy"));
    }

    #[tokio::test]
    async fn test_embedder_failure_is_fatal() {
        let err = strategy(MockEmbedder::default().failing())
            .search("energia", None, 10, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmbeddingUnavailable(_)));
    }

    #[tokio::test]
    async fn test_batched_scoring_matches_sequential() {
        let articles: Vec<Article> = (0..SCORING_BATCH_SIZE * 2 + 7)
            .map(|i| {
                let x = (i % 97) as f32 / 97.0;
                Article::new(format!("art-{i:05}"), "t", "").with_embedding(vec![x, 1.0 - x])
            })
            .collect();
        let store = MemoryStore::with_articles(articles);
        let embedder = MockEmbedder::new(2).with_embedding("q", vec![1.0, 0.0]);
        let semantic = SemanticStrategy::new(Arc::new(store), Arc::new(embedder));

        let batched = semantic.search("q", None, 50, 0.1).await.unwrap();
        let entries = semantic.store.all_embeddings().await.unwrap();
        let mut sequential = score_batch(&[1.0, 0.0], &entries, 0.1);
        sort_candidates(&mut sequential);
        sequential.truncate(50);

        assert_eq!(batched.candidates, sequential);
    }
}
