//! Structured lookup over author, date, category and title keywords.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::retrieval::{RetrievalStrategy, SearchRequest, StrategyOutput};
use crate::traits::store::{ArticleStore, SortOrder};
use crate::types::article::ArticleRef;
use crate::types::config::{ArticleFilter, AuthorMatch};
use crate::types::query::{QueryCategory, QueryFilters};
use crate::types::retrieval::{sort_candidates, RetrievalCandidate};

/// Metadata-only retrieval. Candidates carry no score.
#[derive(Clone)]
pub struct MetadataStrategy {
    store: Arc<dyn ArticleStore>,
    author_match: AuthorMatch,
}

impl MetadataStrategy {
    pub fn new(store: Arc<dyn ArticleStore>, author_match: AuthorMatch) -> Self {
        Self {
            store,
            author_match,
        }
    }

    /// Store filter for classifier filters, using this strategy's author mode.
    pub fn filter_for(&self, filters: &QueryFilters) -> ArticleFilter {
        ArticleFilter::from_query(filters, self.author_match)
    }

    /// Articles matching every populated filter, newest first, at most `limit`.
    pub async fn search(
        &self,
        filters: &QueryFilters,
        limit: usize,
    ) -> Result<Vec<RetrievalCandidate>> {
        self.search_filter(&self.filter_for(filters), Some(limit))
            .await
    }

    /// Number of articles matching every populated filter.
    pub async fn count(&self, filters: &QueryFilters) -> Result<u64> {
        let filter = self.filter_for(filters);
        let count = self.store.count(&filter).await?;
        debug!(filter = ?filter, count, "Metadata count");
        Ok(count)
    }

    /// Run a prepared store filter.
    ///
    /// Reads article headers only. A candidate matched by a title keyword
    /// carries that keyword as its snippet.
    pub async fn search_filter(
        &self,
        filter: &ArticleFilter,
        limit: Option<usize>,
    ) -> Result<Vec<RetrievalCandidate>> {
        let refs = self.store.find_refs(filter, SortOrder::DateDesc, limit).await?;
        let mut candidates: Vec<RetrievalCandidate> =
            refs.iter().map(|r| to_candidate(r, filter)).collect();

        sort_candidates(&mut candidates);
        if let Some(limit) = limit {
            candidates.truncate(limit);
        }
        debug!(matches = candidates.len(), "Metadata search");
        Ok(candidates)
    }
}

fn to_candidate(article: &ArticleRef, filter: &ArticleFilter) -> RetrievalCandidate {
    let candidate = RetrievalCandidate::unscored(article.id.clone(), article.publication_date);
    match filter.matched_keyword(&article.title) {
        Some(keyword) => candidate.with_snippet(keyword),
        None => candidate,
    }
}

#[async_trait]
impl RetrievalStrategy for MetadataStrategy {
    fn kind(&self) -> QueryCategory {
        QueryCategory::Metadata
    }

    async fn retrieve(&self, request: &SearchRequest<'_>) -> Result<StrategyOutput> {
        let candidates = self.search(request.filters, request.limit).await?;
        let count = if request.count {
            Some(self.count(request.filters).await?)
        } else {
            None
        };
        Ok(StrategyOutput {
            count,
            ..StrategyOutput::from_candidates(candidates)
        })
    }
}
