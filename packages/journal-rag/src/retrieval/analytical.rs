//! Cross-time retrieval: one hybrid search per calendar bucket.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::retrieval::{HybridStrategy, RetrievalStrategy, SearchRequest, StrategyOutput};
use crate::traits::store::ArticleStore;
use crate::types::query::{DateRange, QueryCategory, QueryFilters};
use crate::types::retrieval::{BucketResult, TimeBucket};

/// Bucket searches in flight at once.
pub const BUCKET_CONCURRENCY: usize = 8;

/// Per-bucket results for an analytical query.
#[derive(Debug, Clone, Default)]
pub struct AnalyticalResults {
    /// Chronological; buckets with no matches are kept
    pub buckets: Vec<BucketResult>,

    pub skipped_embeddings: usize,

    /// No usable date range could be established
    pub no_range: bool,
}

/// Analytical retrieval.
#[derive(Clone)]
pub struct AnalyticalStrategy {
    hybrid: HybridStrategy,
    store: Arc<dyn ArticleStore>,
    bucket: TimeBucket,
    bucket_limit: usize,
}

impl AnalyticalStrategy {
    pub fn new(
        hybrid: HybridStrategy,
        store: Arc<dyn ArticleStore>,
        bucket: TimeBucket,
        bucket_limit: usize,
    ) -> Self {
        Self {
            hybrid,
            store,
            bucket,
            bucket_limit,
        }
    }

    /// Split the query's date range into buckets and search each one.
    ///
    /// The filter range is intersected with the corpus span (open ends take
    /// the corpus bounds); without a filter range the whole span is used.
    /// Periods with no dated articles at all are never generated.
    pub async fn search(
        &self,
        filters: &QueryFilters,
        query_text: &str,
        time_bucket: TimeBucket,
        min_score: f32,
    ) -> Result<AnalyticalResults> {
        let Some((from, to)) = self.resolve_range(filters.date_range).await? else {
            warn!(
                requested = ?filters.date_range,
                "No dated articles in range, analytical search has no buckets"
            );
            return Ok(AnalyticalResults {
                no_range: true,
                ..Default::default()
            });
        };

        let periods = time_bucket.periods(from, to);
        let query_embedding = self.hybrid.semantic().embed_query(query_text).await?;
        let base = self.hybrid.metadata().filter_for(filters);

        let searches: Vec<_> = periods.iter().map(|period| {
            let filter = base
                .clone()
                .with_date_range(DateRange::new(Some(period.from), Some(period.to)));
            let embedding = &query_embedding;
            async move {
                self.hybrid
                    .search_embedded(&filter, embedding, self.bucket_limit, min_score, false)
                    .await
            }
        }).collect();

        let results: Vec<_> = stream::iter(searches)
            .buffered(BUCKET_CONCURRENCY)
            .collect()
            .await;

        let mut buckets = Vec::with_capacity(periods.len());
        let mut skipped = 0;
        for (period, result) in periods.iter().zip(results) {
            let result = result?;
            skipped = skipped.max(result.skipped_embeddings);
            buckets.push(BucketResult {
                label: period.label.clone(),
                from: period.from,
                to: period.to,
                candidates: result.candidates,
            });
        }

        info!(
            buckets = buckets.len(),
            non_empty = buckets.iter().filter(|b| !b.candidates.is_empty()).count(),
            "Analytical search complete"
        );

        Ok(AnalyticalResults {
            buckets,
            skipped_embeddings: skipped,
            no_range: false,
        })
    }

    async fn resolve_range(
        &self,
        requested: Option<DateRange>,
    ) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let Some((oldest, newest)) = self.store.get_date_range().await? else {
            return Ok(None);
        };
        let from = requested
            .and_then(|r| r.from)
            .map_or(oldest, |d| d.max(oldest));
        let to = requested.and_then(|r| r.to).map_or(newest, |d| d.min(newest));
        debug!(%from, %to, "Analytical range");
        Ok((from <= to).then_some((from, to)))
    }
}

#[async_trait]
impl RetrievalStrategy for AnalyticalStrategy {
    fn kind(&self) -> QueryCategory {
        QueryCategory::Analytical
    }

    async fn retrieve(&self, request: &SearchRequest<'_>) -> Result<StrategyOutput> {
        let results = self
            .search(
                request.filters,
                request.query_text,
                self.bucket,
                request.min_score,
            )
            .await?;

        let mut seen = std::collections::HashSet::new();
        let candidates = results
            .buckets
            .iter()
            .flat_map(|b| b.candidates.iter())
            .filter(|c| seen.insert(c.article_id.clone()))
            .cloned()
            .collect();

        Ok(StrategyOutput {
            candidates,
            buckets: results.buckets,
            skipped_embeddings: results.skipped_embeddings,
            degraded: results.no_range,
            ..Default::default()
        })
    }
}
