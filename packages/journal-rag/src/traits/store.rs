//! Article storage trait.
//!
//! The core only reads from the store. Writes (ingestion) go through the
//! concrete backends and are atomic per article.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::types::{
    article::{Article, ArticleRef, CorpusStatistics, EmbeddingEntry},
    config::ArticleFilter,
};

/// Result ordering for [`ArticleStore::find`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Newest first, undated last
    #[default]
    DateDesc,

    /// Oldest first, undated last
    DateAsc,
}

/// Read access to stored articles.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Find articles matching a filter.
    ///
    /// Ties on date are broken by id ascending. `limit` is applied after
    /// sorting.
    async fn find(
        &self,
        filter: &ArticleFilter,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<Article>>;

    /// Like [`find`](Self::find), returning only article headers.
    ///
    /// Backends should override this to skip loading bodies and embeddings.
    async fn find_refs(
        &self,
        filter: &ArticleFilter,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<ArticleRef>> {
        Ok(self
            .find(filter, order, limit)
            .await?
            .iter()
            .map(ArticleRef::from)
            .collect())
    }

    /// Count articles matching a filter.
    async fn count(&self, filter: &ArticleFilter) -> Result<u64>;

    /// Every stored embedding with its article id.
    async fn all_embeddings(&self) -> Result<Vec<EmbeddingEntry>>;

    /// Earliest and latest publication dates, or None when nothing is dated.
    async fn get_date_range(&self) -> Result<Option<(NaiveDate, NaiveDate)>>;

    /// Fetch articles by id. Unknown ids are skipped.
    async fn get_articles(&self, ids: &[String]) -> Result<Vec<Article>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = ArticleFilter::new().with_ids(ids.iter().cloned());
        self.find(&filter, SortOrder::DateDesc, None).await
    }

    /// Fetch a single article.
    async fn get_article(&self, id: &str) -> Result<Option<Article>> {
        Ok(self
            .get_articles(&[id.to_string()])
            .await?
            .into_iter()
            .next())
    }

    /// Corpus totals.
    async fn statistics(&self) -> Result<CorpusStatistics>;

    /// Distinct author names.
    async fn authors(&self) -> Result<BTreeSet<String>> {
        let articles = self.find(&ArticleFilter::new(), SortOrder::DateDesc, None).await?;
        Ok(articles
            .into_iter()
            .map(|a| a.metadata.author)
            .filter(|a| !a.is_empty())
            .collect())
    }
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Compare two articles for [`SortOrder`], undated last and ids ascending on ties.
pub fn compare_by_date(a: &Article, b: &Article, order: SortOrder) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let by_date = match (a.metadata.publication_date, b.metadata.publication_date) {
        (Some(da), Some(db)) => match order {
            SortOrder::DateDesc => db.cmp(&da),
            SortOrder::DateAsc => da.cmp(&db),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_date.then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_compare_by_date_undated_last() {
        let old = Article::new("b", "old", "").with_date(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        let new = Article::new("c", "new", "").with_date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let undated = Article::new("a", "undated", "");

        let mut articles = vec![undated.clone(), old.clone(), new.clone()];
        articles.sort_by(|x, y| compare_by_date(x, y, SortOrder::DateDesc));
        let ids: Vec<_> = articles.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        articles.sort_by(|x, y| compare_by_date(x, y, SortOrder::DateAsc));
        let ids: Vec<_> = articles.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }
}
