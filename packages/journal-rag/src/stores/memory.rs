//! In-memory article store for testing and development.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{RagError, Result};
use crate::traits::store::{compare_by_date, ArticleStore, SortOrder};
use crate::types::{
    article::{Article, ArticleRef, CorpusStatistics, EmbeddingEntry},
    config::ArticleFilter,
};

/// In-memory storage for articles.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart.
pub struct MemoryStore {
    articles: RwLock<HashMap<String, Article>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            articles: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store pre-loaded with articles.
    pub fn with_articles(articles: impl IntoIterator<Item = Article>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.articles.write() {
            map.extend(articles.into_iter().map(|a| (a.id.clone(), a)));
        }
        store
    }

    /// Insert or replace an article.
    pub fn insert_article(&self, article: Article) -> Result<()> {
        self.write()?.insert(article.id.clone(), article);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Article>>> {
        self.articles
            .read()
            .map_err(|_| RagError::store("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Article>>> {
        self.articles
            .write()
            .map_err(|_| RagError::store("memory store lock poisoned"))
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn find(
        &self,
        filter: &ArticleFilter,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<Article>> {
        let mut matches: Vec<Article> = self
            .read()?
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();

        matches.sort_by(|a, b| compare_by_date(a, b, order));
        if let Some(limit) = limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn find_refs(
        &self,
        filter: &ArticleFilter,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<ArticleRef>> {
        let articles = self.read()?;
        let mut matches: Vec<&Article> = articles.values().filter(|a| filter.matches(a)).collect();
        matches.sort_by(|a, b| compare_by_date(a, b, order));
        Ok(matches
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(ArticleRef::from)
            .collect())
    }

    async fn count(&self, filter: &ArticleFilter) -> Result<u64> {
        Ok(self.read()?.values().filter(|a| filter.matches(a)).count() as u64)
    }

    async fn all_embeddings(&self) -> Result<Vec<EmbeddingEntry>> {
        let mut entries: Vec<EmbeddingEntry> = self
            .read()?
            .values()
            .filter_map(|a| {
                a.embedding.as_ref().map(|e| EmbeddingEntry {
                    article_id: a.id.clone(),
                    publication_date: a.metadata.publication_date,
                    embedding: e.clone(),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.article_id.cmp(&b.article_id));
        Ok(entries)
    }

    async fn get_date_range(&self) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let articles = self.read()?;
        let mut dates = articles.values().filter_map(|a| a.metadata.publication_date);
        let Some(first) = dates.next() else {
            return Ok(None);
        };
        let (min, max) = dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d)));
        Ok(Some((min, max)))
    }

    async fn get_articles(&self, ids: &[String]) -> Result<Vec<Article>> {
        let articles = self.read()?;
        Ok(ids.iter().filter_map(|id| articles.get(id).cloned()).collect())
    }

    async fn authors(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .read()?
            .values()
            .map(|a| a.metadata.author.clone())
            .filter(|a| !a.is_empty())
            .collect())
    }

    async fn statistics(&self) -> Result<CorpusStatistics> {
        let range = self.get_date_range().await?;
        let articles = self.read()?;
        let authors: BTreeSet<&str> = articles
            .values()
            .map(|a| a.metadata.author.as_str())
            .filter(|a| !a.is_empty())
            .collect();

        Ok(CorpusStatistics {
            total_articles: articles.len() as u64,
            unique_authors: authors.len() as u64,
            oldest: range.map(|(lo, _)| lo),
            newest: range.map(|(_, hi)| hi),
        })
    }
}
