//! Article types - full-length articles and their metadata.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Bibliographic metadata for an article.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleMetadata {
    pub title: String,

    pub author: String,

    /// Publication date, when known
    pub publication_date: Option<NaiveDate>,

    /// Topic categories assigned at ingestion
    #[serde(default)]
    pub categories: BTreeSet<String>,

    pub translator: Option<String>,

    /// Journal or outlet name
    pub source: Option<String>,

    /// Issue number within the source
    pub number: Option<i64>,

    pub url: Option<String>,
}

/// A complete article as persisted by ingestion.
///
/// Articles are never split: `content` is the full text and `embedding`
/// covers the whole article. Records are immutable once stored; a change
/// means re-ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Stable identifier
    pub id: String,

    pub metadata: ArticleMetadata,

    /// Full article text
    pub content: String,

    /// Whole-article embedding computed at ingestion
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl Article {
    /// Create a new article with empty metadata.
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: ArticleMetadata {
                title: title.into(),
                ..Default::default()
            },
            content: content.into(),
            embedding: None,
        }
    }

    /// Set the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.metadata.author = author.into();
        self
    }

    /// Set the publication date.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.metadata.publication_date = Some(date);
        self
    }

    /// Add categories.
    pub fn with_categories(mut self, categories: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.metadata
            .categories
            .extend(categories.into_iter().map(|c| c.into()));
        self
    }

    /// Set the source outlet.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    /// Set the article URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.metadata.url = Some(url.into());
        self
    }

    /// Set the embedding.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Number of whitespace-separated words in the content.
    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }

    /// Publication date formatted for prompts and display.
    pub fn date_label(&self) -> String {
        self.metadata
            .publication_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "N/A".to_string())
    }
}

/// Header of a stored article: what metadata retrieval needs, without the
/// body or embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRef {
    pub id: String,
    pub title: String,
    pub publication_date: Option<NaiveDate>,
}

impl From<&Article> for ArticleRef {
    fn from(article: &Article) -> Self {
        Self {
            id: article.id.clone(),
            title: article.metadata.title.clone(),
            publication_date: article.metadata.publication_date,
        }
    }
}

/// An article id and its stored embedding, as read for semantic ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingEntry {
    pub article_id: String,
    pub publication_date: Option<NaiveDate>,
    pub embedding: Vec<f32>,
}

/// Aggregate statistics over the stored corpus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusStatistics {
    pub total_articles: u64,
    pub unique_authors: u64,
    pub oldest: Option<NaiveDate>,
    pub newest: Option<NaiveDate>,
}
