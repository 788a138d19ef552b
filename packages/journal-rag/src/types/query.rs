//! Query classification types.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// How a query should be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryCategory {
    /// Structured lookup over author/date/category ("how many articles by X?")
    Metadata,

    /// Similarity over article content ("what do articles say about X?")
    Semantic,

    /// Metadata pre-filter followed by semantic ranking
    Hybrid,

    /// Cross-time aggregation ("how did coverage of X change over the years?")
    Analytical,
}

impl QueryCategory {
    /// All categories, in prompt order.
    pub const ALL: [QueryCategory; 4] = [
        QueryCategory::Metadata,
        QueryCategory::Semantic,
        QueryCategory::Hybrid,
        QueryCategory::Analytical,
    ];

    /// Parse a category name as emitted by the model (case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "metadata" => Some(QueryCategory::Metadata),
            "semantic" => Some(QueryCategory::Semantic),
            "hybrid" => Some(QueryCategory::Hybrid),
            "analytical" => Some(QueryCategory::Analytical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryCategory::Metadata => "metadata",
            QueryCategory::Semantic => "semantic",
            QueryCategory::Hybrid => "hybrid",
            QueryCategory::Analytical => "analytical",
        }
    }
}

impl fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive date range; either end may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    /// Range covering a whole calendar year.
    pub fn year(year: i32) -> Option<Self> {
        Some(Self {
            from: NaiveDate::from_ymd_opt(year, 1, 1),
            to: Some(NaiveDate::from_ymd_opt(year, 12, 31)?),
        })
    }

    /// True when neither end is set.
    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// Check if a date falls inside the range (bounds inclusive).
    pub fn contains(&self, date: NaiveDate) -> bool {
        if let Some(from) = self.from {
            if date < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if date > to {
                return false;
            }
        }
        true
    }
}

/// Structured predicate extracted from a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    pub author: Option<String>,
    pub date_range: Option<DateRange>,
    pub categories: Option<BTreeSet<String>>,
    pub keywords: Option<Vec<String>>,
}

impl QueryFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.categories = Some(categories.into_iter().map(|c| c.into()).collect());
        self
    }

    pub fn with_keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keywords = Some(keywords.into_iter().map(|k| k.into()).collect());
        self
    }

    /// True when no field would constrain a search.
    ///
    /// Empty strings, empty sets and unbounded ranges count as absent.
    pub fn is_empty(&self) -> bool {
        self.author.as_deref().map_or(true, |a| a.trim().is_empty())
            && self.date_range.map_or(true, |r| r.is_unbounded())
            && self.categories.as_ref().map_or(true, |c| c.is_empty())
            && self.keywords.as_ref().map_or(true, |k| k.is_empty())
    }
}

/// Where a classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    /// Parsed and validated model reply
    Model,

    /// Pattern-based fallback after a model or parse failure
    RuleFallback,

    /// Empty query, short-circuited without a model call
    EmptyQuery,
}

/// The classifier's decision for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryClassification {
    pub category: QueryCategory,

    /// May be populated even for `Semantic`; the router decides whether to use it.
    pub filters: QueryFilters,

    /// Normalized to [0, 1]
    pub confidence: f32,

    /// The query asks for a cardinality ("how many ...")
    #[serde(default)]
    pub requires_count: bool,

    /// Reformulated text for embedding, when the model supplied one
    #[serde(default)]
    pub semantic_query: Option<String>,

    #[serde(default)]
    pub reasoning: Option<String>,

    pub source: ClassificationSource,
}

impl QueryClassification {
    /// Classification used for empty queries.
    pub fn empty_query() -> Self {
        Self {
            category: QueryCategory::Semantic,
            filters: QueryFilters::default(),
            confidence: 0.0,
            requires_count: false,
            semantic_query: None,
            reasoning: None,
            source: ClassificationSource::EmptyQuery,
        }
    }

    /// A classification with the given category and filters, as if from the model.
    pub fn new(category: QueryCategory, filters: QueryFilters, confidence: f32) -> Self {
        Self {
            category,
            filters,
            confidence: confidence.clamp(0.0, 1.0),
            requires_count: false,
            semantic_query: None,
            reasoning: None,
            source: ClassificationSource::Model,
        }
    }

    /// Mark the classification as a count query.
    pub fn counting(mut self) -> Self {
        self.requires_count = true;
        self
    }

    /// Text to embed: the model's reformulation if present, else the raw query.
    pub fn search_text<'a>(&'a self, raw_query: &'a str) -> &'a str {
        match self.semantic_query.as_deref() {
            Some(q) if !q.trim().is_empty() => q,
            _ => raw_query,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(QueryCategory::parse("Hybrid"), Some(QueryCategory::Hybrid));
        assert_eq!(QueryCategory::parse(" metadata "), Some(QueryCategory::Metadata));
        assert_eq!(QueryCategory::parse("collection"), None);
    }

    #[test]
    fn test_date_range_inclusive() {
        let range = DateRange::year(2022).unwrap();
        assert!(range.contains(ymd(2022, 1, 1)));
        assert!(range.contains(ymd(2022, 12, 31)));
        assert!(!range.contains(ymd(2023, 1, 1)));

        let open = DateRange::new(Some(ymd(2020, 6, 1)), None);
        assert!(open.contains(ymd(2030, 1, 1)));
        assert!(!open.contains(ymd(2020, 5, 31)));
    }

    #[test]
    fn test_filters_is_empty() {
        assert!(QueryFilters::new().is_empty());
        assert!(QueryFilters::new().with_author("  ").is_empty());
        assert!(QueryFilters::new().with_date_range(DateRange::default()).is_empty());
        assert!(!QueryFilters::new().with_author("Mario Rossi").is_empty());
        assert!(!QueryFilters::new().with_categories(["energia"]).is_empty());
    }

    #[test]
    fn test_search_text_prefers_reformulation() {
        let mut c = QueryClassification::new(QueryCategory::Semantic, QueryFilters::new(), 0.9);
        assert_eq!(c.search_text("raw"), "raw");
        c.semantic_query = Some("energia rinnovabile".into());
        assert_eq!(c.search_text("raw"), "energia rinnovabile");
    }
}
