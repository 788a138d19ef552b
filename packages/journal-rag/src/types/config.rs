//! Configuration types for classification, retrieval and synthesis.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::types::article::Article;
use crate::types::query::{DateRange, QueryFilters};
use crate::types::retrieval::TimeBucket;

/// Case-folded form used for every case-insensitive comparison.
///
/// Stores that match in SQL persist this value next to the original so both
/// sides agree on Unicode case folding ("SOCIETÀ" and "Società").
pub fn match_key(value: &str) -> String {
    value.trim().to_lowercase()
}

/// How the author filter is compared against stored author names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorMatch {
    /// Byte-for-byte equality
    Exact,

    /// Equality after lowercasing and trimming
    #[default]
    CaseInsensitive,

    /// Case-insensitive substring ("Rossi" matches "Mario Rossi")
    Contains,
}

impl AuthorMatch {
    /// Check whether a stored author satisfies the requested one.
    pub fn matches(&self, stored: &str, requested: &str) -> bool {
        match self {
            AuthorMatch::Exact => stored == requested,
            AuthorMatch::CaseInsensitive => match_key(stored) == match_key(requested),
            AuthorMatch::Contains => match_key(stored).contains(&match_key(requested)),
        }
    }
}

/// What hybrid retrieval does when the full conjunctive filter matches nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialFilterPolicy {
    /// Go straight to unrestricted semantic search.
    #[default]
    Strict,

    /// Try the union of single-field matches first, then the full corpus.
    Relax,
}

/// Configuration for the query pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum candidates returned by a retrieval. Default: 10.
    pub max_results: usize,

    /// Semantic matches scoring below this are dropped. Default: 0.3.
    pub min_similarity_score: f32,

    /// Classifications below this confidence lower the answer's confidence.
    ///
    /// Routing is never blocked. Default: 0.5.
    pub classification_confidence_threshold: f32,

    /// Bucket granularity for analytical queries. Default: year.
    pub analytical_time_bucket: TimeBucket,

    /// Candidates kept per analytical bucket. Default: 3.
    pub analytical_bucket_limit: usize,

    /// Articles handed to the synthesizer. Default: 5.
    pub max_context_articles: usize,

    /// Longest article body (in characters) sent verbatim; longer ones are excerpted.
    ///
    /// Default: 4000.
    pub max_excerpt_length: usize,

    pub classification_max_tokens: u32,
    pub classification_temperature: f32,
    pub synthesis_max_tokens: u32,
    pub synthesis_temperature: f32,

    /// Timeout for each model call, in seconds. Default: 60.
    pub model_timeout_secs: u64,

    /// Restrict semantic queries by the filters the classifier found anyway.
    ///
    /// Default: false.
    pub semantic_filter_hint: bool,

    pub partial_filter_policy: PartialFilterPolicy,

    pub author_match: AuthorMatch,

    /// Category terms the rule-based classifier recognises in raw queries.
    pub category_vocabulary: Vec<String>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            max_results: 10,
            min_similarity_score: 0.3,
            classification_confidence_threshold: 0.5,
            analytical_time_bucket: TimeBucket::Year,
            analytical_bucket_limit: 3,
            max_context_articles: 5,
            max_excerpt_length: 4000,
            classification_max_tokens: 512,
            classification_temperature: 0.1,
            synthesis_max_tokens: 1500,
            synthesis_temperature: 0.3,
            model_timeout_secs: 60,
            semantic_filter_hint: false,
            partial_filter_policy: PartialFilterPolicy::Strict,
            author_match: AuthorMatch::CaseInsensitive,
            category_vocabulary: vec![],
        }
    }
}

impl RagConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    pub fn with_min_similarity_score(mut self, score: f32) -> Self {
        self.min_similarity_score = score;
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.classification_confidence_threshold = threshold;
        self
    }

    pub fn with_time_bucket(mut self, bucket: TimeBucket) -> Self {
        self.analytical_time_bucket = bucket;
        self
    }

    pub fn with_bucket_limit(mut self, limit: usize) -> Self {
        self.analytical_bucket_limit = limit;
        self
    }

    pub fn with_max_context_articles(mut self, max: usize) -> Self {
        self.max_context_articles = max;
        self
    }

    pub fn with_max_excerpt_length(mut self, chars: usize) -> Self {
        self.max_excerpt_length = chars;
        self
    }

    pub fn with_model_timeout_secs(mut self, secs: u64) -> Self {
        self.model_timeout_secs = secs;
        self
    }

    /// Use classifier filters on semantic queries.
    pub fn with_semantic_filter_hint(mut self) -> Self {
        self.semantic_filter_hint = true;
        self
    }

    pub fn with_partial_filter_policy(mut self, policy: PartialFilterPolicy) -> Self {
        self.partial_filter_policy = policy;
        self
    }

    pub fn with_author_match(mut self, mode: AuthorMatch) -> Self {
        self.author_match = mode;
        self
    }

    /// Set the category terms recognised by the fallback classifier.
    pub fn with_category_vocabulary(
        mut self,
        terms: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.category_vocabulary = terms.into_iter().map(|t| t.into()).collect();
        self
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        fn unit(name: &str, value: f32) -> Result<()> {
            if !(0.0..=1.0).contains(&value) {
                return Err(RagError::Config {
                    reason: format!("{name} must be within [0, 1], got {value}"),
                });
            }
            Ok(())
        }

        if self.max_results == 0 {
            return Err(RagError::Config {
                reason: "max_results must be at least 1".into(),
            });
        }
        if self.max_context_articles == 0 {
            return Err(RagError::Config {
                reason: "max_context_articles must be at least 1".into(),
            });
        }
        if self.analytical_bucket_limit == 0 {
            return Err(RagError::Config {
                reason: "analytical_bucket_limit must be at least 1".into(),
            });
        }
        if self.max_excerpt_length < 200 {
            return Err(RagError::Config {
                reason: format!(
                    "max_excerpt_length must be at least 200 characters, got {}",
                    self.max_excerpt_length
                ),
            });
        }
        if self.model_timeout_secs == 0 {
            return Err(RagError::Config {
                reason: "model_timeout_secs must be positive".into(),
            });
        }
        unit("min_similarity_score", self.min_similarity_score)?;
        unit(
            "classification_confidence_threshold",
            self.classification_confidence_threshold,
        )?;
        if !(0.0..=2.0).contains(&self.classification_temperature)
            || !(0.0..=2.0).contains(&self.synthesis_temperature)
        {
            return Err(RagError::Config {
                reason: "temperatures must be within [0, 2]".into(),
            });
        }
        Ok(())
    }
}

/// Store-level predicate over article metadata.
///
/// Every populated field must match (conjunction). Empty fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleFilter {
    pub author: Option<String>,

    #[serde(default)]
    pub author_match: AuthorMatch,

    pub date_range: Option<DateRange>,

    /// Article must carry at least one of these (case-insensitive)
    pub categories: Option<BTreeSet<String>>,

    /// Title must contain at least one of these (case-insensitive)
    pub keywords: Option<Vec<String>>,

    /// Restrict to these article ids
    pub ids: Option<BTreeSet<String>>,
}

impl ArticleFilter {
    /// Create a new empty filter (matches all).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store filter from classifier filters.
    ///
    /// Blank authors, unbounded ranges and empty lists are dropped.
    pub fn from_query(filters: &QueryFilters, author_match: AuthorMatch) -> Self {
        Self {
            author: filters
                .author
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(String::from),
            author_match,
            date_range: filters.date_range.filter(|r| !r.is_unbounded()),
            categories: filters.categories.clone().filter(|c| !c.is_empty()),
            keywords: filters.keywords.clone().filter(|k| !k.is_empty()),
            ids: None,
        }
    }

    /// Restrict to a set of ids.
    pub fn with_ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ids = Some(ids.into_iter().map(|i| i.into()).collect());
        self
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    /// True when no field constrains the match.
    pub fn is_unrestricted(&self) -> bool {
        self.author.is_none()
            && self.date_range.is_none()
            && self.categories.is_none()
            && self.keywords.is_none()
            && self.ids.is_none()
    }

    /// One filter per populated metadata field, each constraining only that field.
    ///
    /// `ids` is carried into every split.
    pub fn split_fields(&self) -> Vec<ArticleFilter> {
        let base = ArticleFilter {
            author_match: self.author_match,
            ids: self.ids.clone(),
            ..Default::default()
        };
        let mut out = Vec::new();
        if let Some(author) = &self.author {
            out.push(ArticleFilter {
                author: Some(author.clone()),
                ..base.clone()
            });
        }
        if let Some(range) = self.date_range {
            out.push(ArticleFilter {
                date_range: Some(range),
                ..base.clone()
            });
        }
        if let Some(categories) = &self.categories {
            out.push(ArticleFilter {
                categories: Some(categories.clone()),
                ..base.clone()
            });
        }
        if let Some(keywords) = &self.keywords {
            out.push(ArticleFilter {
                keywords: Some(keywords.clone()),
                ..base
            });
        }
        out
    }

    /// Check an article against every populated field.
    pub fn matches(&self, article: &Article) -> bool {
        self.matches_ids(&article.id)
            && self.matches_author(&article.metadata.author)
            && self.matches_date(article)
            && self.matches_categories(&article.metadata.categories)
            && self.matches_title(&article.metadata.title)
    }

    pub fn matches_ids(&self, id: &str) -> bool {
        self.ids.as_ref().map_or(true, |ids| ids.contains(id))
    }

    pub fn matches_author(&self, author: &str) -> bool {
        match &self.author {
            Some(requested) => self.author_match.matches(author, requested),
            None => true,
        }
    }

    /// Undated articles never satisfy a date range.
    pub fn matches_date(&self, article: &Article) -> bool {
        match (self.date_range, article.metadata.publication_date) {
            (None, _) => true,
            (Some(range), _) if range.is_unbounded() => true,
            (Some(range), Some(date)) => range.contains(date),
            (Some(_), None) => false,
        }
    }

    pub fn matches_categories(&self, categories: &BTreeSet<String>) -> bool {
        match &self.categories {
            Some(wanted) if !wanted.is_empty() => {
                let wanted: Vec<String> = wanted.iter().map(|w| match_key(w)).collect();
                categories.iter().any(|c| wanted.contains(&match_key(c)))
            }
            _ => true,
        }
    }

    pub fn matches_title(&self, title: &str) -> bool {
        match &self.keywords {
            Some(keywords) if !keywords.is_empty() => self.matched_keyword(title).is_some(),
            _ => true,
        }
    }

    /// First keyword (trimmed) contained in `title`, ignoring case.
    pub fn matched_keyword(&self, title: &str) -> Option<&str> {
        let title = match_key(title);
        self.keywords
            .as_deref()?
            .iter()
            .map(|k| k.trim())
            .find(|k| title.contains(&match_key(k)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn article() -> Article {
        Article::new("a1", "La crisi energetica in Europa", "...")
            .with_author("Mario Rossi")
            .with_date(NaiveDate::from_ymd_opt(2023, 3, 10).unwrap())
            .with_categories(["Energia", "Politica"])
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_results, 10);
        assert_eq!(config.min_similarity_score, 0.3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RagConfig::new().with_max_results(0).validate().is_err());
        assert!(RagConfig::new()
            .with_min_similarity_score(1.5)
            .validate()
            .is_err());
        assert!(RagConfig::new()
            .with_max_excerpt_length(10)
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_deserializes_partial_json() {
        let config: RagConfig =
            serde_json::from_str(r#"{"max_results": 4, "author_match": "contains"}"#).unwrap();
        assert_eq!(config.max_results, 4);
        assert_eq!(config.author_match, AuthorMatch::Contains);
        assert_eq!(config.max_context_articles, 5);
    }

    #[test]
    fn test_author_match_modes() {
        assert!(AuthorMatch::Exact.matches("Mario Rossi", "Mario Rossi"));
        assert!(!AuthorMatch::Exact.matches("Mario Rossi", "mario rossi"));
        assert!(AuthorMatch::CaseInsensitive.matches("Mario Rossi", " mario rossi"));
        assert!(!AuthorMatch::CaseInsensitive.matches("Mario Rossi", "Rossi"));
        assert!(AuthorMatch::Contains.matches("Mario Rossi", "rossi"));
    }

    #[test]
    fn test_filter_conjunction() {
        let a = article();
        let filter = ArticleFilter {
            author: Some("mario rossi".into()),
            date_range: DateRange::year(2023),
            categories: Some(["energia".to_string()].into()),
            ..Default::default()
        };
        assert!(filter.matches(&a));

        let wrong_year = ArticleFilter {
            date_range: DateRange::year(2022),
            ..filter.clone()
        };
        assert!(!wrong_year.matches(&a));
    }

    #[test]
    fn test_filter_skips_undated_for_ranges() {
        let undated = Article::new("u", "Senza data", "");
        let filter = ArticleFilter::new().with_date_range(DateRange::year(2023).unwrap());
        assert!(!filter.matches(&undated));
        assert!(ArticleFilter::new().matches(&undated));
    }

    #[test]
    fn test_from_query_drops_blank_fields() {
        let filters = QueryFilters::new()
            .with_author("  ")
            .with_date_range(DateRange::default())
            .with_keywords(Vec::<String>::new());
        let filter = ArticleFilter::from_query(&filters, AuthorMatch::Exact);
        assert!(filter.is_unrestricted());
    }

    #[test]
    fn test_split_fields() {
        let filter = ArticleFilter::from_query(
            &QueryFilters::new()
                .with_author("Giulia Verdi")
                .with_categories(["energia"]),
            AuthorMatch::CaseInsensitive,
        );
        let splits = filter.split_fields();
        assert_eq!(splits.len(), 2);
        assert!(splits[0].author.is_some() && splits[0].categories.is_none());
        assert!(splits[1].author.is_none() && splits[1].categories.is_some());
    }

    #[test]
    fn test_categories_fold_non_ascii_case() {
        let tagged = Article::new("s1", "Scuola", "").with_categories(["Società"]);
        let filter = ArticleFilter {
            categories: Some(["SOCIETÀ".to_string()].into()),
            ..Default::default()
        };
        assert!(filter.matches(&tagged));
        assert!(AuthorMatch::CaseInsensitive.matches("NICCOLÒ Ammaniti", "niccolò ammaniti"));
        assert!(AuthorMatch::Contains.matches("Niccolò Ammaniti", "NICCOLÒ"));
    }

    #[test]
    fn test_matched_keyword() {
        let filter = ArticleFilter {
            keywords: Some(vec!["guerra".into(), " Crisi ".into()]),
            ..Default::default()
        };
        assert_eq!(filter.matched_keyword("La crisi energetica"), Some("Crisi"));
        assert_eq!(filter.matched_keyword("Il lavoro"), None);
    }

    #[test]
    fn test_keyword_title_match() {
        let filter = ArticleFilter {
            keywords: Some(vec!["ENERGETICA".into(), "ucraina".into()]),
            ..Default::default()
        };
        assert!(filter.matches(&article()));
    }
}
