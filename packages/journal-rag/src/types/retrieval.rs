//! Retrieval types - ranked candidates and strategy outcomes.

use std::cmp::Ordering;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::types::query::QueryCategory;

/// A reference to an article returned by a retrieval strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub article_id: String,

    /// Similarity score; metadata-only results carry none
    pub score: Option<f32>,

    /// Passage that drove the match, when the strategy knows one
    pub matched_snippet: Option<String>,

    pub publication_date: Option<NaiveDate>,
}

impl RetrievalCandidate {
    /// A scoreless candidate (metadata match).
    pub fn unscored(article_id: impl Into<String>, publication_date: Option<NaiveDate>) -> Self {
        Self {
            article_id: article_id.into(),
            score: None,
            matched_snippet: None,
            publication_date,
        }
    }

    /// A candidate with a similarity score.
    pub fn scored(
        article_id: impl Into<String>,
        score: f32,
        publication_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            article_id: article_id.into(),
            score: Some(score),
            matched_snippet: None,
            publication_date,
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.matched_snippet = Some(snippet.into());
        self
    }
}

/// Total order used for every candidate list.
///
/// Scored candidates first, by score descending; scoreless ones by date
/// descending with undated last. Ties break on `article_id` ascending.
pub fn compare_candidates(a: &RetrievalCandidate, b: &RetrievalCandidate) -> Ordering {
    let primary = match (a.score, b.score) {
        (Some(sa), Some(sb)) => sb.total_cmp(&sa),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => match (a.publication_date, b.publication_date) {
            (Some(da), Some(db)) => db.cmp(&da),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    };
    primary.then_with(|| a.article_id.cmp(&b.article_id))
}

/// Sort candidates in place with [`compare_candidates`].
pub fn sort_candidates(candidates: &mut [RetrievalCandidate]) {
    candidates.sort_by(compare_candidates);
}

/// Granularity of analytical time buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    #[default]
    Year,
    Quarter,
    Month,
}

/// One calendar period produced by [`TimeBucket::periods`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub label: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl TimeBucket {
    /// Split `[from, to]` into consecutive calendar periods.
    ///
    /// The first and last periods are clipped to the range. Returns nothing
    /// when `from > to`.
    pub fn periods(&self, from: NaiveDate, to: NaiveDate) -> Vec<Period> {
        let mut out = Vec::new();
        let mut cursor = from;
        while cursor <= to {
            let Some(next) = self.next_start(cursor) else {
                out.push(self.period(cursor, to));
                break;
            };
            let end = next.pred_opt().unwrap_or(next).min(to);
            out.push(self.period(cursor, end));
            cursor = next;
        }
        out
    }

    /// First day of the period after the one containing `date`.
    fn next_start(&self, date: NaiveDate) -> Option<NaiveDate> {
        let year = date.year();
        let (start_month, months) = match self {
            TimeBucket::Year => (1, 12),
            TimeBucket::Quarter => (((date.month() - 1) / 3) * 3 + 1, 3),
            TimeBucket::Month => (date.month(), 1),
        };
        let next_month = start_month + months;
        if next_month > 12 {
            NaiveDate::from_ymd_opt(year + 1, next_month - 12, 1)
        } else {
            NaiveDate::from_ymd_opt(year, next_month, 1)
        }
    }

    fn period(&self, from: NaiveDate, to: NaiveDate) -> Period {
        let label = match self {
            TimeBucket::Year => format!("{}", from.year()),
            TimeBucket::Quarter => format!("{}-Q{}", from.year(), (from.month() - 1) / 3 + 1),
            TimeBucket::Month => format!("{}-{:02}", from.year(), from.month()),
        };
        Period { label, from, to }
    }
}

/// Candidates retrieved for one analytical time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketResult {
    pub label: String,
    pub from: NaiveDate,
    pub to: NaiveDate,

    /// Empty when nothing in the period matched
    pub candidates: Vec<RetrievalCandidate>,
}

/// What the router hands to the synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    /// Ranked, de-duplicated candidates
    pub candidates: Vec<RetrievalCandidate>,

    pub strategy_used: QueryCategory,

    /// A fallback path ran or nothing was found
    pub degraded: bool,

    /// Hybrid filters matched nothing and were dropped or relaxed
    pub filter_fallback: bool,

    /// Total matches for count queries
    pub count: Option<u64>,

    /// Per-period results for analytical queries, chronological
    #[serde(default)]
    pub buckets: Vec<BucketResult>,

    /// Articles left out of semantic ranking due to dimension mismatches
    #[serde(default)]
    pub skipped_embeddings: usize,
}

impl RetrievalOutcome {
    /// An outcome with no candidates for the given strategy.
    pub fn empty(strategy_used: QueryCategory) -> Self {
        Self {
            candidates: Vec::new(),
            strategy_used,
            degraded: true,
            filter_fallback: false,
            count: None,
            buckets: Vec::new(),
            skipped_embeddings: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Ids of the ranked candidates, in order.
    pub fn article_ids(&self) -> Vec<&str> {
        self.candidates
            .iter()
            .map(|c| c.article_id.as_str())
            .collect()
    }
}
