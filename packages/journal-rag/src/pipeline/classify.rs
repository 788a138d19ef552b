//! Query classification.
//!
//! The model is asked for a JSON verdict which is parsed and validated
//! field by field. Any failure (model down, timeout, unparsable reply)
//! falls back to deterministic pattern rules, so classification never fails.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ParseError, RagError, Result, Stage};
use crate::pipeline::prompts::{detect_language, format_classify_prompt};
use crate::traits::ai::LanguageModel;
use crate::types::config::RagConfig;
use crate::types::query::{
    ClassificationSource, DateRange, QueryCategory, QueryClassification, QueryFilters,
};

/// Confidence assigned when the fallback rules found a structured cue.
pub const FALLBACK_CUE_CONFIDENCE: f32 = 0.3;

/// Confidence assumed when the model omits one.
pub const MODEL_DEFAULT_CONFIDENCE: f32 = 0.7;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)\n?```").expect("valid fence regex")
});

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid trailing comma regex"));

static AUTHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|\s)(?i:written\s+by|according\s+to|scritt[oiae]\s+da|ha\s+scritto|scritt[oiae]|scrive|secondo|autore|autrice|author|dice|says|by|di|da)\s+(\p{Lu}[\p{Ll}']+(?:\s+\p{Lu}[\p{Ll}']+)+)",
    )
    .expect("valid author regex")
});

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("valid date regex"));

static YEAR_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b((?:19|20)\d{2})\s*(?:-|–|al|a|e\s+il|e|to|and|until|fino\s+al)\s*((?:19|20)\d{2})\b")
        .expect("valid year range regex")
});

static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").expect("valid year regex"));

const COUNT_CUES: &[&str] = &[
    "quanti",
    "quante",
    "numero di",
    "conta ",
    "how many",
    "number of",
    "count ",
];

/// Turns raw query text into a [`QueryClassification`].
pub struct QueryClassifier {
    model: Arc<dyn LanguageModel>,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    vocabulary: Vec<String>,
}

impl QueryClassifier {
    /// Create a classifier using the model settings from `config`.
    pub fn new(model: Arc<dyn LanguageModel>, config: &RagConfig) -> Self {
        Self {
            model,
            max_tokens: config.classification_max_tokens,
            temperature: config.classification_temperature,
            timeout: config.model_timeout(),
            vocabulary: config.category_vocabulary.clone(),
        }
    }

    /// Classify a query. Never fails.
    pub async fn classify(&self, query: &str) -> QueryClassification {
        let query = query.trim();
        if query.is_empty() {
            debug!("Empty query, skipping model classification");
            return QueryClassification::empty_query();
        }

        let reply = match self.request(query).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Classifier model unavailable, using rule-based fallback");
                return classify_by_rules(query, &self.vocabulary);
            }
        };

        match parse_classification(&reply) {
            Ok(classification) => {
                debug!(
                    query = %query,
                    category = ?classification.category,
                    confidence = classification.confidence,
                    "Query classified"
                );
                classification
            }
            Err(e) => {
                warn!(error = %e, "Unparsable classifier reply, using rule-based fallback");
                classify_by_rules(query, &self.vocabulary)
            }
        }
    }

    async fn request(&self, query: &str) -> Result<String> {
        let prompt = format_classify_prompt(query, detect_language(query));
        let started = Instant::now();
        match tokio::time::timeout(
            self.timeout,
            self.model.complete(&prompt, self.max_tokens, self.temperature),
        )
        .await
        {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(RagError::model(Stage::Classification, e)),
            Err(_) => Err(RagError::Timeout {
                stage: Stage::Classification,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }
}

/// Locate the first complete JSON object in a model reply.
///
/// Markdown code fences are stripped first; braces inside string literals
/// are ignored while matching.
pub fn extract_json_object(text: &str) -> std::result::Result<&str, ParseError> {
    let text = match FENCE_RE.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => text,
    };

    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if start.is_some() => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        return Ok(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    Err(ParseError::NoJsonObject)
}

/// Remove commas directly before a closing brace or bracket.
pub fn repair_trailing_commas(json: &str) -> String {
    TRAILING_COMMA_RE.replace_all(json, "$1").into_owned()
}

#[derive(Debug, Deserialize)]
struct ClassifierReply {
    #[serde(alias = "query_type")]
    category: String,

    #[serde(default)]
    confidence: Option<Value>,

    #[serde(default)]
    requires_count: Option<Value>,

    #[serde(default)]
    filters: Option<Value>,

    #[serde(default)]
    semantic_query: Option<Value>,

    #[serde(default)]
    reasoning: Option<Value>,
}

/// Parse and validate a classifier reply.
pub fn parse_classification(reply: &str) -> std::result::Result<QueryClassification, ParseError> {
    let json = extract_json_object(reply)?;
    let parsed: ClassifierReply = match serde_json::from_str(json) {
        Ok(parsed) => parsed,
        Err(_) => serde_json::from_str(&repair_trailing_commas(json))?,
    };

    let category = QueryCategory::parse(&parsed.category)
        .ok_or_else(|| ParseError::UnknownCategory(parsed.category.clone()))?;

    let confidence = parsed
        .confidence
        .as_ref()
        .and_then(value_as_f32)
        .filter(|c| c.is_finite())
        .unwrap_or(MODEL_DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0);

    Ok(QueryClassification {
        category,
        filters: parsed
            .filters
            .as_ref()
            .map(parse_filters)
            .unwrap_or_default(),
        confidence,
        requires_count: parsed
            .requires_count
            .as_ref()
            .and_then(value_as_bool)
            .unwrap_or(false),
        semantic_query: parsed.semantic_query.as_ref().and_then(value_as_text),
        reasoning: parsed.reasoning.as_ref().and_then(value_as_text),
        source: ClassificationSource::Model,
    })
}

/// Extract filters leniently: a malformed field is dropped, not fatal.
fn parse_filters(value: &Value) -> QueryFilters {
    let Some(obj) = value.as_object() else {
        return QueryFilters::default();
    };

    let date_range = obj.get("date_range").and_then(parse_date_range);

    QueryFilters {
        author: obj.get("author").and_then(value_as_text),
        date_range,
        categories: obj
            .get("categories")
            .map(value_as_list)
            .filter(|c| !c.is_empty())
            .map(|c| c.into_iter().collect::<BTreeSet<_>>()),
        keywords: obj
            .get("keywords")
            .map(value_as_list)
            .filter(|k| !k.is_empty()),
    }
}

fn parse_date_range(value: &Value) -> Option<DateRange> {
    let obj = value.as_object()?;
    let from = obj
        .get("start")
        .or_else(|| obj.get("from"))
        .and_then(value_as_text)
        .and_then(|s| parse_date(&s, false));
    let to = obj
        .get("end")
        .or_else(|| obj.get("to"))
        .and_then(value_as_text)
        .and_then(|s| parse_date(&s, true));

    let range = DateRange::new(from, to);
    match (from, to) {
        (None, None) => None,
        (Some(f), Some(t)) if f > t => None,
        _ => Some(range),
    }
}

/// Parse `YYYY-MM-DD` or a bare `YYYY` (first or last day of that year).
fn parse_date(text: &str, end_of_period: bool) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }
    let year: i32 = text.parse().ok().filter(|y| (1000..=9999).contains(y))?;
    if end_of_period {
        NaiveDate::from_ymd_opt(year, 12, 31)
    } else {
        NaiveDate::from_ymd_opt(year, 1, 1)
    }
}

/// A non-empty string that is not a spelled-out null.
fn value_as_text(value: &Value) -> Option<String> {
    let text = value.as_str()?.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("null") || text.eq_ignore_ascii_case("none")
    {
        return None;
    }
    Some(text.to_string())
}

fn value_as_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(value_as_text).collect(),
        Value::String(_) => value_as_text(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn value_as_f32(value: &Value) -> Option<f32> {
    match value {
        Value::Number(n) => n.as_f64().map(|f| f as f32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "si" | "sì" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Deterministic classification from surface patterns.
///
/// Any structured cue (author, date, category term, count phrase) yields
/// `Hybrid` at [`FALLBACK_CUE_CONFIDENCE`]; otherwise `Semantic` at 0.
pub fn classify_by_rules(query: &str, vocabulary: &[String]) -> QueryClassification {
    let lower = query.to_lowercase();
    let mut cues: Vec<&str> = Vec::new();

    let author = detect_author(query);
    if author.is_some() {
        cues.push("author");
    }

    let date_range = detect_date_range(query);
    if date_range.is_some() {
        cues.push("date");
    }

    let categories: BTreeSet<String> = vocabulary
        .iter()
        .filter(|term| contains_word(&lower, &term.to_lowercase()))
        .cloned()
        .collect();
    if !categories.is_empty() {
        cues.push("category");
    }

    let requires_count = COUNT_CUES.iter().any(|cue| lower.contains(cue));
    if requires_count {
        cues.push("count");
    }

    let filters = QueryFilters {
        author,
        date_range,
        categories: Some(categories).filter(|c| !c.is_empty()),
        keywords: None,
    };

    let (category, confidence) = if cues.is_empty() {
        (QueryCategory::Semantic, 0.0)
    } else {
        (QueryCategory::Hybrid, FALLBACK_CUE_CONFIDENCE)
    };

    debug!(query = %query, category = ?category, cues = ?cues, "Rule-based classification");

    QueryClassification {
        category,
        filters,
        confidence,
        requires_count,
        semantic_query: None,
        reasoning: Some(if cues.is_empty() {
            "rule-based fallback: no structured cues".to_string()
        } else {
            format!("rule-based fallback: {}", cues.join(", "))
        }),
        source: ClassificationSource::RuleFallback,
    }
}

fn detect_author(query: &str) -> Option<String> {
    AUTHOR_RE
        .captures(query)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn detect_date_range(query: &str) -> Option<DateRange> {
    let iso: Vec<NaiveDate> = ISO_DATE_RE
        .captures_iter(query)
        .filter_map(|c| NaiveDate::parse_from_str(c.get(0)?.as_str(), "%Y-%m-%d").ok())
        .collect();
    if let (Some(min), Some(max)) = (iso.iter().min(), iso.iter().max()) {
        return Some(DateRange::new(Some(*min), Some(*max)));
    }

    if let Some(c) = YEAR_RANGE_RE.captures(query) {
        let start: i32 = c.get(1)?.as_str().parse().ok()?;
        let end: i32 = c.get(2)?.as_str().parse().ok()?;
        let (lo, hi) = (start.min(end), start.max(end));
        return Some(DateRange::new(
            NaiveDate::from_ymd_opt(lo, 1, 1),
            NaiveDate::from_ymd_opt(hi, 12, 31),
        ));
    }

    let years: Vec<i32> = YEAR_RE
        .captures_iter(query)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .collect();
    let (lo, hi) = (years.iter().min()?, years.iter().max()?);
    Some(DateRange::new(
        NaiveDate::from_ymd_opt(*lo, 1, 1),
        NaiveDate::from_ymd_opt(*hi, 12, 31),
    ))
}

/// Whole-word containment on already-lowercased text.
fn contains_word(haystack: &str, word: &str) -> bool {
    let word = word.trim();
    if word.is_empty() {
        return false;
    }
    haystack.match_indices(word).any(|(i, _)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
