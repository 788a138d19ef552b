//! Grounded answer synthesis.
//!
//! The model sees each context article under its `[id]` and must cite those
//! ids inline. The reply is then checked by [`check_citations`]: ids that
//! were not in the context are stripped and the answer's confidence drops.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use indexmap::IndexSet;
use regex::{Captures, Regex, RegexBuilder};
use tracing::{debug, info, warn};

use crate::error::{RagError, Result, Stage};
use crate::pipeline::prompts::{detect_language, format_answer_prompt, no_matches_message, Language};
use crate::traits::ai::LanguageModel;
use crate::types::answer::{AnswerFlags, AnswerResult, AnswerStatus};
use crate::types::article::Article;
use crate::types::config::RagConfig;
use crate::types::query::QueryClassification;
use crate::types::retrieval::{RetrievalCandidate, RetrievalOutcome};

/// Retrieval quality assumed for metadata matches, which carry no score.
pub const UNSCORED_RETRIEVAL_QUALITY: f32 = 0.8;

/// Confidence multiplier when retrieval fell back or came back degraded.
pub const DEGRADED_FACTOR: f32 = 0.8;

/// Confidence multiplier when unverifiable citations were stripped.
pub const STRIPPED_CITATION_FACTOR: f32 = 0.5;

/// Confidence multiplier when the answer cites nothing.
pub const UNCITED_FACTOR: f32 = 0.6;

static BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\s?)\[([^\[\]\n]+)\]").expect("valid bracket regex"));

static ID_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.:/-]+$").expect("valid id regex"));

/// Result of checking a model answer against the allowed ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CitationCheck {
    /// Answer text with unknown ids removed
    pub text: String,

    /// Known ids in first-citation order
    pub citations: Vec<String>,

    /// Unknown ids in first-occurrence order
    pub stripped: Vec<String>,
}

/// Extract bracketed citations and strip ids not in `allowed`.
///
/// A bracket counts as a citation when every comma/semicolon separated token
/// in it is either a known id or shaped like one (see [`looks_like_id`]).
/// Markdown link text (`[text](url)`), footnote numbers and prose in brackets
/// are left alone.
pub fn check_citations(text: &str, allowed: &HashSet<&str>) -> CitationCheck {
    let mut citations = IndexSet::new();
    let mut stripped = IndexSet::new();

    let cleaned = BRACKET_RE.replace_all(text, |caps: &Captures| {
        let whole = &caps[0];
        let leading = &caps[1];

        let end = caps.get(0).map_or(text.len(), |m| m.end());
        if text[end..].starts_with('(') {
            return whole.to_string();
        }

        let tokens: Vec<&str> = caps[2]
            .split([',', ';'])
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();

        let is_citation = |t: &&str| allowed.contains(*t) || looks_like_id(t);
        if tokens.is_empty() || !tokens.iter().all(is_citation) {
            return whole.to_string();
        }

        let mut kept = Vec::new();
        for token in tokens {
            if allowed.contains(token) {
                citations.insert(token.to_string());
                kept.push(token);
            } else {
                stripped.insert(token.to_string());
            }
        }

        if kept.is_empty() {
            String::new()
        } else {
            format!("{leading}[{}]", kept.join(", "))
        }
    });

    CitationCheck {
        text: cleaned.trim().to_string(),
        citations: citations.into_iter().collect(),
        stripped: stripped.into_iter().collect(),
    }
}

/// Article ids are slugs like `rossi-2023-ucraina`: a separator or a digit,
/// never a bare number or a plain word.
pub fn looks_like_id(token: &str) -> bool {
    ID_TOKEN_RE.is_match(token)
        && !token.chars().all(|c| c.is_ascii_digit())
        && token
            .chars()
            .any(|c| c == '-' || c == '_' || c.is_ascii_digit())
}

/// Fraction of query terms (longer than two bytes) found in `text`.
pub fn keyword_match(query: &str, text: &str) -> f32 {
    let query_lower = query.to_lowercase();
    let query_terms: Vec<&str> = query_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .collect();

    if query_terms.is_empty() {
        return 0.0;
    }

    let text_lower = text.to_lowercase();
    let matches = query_terms
        .iter()
        .filter(|term| text_lower.contains(*term))
        .count();

    matches as f32 / query_terms.len() as f32
}

/// Cut `content` to at most `max_chars` characters around its best passage.
///
/// The passage is the first occurrence of `snippet` (ignoring case) when it
/// occurs in the content, otherwise the paragraph with the highest
/// [`keyword_match`] against `query`. Ellipses mark cut ends.
pub fn excerpt(content: &str, query: &str, snippet: Option<&str>, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }

    let (anchor_byte, anchor_len) = snippet
        .and_then(|s| find_ignoring_case(content, s))
        .unwrap_or_else(|| best_paragraph(content, query));

    let anchor_start = content[..anchor_byte].chars().count();
    let slack = max_chars.saturating_sub(anchor_len) / 2;
    let mut start = anchor_start.saturating_sub(slack);
    let end = (start + max_chars).min(total);
    start = end.saturating_sub(max_chars);

    let body: String = content.chars().skip(start).take(end - start).collect();
    let mut out = String::with_capacity(body.len() + 8);
    if start > 0 {
        out.push('…');
    }
    out.push_str(body.trim());
    if end < total {
        out.push('…');
    }
    out
}

/// Byte offset and char length of the first case-insensitive match of `needle`.
fn find_ignoring_case(content: &str, needle: &str) -> Option<(usize, usize)> {
    let needle = needle.trim();
    if needle.is_empty() {
        return None;
    }
    let pattern = RegexBuilder::new(&regex::escape(needle))
        .case_insensitive(true)
        .build()
        .ok()?;
    pattern
        .find(content)
        .map(|m| (m.start(), m.as_str().chars().count()))
}

/// Byte offset and char length of the paragraph best matching `query`.
fn best_paragraph(content: &str, query: &str) -> (usize, usize) {
    let mut best = (0usize, 0usize);
    let mut best_score = -1.0f32;
    let mut offset = 0usize;

    for paragraph in content.split('\n') {
        let score = keyword_match(query, paragraph);
        if !paragraph.trim().is_empty() && score > best_score {
            best_score = score;
            best = (offset, paragraph.chars().count());
        }
        offset += paragraph.len() + 1;
    }
    best
}

/// Writes grounded answers from retrieved articles.
pub struct AnswerSynthesizer {
    model: Arc<dyn LanguageModel>,
    max_context_articles: usize,
    max_excerpt_length: usize,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    confidence_threshold: f32,
}

impl AnswerSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, config: &RagConfig) -> Self {
        Self {
            model,
            max_context_articles: config.max_context_articles,
            max_excerpt_length: config.max_excerpt_length,
            max_tokens: config.synthesis_max_tokens,
            temperature: config.synthesis_temperature,
            timeout: config.model_timeout(),
            confidence_threshold: config.classification_confidence_threshold,
        }
    }

    /// Candidates that will be handed to the model, in rank order.
    pub fn context_candidates<'a>(&self, outcome: &'a RetrievalOutcome) -> &'a [RetrievalCandidate] {
        let n = outcome.candidates.len().min(self.max_context_articles);
        &outcome.candidates[..n]
    }

    /// Produce an answer for `raw_query` from the context articles.
    ///
    /// `articles` must contain the articles behind
    /// [`context_candidates`](Self::context_candidates); others are ignored.
    /// Never fails: model errors become [`AnswerStatus::SynthesisUnavailable`].
    pub async fn synthesize(
        &self,
        raw_query: &str,
        classification: &QueryClassification,
        outcome: &RetrievalOutcome,
        articles: &[Article],
    ) -> AnswerResult {
        let language = detect_language(raw_query);
        let flags = AnswerFlags {
            degraded_retrieval: outcome.degraded,
            filter_fallback: outcome.filter_fallback,
            low_classification_confidence: classification.confidence
                < self.confidence_threshold,
            stripped_citations: Vec::new(),
        };
        let base = AnswerResult {
            text: String::new(),
            citations: Vec::new(),
            confidence: 0.0,
            status: AnswerStatus::Answered,
            flags,
            candidates: Vec::new(),
            classification: classification.clone(),
            strategy_used: outcome.strategy_used,
        };

        let by_id: HashMap<&str, &Article> = articles.iter().map(|a| (a.id.as_str(), a)).collect();
        let context: Vec<(&RetrievalCandidate, &Article)> = self
            .context_candidates(outcome)
            .iter()
            .filter_map(|c| match by_id.get(c.article_id.as_str()) {
                Some(article) => Some((c, *article)),
                None => {
                    warn!(article_id = %c.article_id, "Candidate article missing from store");
                    None
                }
            })
            .collect();

        if outcome.candidates.is_empty() {
            debug!("No candidates, returning fixed no-match answer");
            return AnswerResult {
                text: no_matches_message(language).to_string(),
                status: AnswerStatus::NoMatches,
                ..base
            };
        }

        let candidates: Vec<RetrievalCandidate> = context.iter().map(|(c, _)| (*c).clone()).collect();
        if context.is_empty() {
            return AnswerResult {
                status: AnswerStatus::SynthesisUnavailable {
                    reason: "candidate articles could not be loaded".to_string(),
                },
                candidates: outcome.candidates.clone(),
                ..base
            };
        }

        let prompt = self.build_prompt(raw_query, &context, outcome, language);
        let reply = match self.request(&prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Answer synthesis failed, returning candidates only");
                return AnswerResult {
                    status: AnswerStatus::SynthesisUnavailable {
                        reason: e.to_string(),
                    },
                    candidates,
                    ..base
                };
            }
        };

        let allowed: HashSet<&str> = candidates.iter().map(|c| c.article_id.as_str()).collect();
        let check = check_citations(&reply, &allowed);
        if !check.stripped.is_empty() {
            warn!(stripped = ?check.stripped, "Stripped citations not among the context articles");
        }

        let confidence = answer_confidence(
            &candidates,
            classification.confidence,
            &base.flags,
            !check.stripped.is_empty(),
            check.citations.is_empty(),
        );

        info!(
            citations = check.citations.len(),
            stripped = check.stripped.len(),
            confidence,
            "Answer synthesized"
        );

        AnswerResult {
            text: check.text,
            citations: check.citations,
            confidence,
            status: AnswerStatus::Answered,
            flags: AnswerFlags {
                stripped_citations: check.stripped,
                ..base.flags
            },
            candidates,
            ..base
        }
    }

    fn build_prompt(
        &self,
        raw_query: &str,
        context: &[(&RetrievalCandidate, &Article)],
        outcome: &RetrievalOutcome,
        language: Language,
    ) -> String {
        let mut articles = String::new();
        for (candidate, article) in context {
            let meta = &article.metadata;
            let author = if meta.author.is_empty() { "N/A" } else { meta.author.as_str() };
            let _ = writeln!(articles, "[{}] {}", article.id, meta.title);
            match &meta.source {
                Some(source) => {
                    let _ = writeln!(articles, "{} | {} | {}", author, article.date_label(), source);
                }
                None => {
                    let _ = writeln!(articles, "{} | {}", author, article.date_label());
                }
            }
            let body = excerpt(
                &article.content,
                raw_query,
                candidate.matched_snippet.as_deref(),
                self.max_excerpt_length,
            );
            let _ = writeln!(articles, "{body}\n---");
        }

        let mut extra = String::new();
        if let Some(count) = outcome.count {
            let _ = match language {
                Language::Italian => writeln!(extra, "Numero totale di articoli corrispondenti: {count}"),
                Language::English => writeln!(extra, "Total matching articles: {count}"),
            };
        }
        if !outcome.buckets.is_empty() {
            let _ = match language {
                Language::Italian => writeln!(extra, "Periodi analizzati:"),
                Language::English => writeln!(extra, "Periods analysed:"),
            };
            // Consecutive empty periods share one line.
            let runs = outcome
                .buckets
                .chunk_by(|a, b| a.candidates.is_empty() && b.candidates.is_empty());
            for run in runs {
                match run {
                    [bucket] if !bucket.candidates.is_empty() => {
                        let ids: Vec<&str> =
                            bucket.candidates.iter().map(|c| c.article_id.as_str()).collect();
                        let _ = writeln!(extra, "- {}: {}", bucket.label, ids.join(", "));
                    }
                    [bucket] => {
                        let _ = writeln!(extra, "- {}: -", bucket.label);
                    }
                    [first, .., last] => {
                        let _ = writeln!(extra, "- {}..{}: -", first.label, last.label);
                    }
                    [] => {}
                }
            }
        }

        let example_id = context.first().map(|(_, a)| a.id.as_str()).unwrap_or("id");
        format_answer_prompt(raw_query, &articles, &extra, example_id, language)
    }

    async fn request(&self, prompt: &str) -> Result<String> {
        let started = Instant::now();
        match tokio::time::timeout(
            self.timeout,
            self.model.complete(prompt, self.max_tokens, self.temperature),
        )
        .await
        {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(RagError::model(Stage::Synthesis, e)),
            Err(_) => Err(RagError::Timeout {
                stage: Stage::Synthesis,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }
}

/// Combine retrieval quality and pipeline signals into one confidence.
fn answer_confidence(
    context: &[RetrievalCandidate],
    classification_confidence: f32,
    flags: &AnswerFlags,
    stripped: bool,
    uncited: bool,
) -> f32 {
    let scores: Vec<f32> = context.iter().filter_map(|c| c.score).collect();
    let mut confidence = if scores.is_empty() {
        UNSCORED_RETRIEVAL_QUALITY
    } else {
        (scores.iter().sum::<f32>() / scores.len() as f32).clamp(0.0, 1.0)
    };

    if flags.low_classification_confidence {
        confidence *= 0.5 + 0.5 * classification_confidence.clamp(0.0, 1.0);
    }
    if flags.degraded_retrieval || flags.filter_fallback {
        confidence *= DEGRADED_FACTOR;
    }
    if stripped {
        confidence *= STRIPPED_CITATION_FACTOR;
    }
    if uncited {
        confidence *= UNCITED_FACTOR;
    }
    confidence.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_corpus, MockLanguageModel};
    use crate::types::query::{QueryCategory, QueryFilters};

    fn allowed<'a>(ids: &[&'a str]) -> HashSet<&'a str> {
        ids.iter().copied().collect()
    }

    fn outcome(ids: &[&str]) -> RetrievalOutcome {
        RetrievalOutcome {
            candidates: ids
                .iter()
                .map(|id| RetrievalCandidate::scored(*id, 0.9, None))
                .collect(),
            strategy_used: QueryCategory::Semantic,
            degraded: false,
            filter_fallback: false,
            count: None,
            buckets: vec![],
            skipped_embeddings: 0,
        }
    }

    fn classification() -> QueryClassification {
        QueryClassification::new(QueryCategory::Semantic, QueryFilters::new(), 0.9)
    }

    #[test]
    fn test_check_citations_strips_unknown_ids() {
        let check = check_citations(
            "L'energia costa [a1]. Le rinnovabili crescono [a2, x9]. Altro [x9].",
            &allowed(&["a1", "a2"]),
        );
        assert_eq!(check.citations, vec!["a1", "a2"]);
        assert_eq!(check.stripped, vec!["x9"]);
        assert_eq!(
            check.text,
            "L'energia costa [a1]. Le rinnovabili crescono [a2]. Altro."
        );
    }

    #[test]
    fn test_check_citations_deduplicates_in_order() {
        let check = check_citations("[b] poi [a] poi [b; a]", &allowed(&["a", "b"]));
        assert_eq!(check.citations, vec!["b", "a"]);
        assert!(check.stripped.is_empty());
    }

    #[test]
    fn test_check_citations_leaves_prose_brackets() {
        let text = "Vedi [il testo completo](https://example.org) e [nota a margine].";
        let check = check_citations(text, &allowed(&["a1"]));
        assert_eq!(check.text, text);
        assert!(check.citations.is_empty());
        assert!(check.stripped.is_empty());
    }

    #[test]
    fn test_check_citations_skips_links_and_footnotes() {
        let check = check_citations(
            "Vedi [qui](https://example.org) e la nota [1] [a1].",
            &allowed(&["a1"]),
        );
        assert_eq!(check.text, "Vedi [qui](https://example.org) e la nota [1] [a1].");
        assert_eq!(check.citations, vec!["a1"]);
        assert!(check.stripped.is_empty());

        // Link text shaped like an id is still a link.
        let check = check_citations("Fonte [x-9](https://example.org).", &allowed(&["a1"]));
        assert!(check.stripped.is_empty());
        assert!(check.text.contains("[x-9](https://example.org)"));
    }

    #[test]
    fn test_looks_like_id() {
        assert!(looks_like_id("rossi-2023-ucraina"));
        assert!(looks_like_id("art_7"));
        assert!(looks_like_id("a1"));
        assert!(!looks_like_id("1"));
        assert!(!looks_like_id("2023"));
        assert!(!looks_like_id("qui"));
        assert!(!looks_like_id("nota a margine"));
    }

    #[test]
    fn test_keyword_match() {
        assert_eq!(keyword_match("energia rinnovabile", "L'energia rinnovabile cresce"), 1.0);
        assert_eq!(keyword_match("energia rinnovabile", "Il lavoro"), 0.0);
        assert_eq!(keyword_match("a b", "anything"), 0.0);
    }

    #[test]
    fn test_excerpt_centers_best_paragraph() {
        let filler = "parole a caso ".repeat(50);
        let content = format!("{filler}\n\nIl gas russo e la crisi energetica.\n\n{filler}");
        let cut = excerpt(&content, "crisi energetica", None, 200);
        assert!(cut.contains("crisi energetica"));
        assert!(cut.starts_with('…') && cut.ends_with('…'));
        assert!(cut.chars().count() <= 202);
    }

    #[test]
    fn test_excerpt_prefers_snippet_and_keeps_short_content() {
        assert_eq!(excerpt("breve", "q", None, 100), "breve");

        let content = format!("{}SNIPPET{}", "x".repeat(500), "y".repeat(500));
        let cut = excerpt(&content, "nulla", Some("SNIPPET"), 100);
        assert!(cut.contains("SNIPPET"));

        let cut = excerpt(&content, "nulla", Some("snippet"), 100);
        assert!(cut.contains("SNIPPET"));
    }

    #[tokio::test]
    async fn test_no_candidates_skips_model() {
        let model = MockLanguageModel::new();
        let synth = AnswerSynthesizer::new(Arc::new(model.clone()), &RagConfig::default());
        let mut empty = outcome(&[]);
        empty.degraded = true;

        let answer = synth.synthesize("Cosa dice?", &classification(), &empty, &[]).await;
        assert_eq!(answer.status, AnswerStatus::NoMatches);
        assert_eq!(answer.confidence, 0.0);
        assert!(answer.citations.is_empty());
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_answer_with_verified_citations() {
        let model = MockLanguageModel::new()
            .with_reply("Le rinnovabili dividono i comuni [bianchi-2023-rinnovabili] [inventato-1].");
        let synth = AnswerSynthesizer::new(Arc::new(model.clone()), &RagConfig::default());
        let corpus = sample_corpus();
        let retrieved = outcome(&["bianchi-2023-rinnovabili", "rossi-2021-energia"]);

        let answer = synth
            .synthesize("Cosa si dice delle rinnovabili?", &classification(), &retrieved, &corpus)
            .await;

        assert_eq!(answer.status, AnswerStatus::Answered);
        assert_eq!(answer.citations, vec!["bianchi-2023-rinnovabili"]);
        assert_eq!(answer.flags.stripped_citations, vec!["inventato-1"]);
        assert!((answer.confidence - 0.9 * STRIPPED_CITATION_FACTOR).abs() < 1e-5);

        let prompt = &model.calls()[0].prompt;
        assert!(prompt.contains("[bianchi-2023-rinnovabili] Energia rinnovabile e territorio"));
        assert!(prompt.contains("Luca Bianchi | 2023-09-12 | Quaderni del territorio"));
        assert!(prompt.contains("Mario Rossi | 2021-03-15\n"));
    }

    #[tokio::test]
    async fn test_context_is_capped() {
        let model = MockLanguageModel::new().with_reply("Risposta [art-a] [art-f].");
        let config = RagConfig::default().with_max_context_articles(2);
        let synth = AnswerSynthesizer::new(Arc::new(model), &config);
        let ids = ["art-a", "art-b", "art-c", "art-f"];
        let articles: Vec<Article> = ids.iter().map(|id| Article::new(*id, "t", "testo")).collect();

        let answer = synth
            .synthesize("domanda", &classification(), &outcome(&ids), &articles)
            .await;
        assert_eq!(answer.candidates.len(), 2);
        assert_eq!(answer.citations, vec!["art-a"]);
        assert_eq!(answer.flags.stripped_citations, vec!["art-f"]);
    }

    #[tokio::test]
    async fn test_model_failure_returns_candidates() {
        let model = MockLanguageModel::new().failing();
        let synth = AnswerSynthesizer::new(Arc::new(model), &RagConfig::default());
        let corpus = sample_corpus();

        let answer = synth
            .synthesize("domanda", &classification(), &outcome(&["neri-cultura"]), &corpus)
            .await;
        assert!(matches!(answer.status, AnswerStatus::SynthesisUnavailable { .. }));
        assert!(answer.text.is_empty());
        assert_eq!(answer.candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_periods_collapse_in_prompt() {
        use crate::types::retrieval::BucketResult;
        use chrono::NaiveDate;

        let bucket = |year: i32, ids: &[&str]| BucketResult {
            label: year.to_string(),
            from: NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
            to: NaiveDate::from_ymd_opt(year, 12, 31).unwrap(),
            candidates: ids
                .iter()
                .map(|id| RetrievalCandidate::scored(*id, 0.9, None))
                .collect(),
        };
        let mut analytical = outcome(&["neri-cultura"]);
        analytical.strategy_used = QueryCategory::Analytical;
        analytical.buckets = vec![
            bucket(2017, &[]),
            bucket(2018, &[]),
            bucket(2019, &[]),
            bucket(2020, &["neri-cultura"]),
            bucket(2021, &[]),
        ];

        let model = MockLanguageModel::new().with_reply("Il teatro resiste [neri-cultura].");
        let synth = AnswerSynthesizer::new(Arc::new(model.clone()), &RagConfig::default());
        synth
            .synthesize("Come cambia il teatro?", &classification(), &analytical, &sample_corpus())
            .await;

        let prompt = &model.calls()[0].prompt;
        assert!(prompt.contains("- 2017..2019: -\n- 2020: neri-cultura\n- 2021: -\n"));
        assert!(!prompt.contains("- 2018"));
    }

    #[test]
    fn test_confidence_factors() {
        let context = vec![RetrievalCandidate::unscored("a", None)];
        let flags = AnswerFlags {
            low_classification_confidence: true,
            degraded_retrieval: true,
            ..Default::default()
        };
        let c = answer_confidence(&context, 0.0, &flags, false, false);
        assert!((c - UNSCORED_RETRIEVAL_QUALITY * 0.5 * DEGRADED_FACTOR).abs() < 1e-6);
    }
}
