//! Answer types - synthesized prose with verified citations.

use serde::{Deserialize, Serialize};

use crate::types::query::{QueryCategory, QueryClassification};
use crate::types::retrieval::RetrievalCandidate;

/// How the answer was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerStatus {
    /// The model wrote an answer grounded in the candidates
    Answered,

    /// Retrieval found nothing; `text` is the fixed no-match message
    NoMatches,

    /// The model failed or timed out; candidates are returned without prose
    SynthesisUnavailable { reason: String },
}

/// Signals callers use to tell "no data" from "service degraded".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerFlags {
    pub degraded_retrieval: bool,
    pub filter_fallback: bool,
    pub low_classification_confidence: bool,

    /// Bracketed ids in the model output that were not among the candidates
    #[serde(default)]
    pub stripped_citations: Vec<String>,
}

/// Final result of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub text: String,

    /// Ordered, de-duplicated; every id is one of `candidates`
    pub citations: Vec<String>,

    /// In [0, 1]
    pub confidence: f32,

    pub status: AnswerStatus,
    pub flags: AnswerFlags,

    /// The ranked list that was handed to synthesis
    pub candidates: Vec<RetrievalCandidate>,

    pub classification: QueryClassification,
    pub strategy_used: QueryCategory,
}
