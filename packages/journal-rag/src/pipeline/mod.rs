//! Query pipeline.
//!
//! - Classification (model first, rules as fallback)
//! - Routing to one of the retrieval strategies
//! - Grounded answer synthesis with citation checks

pub mod classify;
pub mod prompts;
pub mod router;
pub mod synthesize;

pub use classify::{
    classify_by_rules, extract_json_object, parse_classification, repair_trailing_commas,
    QueryClassifier,
};
pub use prompts::{
    detect_language, format_answer_prompt, format_classify_prompt, no_matches_message, Language,
    ANSWER_PROMPT_EN, ANSWER_PROMPT_IT, CLASSIFY_PROMPT_EN, CLASSIFY_PROMPT_IT,
};
pub use router::QueryRouter;
pub use synthesize::{
    check_citations, excerpt, keyword_match, looks_like_id, AnswerSynthesizer, CitationCheck,
};
