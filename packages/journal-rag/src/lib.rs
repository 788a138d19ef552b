//! Question answering over an archive of full-length journal articles.
//!
//! Articles are never chunked: each one is stored whole with a single
//! embedding, and answers cite whole articles by id.
//!
//! # Pipeline
//!
//! 1. **Classify** the question into metadata, semantic, hybrid or
//!    analytical, extracting author/date/category/keyword filters. The model
//!    is asked first; keyword rules take over when it fails.
//! 2. **Route** to the matching retrieval strategy. Hybrid search falls back
//!    to the full corpus when filters match nothing, and says so.
//! 3. **Synthesize** an answer from the top articles, then strip any cited
//!    id that was not in the context.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use journal_rag::{JournalRag, MemoryStore};
//! use journal_rag::testing::{MockEmbedder, MockLanguageModel};
//!
//! let rag = JournalRag::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MockEmbedder::default()),
//!     Arc::new(MockLanguageModel::new()),
//! );
//!
//! let answer = rag.query("Cosa scrive Mario Rossi sull'energia?").await?;
//! for id in &answer.citations {
//!     println!("cited: {id}");
//! }
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Store, embedder and language model abstractions
//! - [`types`] - Articles, classifications, retrieval outcomes, answers
//! - [`pipeline`] - Classifier, router and answer synthesizer
//! - [`retrieval`] - The four retrieval strategies
//! - [`stores`] - Storage implementations (MemoryStore, SqliteStore)
//! - [`security`] - Credential handling
//! - [`testing`] - Mock providers and a sample corpus

pub mod engine;
pub mod error;
pub mod pipeline;
pub mod retrieval;
pub mod security;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

#[cfg(feature = "openai")]
pub mod ai;

// Re-export core types at crate root
pub use engine::JournalRag;
pub use error::{ParseError, RagError, Result, Stage};
pub use traits::{
    ai::{Embedder, LanguageModel},
    store::{cosine_similarity, ArticleStore, SortOrder},
};
pub use types::{
    answer::{AnswerFlags, AnswerResult, AnswerStatus},
    article::{Article, ArticleMetadata, ArticleRef, CorpusStatistics, EmbeddingEntry},
    config::{ArticleFilter, AuthorMatch, PartialFilterPolicy, RagConfig},
    query::{ClassificationSource, DateRange, QueryCategory, QueryClassification, QueryFilters},
    retrieval::{BucketResult, RetrievalCandidate, RetrievalOutcome, TimeBucket},
};

// Re-export pipeline components
pub use pipeline::{check_citations, AnswerSynthesizer, CitationCheck, QueryClassifier, QueryRouter};
pub use retrieval::{
    AnalyticalStrategy, HybridStrategy, MetadataStrategy, RetrievalStrategy, SearchRequest,
    SemanticStrategy,
};

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;

pub use security::{ProviderCredentials, SecretString};
