//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the library
//! without making real model calls.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::error::{RagError, Result};
use crate::stores::MemoryStore;
use crate::traits::ai::{Embedder, LanguageModel};
use crate::types::article::Article;

/// Embedding dimension of [`sample_corpus`].
pub const FIXTURE_DIM: usize = 4;

/// A scripted reply.
#[derive(Debug, Clone)]
enum MockReply {
    Text(String),
    Fail(String),
}

/// Record of a call made to the mock language model.
#[derive(Debug, Clone)]
pub struct MockModelCall {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A mock language model for testing.
///
/// Replies are resolved in this order: queued replies (FIFO), then the
/// always-fail switch, then the first rule whose pattern occurs in the
/// prompt, then the default reply.
#[derive(Default, Clone)]
pub struct MockLanguageModel {
    /// (prompt substring, reply)
    rules: Arc<RwLock<Vec<(String, String)>>>,

    queue: Arc<RwLock<VecDeque<MockReply>>>,

    default_reply: Arc<RwLock<String>>,

    failing: Arc<AtomicBool>,

    /// Artificial latency applied to every call
    delay: Option<Duration>,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<MockModelCall>>>,
}

impl MockLanguageModel {
    /// Create a new mock that replies with an empty string.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `reply` whenever the prompt contains `pattern`.
    pub fn with_rule(self, pattern: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((pattern.into(), reply.into()));
        self
    }

    /// Queue a reply for the next unanswered call.
    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.queue
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(MockReply::Text(reply.into()));
        self
    }

    /// Queue a failure for the next unanswered call.
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.queue
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(MockReply::Fail(message.into()));
        self
    }

    /// Reply used when nothing else matches.
    pub fn with_default_reply(self, reply: impl Into<String>) -> Self {
        *self
            .default_reply
            .write()
            .unwrap_or_else(PoisonError::into_inner) = reply.into();
        self
    }

    /// Fail every call that has no queued reply.
    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockModelCall> {
        self.calls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        self.calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MockModelCall {
                prompt: prompt.to_string(),
                max_tokens,
                temperature,
            });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self
            .queue
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match queued {
            Some(MockReply::Text(text)) => return Ok(text),
            Some(MockReply::Fail(message)) => return Err(RagError::provider(message)),
            None => {}
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(RagError::provider("mock language model unavailable"));
        }

        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, reply)) = rules.iter().find(|(pattern, _)| prompt.contains(pattern.as_str())) {
            return Ok(reply.clone());
        }

        Ok(self
            .default_reply
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// A mock embedder for testing.
///
/// Returns predefined vectors for known texts and a deterministic hash-based
/// vector otherwise.
#[derive(Clone)]
pub struct MockEmbedder {
    /// Predefined embeddings by text
    embeddings: Arc<RwLock<HashMap<String, Vec<f32>>>>,

    dimension: usize,

    failing: Arc<AtomicBool>,

    /// Texts embedded so far
    calls: Arc<RwLock<Vec<String>>>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(FIXTURE_DIM)
    }
}

impl MockEmbedder {
    /// Create a mock producing `dimension`-component vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            embeddings: Arc::default(),
            dimension,
            failing: Arc::default(),
            calls: Arc::default(),
        }
    }

    /// Add a predefined embedding for text.
    pub fn with_embedding(self, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        self.embeddings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(text.into(), embedding);
        self
    }

    /// Fail every call.
    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    /// Texts embedded so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Generate a deterministic embedding based on text.
    fn generate_deterministic_embedding(&self, text: &str) -> Vec<f32> {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let hash = hasher.finalize();

        (0..self.dimension)
            .map(|i| {
                let byte = hash[i % 32] as f32;
                (byte / 127.5) - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());

        if self.failing.load(Ordering::SeqCst) {
            return Err(RagError::provider("mock embedder unavailable"));
        }

        Ok(self
            .embeddings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.generate_deterministic_embedding(text)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d)
}

fn dated(article: Article, y: i32, m: u32, d: u32) -> Article {
    match date(y, m, d) {
        Some(day) => article.with_date(day),
        None => article,
    }
}

/// A small Italian corpus with topical 4-d embeddings.
///
/// Axes: energy, foreign affairs, labour, culture. Mario Rossi wrote three
/// articles; one article is undated. Only the Bianchi article carries a
/// source and URL.
pub fn sample_corpus() -> Vec<Article> {
    vec![
        dated(
            Article::new(
                "rossi-2021-energia",
                "Il prezzo dell'energia",
                "Il caro bollette colpisce le famiglie.\n\nLe rinnovabili restano marginali nel mix energetico nazionale.",
            )
            .with_author("Mario Rossi")
            .with_categories(["energia"])
            .with_embedding(vec![0.9, 0.1, 0.0, 0.0]),
            2021,
            3,
            15,
        ),
        dated(
            Article::new(
                "rossi-2022-lavoro",
                "Salari e precarietà",
                "I contratti a termine crescono ancora.\n\nIl sindacato chiede una legge sul salario minimo.",
            )
            .with_author("Mario Rossi")
            .with_categories(["lavoro", "Società"])
            .with_embedding(vec![0.0, 0.1, 0.9, 0.1]),
            2022,
            6,
            1,
        ),
        dated(
            Article::new(
                "rossi-2023-ucraina",
                "Un anno di guerra",
                "L'invasione dell'Ucraina entra nel secondo anno.\n\nLa diplomazia europea resta divisa.",
            )
            .with_author("Mario Rossi")
            .with_categories(["esteri"])
            .with_embedding(vec![0.1, 0.9, 0.0, 0.0]),
            2023,
            2,
            24,
        ),
        dated(
            Article::new(
                "verdi-2022-ucraina",
                "La guerra alle porte dell'Europa",
                "Le truppe russe avanzano verso Kiev.\n\nL'Europa discute nuove sanzioni e forniture di armi.",
            )
            .with_author("Giulia Verdi")
            .with_categories(["esteri"])
            .with_embedding(vec![0.2, 0.95, 0.0, 0.0]),
            2022,
            3,
            10,
        ),
        dated(
            Article::new(
                "bianchi-2023-rinnovabili",
                "Energia rinnovabile e territorio",
                "Eolico e solare dividono i comuni.\n\nServe un piano nazionale per le energie rinnovabili.",
            )
            .with_author("Luca Bianchi")
            .with_categories(["energia", "ambiente"])
            .with_source("Quaderni del territorio")
            .with_url("https://example.org/quaderni/2023/rinnovabili")
            .with_embedding(vec![0.95, 0.0, 0.1, 0.0]),
            2023,
            9,
            12,
        ),
        Article::new(
            "neri-cultura",
            "Il teatro di provincia",
            "Le piccole compagnie sopravvivono grazie al volontariato.",
        )
        .with_author("Anna Neri")
        .with_categories(["cultura"])
        .with_embedding(vec![0.0, 0.0, 0.1, 0.9]),
    ]
}

/// A memory store loaded with [`sample_corpus`].
pub fn sample_store() -> MemoryStore {
    MemoryStore::with_articles(sample_corpus())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_model_reply_order() {
        let model = MockLanguageModel::new()
            .with_rule("classify", "rule reply")
            .with_default_reply("default")
            .with_reply("queued");

        assert_eq!(model.complete("classify this", 10, 0.0).await.unwrap(), "queued");
        assert_eq!(model.complete("classify this", 10, 0.0).await.unwrap(), "rule reply");
        assert_eq!(model.complete("other", 10, 0.0).await.unwrap(), "default");
        assert_eq!(model.call_count(), 3);
        assert_eq!(model.calls()[0].max_tokens, 10);
    }

    #[tokio::test]
    async fn test_mock_model_failure() {
        let model = MockLanguageModel::new().with_failure("boom");
        assert!(model.complete("x", 1, 0.0).await.is_err());
        assert!(model.complete("x", 1, 0.0).await.is_ok());

        let model = MockLanguageModel::new().failing();
        assert!(matches!(
            model.complete("x", 1, 0.0).await,
            Err(RagError::Provider(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_embedder_is_deterministic() {
        let embedder = MockEmbedder::new(8).with_embedding("known", vec![1.0; 8]);
        assert_eq!(embedder.embed("known").await.unwrap(), vec![1.0; 8]);

        let a = embedder.embed("hello").await.unwrap();
        let b = embedder.embed("hello").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert_eq!(embedder.calls().len(), 3);
    }

    #[test]
    fn test_sample_corpus_shape() {
        let corpus = sample_corpus();
        assert_eq!(corpus.len(), 6);
        assert_eq!(
            corpus
                .iter()
                .filter(|a| a.metadata.author == "Mario Rossi")
                .count(),
            3
        );
        assert!(corpus
            .iter()
            .all(|a| a.embedding.as_ref().map(Vec::len) == Some(FIXTURE_DIM)));
    }
}
