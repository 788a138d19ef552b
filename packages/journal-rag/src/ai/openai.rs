//! OpenAI-compatible provider.
//!
//! Talks to `/chat/completions` and `/embeddings`, so it also works with
//! local servers exposing the same API (vLLM, llama.cpp, Ollama) via
//! [`ProviderCredentials::local`].
//!
//! # Example
//!
//! ```rust,ignore
//! use journal_rag::ai::OpenAiProvider;
//!
//! let provider = OpenAiProvider::new("sk-...")
//!     .with_model("gpt-4o-mini")
//!     .with_embedding_model("text-embedding-3-small", 1536);
//! ```

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RagError, Result};
use crate::security::ProviderCredentials;
use crate::traits::ai::{Embedder, LanguageModel};

/// Chat completions and embeddings from one OpenAI-compatible server.
#[derive(Clone, Debug)]
pub struct OpenAiProvider {
    client: Client,
    credentials: ProviderCredentials,
    model: String,
    embedding_model: String,
    dimension: usize,
}

impl OpenAiProvider {
    /// Provider for the OpenAI API with the given key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_credentials(ProviderCredentials::new(api_key))
    }

    pub fn with_credentials(credentials: ProviderCredentials) -> Self {
        Self {
            client: Client::new(),
            credentials,
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            dimension: 1536,
        }
    }

    /// Set the chat model (default: gpt-4o-mini).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the embedding model and the dimension it produces.
    ///
    /// The dimension must match the embeddings stored at ingestion.
    pub fn with_embedding_model(mut self, model: impl Into<String>, dimension: usize) -> Self {
        self.embedding_model = model.into();
        self.dimension = dimension;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.credentials.base_url
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let request = self
            .client
            .post(format!("{}/{}", self.credentials.base_url, path))
            .header("Content-Type", "application/json");
        match self.credentials.bearer() {
            Some(auth) => request.header("Authorization", auth),
            None => request,
        }
    }

    async fn embed_inputs(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let expected = input.len();
        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input,
        };

        let response = self
            .post("embeddings")
            .json(&request)
            .send()
            .await
            .map_err(RagError::provider)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RagError::provider(format!(
                "embedding request failed ({status}): {error_text}"
            )));
        }

        let mut body: EmbeddingResponse = response.json().await.map_err(RagError::provider)?;
        if body.data.len() != expected {
            return Err(RagError::provider(format!(
                "expected {expected} embeddings, got {}",
                body.data.len()
            )));
        }
        body.data.sort_by_key(|d| d.index);
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl LanguageModel for OpenAiProvider {
    async fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
        };

        debug!(model = %self.model, prompt_chars = prompt.len(), "Chat completion request");

        let response = self
            .post("chat/completions")
            .json(&request)
            .send()
            .await
            .map_err(RagError::provider)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RagError::provider(format!(
                "chat completion failed ({status}): {error_text}"
            )));
        }

        let chat_response: ChatResponse = response.json().await.map_err(RagError::provider)?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RagError::provider("chat completion returned no content"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_inputs(vec![text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| RagError::provider("embedding response was empty"))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_inputs(texts.iter().map(|t| t.to_string()).collect())
            .await
    }
}

// Request/Response types

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
