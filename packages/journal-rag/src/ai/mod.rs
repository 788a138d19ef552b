//! Model provider implementations.
//!
//! Reference implementations of [`LanguageModel`](crate::traits::ai::LanguageModel)
//! and [`Embedder`](crate::traits::ai::Embedder). Users can use these
//! directly or implement their own.

#[cfg(feature = "openai")]
mod openai;

#[cfg(feature = "openai")]
pub use openai::OpenAiProvider;
