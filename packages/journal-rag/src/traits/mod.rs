//! Core trait abstractions.
//!
//! These traits define the interfaces that applications implement
//! to provide storage, embeddings and language model completions.

pub mod ai;
pub mod store;
