//! Data types for articles, queries, retrieval and answers.

pub mod answer;
pub mod article;
pub mod config;
pub mod query;
pub mod retrieval;
