mod config;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use journal_rag::{
    ai::OpenAiProvider, ArticleStore, JournalRag, ProviderCredentials, SqliteStore,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{load_rag_config, Config};

#[derive(Parser)]
#[command(name = "journal", about = "Ask questions about a journal article archive")]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// JSON file with pipeline settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question with citations
    Ask { question: String },

    /// Show how a question would be classified
    Classify { question: String },

    /// Show which articles a question retrieves, without writing an answer
    Retrieve { question: String },

    /// Corpus statistics and the list of authors
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "debug,sqlx=info"
    } else {
        "info,journal_rag=debug,sqlx=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    let rag_config = load_rag_config(cli.config.as_deref())?;

    let store = Arc::new(
        SqliteStore::new(&config.database_url)
            .await
            .with_context(|| format!("Failed to open database {}", config.database_url))?,
    );

    let mut credentials = match &config.openai_api_key {
        Some(key) => ProviderCredentials::new(key.as_str()),
        None => ProviderCredentials::local(ProviderCredentials::DEFAULT_BASE_URL),
    };
    if let Some(url) = &config.openai_base_url {
        credentials = credentials.with_base_url(url.as_str());
    }
    if credentials.api_key.is_none() && config.openai_base_url.is_none() {
        tracing::warn!("OPENAI_API_KEY not set and no OPENAI_BASE_URL; model calls will likely fail");
    }

    let provider = Arc::new(
        OpenAiProvider::with_credentials(credentials)
            .with_model(&config.llm_model)
            .with_embedding_model(&config.embedding_model, config.embedding_dimension),
    );

    let rag = JournalRag::with_config(store.clone(), provider.clone(), provider, rag_config)
        .context("Invalid pipeline configuration")?;

    match cli.command {
        Command::Ask { question } => {
            let answer = rag.query(&question).await.context("Query failed")?;
            if cli.json {
                output::print_json(&answer)?;
            } else {
                let cited = store.get_articles(&answer.citations).await?;
                output::print_answer(&answer, &cited);
            }
        }
        Command::Classify { question } => {
            let classification = rag.classify(&question).await;
            if cli.json {
                output::print_json(&classification)?;
            } else {
                output::print_classification(&classification);
            }
        }
        Command::Retrieve { question } => {
            let classification = rag.classify(&question).await;
            let outcome = rag
                .retrieve_classified(&classification, &question)
                .await
                .context("Retrieval failed")?;
            if cli.json {
                output::print_json(&outcome)?;
            } else {
                let ids: Vec<String> = outcome.candidates.iter().map(|c| c.article_id.clone()).collect();
                let articles = store.get_articles(&ids).await?;
                output::print_classification(&classification);
                output::print_outcome(&outcome, &articles);
            }
        }
        Command::Stats => {
            let stats = rag.statistics().await.context("Failed to read statistics")?;
            let authors = store.authors().await.context("Failed to list authors")?;
            if cli.json {
                output::print_json(&serde_json::json!({
                    "statistics": stats,
                    "authors": authors,
                }))?;
            } else {
                output::print_statistics(&stats, &authors);
            }
        }
    }

    Ok(())
}
