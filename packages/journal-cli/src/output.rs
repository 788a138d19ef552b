//! Terminal rendering for answers, classifications and retrieval results.

use std::collections::BTreeSet;

use anyhow::Result;
use colored::Colorize;
use journal_rag::{
    AnswerResult, AnswerStatus, Article, CorpusStatistics, QueryClassification, RetrievalOutcome,
};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn article_line(article: &Article) -> String {
    let author = if article.metadata.author.is_empty() {
        "N/A"
    } else {
        article.metadata.author.as_str()
    };
    let mut line = format!(
        "{} {} ({}, {})",
        format!("[{}]", article.id).bright_cyan(),
        article.metadata.title.bold(),
        author,
        article.date_label()
    );
    if let Some(url) = &article.metadata.url {
        line.push_str(&format!(" {}", url.dimmed()));
    }
    line
}

pub fn print_answer(answer: &AnswerResult, cited: &[Article]) {
    match &answer.status {
        AnswerStatus::Answered | AnswerStatus::NoMatches => println!("{}", answer.text),
        AnswerStatus::SynthesisUnavailable { reason } => {
            println!("{} {}", "Answer unavailable:".red().bold(), reason);
            println!("Top articles:");
            for candidate in &answer.candidates {
                println!("  - {}", candidate.article_id);
            }
        }
    }

    if !cited.is_empty() {
        println!();
        println!("{}", "Sources".bright_green().bold());
        for article in cited {
            println!("  {}", article_line(article));
        }
    }

    println!();
    println!(
        "{} {:.2}  {} {}",
        "confidence".dimmed(),
        answer.confidence,
        "strategy".dimmed(),
        answer.strategy_used
    );

    let flags = &answer.flags;
    if flags.filter_fallback {
        println!("{}", "! filters matched nothing, searched the whole archive".yellow());
    } else if flags.degraded_retrieval {
        println!("{}", "! retrieval was degraded".yellow());
    }
    if flags.low_classification_confidence {
        println!("{}", "! question classification was uncertain".yellow());
    }
    if !flags.stripped_citations.is_empty() {
        println!(
            "{} {}",
            "! removed unknown citations:".yellow(),
            flags.stripped_citations.join(", ")
        );
    }
}

pub fn print_classification(classification: &QueryClassification) {
    println!(
        "{} {} ({:.2}, {:?})",
        "category".dimmed(),
        classification.category.to_string().bold(),
        classification.confidence,
        classification.source
    );

    let filters = &classification.filters;
    if let Some(author) = &filters.author {
        println!("  author: {author}");
    }
    if let Some(range) = &filters.date_range {
        let from = range.from.map(|d| d.to_string()).unwrap_or_else(|| "…".into());
        let to = range.to.map(|d| d.to_string()).unwrap_or_else(|| "…".into());
        println!("  dates: {from} → {to}");
    }
    if let Some(categories) = &filters.categories {
        let list: Vec<&str> = categories.iter().map(String::as_str).collect();
        println!("  categories: {}", list.join(", "));
    }
    if let Some(keywords) = &filters.keywords {
        println!("  keywords: {}", keywords.join(", "));
    }
    if classification.requires_count {
        println!("  count requested");
    }
    if let Some(q) = &classification.semantic_query {
        println!("  search text: {q}");
    }
    if let Some(reasoning) = &classification.reasoning {
        println!("  {}", reasoning.dimmed());
    }
}

pub fn print_outcome(outcome: &RetrievalOutcome, articles: &[Article]) {
    println!();
    if let Some(count) = outcome.count {
        println!("{} {}", "total matches".dimmed(), count);
    }
    if outcome.filter_fallback {
        println!("{}", "! filters matched nothing, searched the whole archive".yellow());
    }
    if outcome.skipped_embeddings > 0 {
        println!(
            "{} {}",
            "! articles skipped for embedding size mismatch:".yellow(),
            outcome.skipped_embeddings
        );
    }

    if !outcome.buckets.is_empty() {
        for bucket in &outcome.buckets {
            let ids: Vec<&str> = bucket.candidates.iter().map(|c| c.article_id.as_str()).collect();
            println!("{} {}", bucket.label.bold(), ids.join(", "));
        }
        return;
    }

    if outcome.candidates.is_empty() {
        println!("No matching articles.");
        return;
    }
    for candidate in &outcome.candidates {
        let score = candidate
            .score
            .map(|s| format!("{s:.3}"))
            .unwrap_or_else(|| "-".to_string());
        match articles.iter().find(|a| a.id == candidate.article_id) {
            Some(article) => println!("  {score:>6}  {}", article_line(article)),
            None => println!("  {score:>6}  [{}]", candidate.article_id),
        }
    }
}

pub fn print_statistics(stats: &CorpusStatistics, authors: &BTreeSet<String>) {
    println!("{} {}", "articles".dimmed(), stats.total_articles);
    println!("{} {}", "authors".dimmed(), stats.unique_authors);
    match (stats.oldest, stats.newest) {
        (Some(oldest), Some(newest)) => println!("{} {oldest} → {newest}", "period".dimmed()),
        _ => println!("{} no dated articles", "period".dimmed()),
    }
    if !authors.is_empty() {
        println!();
        for author in authors {
            println!("  {author}");
        }
    }
}
