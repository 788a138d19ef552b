//! Property tests for ordering, score thresholds, buckets and citations.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use proptest::prelude::*;

use journal_rag::{
    check_citations,
    testing::MockEmbedder,
    types::retrieval::{compare_candidates, sort_candidates},
    Article, MemoryStore, RetrievalCandidate, SemanticStrategy, TimeBucket,
};

fn date_strategy() -> impl Strategy<Value = Option<NaiveDate>> {
    prop::option::of((2000i32..2030, 1u32..=12, 1u32..=28))
        .prop_map(|d| d.and_then(|(y, m, day)| NaiveDate::from_ymd_opt(y, m, day)))
}

fn candidates_strategy() -> impl Strategy<Value = Vec<RetrievalCandidate>> {
    prop::collection::vec((prop::option::of(0.0f32..1.0), date_strategy()), 0..40).prop_map(
        |items| {
            items
                .into_iter()
                .enumerate()
                .map(|(i, (score, date))| RetrievalCandidate {
                    article_id: format!("art-{i:03}"),
                    score,
                    matched_snippet: None,
                    publication_date: date,
                })
                .collect()
        },
    )
}

proptest! {
    #[test]
    fn sorted_candidates_are_ordered(mut candidates in candidates_strategy()) {
        sort_candidates(&mut candidates);
        for pair in candidates.windows(2) {
            prop_assert_ne!(compare_candidates(&pair[0], &pair[1]), std::cmp::Ordering::Greater);
        }
        if let Some(first_unscored) = candidates.iter().position(|c| c.score.is_none()) {
            prop_assert!(candidates[first_unscored..].iter().all(|c| c.score.is_none()));
        }
    }

    #[test]
    fn ordering_ignores_input_order(candidates in candidates_strategy()) {
        let mut forward = candidates.clone();
        let mut reversed: Vec<_> = candidates.into_iter().rev().collect();
        sort_candidates(&mut forward);
        sort_candidates(&mut reversed);
        prop_assert_eq!(forward, reversed);
    }

    #[test]
    fn citations_are_subset_of_allowed(
        cited in prop::collection::vec(0usize..8, 0..12),
        filler in "[a-z ]{0,20}",
    ) {
        let allowed_ids = ["a0", "a1", "a2", "a3"];
        let allowed: HashSet<&str> = allowed_ids.into_iter().collect();

        let mut text = String::new();
        for n in &cited {
            text.push_str(&filler);
            text.push_str(&format!(" [a{n}]"));
        }

        let check = check_citations(&text, &allowed);
        prop_assert!(check.citations.iter().all(|c| allowed.contains(c.as_str())));
        prop_assert!(check.stripped.iter().all(|c| !allowed.contains(c.as_str())));

        let unique: HashSet<_> = check.citations.iter().collect();
        prop_assert_eq!(unique.len(), check.citations.len());

        let recheck = check_citations(&check.text, &allowed);
        prop_assert!(recheck.stripped.is_empty());
        prop_assert_eq!(recheck.citations, check.citations);
    }

    #[test]
    fn buckets_tile_the_range(
        start in 0i64..3000,
        span in 0i64..1500,
        bucket in prop_oneof![Just(TimeBucket::Year), Just(TimeBucket::Quarter), Just(TimeBucket::Month)],
    ) {
        let base = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        let from = base + chrono::Duration::days(start);
        let to = from + chrono::Duration::days(span);

        let periods = bucket.periods(from, to);
        prop_assert!(!periods.is_empty());
        prop_assert_eq!(periods.first().unwrap().from, from);
        prop_assert_eq!(periods.last().unwrap().to, to);
        for pair in periods.windows(2) {
            prop_assert_eq!(pair[0].to.succ_opt().unwrap(), pair[1].from);
        }
        for period in &periods {
            prop_assert!(period.from <= period.to);
            prop_assert_eq!(period.from.year(), period.to.year());
        }
    }

    #[test]
    fn semantic_scores_respect_threshold(
        vectors in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 3), 1..20),
        min_score in 0.0f32..1.0,
    ) {
        let store = MemoryStore::with_articles(
            vectors
                .into_iter()
                .enumerate()
                .map(|(i, v)| Article::new(format!("art-{i}"), "t", "").with_embedding(v)),
        );
        let embedder = MockEmbedder::new(3).with_embedding("q", vec![1.0, 0.5, -0.25]);
        let semantic = SemanticStrategy::new(Arc::new(store), Arc::new(embedder));

        let results = tokio_test::block_on(semantic.search("q", None, 100, min_score)).unwrap();

        for candidate in &results.candidates {
            prop_assert!(candidate.score.unwrap() >= min_score);
        }
        for pair in results.candidates.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
    }
}
