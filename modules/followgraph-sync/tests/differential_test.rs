//! Differential follow sync against the in-memory store.
//!
//! Run with: cargo test -p followgraph-sync --test differential_test

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};

use followgraph_common::{Direction, EdgeKind, EdgePair, RetryPolicy};
use followgraph_graph::BatchSizes;
use followgraph_sync::testing::{api_user, api_users, stored_account, MockGraphStore, MockSocialApi};
use followgraph_sync::{EngineSettings, SyncEngine, SyncOutcome};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn settings() -> EngineSettings {
    EngineSettings {
        rate_limit_retry: RetryPolicy::immediate(3),
        ..Default::default()
    }
}

fn ids(raw: &[&str]) -> HashSet<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

/// Store with `root` plus `followers` as fresh accounts and FOLLOWS edges into root.
fn store_with_followers(root: &str, followers: &[&str]) -> MockGraphStore {
    let store = MockGraphStore::new();
    let now = Utc::now();
    store.seed_account(stored_account(root, now));
    for id in followers {
        store.seed_account(stored_account(id, now));
        store.seed_edge(EdgeKind::Follows, id, root);
    }
    store
}

fn followers_of(root: &str, fresh: &[&str]) -> MockSocialApi {
    let users = fresh.iter().map(|id| api_user(id, id)).collect();
    MockSocialApi::new().with_connections(root, Direction::Followers, vec![users])
}

// ---------------------------------------------------------------------------
// Snapshot semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn follower_example_adds_one_and_removes_one() {
    let store = Arc::new(store_with_followers("orgA", &["u1", "u2", "u3"]));
    let social = Arc::new(followers_of("orgA", &["u2", "u3", "u4"]));
    let engine = SyncEngine::new(social, store.clone(), settings());

    let report = engine.sync_followers("orgA").await.unwrap();

    assert_eq!(store.follower_ids("orgA"), ids(&["u2", "u3", "u4"]));
    assert!(store.account("u4").is_some(), "new follower must be upserted");
    assert!(!store.edges(EdgeKind::Follows).contains(&EdgePair::new("u1", "orgA")));
    assert_eq!(report.added, 1);
    assert_eq!(report.removed, 1);
    assert_eq!(report.unchanged, 2);
    assert_eq!(report.accounts_written, 1, "only u4 needed a write");
    assert_eq!(report.accounts_up_to_date, 2);
    assert_eq!(report.outcome(), SyncOutcome::Succeeded);
}

#[tokio::test]
async fn second_identical_sync_writes_nothing() {
    let store = Arc::new(MockGraphStore::new());
    let social = Arc::new(MockSocialApi::new().with_connections(
        "root",
        Direction::Followers,
        vec![api_users("u", 0..150), api_users("u", 150..260)],
    ));
    let engine = SyncEngine::new(social, store.clone(), settings());

    engine.sync_followers("root").await.unwrap();
    assert_eq!(store.follower_ids("root").len(), 260);
    store.reset_writes();

    let report = engine.sync_followers("root").await.unwrap();

    assert_eq!(store.writes().total(), 0, "unchanged data must not be rewritten");
    assert_eq!(report.added, 0);
    assert_eq!(report.removed, 0);
    assert_eq!(report.accounts_up_to_date, 260);
}

#[tokio::test]
async fn stored_set_equals_fresh_set_after_sync() {
    let cases: &[(&[&str], &[&str])] = &[
        (&[], &["a", "b"]),
        (&["a", "b"], &[]),
        (&["a", "b", "c"], &["a", "b", "c"]),
        (&["a", "b", "c"], &["d", "e"]),
        (&["a", "c", "e", "g"], &["b", "c", "d", "g", "h"]),
    ];
    for (stored, fresh) in cases {
        let store = Arc::new(store_with_followers("root", stored));
        let social = Arc::new(followers_of("root", fresh));
        let engine = SyncEngine::new(social, store.clone(), settings());

        engine.sync_followers("root").await.unwrap();

        assert_eq!(store.follower_ids("root"), ids(fresh), "stored {stored:?} fresh {fresh:?}");
    }
}

#[tokio::test]
async fn following_edges_point_away_from_root() {
    let store = Arc::new(MockGraphStore::new());
    let social = Arc::new(MockSocialApi::new().with_connections(
        "root",
        Direction::Following,
        vec![vec![api_user("x", "x"), api_user("y", "y")]],
    ));
    let engine = SyncEngine::new(social, store.clone(), settings());

    engine.sync_following("root").await.unwrap();

    let edges = store.edges(EdgeKind::Follows);
    assert!(edges.contains(&EdgePair::new("root", "x")));
    assert!(edges.contains(&EdgePair::new("root", "y")));
    assert!(store.follower_ids("root").is_empty());
}

// ---------------------------------------------------------------------------
// Partial results
// ---------------------------------------------------------------------------

#[tokio::test]
async fn truncated_fetch_adds_but_does_not_remove() {
    let store = Arc::new(store_with_followers("root", &["old", "u0"]));
    let social = Arc::new(
        MockSocialApi::new()
            .with_connections(
                "root",
                Direction::Followers,
                vec![api_users("u", 0..2), api_users("u", 2..4), api_users("u", 4..6)],
            )
            .fail_page("root", Direction::Followers, 1),
    );
    let engine = SyncEngine::new(social, store.clone(), settings());

    let report = engine.sync_followers("root").await.unwrap();

    assert!(report.truncated);
    assert_eq!(report.removals_deferred, 1);
    assert_eq!(store.follower_ids("root"), ids(&["old", "u0", "u1"]));
    assert_eq!(
        report.outcome(),
        SyncOutcome::SucceededWithSkipped {
            skipped: 0,
            truncated: true
        }
    );
}

#[tokio::test]
async fn failed_upsert_chunk_skips_those_accounts() {
    let store = Arc::new(
        MockGraphStore::new()
            .with_batch_sizes(BatchSizes {
                account_upsert: 2,
                ..Default::default()
            })
            .fail_upserts_for(&["u3"]),
    );
    store.seed_account(stored_account("root", Utc::now()));
    let social = Arc::new(MockSocialApi::new().with_connections(
        "root",
        Direction::Followers,
        vec![api_users("u", 1..5)],
    ));
    let engine = SyncEngine::new(social, store.clone(), settings());

    let report = engine.sync_followers("root").await.unwrap();

    assert_eq!(report.skipped_accounts, vec!["u3".to_string(), "u4".to_string()]);
    assert_eq!(report.accounts_written, 2);
    assert_eq!(store.follower_ids("root"), ids(&["u1", "u2"]));
    assert!(store.account("u3").is_none());
    assert_eq!(report.outcome().to_string(), "succeeded with 2 skipped accounts");
}

// ---------------------------------------------------------------------------
// Staleness gating
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_and_changed_accounts_are_rewritten() {
    let now = Utc::now();
    let store = Arc::new(MockGraphStore::new());
    store.seed_account(stored_account("root", now));
    store.seed_account(stored_account("same", now - Duration::days(1)));
    store.seed_account(stored_account("old", now - Duration::days(30)));
    store.seed_account(stored_account("moved", now - Duration::days(1)));

    let mut moved = api_user("moved", "moved");
    moved.followers_count = 99;
    let social = Arc::new(MockSocialApi::new().with_connections(
        "root",
        Direction::Followers,
        vec![vec![api_user("same", "same"), api_user("old", "old"), moved]],
    ));
    let engine = SyncEngine::new(social, store.clone(), settings());

    let report = engine.sync_followers("root").await.unwrap();

    assert_eq!(report.accounts_written, 2);
    assert_eq!(report.accounts_up_to_date, 1);
    assert_eq!(store.account("moved").unwrap().followers_count, 99);
    assert!(store.account("old").unwrap().updated_at > now - Duration::days(1));
    assert!(store.account("same").unwrap().updated_at < now);
}
