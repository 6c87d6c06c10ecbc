//! Caller-facing engine operations: outcomes, both-direction sync, and the
//! org index query path.
//!
//! Run with: cargo test -p followgraph-sync --test engine_test

use std::sync::Arc;
use std::time::Duration;

use followgraph_common::{Direction, EdgeKind, EdgePair, RetryPolicy};
use followgraph_sync::testing::{api_user, employment, MockGraphStore, MockSocialApi};
use followgraph_sync::{EngineSettings, SyncEngine, SyncOutcome};

fn settings() -> EngineSettings {
    EngineSettings {
        rate_limit_retry: RetryPolicy::immediate(3),
        ..Default::default()
    }
}

#[tokio::test]
async fn unknown_account_reports_no_such_account() {
    let store = Arc::new(MockGraphStore::new());
    let social = Arc::new(MockSocialApi::new().unknown_account("ghost"));
    let engine = SyncEngine::new(social, store.clone(), settings());

    let result = engine.sync_followers("ghost").await;

    assert_eq!(SyncOutcome::from_result(&result), SyncOutcome::UnknownAccount);
    assert_eq!(store.writes().total(), 0);
}

#[tokio::test]
async fn first_page_failure_reports_failed() {
    let store = Arc::new(MockGraphStore::new());
    let social = Arc::new(
        MockSocialApi::new()
            .with_connections("root", Direction::Followers, vec![vec![api_user("a", "a")]])
            .fail_page("root", Direction::Followers, 0),
    );
    let engine = SyncEngine::new(social, store, settings());

    let result = engine.sync_followers("root").await;

    assert!(matches!(
        SyncOutcome::from_result(&result),
        SyncOutcome::Failed { .. }
    ));
}

#[tokio::test]
async fn sync_account_covers_both_directions() {
    let store = Arc::new(MockGraphStore::new());
    let social = Arc::new(
        MockSocialApi::new()
            .with_connections("root", Direction::Followers, vec![vec![api_user("f1", "f1")]])
            .with_connections(
                "root",
                Direction::Following,
                vec![vec![api_user("g1", "g1"), api_user("g2", "g2")]],
            ),
    );
    let engine = SyncEngine::new(social, store.clone(), settings());

    let report = engine.sync_account("root").await.unwrap();

    assert_eq!(report.added, 3);
    assert_eq!(report.direction, None);
    let edges = store.edges(EdgeKind::Follows);
    assert!(edges.contains(&EdgePair::new("f1", "root")));
    assert!(edges.contains(&EdgePair::new("root", "g2")));
    assert_eq!(report.outcome(), SyncOutcome::Succeeded);
}

#[tokio::test]
async fn follower_affiliates_become_affiliation_edges() {
    let mut member = api_user("m1", "m1");
    member.affiliates = vec!["@acme".to_string()];
    let store = Arc::new(MockGraphStore::new());
    let social = Arc::new(
        MockSocialApi::new()
            .with_connections("root", Direction::Followers, vec![vec![member]])
            .with_profile(api_user("acme-id", "acme")),
    );
    let engine = SyncEngine::new(social, store.clone(), settings());

    engine.sync_followers("root").await.unwrap();

    assert!(store
        .edges(EdgeKind::AffiliatedWith)
        .contains(&EdgePair::new("m1", "acme-id")));
}

#[tokio::test]
async fn employment_writes_show_up_in_org_queries() {
    let store = Arc::new(MockGraphStore::new());
    for id in ["alice", "bob", "carol"] {
        store.seed_account(followgraph_sync::testing::stored_account(id, chrono::Utc::now()));
    }
    let social = Arc::new(
        MockSocialApi::new()
            .with_profile(api_user("acme-id", "acme"))
            .with_profile(api_user("globex-id", "globex")),
    );
    let engine = SyncEngine::new(social, store, settings());

    // Builds an empty index first; the writes below must invalidate it.
    assert!(engine.org_employees("acme-id").await.unwrap().is_empty());

    engine
        .process_employment(&[
            employment("alice", &["@acme"], &[]),
            employment("bob", &["@acme", "@globex"], &[]),
            employment("carol", &["@globex"], &[]),
        ])
        .await
        .unwrap();

    assert_eq!(
        engine.org_employees("acme-id").await.unwrap(),
        vec!["alice".to_string(), "bob".to_string()]
    );
    assert!(engine.share_employer("alice", "bob").await.unwrap());
    assert!(!engine.share_employer("alice", "carol").await.unwrap());
    assert_eq!(
        engine.coworkers("bob").await.unwrap(),
        vec!["alice".to_string(), "carol".to_string()]
    );
    assert_eq!(
        engine.employee_orgs("bob").await.unwrap(),
        vec!["acme-id".to_string(), "globex-id".to_string()]
    );
}

#[tokio::test]
async fn background_refresh_picks_up_edges_written_elsewhere() {
    let store = Arc::new(MockGraphStore::new());
    for id in ["alice", "acme-id"] {
        store.seed_account(followgraph_sync::testing::stored_account(id, chrono::Utc::now()));
    }
    let engine = SyncEngine::new(
        Arc::new(MockSocialApi::new()),
        store.clone(),
        EngineSettings {
            org_index_refresh: Duration::from_millis(20),
            ..settings()
        },
    );
    assert!(engine.org_employees("acme-id").await.unwrap().is_empty());

    assert_eq!(store.index_reads(), 1);

    let refresh = engine.spawn_org_index_refresh();
    store.seed_edge(EdgeKind::WorksAt, "alice", "acme-id");
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Rebuilt by the loop alone; no query ran in between.
    assert!(store.index_reads() >= 2);
    assert_eq!(engine.employee_orgs("alice").await.unwrap(), vec!["acme-id".to_string()]);
    refresh.abort();
}

#[tokio::test]
async fn follower_sync_rides_out_lock_contention() {
    let store = Arc::new(MockGraphStore::new().contend("merge_edges", 2));
    let social = Arc::new(MockSocialApi::new().with_connections(
        "root",
        Direction::Followers,
        vec![vec![api_user("f1", "f1"), api_user("f2", "f2")]],
    ));
    let engine = SyncEngine::new(social, store.clone(), settings());

    let report = engine.sync_followers("root").await.unwrap();

    assert_eq!(report.added, 2);
    assert_eq!(report.outcome(), SyncOutcome::Succeeded);
    assert_eq!(store.follower_ids("root").len(), 2);
}

#[tokio::test]
async fn persistent_lock_contention_fails_the_sync() {
    let store = Arc::new(MockGraphStore::new().contend("merge_edges", 10));
    let social = Arc::new(MockSocialApi::new().with_connections(
        "root",
        Direction::Followers,
        vec![vec![api_user("f1", "f1")]],
    ));
    let engine = SyncEngine::new(social, store.clone(), settings());

    let result = engine.sync_followers("root").await;

    assert!(matches!(
        SyncOutcome::from_result(&result),
        SyncOutcome::Failed { .. }
    ));
    assert!(store.follower_ids("root").is_empty());
    // Accounts were upserted before the edge write gave up.
    assert!(store.account("f1").is_some());
}
