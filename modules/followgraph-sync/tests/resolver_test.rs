//! Organization resolution and additive employment edges.
//!
//! Run with: cargo test -p followgraph-sync --test resolver_test

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};

use followgraph_common::{
    Account, Classification, ClassificationTag, EdgeKind, EdgePair, Enrichment, OrgProfile,
    RetryPolicy,
};
use followgraph_sync::testing::{
    api_user, employment, org_account, stored_account, MockGraphStore, MockSocialApi,
};
use followgraph_sync::{EngineSettings, SyncEngine};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn settings() -> EngineSettings {
    EngineSettings {
        rate_limit_retry: RetryPolicy::immediate(3),
        ..Default::default()
    }
}

fn individual(id: &str) -> Account {
    let mut account = stored_account(id, Utc::now());
    account.classification = ClassificationTag::Individual;
    account
}

fn store_with_people(ids: &[&str]) -> Arc<MockGraphStore> {
    let store = Arc::new(MockGraphStore::new());
    for id in ids {
        store.seed_account(individual(id));
    }
    store
}

fn acme_api() -> MockSocialApi {
    MockSocialApi::new().with_profile(api_user("acme-id", "Acme"))
}

// ---------------------------------------------------------------------------
// Employment edges
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_records_naming_acme_create_one_org_and_two_edges() {
    let store = store_with_people(&["e1", "e2"]);
    let social = Arc::new(acme_api());
    let engine = SyncEngine::new(social.clone(), store.clone(), settings());

    let records = vec![
        employment("e1", &["@acme"], &[]),
        employment("e2", &["ACME"], &[]),
    ];
    let report = engine.process_employment(&records).await.unwrap();

    let org = store.account("acme-id").expect("organization upserted");
    assert_eq!(org.classification, ClassificationTag::Organization);
    assert_eq!(store.account_count(), 3);
    assert_eq!(social.handle_lookups(), vec!["acme".to_string()]);

    let works_at = store.edges(EdgeKind::WorksAt);
    assert_eq!(works_at.len(), 2);
    assert!(works_at.contains(&EdgePair::new("e1", "acme-id")));
    assert!(works_at.contains(&EdgePair::new("e2", "acme-id")));
    assert_eq!(report.orgs_fetched, 1);
    assert_eq!(report.edges_created, 2);
}

#[tokio::test]
async fn rerunning_the_same_batch_is_additive_only() {
    let store = store_with_people(&["e1"]);
    let social = Arc::new(acme_api().with_profile(api_user("initech-id", "initech")));
    let engine = SyncEngine::new(social.clone(), store.clone(), settings());

    let first = vec![employment("e1", &["@acme"], &["@initech"])];
    engine.process_employment(&first).await.unwrap();
    store.reset_writes();

    // Same current employer, past employer no longer mentioned.
    let second = vec![employment("e1", &["@acme"], &[])];
    let report = engine.process_employment(&second).await.unwrap();

    assert_eq!(report.edges_created, 0);
    assert_eq!(report.edges_existing, 1);
    assert_eq!(report.orgs_reused, 1);
    assert_eq!(store.writes().total(), 0);
    assert_eq!(store.edges(EdgeKind::WorksAt).len(), 1);
    assert!(store
        .edges(EdgeKind::WorkedAt)
        .contains(&EdgePair::new("e1", "initech-id")));
    assert_eq!(social.handle_lookups().len(), 2, "fresh orgs are not re-fetched");
}

#[tokio::test]
async fn unresolvable_handle_is_dropped_without_failing_batch() {
    let store = store_with_people(&["e1", "e2"]);
    let engine = SyncEngine::new(Arc::new(acme_api()), store.clone(), settings());

    let records = vec![
        employment("e1", &["@ghost"], &[]),
        employment("e2", &["@acme"], &[]),
    ];
    let report = engine.process_employment(&records).await.unwrap();

    assert_eq!(report.handles_dropped, vec!["ghost".to_string()]);
    assert_eq!(store.edges(EdgeKind::WorksAt).len(), 1);
}

#[tokio::test]
async fn stale_org_is_refetched_and_fresh_org_reused() {
    let now = Utc::now();
    let store = store_with_people(&["e1"]);
    store.seed_account(org_account("acme-id", "acme", now - Duration::days(60)));
    store.seed_account(org_account("globex-id", "globex", now - Duration::days(3)));
    let social = Arc::new(acme_api().with_profile(api_user("globex-id", "globex")));
    let engine = SyncEngine::new(social.clone(), store.clone(), settings());

    let report = engine
        .process_employment(&[employment("e1", &["acme", "globex"], &[])])
        .await
        .unwrap();

    assert_eq!(social.handle_lookups(), vec!["acme".to_string()]);
    assert_eq!(report.orgs_fetched, 1);
    assert_eq!(report.orgs_reused, 1);
    assert!(store.account("acme-id").unwrap().updated_at > now - Duration::days(1));
}

#[tokio::test]
async fn aliased_handles_resolve_to_one_org_for_every_record() {
    let store = store_with_people(&["e1", "e2"]);
    let social = Arc::new(acme_api().with_alias("acmeinc", "acme-id"));
    let engine = SyncEngine::new(social.clone(), store.clone(), settings());

    let report = engine
        .process_employment(&[
            employment("e1", &["@acme"], &[]),
            employment("e2", &["@acmeinc"], &[]),
        ])
        .await
        .unwrap();

    let works_at = store.edges(EdgeKind::WorksAt);
    assert!(works_at.contains(&EdgePair::new("e1", "acme-id")));
    assert!(works_at.contains(&EdgePair::new("e2", "acme-id")));
    assert_eq!(report.edges_created, 2);
    assert!(report.handles_dropped.is_empty());
    assert_eq!(report.orgs_fetched, 1);
    assert_eq!(social.handle_lookups().len(), 2);
}

#[tokio::test]
async fn org_listing_itself_as_employer_gets_no_edge() {
    let store = Arc::new(MockGraphStore::new());
    store.seed_account(org_account("acme-id", "acme", Utc::now()));
    let engine = SyncEngine::new(Arc::new(acme_api()), store.clone(), settings());

    let report = engine
        .process_employment(&[employment("acme-id", &["@acme"], &[])])
        .await
        .unwrap();

    assert_eq!(report.self_edges_skipped, 1);
    assert!(store.edges(EdgeKind::WorksAt).is_empty());
}

// ---------------------------------------------------------------------------
// Classification and department updates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn department_never_lands_on_an_organization() {
    let store = store_with_people(&["p1"]);
    store.seed_account(org_account("org1", "org1", Utc::now()));
    let engine = SyncEngine::new(Arc::new(MockSocialApi::new()), store.clone(), settings());

    let records = vec![
        Enrichment {
            account_id: "p1".into(),
            classification: Classification::Individual {
                department: Some("Sales".into()),
            },
            current_employers: vec![],
            past_employers: vec![],
        },
        Enrichment {
            account_id: "org1".into(),
            classification: Classification::Unclassified {
                department: Some("Sales".into()),
            },
            current_employers: vec![],
            past_employers: vec![],
        },
    ];
    let report = engine.process_employment(&records).await.unwrap();

    assert_eq!(store.account("p1").unwrap().department.as_deref(), Some("Sales"));
    assert_eq!(store.account("org1").unwrap().department, None);
    assert_eq!(report.departments_applied, 1);
    assert_eq!(report.departments_skipped, 1);
    assert_eq!(report.tags_skipped, 1, "p1 was already individual");
}

#[tokio::test]
async fn reclassification_to_organization_is_applied_once() {
    let store = Arc::new(MockGraphStore::new());
    store.seed_account(stored_account("x", Utc::now()));
    let engine = SyncEngine::new(Arc::new(MockSocialApi::new()), store.clone(), settings());

    let profile = OrgProfile {
        org_type: Some("company".into()),
        subtype: Some("startup".into()),
        focus: None,
    };
    let records = vec![Enrichment {
        account_id: "x".into(),
        classification: Classification::Organization {
            profile: profile.clone(),
        },
        current_employers: vec![],
        past_employers: vec![],
    }];

    let first = engine.process_employment(&records).await.unwrap();
    let second = engine.process_employment(&records).await.unwrap();

    let x = store.account("x").unwrap();
    assert_eq!(x.classification, ClassificationTag::Organization);
    assert_eq!(x.org_profile, Some(profile));
    assert_eq!(first.tags_applied, 1);
    assert_eq!(second.tags_applied, 0);
    assert_eq!(second.tags_skipped, 1);
}

// ---------------------------------------------------------------------------
// Affiliations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn works_at_supersedes_affiliation() {
    let store = store_with_people(&["e1", "e2"]);
    store.seed_account(org_account("acme-id", "acme", Utc::now()));
    store.seed_edge(EdgeKind::WorksAt, "e1", "acme-id");
    let engine = SyncEngine::new(Arc::new(acme_api()), store.clone(), settings());

    let affiliates: HashMap<String, Vec<String>> = [
        ("e1".to_string(), vec!["@acme".to_string()]),
        ("e2".to_string(), vec!["@Acme".to_string()]),
    ]
    .into();
    let report = engine.process_affiliations(&affiliates).await.unwrap();

    let affiliated = store.edges(EdgeKind::AffiliatedWith);
    assert_eq!(affiliated.len(), 1);
    assert!(affiliated.contains(&EdgePair::new("e2", "acme-id")));
    assert_eq!(report.edges_superseded, 1);
}
