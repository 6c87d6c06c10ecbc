use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::GraphError;

/// Bulk source of WORKS_AT adjacency, grouped by organization.
#[async_trait]
pub trait EmploymentSource: Send + Sync {
    async fn works_at_by_org(&self) -> Result<Vec<(String, Vec<String>)>, GraphError>;
}

/// Point-in-time organization/employee adjacency. Built wholesale, never patched.
#[derive(Debug, Default)]
pub struct OrgIndex {
    employees_by_org: HashMap<String, HashSet<String>>,
    orgs_by_employee: HashMap<String, HashSet<String>>,
    built_at: Option<Instant>,
}

impl OrgIndex {
    /// Build both directions from `(org_id, employee_ids)` groups.
    pub fn build(groups: Vec<(String, Vec<String>)>) -> Self {
        let mut employees_by_org: HashMap<String, HashSet<String>> = HashMap::new();
        let mut orgs_by_employee: HashMap<String, HashSet<String>> = HashMap::new();
        for (org_id, employees) in groups {
            for employee_id in employees {
                if employee_id.is_empty() {
                    continue;
                }
                orgs_by_employee
                    .entry(employee_id.clone())
                    .or_default()
                    .insert(org_id.clone());
                employees_by_org
                    .entry(org_id.clone())
                    .or_default()
                    .insert(employee_id);
            }
        }
        Self {
            employees_by_org,
            orgs_by_employee,
            built_at: Some(Instant::now()),
        }
    }

    pub fn built_at(&self) -> Option<Instant> {
        self.built_at
    }

    pub fn org_count(&self) -> usize {
        self.employees_by_org.len()
    }

    pub fn employee_count(&self) -> usize {
        self.orgs_by_employee.len()
    }

    /// Employees of `org_id`, sorted.
    pub fn employees_of(&self, org_id: &str) -> Vec<String> {
        sorted(self.employees_by_org.get(org_id))
    }

    /// Organizations `employee_id` works at, sorted.
    pub fn orgs_of(&self, employee_id: &str) -> Vec<String> {
        sorted(self.orgs_by_employee.get(employee_id))
    }

    /// Organizations both accounts currently work at, sorted.
    pub fn shared_employers(&self, a: &str, b: &str) -> Vec<String> {
        match (self.orgs_by_employee.get(a), self.orgs_by_employee.get(b)) {
            (Some(left), Some(right)) => {
                let shared: BTreeSet<&String> = left.intersection(right).collect();
                shared.into_iter().cloned().collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn share_employer(&self, a: &str, b: &str) -> bool {
        match (self.orgs_by_employee.get(a), self.orgs_by_employee.get(b)) {
            (Some(left), Some(right)) => !left.is_disjoint(right),
            _ => false,
        }
    }

    /// Everyone who shares at least one employer with `employee_id`, excluding themselves.
    pub fn coworkers_of(&self, employee_id: &str) -> Vec<String> {
        let Some(orgs) = self.orgs_by_employee.get(employee_id) else {
            return Vec::new();
        };
        let coworkers: BTreeSet<&String> = orgs
            .iter()
            .filter_map(|org| self.employees_by_org.get(org))
            .flatten()
            .filter(|id| id.as_str() != employee_id)
            .collect();
        coworkers.into_iter().cloned().collect()
    }
}

fn sorted(set: Option<&HashSet<String>>) -> Vec<String> {
    let mut out: Vec<String> = set.map(|s| s.iter().cloned().collect()).unwrap_or_default();
    out.sort();
    out
}

/// Owns the current [`OrgIndex`] snapshot behind an atomic swap.
///
/// Every query checks the snapshot's age first and rebuilds synchronously once
/// `refresh_interval` has elapsed. Readers always see either the old or the new
/// index, never a partial one. Concurrent stale readers queue on a single
/// rebuild and re-check before building again.
pub struct OrgIndexStore {
    inner: ArcSwap<OrgIndex>,
    source: Arc<dyn EmploymentSource>,
    refresh_interval: Duration,
    invalidated: AtomicBool,
    rebuild_lock: Mutex<()>,
}

impl OrgIndexStore {
    /// Create an empty store. The first query triggers the initial build.
    pub fn new(source: Arc<dyn EmploymentSource>, refresh_interval: Duration) -> Self {
        Self {
            inner: ArcSwap::new(Arc::new(OrgIndex::default())),
            source,
            refresh_interval,
            invalidated: AtomicBool::new(false),
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Force the next query to rebuild.
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }

    fn is_stale(&self, index: &OrgIndex) -> bool {
        if self.invalidated.load(Ordering::SeqCst) {
            return true;
        }
        match index.built_at {
            Some(t) => t.elapsed() >= self.refresh_interval,
            None => true,
        }
    }

    /// Rebuild from the source and swap the new index in.
    pub async fn rebuild(&self) -> Result<Arc<OrgIndex>, GraphError> {
        let _guard = self.rebuild_lock.lock().await;
        self.rebuild_locked().await
    }

    async fn rebuild_locked(&self) -> Result<Arc<OrgIndex>, GraphError> {
        let start = Instant::now();
        self.invalidated.store(false, Ordering::SeqCst);
        let groups = match self.source.works_at_by_org().await {
            Ok(groups) => groups,
            Err(e) => {
                self.invalidated.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };
        let index = Arc::new(OrgIndex::build(groups));
        self.inner.store(Arc::clone(&index));
        info!(
            orgs = index.org_count(),
            employees = index.employee_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Org index rebuilt"
        );
        Ok(index)
    }

    /// Current snapshot, rebuilt first if stale. A failed rebuild falls back to
    /// the previous snapshot when one exists.
    pub async fn snapshot(&self) -> Result<Arc<OrgIndex>, GraphError> {
        let current = self.inner.load_full();
        if !self.is_stale(&current) {
            return Ok(current);
        }

        let _guard = self.rebuild_lock.lock().await;
        let current = self.inner.load_full();
        if !self.is_stale(&current) {
            return Ok(current);
        }

        match self.rebuild_locked().await {
            Ok(index) => Ok(index),
            Err(e) if current.built_at.is_some() => {
                warn!(error = %e, "Org index rebuild failed, serving previous snapshot");
                Ok(current)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn employees_of(&self, org_id: &str) -> Result<Vec<String>, GraphError> {
        Ok(self.snapshot().await?.employees_of(org_id))
    }

    pub async fn orgs_of(&self, employee_id: &str) -> Result<Vec<String>, GraphError> {
        Ok(self.snapshot().await?.orgs_of(employee_id))
    }

    pub async fn share_employer(&self, a: &str, b: &str) -> Result<bool, GraphError> {
        Ok(self.snapshot().await?.share_employer(a, b))
    }

    pub async fn shared_employers(&self, a: &str, b: &str) -> Result<Vec<String>, GraphError> {
        Ok(self.snapshot().await?.shared_employers(a, b))
    }

    pub async fn coworkers_of(&self, employee_id: &str) -> Result<Vec<String>, GraphError> {
        Ok(self.snapshot().await?.coworkers_of(employee_id))
    }

    /// Spawn a background loop that rebuilds the index on a timer,
    /// independent of the write paths. The loop ends once the store is dropped;
    /// abort the returned handle to stop it sooner.
    pub fn spawn_refresh_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        let interval = self.refresh_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(store) = store.upgrade() else {
                    info!("Org index dropped, refresh loop exiting");
                    return;
                };
                if let Err(e) = store.rebuild().await {
                    error!(error = %e, "Scheduled org index rebuild failed, keeping stale data");
                }
            }
        });
        info!(interval_secs = interval.as_secs(), "Org index refresh loop started");
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource {
        groups: std::sync::Mutex<Vec<(String, Vec<String>)>>,
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
    }

    impl CountingSource {
        fn new(groups: Vec<(&str, Vec<&str>)>) -> Arc<Self> {
            Arc::new(Self {
                groups: std::sync::Mutex::new(to_owned(groups)),
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay: Duration::ZERO,
            })
        }

        fn slow(groups: Vec<(&str, Vec<&str>)>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                groups: std::sync::Mutex::new(to_owned(groups)),
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay,
            })
        }

        fn replace(&self, groups: Vec<(&str, Vec<&str>)>) {
            *self.groups.lock().unwrap() = to_owned(groups);
        }
    }

    fn to_owned(groups: Vec<(&str, Vec<&str>)>) -> Vec<(String, Vec<String>)> {
        groups
            .into_iter()
            .map(|(o, es)| (o.to_string(), es.into_iter().map(String::from).collect()))
            .collect()
    }

    #[async_trait]
    impl EmploymentSource for CountingSource {
        async fn works_at_by_org(&self) -> Result<Vec<(String, Vec<String>)>, GraphError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(GraphError::Decode("graph unavailable".into()));
            }
            Ok(self.groups.lock().unwrap().clone())
        }
    }

    fn sample() -> Vec<(&'static str, Vec<&'static str>)> {
        vec![
            ("acme", vec!["alice", "bob"]),
            ("globex", vec!["bob", "carol"]),
            ("initech", vec!["dave"]),
        ]
    }

    #[test]
    fn forward_and_reverse_maps_agree() {
        let index = OrgIndex::build(to_owned(sample()));
        for org in ["acme", "globex", "initech"] {
            for employee in index.employees_of(org) {
                assert!(index.orgs_of(&employee).contains(&org.to_string()));
            }
        }
        for employee in ["alice", "bob", "carol", "dave"] {
            for org in index.orgs_of(employee) {
                assert!(index.employees_of(&org).contains(&employee.to_string()));
            }
        }
    }

    #[test]
    fn shared_employer_queries() {
        let index = OrgIndex::build(to_owned(sample()));
        assert!(index.share_employer("alice", "bob"));
        assert!(!index.share_employer("alice", "carol"));
        assert!(!index.share_employer("alice", "nobody"));
        assert_eq!(index.shared_employers("bob", "carol"), vec!["globex".to_string()]);
        assert_eq!(index.coworkers_of("bob"), vec!["alice".to_string(), "carol".to_string()]);
        assert!(index.coworkers_of("dave").is_empty());
    }

    #[tokio::test]
    async fn first_query_builds_and_fresh_index_is_reused() {
        let source = CountingSource::new(sample());
        let store = OrgIndexStore::new(source.clone(), Duration::from_secs(600));

        assert_eq!(store.employees_of("acme").await.unwrap(), vec!["alice", "bob"]);
        assert_eq!(store.orgs_of("bob").await.unwrap(), vec!["acme", "globex"]);
        assert!(store.share_employer("alice", "bob").await.unwrap());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn elapsed_interval_triggers_rebuild() {
        let source = CountingSource::new(sample());
        let store = OrgIndexStore::new(source.clone(), Duration::ZERO);

        assert_eq!(store.employees_of("initech").await.unwrap(), vec!["dave"]);
        source.replace(vec![("initech", vec!["dave", "erin"])]);
        assert_eq!(store.employees_of("initech").await.unwrap(), vec!["dave", "erin"]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_rebuild() {
        let source = CountingSource::new(sample());
        let store = OrgIndexStore::new(source.clone(), Duration::from_secs(600));

        store.orgs_of("alice").await.unwrap();
        source.replace(vec![("globex", vec!["alice"])]);
        assert_eq!(store.orgs_of("alice").await.unwrap(), vec!["acme"]);

        store.invalidate();
        assert_eq!(store.orgs_of("alice").await.unwrap(), vec!["globex"]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_previous_snapshot() {
        let source = CountingSource::new(sample());
        let store = OrgIndexStore::new(source.clone(), Duration::ZERO);

        store.employees_of("acme").await.unwrap();
        source.fail.store(true, Ordering::SeqCst);
        assert_eq!(store.employees_of("acme").await.unwrap(), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn refresh_loop_rebuilds_without_queries() {
        let source = CountingSource::new(sample());
        let store = Arc::new(OrgIndexStore::new(source.clone(), Duration::from_millis(20)));

        let handle = store.spawn_refresh_loop();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(source.calls.load(Ordering::SeqCst) >= 2);
        assert!(store.inner.load().built_at().is_some());
        handle.abort();
    }

    #[tokio::test]
    async fn refresh_loop_exits_when_store_is_dropped() {
        let source = CountingSource::new(sample());
        let store = Arc::new(OrgIndexStore::new(source, Duration::from_millis(10)));

        let handle = store.spawn_refresh_loop();
        drop(store);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should exit after the store is dropped")
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_stale_readers_share_one_rebuild() {
        let source = CountingSource::slow(sample(), Duration::from_millis(30));
        let store = Arc::new(OrgIndexStore::new(source.clone(), Duration::from_secs(600)));
        store.snapshot().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        store.invalidate();
        let readers: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.employees_of("acme").await })
            })
            .collect();
        for reader in readers {
            assert_eq!(reader.await.unwrap().unwrap(), vec!["alice", "bob"]);
        }

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_initial_build_is_an_error() {
        let source = CountingSource::new(sample());
        source.fail.store(true, Ordering::SeqCst);
        let store = OrgIndexStore::new(source, Duration::from_secs(600));
        assert!(store.employees_of("acme").await.is_err());
    }
}
