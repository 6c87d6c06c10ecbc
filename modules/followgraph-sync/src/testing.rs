// Test mocks for the sync engine.
//
// Two mocks matching the two trait boundaries:
// - MockSocialApi (SocialSource): scripted cursor chains per account/direction
// - MockGraphStore (GraphStore + EmploymentSource): stateful in-memory graph
//
// Plus helpers for building API users, accounts and enrichment records.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use followgraph_common::{
    normalize_handle, Account, Classification, ClassificationTag, Direction, EdgeKind, EdgePair,
    Enrichment, RetryPolicy,
};
use followgraph_graph::{
    with_contention_retry, write_in_chunks, BatchSizes, ClassificationUpdate, DepartmentUpdate,
    EmploymentSource, GraphError,
};
use social_client::{ApiUser, ConnectionsPage, SocialError, END_CURSOR};

use crate::traits::{GraphStore, SocialSource};

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn api_user(id: &str, handle: &str) -> ApiUser {
    ApiUser {
        id: id.to_string(),
        handle: handle.to_string(),
        name: handle.to_string(),
        avatar_url: None,
        bio: None,
        location: None,
        url: None,
        followers_count: 0,
        following_count: 0,
        verified: false,
        affiliates: Vec::new(),
    }
}

/// Users `{prefix}{start}..{prefix}{end}` with matching handles.
pub fn api_users(prefix: &str, range: std::ops::Range<usize>) -> Vec<ApiUser> {
    range
        .map(|i| api_user(&format!("{prefix}{i}"), &format!("{prefix}{i}")))
        .collect()
}

/// Stored account whose fields match what `api_user(id, id)` maps to.
pub fn stored_account(id: &str, updated_at: DateTime<Utc>) -> Account {
    let mut account = Account::new(id, id);
    account.updated_at = updated_at;
    account
}

pub fn org_account(id: &str, handle: &str, updated_at: DateTime<Utc>) -> Account {
    let mut account = Account::new(id, handle);
    account.classification = ClassificationTag::Organization;
    account.updated_at = updated_at;
    account
}

pub fn employment(account_id: &str, current: &[&str], past: &[&str]) -> Enrichment {
    Enrichment {
        account_id: account_id.to_string(),
        classification: Classification::Unclassified { department: None },
        current_employers: current.iter().map(|s| s.to_string()).collect(),
        past_employers: past.iter().map(|s| s.to_string()).collect(),
    }
}

fn cursor_for(page: usize) -> String {
    format!("c{page}")
}

fn page_for(cursor: Option<&str>) -> usize {
    cursor
        .and_then(|c| c.strip_prefix('c'))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// MockSocialApi
// ---------------------------------------------------------------------------

type ListKey = (String, Direction);

/// Scripted social API. Page `n` of a list is requested with cursor `c{n}`
/// (page 0 without a cursor) and points at `c{n+1}`, the last page at `"0"`.
/// Unregistered lists are empty.
pub struct MockSocialApi {
    lists: HashMap<ListKey, Vec<Vec<ApiUser>>>,
    profiles_by_id: HashMap<String, ApiUser>,
    profiles_by_handle: HashMap<String, ApiUser>,
    unknown: HashSet<String>,
    failing_pages: HashSet<(String, Direction, usize)>,
    rate_limits: Mutex<HashMap<(String, Direction, usize), u32>>,
    advertise_all: bool,
    page_calls: AtomicUsize,
    handle_lookups: Mutex<Vec<String>>,
}

impl Default for MockSocialApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSocialApi {
    pub fn new() -> Self {
        Self {
            lists: HashMap::new(),
            profiles_by_id: HashMap::new(),
            profiles_by_handle: HashMap::new(),
            unknown: HashSet::new(),
            failing_pages: HashSet::new(),
            rate_limits: Mutex::new(HashMap::new()),
            advertise_all: false,
            page_calls: AtomicUsize::new(0),
            handle_lookups: Mutex::new(Vec::new()),
        }
    }

    /// Register a paged connection list. The root account gets a profile too.
    pub fn with_connections(
        mut self,
        account_id: &str,
        direction: Direction,
        pages: Vec<Vec<ApiUser>>,
    ) -> Self {
        self.profiles_by_id
            .entry(account_id.to_string())
            .or_insert_with(|| api_user(account_id, account_id));
        self.lists.insert((account_id.to_string(), direction), pages);
        self
    }

    pub fn with_profile(mut self, user: ApiUser) -> Self {
        self.profiles_by_handle
            .insert(normalize_handle(&user.handle), user.clone());
        self.profiles_by_id.insert(user.id.clone(), user);
        self
    }

    /// Another handle that resolves to an already registered profile.
    pub fn with_alias(mut self, alias: &str, account_id: &str) -> Self {
        if let Some(user) = self.profiles_by_id.get(account_id).cloned() {
            self.profiles_by_handle.insert(normalize_handle(alias), user);
        }
        self
    }

    pub fn unknown_account(mut self, account_id: &str) -> Self {
        self.unknown.insert(account_id.to_string());
        self
    }

    /// Page `page` always fails with a server error.
    pub fn fail_page(mut self, account_id: &str, direction: Direction, page: usize) -> Self {
        self.failing_pages
            .insert((account_id.to_string(), direction, page));
        self
    }

    /// Page `page` answers 429 `times` times before succeeding.
    pub fn rate_limit_page(
        self,
        account_id: &str,
        direction: Direction,
        page: usize,
        times: u32,
    ) -> Self {
        self.rate_limits
            .lock()
            .unwrap()
            .insert((account_id.to_string(), direction, page), times);
        self
    }

    /// Page 0 advertises every later cursor in `pending_cursors`.
    pub fn advertise_all_cursors(mut self) -> Self {
        self.advertise_all = true;
        self
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn handle_lookups(&self) -> Vec<String> {
        self.handle_lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl SocialSource for MockSocialApi {
    async fn connections_page(
        &self,
        account_id: &str,
        direction: Direction,
        cursor: Option<&str>,
    ) -> social_client::Result<ConnectionsPage> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if self.unknown.contains(account_id) {
            return Err(SocialError::NotFound(format!("user {account_id}")));
        }
        let index = page_for(cursor);
        let key = (account_id.to_string(), direction, index);

        if self.failing_pages.contains(&key) {
            return Err(SocialError::Api {
                status: 500,
                message: format!("page {index} unavailable"),
            });
        }
        {
            let mut limits = self.rate_limits.lock().unwrap();
            if let Some(remaining) = limits.get_mut(&key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SocialError::RateLimited { retry_after_secs: None });
                }
            }
        }

        let Some(pages) = self.lists.get(&(account_id.to_string(), direction)) else {
            return Ok(ConnectionsPage {
                users: Vec::new(),
                next_cursor: Some(END_CURSOR.to_string()),
                pending_cursors: Vec::new(),
            });
        };
        let users = pages.get(index).cloned().unwrap_or_default();
        let next_cursor = if index + 1 < pages.len() {
            cursor_for(index + 1)
        } else {
            END_CURSOR.to_string()
        };
        let pending_cursors = if self.advertise_all && index == 0 {
            (2..pages.len()).map(cursor_for).collect()
        } else {
            Vec::new()
        };
        Ok(ConnectionsPage {
            users,
            next_cursor: Some(next_cursor),
            pending_cursors,
        })
    }

    async fn user_by_handle(&self, handle: &str) -> social_client::Result<ApiUser> {
        let handle = normalize_handle(handle);
        self.handle_lookups.lock().unwrap().push(handle.clone());
        self.profiles_by_handle
            .get(&handle)
            .cloned()
            .ok_or_else(|| SocialError::NotFound(format!("handle {handle}")))
    }

    async fn user_by_id(&self, account_id: &str) -> social_client::Result<ApiUser> {
        if self.unknown.contains(account_id) {
            return Err(SocialError::NotFound(format!("user {account_id}")));
        }
        self.profiles_by_id
            .get(account_id)
            .cloned()
            .ok_or_else(|| SocialError::NotFound(format!("user {account_id}")))
    }
}

// ---------------------------------------------------------------------------
// MockGraphStore
// ---------------------------------------------------------------------------

/// Items handed to each write operation since the last reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub accounts_upserted: usize,
    pub edges_merged: usize,
    pub edges_deleted: usize,
    pub classifications_set: usize,
    pub departments_set: usize,
}

impl WriteCounts {
    pub fn total(&self) -> usize {
        self.accounts_upserted
            + self.edges_merged
            + self.edges_deleted
            + self.classifications_set
            + self.departments_set
    }
}

#[derive(Default)]
struct StoreState {
    accounts: HashMap<String, Account>,
    edges: HashMap<EdgeKind, HashSet<EdgePair>>,
    writes: WriteCounts,
}

/// In-memory graph with the same write semantics as the Cypher in
/// `followgraph_graph::writer`, chunked through the same `write_in_chunks` and
/// retried through the same `with_contention_retry`.
pub struct MockGraphStore {
    state: Mutex<StoreState>,
    sizes: BatchSizes,
    retry: RetryPolicy,
    failing_upserts: HashSet<String>,
    contention: Mutex<HashMap<&'static str, u32>>,
    index_reads: AtomicUsize,
}

impl Default for MockGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGraphStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            sizes: BatchSizes::default(),
            retry: RetryPolicy::immediate(RetryPolicy::LOCK_CONTENTION.max_attempts),
            failing_upserts: HashSet::new(),
            contention: Mutex::new(HashMap::new()),
            index_reads: AtomicUsize::new(0),
        }
    }

    pub fn with_batch_sizes(mut self, sizes: BatchSizes) -> Self {
        self.sizes = sizes;
        self
    }

    /// Any upsert chunk containing one of these ids fails.
    pub fn fail_upserts_for(mut self, ids: &[&str]) -> Self {
        self.failing_upserts
            .extend(ids.iter().map(|s| s.to_string()));
        self
    }

    /// The next `times` chunk attempts of `op` fail with a deadlock error.
    pub fn contend(self, op: &'static str, times: u32) -> Self {
        self.contention.lock().unwrap().insert(op, times);
        self
    }

    pub fn seed_account(&self, account: Account) {
        self.state
            .lock()
            .unwrap()
            .accounts
            .insert(account.id.clone(), account);
    }

    pub fn seed_edge(&self, kind: EdgeKind, source: &str, target: &str) {
        self.state
            .lock()
            .unwrap()
            .edges
            .entry(kind)
            .or_default()
            .insert(EdgePair::new(source, target));
    }

    pub fn account(&self, id: &str) -> Option<Account> {
        self.state.lock().unwrap().accounts.get(id).cloned()
    }

    pub fn account_count(&self) -> usize {
        self.state.lock().unwrap().accounts.len()
    }

    pub fn edges(&self, kind: EdgeKind) -> HashSet<EdgePair> {
        self.state
            .lock()
            .unwrap()
            .edges
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    pub fn follower_ids(&self, account_id: &str) -> HashSet<String> {
        self.edges(EdgeKind::Follows)
            .into_iter()
            .filter(|p| p.target == account_id)
            .map(|p| p.source)
            .collect()
    }

    pub fn writes(&self) -> WriteCounts {
        self.state.lock().unwrap().writes.clone()
    }

    /// Bulk WORKS_AT reads served to the org index.
    pub fn index_reads(&self) -> usize {
        self.index_reads.load(Ordering::SeqCst)
    }

    pub fn reset_writes(&self) {
        self.state.lock().unwrap().writes = WriteCounts::default();
    }

    fn inject_contention(&self, op: &'static str) -> Result<(), GraphError> {
        let mut contention = self.contention.lock().unwrap();
        match contention.get_mut(op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(GraphError::Decode(format!(
                    "Neo.TransientError.Transaction.DeadlockDetected during {op}"
                )))
            }
            _ => Ok(()),
        }
    }

    /// One chunk attempt, retried on contention like `GraphWriter` does.
    async fn run_chunk<F>(&self, op: &'static str, apply: F) -> Result<(), GraphError>
    where
        F: Fn() -> Result<(), GraphError>,
    {
        with_contention_retry(&self.retry, op, || {
            let result = self.inject_contention(op).and_then(|()| apply());
            async move { result }
        })
        .await
    }

    fn apply_upsert(&self, chunk: Vec<Account>) -> Result<(), GraphError> {
        if chunk.iter().any(|a| self.failing_upserts.contains(&a.id)) {
            return Err(GraphError::Decode("injected upsert failure".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.writes.accounts_upserted += chunk.len();
        for mut incoming in chunk {
            if let Some(existing) = state.accounts.get(&incoming.id) {
                if incoming.classification == ClassificationTag::Unclassified {
                    incoming.classification = existing.classification;
                }
                incoming.department = existing.department.clone();
                incoming.org_profile = existing.org_profile.clone();
            }
            state.accounts.insert(incoming.id.clone(), incoming);
        }
        Ok(())
    }

    fn apply_merge(&self, kind: EdgeKind, chunk: Vec<EdgePair>) {
        let mut state = self.state.lock().unwrap();
        state.writes.edges_merged += chunk.len();
        for pair in chunk {
            let source_ok = state.accounts.contains_key(&pair.source);
            let target_ok = match state.accounts.get(&pair.target) {
                None => false,
                Some(t) => {
                    kind == EdgeKind::Follows || t.classification == ClassificationTag::Organization
                }
            };
            if source_ok && target_ok {
                state.edges.entry(kind).or_default().insert(pair);
            }
        }
    }

    fn apply_delete(&self, kind: EdgeKind, chunk: Vec<EdgePair>) {
        let mut state = self.state.lock().unwrap();
        state.writes.edges_deleted += chunk.len();
        if let Some(edges) = state.edges.get_mut(&kind) {
            for pair in &chunk {
                edges.remove(pair);
            }
        }
    }

    fn apply_classifications(&self, chunk: Vec<ClassificationUpdate>) {
        let mut state = self.state.lock().unwrap();
        state.writes.classifications_set += chunk.len();
        for update in chunk {
            if let Some(account) = state.accounts.get_mut(&update.account_id) {
                account.classification = update.tag;
                if update.tag == ClassificationTag::Organization {
                    account.org_profile = update.org_profile;
                    account.department = None;
                }
            }
        }
    }

    fn apply_departments(&self, chunk: Vec<DepartmentUpdate>) {
        let mut state = self.state.lock().unwrap();
        state.writes.departments_set += chunk.len();
        for update in chunk {
            if let Some(account) = state.accounts.get_mut(&update.account_id) {
                if account.classification.accepts_department() {
                    account.department = Some(update.department);
                }
            }
        }
    }
}

#[async_trait]
impl GraphStore for MockGraphStore {
    async fn connection_ids(
        &self,
        account_id: &str,
        direction: Direction,
    ) -> Result<HashSet<String>, GraphError> {
        let state = self.state.lock().unwrap();
        let ids: HashSet<String> = state
            .edges
            .get(&EdgeKind::Follows)
            .map(|edges| {
                edges
                    .iter()
                    .filter_map(|p| match direction {
                        Direction::Followers if p.target == account_id => Some(p.source.clone()),
                        Direction::Following if p.source == account_id => Some(p.target.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    async fn accounts_by_ids(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Account>, GraphError> {
        let state = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| state.accounts.get(id).map(|a| (id.clone(), a.clone())))
            .collect())
    }

    async fn accounts_by_handles(
        &self,
        handles: &[String],
    ) -> Result<HashMap<String, Account>, GraphError> {
        let wanted: HashSet<&str> = handles.iter().map(String::as_str).collect();
        let state = self.state.lock().unwrap();
        Ok(state
            .accounts
            .values()
            .filter(|a| wanted.contains(a.normalized_handle().as_str()))
            .map(|a| (a.normalized_handle(), a.clone()))
            .collect())
    }

    async fn existing_edges(
        &self,
        kind: EdgeKind,
        pairs: &[EdgePair],
    ) -> Result<HashSet<EdgePair>, GraphError> {
        let state = self.state.lock().unwrap();
        let Some(edges) = state.edges.get(&kind) else {
            return Ok(HashSet::new());
        };
        Ok(pairs.iter().filter(|p| edges.contains(*p)).cloned().collect())
    }

    async fn upsert_accounts(&self, accounts: Vec<Account>) -> Result<usize, GraphError> {
        write_in_chunks(
            "upsert_accounts",
            accounts,
            self.sizes.account_upsert,
            |a| a.id.clone(),
            |chunk| async move {
                self.run_chunk("upsert_accounts", || self.apply_upsert(chunk.clone()))
                    .await
            },
        )
        .await
    }

    async fn merge_edges(
        &self,
        kind: EdgeKind,
        pairs: Vec<EdgePair>,
    ) -> Result<usize, GraphError> {
        write_in_chunks("merge_edges", pairs, self.sizes.edge, EdgePair::key, |chunk| async move {
            self.run_chunk("merge_edges", || {
                self.apply_merge(kind, chunk.clone());
                Ok(())
            })
            .await
        })
        .await
    }

    async fn delete_edges(
        &self,
        kind: EdgeKind,
        pairs: Vec<EdgePair>,
    ) -> Result<usize, GraphError> {
        write_in_chunks("delete_edges", pairs, self.sizes.edge, EdgePair::key, |chunk| async move {
            self.run_chunk("delete_edges", || {
                self.apply_delete(kind, chunk.clone());
                Ok(())
            })
            .await
        })
        .await
    }

    async fn set_classifications(
        &self,
        updates: Vec<ClassificationUpdate>,
    ) -> Result<usize, GraphError> {
        write_in_chunks(
            "set_classifications",
            updates,
            self.sizes.property_update,
            |u| u.account_id.clone(),
            |chunk| async move {
                self.run_chunk("set_classifications", || {
                    self.apply_classifications(chunk.clone());
                    Ok(())
                })
                .await
            },
        )
        .await
    }

    async fn set_departments(&self, updates: Vec<DepartmentUpdate>) -> Result<usize, GraphError> {
        write_in_chunks(
            "set_departments",
            updates,
            self.sizes.property_update,
            |u| u.account_id.clone(),
            |chunk| async move {
                self.run_chunk("set_departments", || {
                    self.apply_departments(chunk.clone());
                    Ok(())
                })
                .await
            },
        )
        .await
    }
}

#[async_trait]
impl EmploymentSource for MockGraphStore {
    async fn works_at_by_org(&self) -> Result<Vec<(String, Vec<String>)>, GraphError> {
        self.index_reads.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(edges) = state.edges.get(&EdgeKind::WorksAt) {
            for pair in edges {
                groups
                    .entry(pair.target.clone())
                    .or_default()
                    .push(pair.source.clone());
            }
        }
        Ok(groups.into_iter().collect())
    }
}
