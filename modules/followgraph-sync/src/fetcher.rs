//! Paginated connection fetching with rate-limit backoff.
//!
//! The sequential strategy walks the cursor chain one page at a time. The
//! hybrid strategy walks the first few pages to discover cursors, then fans
//! the remaining known cursors out with bounded concurrency and retries any
//! failed member sequentially. Both dedupe by account id before returning.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use followgraph_common::{Account, ClassificationTag, Direction, FetchStrategyKind, RetryPolicy};
use social_client::{ApiUser, ConnectionsPage, SocialError};

use crate::traits::SocialSource;

/// Pages the hybrid strategy walks sequentially before fanning out.
pub const DEFAULT_DISCOVERY_PAGES: usize = 2;

/// Concurrent requests per fan-out batch.
pub const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchStrategy {
    #[default]
    Sequential,
    Hybrid {
        discovery_pages: usize,
        concurrency: usize,
    },
}

impl FetchStrategy {
    pub fn hybrid() -> Self {
        FetchStrategy::Hybrid {
            discovery_pages: DEFAULT_DISCOVERY_PAGES,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl From<FetchStrategyKind> for FetchStrategy {
    fn from(kind: FetchStrategyKind) -> Self {
        match kind {
            FetchStrategyKind::Sequential => FetchStrategy::Sequential,
            FetchStrategyKind::Hybrid => FetchStrategy::hybrid(),
        }
    }
}

/// Deduplicated connection set for one account and direction.
#[derive(Debug, Clone, Default)]
pub struct FetchedConnections {
    /// Sorted by id. Order carries no meaning.
    pub accounts: Vec<Account>,
    /// Platform-listed affiliate handles per connection id (non-empty lists only).
    pub affiliates: HashMap<String, Vec<String>>,
    /// Some pages could not be fetched; `accounts` is a subset of the real list.
    pub truncated: bool,
    pub pages_fetched: usize,
}

impl FetchedConnections {
    pub fn ids(&self) -> HashSet<String> {
        self.accounts.iter().map(|a| a.id.clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub enum Connections {
    /// The root account does not exist upstream.
    UnknownAccount,
    Fetched(FetchedConnections),
}

/// Map an API profile record onto an unclassified account observed at `observed_at`.
pub fn account_from_api(user: ApiUser, observed_at: DateTime<Utc>) -> Account {
    let display_name = if user.name.trim().is_empty() {
        user.handle.clone()
    } else {
        user.name
    };
    Account {
        id: user.id,
        handle: user.handle,
        display_name,
        avatar_url: user.avatar_url,
        bio: user.bio,
        location: user.location,
        url: user.url,
        followers_count: user.followers_count,
        following_count: user.following_count,
        verified: user.verified,
        classification: ClassificationTag::Unclassified,
        department: None,
        org_profile: None,
        updated_at: observed_at,
    }
}

/// Run one API call, retrying rate-limit responses with backoff. Any other
/// failure, or exhaustion, is returned to the caller.
pub(crate) async fn with_rate_limit_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, SocialError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SocialError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(SocialError::RateLimited { retry_after_secs }) if policy.should_retry(attempt) => {
                let hinted =
                    Duration::from_secs(retry_after_secs.unwrap_or(0)).min(policy.max_delay);
                let delay = policy.delay_for(attempt).max(hinted);
                warn!(
                    label,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Accumulates pages, keyed by account id so racing pages cannot duplicate.
struct Collector {
    observed_at: DateTime<Utc>,
    accounts: HashMap<String, Account>,
    affiliates: HashMap<String, Vec<String>>,
    pages: usize,
}

impl Collector {
    fn new(observed_at: DateTime<Utc>) -> Self {
        Self {
            observed_at,
            accounts: HashMap::new(),
            affiliates: HashMap::new(),
            pages: 0,
        }
    }

    fn add(&mut self, page: ConnectionsPage) {
        self.pages += 1;
        for mut user in page.users {
            if user.id.is_empty() {
                continue;
            }
            let affiliates = std::mem::take(&mut user.affiliates);
            if !affiliates.is_empty() {
                self.affiliates.insert(user.id.clone(), affiliates);
            }
            let account = account_from_api(user, self.observed_at);
            self.accounts.insert(account.id.clone(), account);
        }
    }

    fn finish(self, truncated: bool) -> FetchedConnections {
        let mut accounts: Vec<Account> = self.accounts.into_values().collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        FetchedConnections {
            accounts,
            affiliates: self.affiliates,
            truncated,
            pages_fetched: self.pages,
        }
    }
}

/// Known-but-unfetched cursors. Each cursor is enqueued at most once.
#[derive(Default)]
struct Frontier {
    queue: VecDeque<String>,
    seen: HashSet<String>,
}

impl Frontier {
    fn extend<'a>(&mut self, cursors: impl Iterator<Item = &'a str>) {
        for c in cursors {
            if self.seen.insert(c.to_string()) {
                self.queue.push_back(c.to_string());
            }
        }
    }

    fn pop(&mut self) -> Option<String> {
        self.queue.pop_front()
    }

    fn take(&mut self, n: usize) -> Vec<String> {
        let n = n.min(self.queue.len());
        self.queue.drain(..n).collect()
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

pub struct ConnectionFetcher {
    social: Arc<dyn SocialSource>,
    strategy: FetchStrategy,
    retry: RetryPolicy,
}

impl ConnectionFetcher {
    pub fn new(social: Arc<dyn SocialSource>, strategy: FetchStrategy) -> Self {
        Self {
            social,
            strategy,
            retry: RetryPolicy::RATE_LIMIT,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch every connection of `account_id` in `direction`.
    ///
    /// A failure on the first page is returned as an error. Later page
    /// failures truncate the result instead; callers see `truncated = true`.
    pub async fn fetch(
        &self,
        account_id: &str,
        direction: Direction,
    ) -> Result<Connections, SocialError> {
        let started = Instant::now();
        let first = match self.page(account_id, direction, None).await {
            Ok(page) => page,
            Err(SocialError::NotFound(_)) => {
                info!(account_id, direction = %direction, "Account not found upstream");
                return Ok(Connections::UnknownAccount);
            }
            Err(e) => return Err(e),
        };

        let mut collector = Collector::new(Utc::now());
        let truncated = match self.strategy {
            FetchStrategy::Sequential => {
                self.walk_sequential(account_id, direction, first, &mut collector)
                    .await
            }
            FetchStrategy::Hybrid {
                discovery_pages,
                concurrency,
            } => {
                self.walk_hybrid(
                    account_id,
                    direction,
                    first,
                    discovery_pages,
                    concurrency,
                    &mut collector,
                )
                .await
            }
        };

        let fetched = collector.finish(truncated);
        info!(
            account_id,
            direction = %direction,
            fetched = fetched.accounts.len(),
            pages = fetched.pages_fetched,
            truncated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Connections fetched"
        );
        Ok(Connections::Fetched(fetched))
    }

    async fn page(
        &self,
        account_id: &str,
        direction: Direction,
        cursor: Option<&str>,
    ) -> Result<ConnectionsPage, SocialError> {
        with_rate_limit_retry(&self.retry, "connections_page", || {
            self.social.connections_page(account_id, direction, cursor)
        })
        .await
    }

    /// Returns whether the walk was truncated.
    async fn walk_sequential(
        &self,
        account_id: &str,
        direction: Direction,
        first: ConnectionsPage,
        collector: &mut Collector,
    ) -> bool {
        let mut next = first.continuation().map(str::to_string);
        collector.add(first);
        let mut seen: HashSet<String> = HashSet::new();

        while let Some(cursor) = next.take() {
            if !seen.insert(cursor.clone()) {
                warn!(account_id, cursor = cursor.as_str(), "Cursor repeated, stopping pagination");
                break;
            }
            match self.page(account_id, direction, Some(&cursor)).await {
                Ok(page) => {
                    next = page.continuation().map(str::to_string);
                    collector.add(page);
                }
                Err(e) => {
                    warn!(
                        account_id,
                        direction = %direction,
                        pages = collector.pages,
                        error = %e,
                        "Pagination abandoned, result truncated"
                    );
                    return true;
                }
            }
        }
        false
    }

    /// Returns whether the walk was truncated.
    async fn walk_hybrid(
        &self,
        account_id: &str,
        direction: Direction,
        first: ConnectionsPage,
        discovery_pages: usize,
        concurrency: usize,
        collector: &mut Collector,
    ) -> bool {
        let mut frontier = Frontier::default();
        frontier.extend(first.forward_cursors());
        collector.add(first);
        let mut failed: Vec<String> = Vec::new();

        // Discovery: the first page is already in, walk the rest of the head.
        for _ in 1..discovery_pages.max(1) {
            let Some(cursor) = frontier.pop() else { break };
            match self.page(account_id, direction, Some(&cursor)).await {
                Ok(page) => {
                    frontier.extend(page.forward_cursors());
                    collector.add(page);
                }
                Err(e) => {
                    debug!(
                        account_id,
                        cursor = cursor.as_str(),
                        error = %e,
                        "Discovery page failed"
                    );
                    failed.push(cursor);
                }
            }
        }

        let concurrency = concurrency.max(1);
        let mut truncated = false;
        loop {
            while !frontier.is_empty() {
                let batch = frontier.take(concurrency);
                let results: Vec<(String, Result<ConnectionsPage, SocialError>)> =
                    stream::iter(batch)
                        .map(|cursor| async move {
                            let result = self.page(account_id, direction, Some(&cursor)).await;
                            (cursor, result)
                        })
                        .buffer_unordered(concurrency)
                        .collect()
                        .await;

                for (cursor, result) in results {
                    match result {
                        Ok(page) => {
                            frontier.extend(page.forward_cursors());
                            collector.add(page);
                        }
                        Err(e) => {
                            debug!(
                                account_id,
                                cursor = cursor.as_str(),
                                error = %e,
                                "Batch page failed"
                            );
                            failed.push(cursor);
                        }
                    }
                }
            }

            if failed.is_empty() {
                break;
            }
            for cursor in std::mem::take(&mut failed) {
                match self.page(account_id, direction, Some(&cursor)).await {
                    Ok(page) => {
                        frontier.extend(page.forward_cursors());
                        collector.add(page);
                    }
                    Err(e) => {
                        warn!(
                            account_id,
                            direction = %direction,
                            cursor = cursor.as_str(),
                            error = %e,
                            "Page failed on sequential retry, result truncated"
                        );
                        truncated = true;
                    }
                }
            }
            if frontier.is_empty() {
                break;
            }
        }
        truncated
    }
}
