//! Caller-facing sync engine. Wires the fetcher, differential sync, org
//! resolver and org index over one social source and one graph store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use followgraph_common::{
    Config, Direction, Enrichment, RetryPolicy, ACCOUNT_STALE_DAYS, ORG_INDEX_REFRESH_SECS,
    ORG_STALE_DAYS,
};
use followgraph_graph::{EmploymentSource, OrgIndexStore};
use social_client::SocialError;

use crate::differential::{DifferentialSync, SyncReport};
use crate::error::Result;
use crate::fetcher::{
    account_from_api, with_rate_limit_retry, ConnectionFetcher, Connections, FetchStrategy,
};
use crate::resolver::{OrgResolver, ResolverReport};
use crate::staleness::StalenessDetector;
use crate::traits::{GraphStore, SocialSource};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub strategy: FetchStrategy,
    pub account_stale_days: i64,
    pub org_stale_days: i64,
    pub org_index_refresh: Duration,
    pub rate_limit_retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            strategy: FetchStrategy::default(),
            account_stale_days: ACCOUNT_STALE_DAYS,
            org_stale_days: ORG_STALE_DAYS,
            org_index_refresh: Duration::from_secs(ORG_INDEX_REFRESH_SECS),
            rate_limit_retry: RetryPolicy::RATE_LIMIT,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            strategy: config.fetch_strategy.into(),
            account_stale_days: config.account_stale_days,
            org_stale_days: config.org_stale_days,
            org_index_refresh: config.org_index_refresh,
            rate_limit_retry: RetryPolicy::RATE_LIMIT,
        }
    }
}

pub struct SyncEngine {
    social: Arc<dyn SocialSource>,
    store: Arc<dyn GraphStore>,
    fetcher: ConnectionFetcher,
    differential: DifferentialSync,
    resolver: OrgResolver,
    org_index: Arc<OrgIndexStore>,
    retry: RetryPolicy,
}

impl SyncEngine {
    pub fn new<S>(social: Arc<dyn SocialSource>, store: Arc<S>, settings: EngineSettings) -> Self
    where
        S: GraphStore + EmploymentSource + 'static,
    {
        let graph: Arc<dyn GraphStore> = store.clone();
        let employment: Arc<dyn EmploymentSource> = store;

        let fetcher = ConnectionFetcher::new(Arc::clone(&social), settings.strategy)
            .with_retry(settings.rate_limit_retry);
        let differential = DifferentialSync::new(
            Arc::clone(&graph),
            StalenessDetector::new(settings.account_stale_days),
        );
        let resolver = OrgResolver::new(
            Arc::clone(&social),
            Arc::clone(&graph),
            StalenessDetector::new(settings.org_stale_days),
        )
        .with_retry(settings.rate_limit_retry);
        let org_index = Arc::new(OrgIndexStore::new(employment, settings.org_index_refresh));

        Self {
            social,
            store: graph,
            fetcher,
            differential,
            resolver,
            org_index,
            retry: settings.rate_limit_retry,
        }
    }

    /// Rebuild the org index on its refresh interval in the background, for
    /// long-running callers. One-shot callers rely on the per-query check.
    pub fn spawn_org_index_refresh(&self) -> JoinHandle<()> {
        self.org_index.spawn_refresh_loop()
    }

    // --- Follow sync ---

    pub async fn sync_followers(&self, account_id: &str) -> Result<SyncReport> {
        self.sync_direction(account_id, Direction::Followers).await
    }

    pub async fn sync_following(&self, account_id: &str) -> Result<SyncReport> {
        self.sync_direction(account_id, Direction::Following).await
    }

    /// Followers then followings, reported together.
    pub async fn sync_account(&self, account_id: &str) -> Result<SyncReport> {
        let followers = self.sync_followers(account_id).await?;
        if !followers.account_found {
            return Ok(SyncReport::unknown_account(account_id, None));
        }
        let following = self.sync_following(account_id).await?;
        Ok(followers.merge(following))
    }

    async fn sync_direction(&self, account_id: &str, direction: Direction) -> Result<SyncReport> {
        if !self.ensure_root(account_id).await? {
            return Ok(SyncReport::unknown_account(account_id, Some(direction)));
        }

        let fetched = match self.fetcher.fetch(account_id, direction).await? {
            Connections::UnknownAccount => {
                return Ok(SyncReport::unknown_account(account_id, Some(direction)))
            }
            Connections::Fetched(fetched) => fetched,
        };
        let affiliates = fetched.affiliates.clone();

        let report = self.differential.apply(account_id, direction, fetched).await?;

        if !affiliates.is_empty() {
            let affiliates: HashMap<String, Vec<String>> = affiliates
                .into_iter()
                .filter(|(id, _)| !report.skipped_accounts.contains(id))
                .collect();
            if let Err(e) = self.resolver.process_affiliations(&affiliates).await {
                warn!(account_id, error = %e, "Affiliation processing failed");
            }
        }
        Ok(report)
    }

    /// Make sure the root account has a node so its edges can attach.
    /// Returns false when the account does not exist upstream.
    async fn ensure_root(&self, account_id: &str) -> Result<bool> {
        let ids = [account_id.to_string()];
        if !self.store.accounts_by_ids(&ids).await?.is_empty() {
            return Ok(true);
        }
        let user = match with_rate_limit_retry(&self.retry, "user_by_id", || {
            self.social.user_by_id(account_id)
        })
        .await
        {
            Ok(user) => user,
            Err(SocialError::NotFound(_)) => {
                info!(account_id, "Root account not found upstream");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        self.store
            .upsert_accounts(vec![account_from_api(user, Utc::now())])
            .await?;
        Ok(true)
    }

    // --- Employment ---

    pub async fn process_employment(&self, records: &[Enrichment]) -> Result<ResolverReport> {
        let report = self.resolver.process_employment(records).await?;
        if report.edges_created > 0 {
            self.org_index.invalidate();
        }
        Ok(report)
    }

    pub async fn process_affiliations(
        &self,
        affiliates: &HashMap<String, Vec<String>>,
    ) -> Result<ResolverReport> {
        self.resolver.process_affiliations(affiliates).await
    }

    // --- Org index queries ---

    pub async fn org_employees(&self, org_id: &str) -> Result<Vec<String>> {
        Ok(self.org_index.employees_of(org_id).await?)
    }

    pub async fn employee_orgs(&self, employee_id: &str) -> Result<Vec<String>> {
        Ok(self.org_index.orgs_of(employee_id).await?)
    }

    pub async fn share_employer(&self, a: &str, b: &str) -> Result<bool> {
        Ok(self.org_index.share_employer(a, b).await?)
    }

    pub async fn shared_employers(&self, a: &str, b: &str) -> Result<Vec<String>> {
        Ok(self.org_index.shared_employers(a, b).await?)
    }

    pub async fn coworkers(&self, employee_id: &str) -> Result<Vec<String>> {
        Ok(self.org_index.coworkers_of(employee_id).await?)
    }
}
