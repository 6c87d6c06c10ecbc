//! Differential reconciliation of one account's FOLLOWS edges against a
//! freshly fetched snapshot.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use followgraph_common::{Direction, EdgeKind};
use followgraph_graph::GraphError;

use crate::error::SyncError;
use crate::fetcher::FetchedConnections;
use crate::staleness::StalenessDetector;
use crate::traits::GraphStore;

/// Ids to add and ids to remove. Both sorted; never overlapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeDelta {
    pub to_add: Vec<String>,
    pub to_remove: Vec<String>,
    pub unchanged: usize,
}

impl EdgeDelta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

pub fn compute_delta(current: &HashSet<String>, fresh: &HashSet<String>) -> EdgeDelta {
    let mut to_add: Vec<String> = fresh.difference(current).cloned().collect();
    let mut to_remove: Vec<String> = current.difference(fresh).cloned().collect();
    to_add.sort();
    to_remove.sort();
    EdgeDelta {
        to_add,
        to_remove,
        unchanged: current.intersection(fresh).count(),
    }
}

/// Per-run counts for one account and direction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub account_id: String,
    pub direction: Option<Direction>,
    pub account_found: bool,
    pub fetched: usize,
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub accounts_written: usize,
    pub accounts_up_to_date: usize,
    /// Accounts whose upsert failed. Edges to ones that did not exist yet were not written.
    pub skipped_accounts: Vec<String>,
    /// Removals held back because the fetch was truncated.
    pub removals_deferred: usize,
    pub truncated: bool,
}

impl SyncReport {
    pub fn unknown_account(account_id: &str, direction: Option<Direction>) -> Self {
        Self {
            account_id: account_id.to_string(),
            direction,
            account_found: false,
            ..Default::default()
        }
    }

    pub fn outcome(&self) -> SyncOutcome {
        if !self.account_found {
            return SyncOutcome::UnknownAccount;
        }
        if self.skipped_accounts.is_empty() && !self.truncated {
            SyncOutcome::Succeeded
        } else {
            SyncOutcome::SucceededWithSkipped {
                skipped: self.skipped_accounts.len(),
                truncated: self.truncated,
            }
        }
    }

    /// Fold a second direction's report into this one.
    pub fn merge(mut self, other: SyncReport) -> SyncReport {
        if self.direction != other.direction {
            self.direction = None;
        }
        self.account_found &= other.account_found;
        self.fetched += other.fetched;
        self.added += other.added;
        self.removed += other.removed;
        self.unchanged += other.unchanged;
        self.accounts_written += other.accounts_written;
        self.accounts_up_to_date += other.accounts_up_to_date;
        self.skipped_accounts.extend(other.skipped_accounts);
        self.removals_deferred += other.removals_deferred;
        self.truncated |= other.truncated;
        self
    }
}

/// What a caller shows for a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Succeeded,
    SucceededWithSkipped { skipped: usize, truncated: bool },
    UnknownAccount,
    Failed { reason: String },
}

impl SyncOutcome {
    pub fn from_result(result: &Result<SyncReport, SyncError>) -> Self {
        match result {
            Ok(report) => report.outcome(),
            Err(e) => SyncOutcome::Failed { reason: e.to_string() },
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Succeeded => f.write_str("succeeded"),
            SyncOutcome::SucceededWithSkipped { skipped, truncated } => {
                write!(f, "succeeded with {skipped} skipped accounts")?;
                if *truncated {
                    f.write_str(" (partial connection list)")?;
                }
                Ok(())
            }
            SyncOutcome::UnknownAccount => f.write_str("no such account"),
            SyncOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

pub struct DifferentialSync {
    store: Arc<dyn GraphStore>,
    detector: StalenessDetector,
}

impl DifferentialSync {
    pub fn new(store: Arc<dyn GraphStore>, detector: StalenessDetector) -> Self {
        Self { store, detector }
    }

    /// Make the stored FOLLOWS edges of `account_id` in `direction` equal the
    /// fetched set: upsert accounts that need it, add new edges, then remove
    /// vanished ones. Removals are skipped for a truncated fetch.
    pub async fn apply(
        &self,
        account_id: &str,
        direction: Direction,
        fetched: FetchedConnections,
    ) -> Result<SyncReport, GraphError> {
        let truncated = fetched.truncated;
        let accounts: Vec<_> = fetched
            .accounts
            .into_iter()
            .filter(|a| a.id != account_id)
            .collect();
        let fresh_ids: HashSet<String> = accounts.iter().map(|a| a.id.clone()).collect();
        let fetched_count = fresh_ids.len();

        let current = self.store.connection_ids(account_id, direction).await?;
        let lookup: Vec<String> = fresh_ids.iter().cloned().collect();
        let stored = self.store.accounts_by_ids(&lookup).await?;

        let plan = self.detector.plan(accounts, &stored, Utc::now());
        let planned = plan.to_write.len();
        let upserted = self.store.upsert_accounts(plan.to_write).await;
        let (accounts_written, skipped_accounts) = match upserted {
            Ok(n) => (n, Vec::new()),
            Err(e @ GraphError::PartialBatch { .. }) => {
                let skipped = e.unprocessed_keys().to_vec();
                warn!(
                    account_id,
                    direction = %direction,
                    skipped = skipped.len(),
                    error = %e,
                    "Account upsert partially failed, skipping those accounts"
                );
                (planned.saturating_sub(skipped.len()), skipped)
            }
            Err(e) => return Err(e),
        };

        // Only newly seen accounts lack a node; stored ones can still take edges.
        let unwritable: HashSet<&str> = skipped_accounts
            .iter()
            .map(String::as_str)
            .filter(|id| !stored.contains_key(*id))
            .collect();
        let target: HashSet<String> = fresh_ids
            .into_iter()
            .filter(|id| !unwritable.contains(id.as_str()))
            .collect();

        let delta = compute_delta(&current, &target);

        let mut added = 0;
        if !delta.to_add.is_empty() {
            let pairs = delta
                .to_add
                .iter()
                .map(|id| direction.edge(account_id, id))
                .collect();
            added = self.store.merge_edges(EdgeKind::Follows, pairs).await?;
        }

        let mut removed = 0;
        let mut removals_deferred = 0;
        if !delta.to_remove.is_empty() {
            if truncated {
                removals_deferred = delta.to_remove.len();
                warn!(
                    account_id,
                    direction = %direction,
                    removals_deferred,
                    "Fetch truncated, leaving possibly-stale edges in place"
                );
            } else {
                let pairs = delta
                    .to_remove
                    .iter()
                    .map(|id| direction.edge(account_id, id))
                    .collect();
                removed = self.store.delete_edges(EdgeKind::Follows, pairs).await?;
            }
        }

        let report = SyncReport {
            account_id: account_id.to_string(),
            direction: Some(direction),
            account_found: true,
            fetched: fetched_count,
            added,
            removed,
            unchanged: delta.unchanged,
            accounts_written,
            accounts_up_to_date: plan.up_to_date,
            skipped_accounts,
            removals_deferred,
            truncated,
        };
        info!(
            account_id,
            direction = %direction,
            fetched = report.fetched,
            added,
            removed,
            unchanged = report.unchanged,
            written = accounts_written,
            up_to_date = report.accounts_up_to_date,
            missing = plan.missing,
            stale = plan.stale,
            changed = plan.changed,
            skipped = report.skipped_accounts.len(),
            truncated,
            "Differential sync applied"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn delta_matches_follower_example() {
        let delta = compute_delta(&set(&["u1", "u2", "u3"]), &set(&["u2", "u3", "u4"]));
        assert_eq!(delta.to_add, vec!["u4"]);
        assert_eq!(delta.to_remove, vec!["u1"]);
        assert_eq!(delta.unchanged, 2);
    }

    #[test]
    fn delta_never_touches_shared_ids() {
        let current = set(&["a", "b", "c", "d"]);
        let fresh = set(&["c", "d", "e"]);
        let delta = compute_delta(&current, &fresh);
        for id in delta.to_add.iter().chain(delta.to_remove.iter()) {
            assert!(!(current.contains(id) && fresh.contains(id)), "{id} is in both sets");
        }
    }

    #[test]
    fn identical_sets_produce_empty_delta() {
        let s = set(&["a", "b"]);
        assert!(compute_delta(&s, &s).is_empty());
    }

    #[test]
    fn outcome_reports_skips_and_truncation() {
        let mut report = SyncReport {
            account_found: true,
            ..Default::default()
        };
        assert_eq!(report.outcome(), SyncOutcome::Succeeded);

        report.skipped_accounts = vec!["u9".into()];
        assert_eq!(report.outcome().to_string(), "succeeded with 1 skipped accounts");

        assert_eq!(
            SyncReport::unknown_account("x", None).outcome(),
            SyncOutcome::UnknownAccount
        );
    }
}
