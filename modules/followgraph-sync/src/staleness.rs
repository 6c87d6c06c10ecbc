//! Decides which freshly observed accounts need a graph write.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use followgraph_common::{Account, ClassificationTag};
use followgraph_graph::{ClassificationUpdate, DepartmentUpdate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Not stored yet.
    Missing,
    /// Stored, but last written before the threshold.
    Stale,
    /// Within the threshold, with these tracked fields differing.
    Changed(Vec<&'static str>),
    UpToDate,
}

impl Freshness {
    pub fn needs_write(&self) -> bool {
        !matches!(self, Freshness::UpToDate)
    }
}

/// Accounts to upsert, plus bucket counts for logging.
#[derive(Debug, Clone, Default)]
pub struct WritePlan {
    pub to_write: Vec<Account>,
    pub missing: usize,
    pub stale: usize,
    pub changed: usize,
    pub up_to_date: usize,
}

/// Tracked identity/profile fields that differ between a fresh and a stored
/// account. The classification tag only counts when the fresh one is known.
pub fn changed_fields(fresh: &Account, stored: &Account) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if fresh.handle != stored.handle {
        fields.push("handle");
    }
    if fresh.display_name != stored.display_name {
        fields.push("display_name");
    }
    if fresh.avatar_url != stored.avatar_url {
        fields.push("avatar_url");
    }
    if fresh.bio != stored.bio {
        fields.push("bio");
    }
    if fresh.location != stored.location {
        fields.push("location");
    }
    if fresh.url != stored.url {
        fields.push("url");
    }
    if fresh.followers_count != stored.followers_count {
        fields.push("followers_count");
    }
    if fresh.following_count != stored.following_count {
        fields.push("following_count");
    }
    if fresh.verified != stored.verified {
        fields.push("verified");
    }
    if fresh.classification != ClassificationTag::Unclassified
        && fresh.classification != stored.classification
    {
        fields.push("classification");
    }
    fields
}

#[derive(Debug, Clone, Copy)]
pub struct StalenessDetector {
    threshold: Duration,
}

impl StalenessDetector {
    pub fn new(stale_days: i64) -> Self {
        Self {
            threshold: Duration::days(stale_days.max(0)),
        }
    }

    pub fn is_stale(&self, stored: &Account, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(stored.updated_at) > self.threshold
    }

    pub fn classify(
        &self,
        fresh: &Account,
        stored: Option<&Account>,
        now: DateTime<Utc>,
    ) -> Freshness {
        let Some(stored) = stored else {
            return Freshness::Missing;
        };
        if self.is_stale(stored, now) {
            return Freshness::Stale;
        }
        let fields = changed_fields(fresh, stored);
        if fields.is_empty() {
            Freshness::UpToDate
        } else {
            Freshness::Changed(fields)
        }
    }

    /// Bucket `fresh` against `stored` (keyed by id) and keep only accounts
    /// that need writing.
    pub fn plan(
        &self,
        fresh: Vec<Account>,
        stored: &HashMap<String, Account>,
        now: DateTime<Utc>,
    ) -> WritePlan {
        let mut plan = WritePlan::default();
        for account in fresh {
            match self.classify(&account, stored.get(&account.id), now) {
                Freshness::Missing => plan.missing += 1,
                Freshness::Stale => plan.stale += 1,
                Freshness::Changed(fields) => {
                    debug!(account_id = account.id.as_str(), ?fields, "Account changed");
                    plan.changed += 1;
                }
                Freshness::UpToDate => {
                    plan.up_to_date += 1;
                    continue;
                }
            }
            plan.to_write.push(account);
        }
        plan
    }
}

/// Keep classification updates whose tag or org triple differs from what is
/// stored. Unknown accounts are skipped since the update would match nothing.
pub fn filter_classification_updates(
    updates: Vec<ClassificationUpdate>,
    stored: &HashMap<String, Account>,
) -> Vec<ClassificationUpdate> {
    let total = updates.len();
    let applied: Vec<ClassificationUpdate> = updates
        .into_iter()
        .filter(|u| match stored.get(&u.account_id) {
            None => false,
            Some(current) => {
                current.classification != u.tag
                    || (u.tag == ClassificationTag::Organization
                        && current.org_profile != u.org_profile)
            }
        })
        .collect();
    if total > 0 {
        info!(
            applied = applied.len(),
            skipped = total - applied.len(),
            "Classification updates filtered"
        );
    }
    applied
}

/// Keep department updates that change the stored value on an account whose
/// stored tag accepts a department.
pub fn filter_department_updates(
    updates: Vec<DepartmentUpdate>,
    stored: &HashMap<String, Account>,
) -> Vec<DepartmentUpdate> {
    let total = updates.len();
    let applied: Vec<DepartmentUpdate> = updates
        .into_iter()
        .filter(|u| match stored.get(&u.account_id) {
            None => false,
            Some(current) => {
                current.classification.accepts_department()
                    && current.department.as_deref() != Some(u.department.as_str())
            }
        })
        .collect();
    if total > 0 {
        info!(
            applied = applied.len(),
            skipped = total - applied.len(),
            "Department updates filtered"
        );
    }
    applied
}
