//! Resolves employer and affiliate handles to organization accounts and writes
//! the additive WORKS_AT / WORKED_AT / AFFILIATED_WITH edges.
//!
//! Employment edges are never removed here. Re-running a batch only writes
//! edges that are not already present.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use followgraph_common::{
    normalize_handle, Account, ClassificationTag, EdgeKind, EdgePair, Enrichment, RetryPolicy,
};
use followgraph_graph::{ClassificationUpdate, DepartmentUpdate, GraphError};
use social_client::{ApiUser, SocialError};

use crate::error::Result;
use crate::fetcher::{account_from_api, with_rate_limit_retry, DEFAULT_CONCURRENCY};
use crate::staleness::{
    filter_classification_updates, filter_department_updates, StalenessDetector,
};
use crate::traits::{GraphStore, SocialSource};

type FetchResult = std::result::Result<ApiUser, SocialError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolverReport {
    pub records: usize,
    pub handles: usize,
    pub orgs_reused: usize,
    pub orgs_fetched: usize,
    pub handles_dropped: Vec<String>,
    pub edges_created: usize,
    pub edges_existing: usize,
    /// Affiliations not written because a WORKS_AT edge covers the pair.
    pub edges_superseded: usize,
    pub self_edges_skipped: usize,
    pub tags_applied: usize,
    pub tags_skipped: usize,
    pub departments_applied: usize,
    pub departments_skipped: usize,
}

impl ResolverReport {
    fn absorb(&mut self, other: ResolverReport) {
        self.handles += other.handles;
        self.orgs_reused += other.orgs_reused;
        self.orgs_fetched += other.orgs_fetched;
        self.handles_dropped.extend(other.handles_dropped);
        self.edges_created += other.edges_created;
        self.edges_existing += other.edges_existing;
        self.edges_superseded += other.edges_superseded;
        self.self_edges_skipped += other.self_edges_skipped;
        self.tags_applied += other.tags_applied;
        self.tags_skipped += other.tags_skipped;
        self.departments_applied += other.departments_applied;
        self.departments_skipped += other.departments_skipped;
    }
}

/// Distinct normalized handles, sorted. Blank entries are ignored.
pub fn extract_handles<'a>(raw: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    raw.into_iter()
        .map(|h| normalize_handle(h))
        .filter(|h| !h.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Handle → organization id for the handles that resolved.
#[derive(Debug, Default)]
struct Resolution {
    org_ids: HashMap<String, String>,
    reused: usize,
    fetched: usize,
    dropped: Vec<String>,
}

pub struct OrgResolver {
    social: Arc<dyn SocialSource>,
    store: Arc<dyn GraphStore>,
    org_staleness: StalenessDetector,
    retry: RetryPolicy,
    concurrency: usize,
}

impl OrgResolver {
    pub fn new(
        social: Arc<dyn SocialSource>,
        store: Arc<dyn GraphStore>,
        org_staleness: StalenessDetector,
    ) -> Self {
        Self {
            social,
            store,
            org_staleness,
            retry: RetryPolicy::RATE_LIMIT,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Apply a batch of enrichment records: classification and department
    /// updates on one branch, employer resolution and employment edges on the
    /// other, both in flight at once.
    pub async fn process_employment(&self, records: &[Enrichment]) -> Result<ResolverReport> {
        let (properties, edges) = tokio::join!(
            self.apply_properties(records),
            self.employment_edges(records)
        );
        let mut report = ResolverReport {
            records: records.len(),
            ..Default::default()
        };
        report.absorb(properties?);
        report.absorb(edges?);
        info!(
            records = report.records,
            handles = report.handles,
            orgs_reused = report.orgs_reused,
            orgs_fetched = report.orgs_fetched,
            dropped = report.handles_dropped.len(),
            edges_created = report.edges_created,
            edges_existing = report.edges_existing,
            tags_applied = report.tags_applied,
            departments_applied = report.departments_applied,
            "Employment batch processed"
        );
        Ok(report)
    }

    /// Write AFFILIATED_WITH edges from platform-listed affiliate handles,
    /// keyed by account id. Pairs already joined by WORKS_AT are left alone.
    pub async fn process_affiliations(
        &self,
        affiliates: &HashMap<String, Vec<String>>,
    ) -> Result<ResolverReport> {
        let mut report = ResolverReport {
            records: affiliates.len(),
            ..Default::default()
        };
        let handles = extract_handles(affiliates.values().flatten());
        if handles.is_empty() {
            return Ok(report);
        }
        let resolution = self.resolve_orgs(&handles).await?;
        record_resolution(&mut report, handles.len(), &resolution);

        let mut pairs: BTreeSet<EdgePair> = BTreeSet::new();
        for (account_id, raw) in affiliates {
            for handle in raw {
                let Some(org_id) = resolution.org_ids.get(&normalize_handle(handle)) else {
                    continue;
                };
                if org_id == account_id {
                    report.self_edges_skipped += 1;
                    continue;
                }
                pairs.insert(EdgePair::new(account_id.as_str(), org_id.as_str()));
            }
        }
        let pairs: Vec<EdgePair> = pairs.into_iter().collect();

        let employed = self.store.existing_edges(EdgeKind::WorksAt, &pairs).await?;
        report.edges_superseded = employed.len();
        let pairs: Vec<EdgePair> = pairs.into_iter().filter(|p| !employed.contains(p)).collect();

        let (created, existing) = self.write_new_edges(EdgeKind::AffiliatedWith, pairs).await?;
        report.edges_created += created;
        report.edges_existing += existing;
        info!(
            accounts = report.records,
            edges_created = created,
            edges_existing = existing,
            superseded = report.edges_superseded,
            "Affiliations processed"
        );
        Ok(report)
    }

    /// Resolve every distinct handle in the batch, then write WORKS_AT and
    /// WORKED_AT edges that are not already present.
    async fn employment_edges(&self, records: &[Enrichment]) -> Result<ResolverReport> {
        let mut report = ResolverReport::default();
        let handles = extract_handles(
            records
                .iter()
                .flat_map(|r| r.current_employers.iter().chain(r.past_employers.iter())),
        );
        if handles.is_empty() {
            return Ok(report);
        }
        let resolution = self.resolve_orgs(&handles).await?;
        record_resolution(&mut report, handles.len(), &resolution);

        let mut current: BTreeSet<EdgePair> = BTreeSet::new();
        let mut past: BTreeSet<EdgePair> = BTreeSet::new();
        for record in records {
            let current_employers = &record.current_employers;
            collect_pairs(record, current_employers, &resolution, &mut current, &mut report);
            collect_pairs(record, &record.past_employers, &resolution, &mut past, &mut report);
        }

        for (kind, pairs) in [(EdgeKind::WorksAt, current), (EdgeKind::WorkedAt, past)] {
            let (created, existing) =
                self.write_new_edges(kind, pairs.into_iter().collect()).await?;
            report.edges_created += created;
            report.edges_existing += existing;
        }
        Ok(report)
    }

    /// Classification tags first, then departments, each filtered against
    /// the stored values so only real changes are written.
    async fn apply_properties(&self, records: &[Enrichment]) -> Result<ResolverReport> {
        let mut report = ResolverReport::default();
        if records.is_empty() {
            return Ok(report);
        }
        let ids: Vec<String> = records.iter().map(|r| r.account_id.clone()).collect();
        let mut stored = self.store.accounts_by_ids(&ids).await?;

        let tag_updates: Vec<ClassificationUpdate> = records
            .iter()
            .filter(|r| r.classification.tag() != ClassificationTag::Unclassified)
            .map(|r| ClassificationUpdate {
                account_id: r.account_id.clone(),
                tag: r.classification.tag(),
                org_profile: r.classification.org_profile().cloned(),
            })
            .collect();
        let proposed = tag_updates.len();
        let tag_updates = filter_classification_updates(tag_updates, &stored);
        report.tags_skipped = proposed - tag_updates.len();
        if !tag_updates.is_empty() {
            report.tags_applied = self.store.set_classifications(tag_updates.clone()).await?;
        }

        // Departments are judged against the tags just written.
        for update in &tag_updates {
            if let Some(account) = stored.get_mut(&update.account_id) {
                account.classification = update.tag;
                if update.tag == ClassificationTag::Organization {
                    account.department = None;
                }
            }
        }

        let dept_updates: Vec<DepartmentUpdate> = records
            .iter()
            .filter_map(|r| {
                r.classification.department().map(|d| DepartmentUpdate {
                    account_id: r.account_id.clone(),
                    department: d.to_string(),
                })
            })
            .collect();
        let proposed = dept_updates.len();
        let dept_updates = filter_department_updates(dept_updates, &stored);
        report.departments_skipped = proposed - dept_updates.len();
        if !dept_updates.is_empty() {
            report.departments_applied = self.store.set_departments(dept_updates).await?;
        }
        Ok(report)
    }

    /// Map handles to organization ids. Fresh stored organizations are reused;
    /// the rest are fetched and upserted with the organization tag. Handles
    /// that cannot be fetched are dropped with a warning.
    async fn resolve_orgs(&self, handles: &[String]) -> Result<Resolution> {
        let now = Utc::now();
        let stored = self.store.accounts_by_handles(handles).await?;
        let mut resolution = Resolution::default();
        let mut to_fetch: Vec<String> = Vec::new();

        for handle in handles {
            match stored.get(handle) {
                Some(org)
                    if org.classification == ClassificationTag::Organization
                        && !self.org_staleness.is_stale(org, now) =>
                {
                    resolution.org_ids.insert(handle.clone(), org.id.clone());
                    resolution.reused += 1;
                }
                _ => to_fetch.push(handle.clone()),
            }
        }

        let fetched: Vec<(String, FetchResult)> = stream::iter(to_fetch)
            .map(|handle| async move {
                let result = with_rate_limit_retry(&self.retry, "user_by_handle", || {
                    self.social.user_by_handle(&handle)
                })
                .await;
                (handle, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut orgs: Vec<Account> = Vec::new();
        // Several handles can resolve to one organization (renames, aliases).
        let mut handles_of: HashMap<String, Vec<String>> = HashMap::new();
        for (handle, result) in fetched {
            match result {
                Ok(user) => {
                    let mut account = account_from_api(user, now);
                    account.classification = ClassificationTag::Organization;
                    handles_of.entry(account.id.clone()).or_default().push(handle);
                    orgs.push(account);
                }
                Err(e) => match stored.get(&handle) {
                    Some(org) if org.classification == ClassificationTag::Organization => {
                        warn!(
                            handle = handle.as_str(),
                            error = %e,
                            "Refresh failed, keeping stale organization"
                        );
                        resolution.org_ids.insert(handle, org.id.clone());
                        resolution.reused += 1;
                    }
                    _ => {
                        warn!(
                            handle = handle.as_str(),
                            error = %e,
                            "Organization handle unresolvable, dropping"
                        );
                        resolution.dropped.push(handle);
                    }
                },
            }
        }

        let unwritten: HashSet<String> = match self.store.upsert_accounts(orgs).await {
            Ok(_) => HashSet::new(),
            Err(e @ GraphError::PartialBatch { .. }) => {
                warn!(error = %e, "Organization upsert partially failed");
                e.unprocessed_keys().iter().cloned().collect()
            }
            Err(e) => return Err(e.into()),
        };
        for (org_id, handles) in handles_of {
            if unwritten.contains(&org_id) {
                resolution.dropped.extend(handles);
                continue;
            }
            if handles.len() > 1 {
                debug!(
                    org_id = org_id.as_str(),
                    handles = ?handles,
                    "Handles share one organization"
                );
            }
            for handle in handles {
                resolution.org_ids.insert(handle, org_id.clone());
            }
            resolution.fetched += 1;
        }
        resolution.dropped.sort();
        Ok(resolution)
    }

    /// Merge the pairs that do not exist yet. Returns (created, already present).
    async fn write_new_edges(
        &self,
        kind: EdgeKind,
        pairs: Vec<EdgePair>,
    ) -> Result<(usize, usize)> {
        if pairs.is_empty() {
            return Ok((0, 0));
        }
        let existing = self.store.existing_edges(kind, &pairs).await?;
        let new: Vec<EdgePair> = pairs.into_iter().filter(|p| !existing.contains(p)).collect();
        let created = if new.is_empty() {
            0
        } else {
            self.store.merge_edges(kind, new).await?
        };
        Ok((created, existing.len()))
    }
}

fn record_resolution(report: &mut ResolverReport, handles: usize, resolution: &Resolution) {
    report.handles += handles;
    report.orgs_reused += resolution.reused;
    report.orgs_fetched += resolution.fetched;
    report.handles_dropped.extend(resolution.dropped.iter().cloned());
}

fn collect_pairs(
    record: &Enrichment,
    employers: &[String],
    resolution: &Resolution,
    into: &mut BTreeSet<EdgePair>,
    report: &mut ResolverReport,
) {
    for raw in employers {
        let Some(org_id) = resolution.org_ids.get(&normalize_handle(raw)) else {
            continue;
        };
        if *org_id == record.account_id {
            report.self_edges_skipped += 1;
            continue;
        }
        into.insert(EdgePair::new(record.account_id.as_str(), org_id.as_str()));
    }
}
