use chrono::{DateTime, Utc};
use neo4rs::{query, BoltList, BoltMap, BoltNull, BoltString, BoltType, Query};
use tracing::info;

use followgraph_common::{Account, ClassificationTag, EdgeKind, EdgePair, OrgProfile, RetryPolicy};

use crate::batch::{with_contention_retry, write_in_chunks};
use crate::{GraphClient, GraphError};

/// Chunk sizes per write shape. Account upserts touch the most properties per
/// row, so they get the smallest chunks.
#[derive(Debug, Clone, Copy)]
pub struct BatchSizes {
    pub account_upsert: usize,
    pub edge: usize,
    pub property_update: usize,
}

impl Default for BatchSizes {
    fn default() -> Self {
        Self {
            account_upsert: 100,
            edge: 500,
            property_update: 250,
        }
    }
}

/// Classification tag (plus org triple for organizations) to set on one account.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationUpdate {
    pub account_id: String,
    pub tag: ClassificationTag,
    pub org_profile: Option<OrgProfile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepartmentUpdate {
    pub account_id: String,
    pub department: String,
}

/// Write-side wrapper for the graph. All writes are MERGE/MATCH based, so any
/// chunk can be replayed safely.
pub struct GraphWriter {
    client: GraphClient,
    sizes: BatchSizes,
    retry: RetryPolicy,
}

impl GraphWriter {
    pub fn new(client: GraphClient) -> Self {
        Self {
            client,
            sizes: BatchSizes::default(),
            retry: RetryPolicy::LOCK_CONTENTION,
        }
    }

    pub fn with_batch_sizes(mut self, sizes: BatchSizes) -> Self {
        self.sizes = sizes;
        self
    }

    /// Match-or-create accounts by id and overwrite their mutable profile fields.
    /// An `unclassified` tag on the input never replaces a stored classification.
    pub async fn upsert_accounts(&self, accounts: Vec<Account>) -> Result<usize, GraphError> {
        let written = write_in_chunks(
            "upsert_accounts",
            accounts,
            self.sizes.account_upsert,
            |a| a.id.clone(),
            |chunk| self.run_chunk("upsert_accounts", move || upsert_accounts_query(&chunk)),
        )
        .await?;
        if written > 0 {
            info!(written, "Accounts upserted");
        }
        Ok(written)
    }

    /// Create edges that do not exist yet. Already-present edges are no-ops.
    /// Employment and affiliation edges only attach to organization-tagged targets.
    pub async fn merge_edges(
        &self,
        kind: EdgeKind,
        pairs: Vec<EdgePair>,
    ) -> Result<usize, GraphError> {
        let written = write_in_chunks(
            "merge_edges",
            pairs,
            self.sizes.edge,
            EdgePair::key,
            |chunk| self.run_chunk("merge_edges", move || merge_edges_query(kind, &chunk)),
        )
        .await?;
        if written > 0 {
            info!(kind = kind.rel_type(), written, "Edges merged");
        }
        Ok(written)
    }

    /// Delete edges if present. Missing edges are not an error.
    pub async fn delete_edges(
        &self,
        kind: EdgeKind,
        pairs: Vec<EdgePair>,
    ) -> Result<usize, GraphError> {
        let written = write_in_chunks(
            "delete_edges",
            pairs,
            self.sizes.edge,
            EdgePair::key,
            |chunk| self.run_chunk("delete_edges", move || delete_edges_query(kind, &chunk)),
        )
        .await?;
        if written > 0 {
            info!(kind = kind.rel_type(), written, "Edges deleted");
        }
        Ok(written)
    }

    /// Set classification tags. Switching an account to `organization` clears
    /// any department it carried.
    pub async fn set_classifications(
        &self,
        updates: Vec<ClassificationUpdate>,
    ) -> Result<usize, GraphError> {
        write_in_chunks(
            "set_classifications",
            updates,
            self.sizes.property_update,
            |u| u.account_id.clone(),
            |chunk| self.run_chunk("set_classifications", move || classification_query(&chunk)),
        )
        .await
    }

    /// Set departments on individual or unclassified accounts. Rows targeting
    /// any other classification are ignored by the query itself.
    pub async fn set_departments(
        &self,
        updates: Vec<DepartmentUpdate>,
    ) -> Result<usize, GraphError> {
        write_in_chunks(
            "set_departments",
            updates,
            self.sizes.property_update,
            |u| u.account_id.clone(),
            |chunk| self.run_chunk("set_departments", move || department_query(&chunk)),
        )
        .await
    }

    /// Execute one chunk in its own transaction, retrying on lock contention.
    async fn run_chunk<F>(&self, label: &'static str, build: F) -> Result<(), GraphError>
    where
        F: Fn() -> Query,
    {
        with_contention_retry(&self.retry, label, || {
            let graph = self.client.graph.clone();
            let q = build();
            async move {
                let mut txn = graph.start_txn().await?;
                txn.run(q).await?;
                txn.commit().await?;
                Ok(())
            }
        })
        .await
    }
}

// --- Query builders ---

fn upsert_accounts_query(chunk: &[Account]) -> Query {
    let rows: Vec<BoltType> = chunk.iter().map(account_row).collect();
    query(
        "UNWIND $rows AS row
         MERGE (a:Account {id: row.id})
         ON CREATE SET a.created_at = datetime(row.updated_at)
         SET a.handle = row.handle,
             a.handle_lower = row.handle_lower,
             a.display_name = row.display_name,
             a.avatar_url = row.avatar_url,
             a.bio = row.bio,
             a.location = row.location,
             a.url = row.url,
             a.followers_count = row.followers_count,
             a.following_count = row.following_count,
             a.verified = row.verified,
             a.classification = CASE
                 WHEN row.classification = 'unclassified'
                 THEN coalesce(a.classification, 'unclassified')
                 ELSE row.classification
             END,
             a.updated_at = datetime(row.updated_at)",
    )
    .param("rows", rows)
}

fn merge_edges_query(kind: EdgeKind, chunk: &[EdgePair]) -> Query {
    let rel = kind.rel_type();
    let target_guard = match kind {
        EdgeKind::Follows => "",
        EdgeKind::WorksAt | EdgeKind::WorkedAt | EdgeKind::AffiliatedWith => {
            "WHERE t.classification = 'organization'"
        }
    };
    let cypher = format!(
        "UNWIND $rows AS row
         MATCH (s:Account {{id: row.source}})
         MATCH (t:Account {{id: row.target}}) {target_guard}
         MERGE (s)-[r:{rel}]->(t)
         ON CREATE SET r.created_at = datetime()"
    );
    query(&cypher).param("rows", edge_rows(chunk))
}

fn delete_edges_query(kind: EdgeKind, chunk: &[EdgePair]) -> Query {
    let rel = kind.rel_type();
    let cypher = format!(
        "UNWIND $rows AS row
         MATCH (:Account {{id: row.source}})-[r:{rel}]->(:Account {{id: row.target}})
         DELETE r"
    );
    query(&cypher).param("rows", edge_rows(chunk))
}

fn classification_query(chunk: &[ClassificationUpdate]) -> Query {
    let rows: Vec<BoltType> = chunk
        .iter()
        .map(|u| {
            let profile = u.org_profile.clone().unwrap_or_default();
            bolt_row(vec![
                ("id", u.account_id.as_str().into()),
                ("classification", u.tag.as_str().into()),
                ("org_type", opt_str(profile.org_type.as_deref())),
                ("org_subtype", opt_str(profile.subtype.as_deref())),
                ("org_focus", opt_str(profile.focus.as_deref())),
            ])
        })
        .collect();
    query(
        "UNWIND $rows AS row
         MATCH (a:Account {id: row.id})
         SET a.classification = row.classification,
             a.org_type = CASE WHEN row.classification = 'organization' THEN row.org_type ELSE a.org_type END,
             a.org_subtype = CASE WHEN row.classification = 'organization' THEN row.org_subtype ELSE a.org_subtype END,
             a.org_focus = CASE WHEN row.classification = 'organization' THEN row.org_focus ELSE a.org_focus END,
             a.department = CASE WHEN row.classification = 'organization' THEN null ELSE a.department END",
    )
    .param("rows", rows)
}

fn department_query(chunk: &[DepartmentUpdate]) -> Query {
    let rows: Vec<BoltType> = chunk
        .iter()
        .map(|u| {
            bolt_row(vec![
                ("id", u.account_id.as_str().into()),
                ("department", u.department.as_str().into()),
            ])
        })
        .collect();
    query(
        "UNWIND $rows AS row
         MATCH (a:Account {id: row.id})
         WHERE coalesce(a.classification, 'unclassified') IN ['individual', 'unclassified']
         SET a.department = row.department",
    )
    .param("rows", rows)
}

// --- Bolt helpers ---

fn account_row(a: &Account) -> BoltType {
    bolt_row(vec![
        ("id", a.id.as_str().into()),
        ("handle", a.handle.as_str().into()),
        ("handle_lower", a.normalized_handle().into()),
        ("display_name", a.display_name.as_str().into()),
        ("avatar_url", opt_str(a.avatar_url.as_deref())),
        ("bio", opt_str(a.bio.as_deref())),
        ("location", opt_str(a.location.as_deref())),
        ("url", opt_str(a.url.as_deref())),
        ("followers_count", a.followers_count.into()),
        ("following_count", a.following_count.into()),
        ("verified", a.verified.into()),
        ("classification", a.classification.as_str().into()),
        ("updated_at", format_datetime(&a.updated_at).into()),
    ])
}

fn edge_rows(chunk: &[EdgePair]) -> Vec<BoltType> {
    chunk
        .iter()
        .map(|p| {
            bolt_row(vec![
                ("source", p.source.as_str().into()),
                ("target", p.target.as_str().into()),
            ])
        })
        .collect()
}

pub(crate) fn bolt_row(fields: Vec<(&str, BoltType)>) -> BoltType {
    BoltType::Map(BoltMap::from_iter(
        fields
            .into_iter()
            .map(|(k, v)| (BoltString::from(k), v)),
    ))
}

pub(crate) fn bolt_strings(values: &[String]) -> BoltType {
    BoltType::List(BoltList::from(
        values
            .iter()
            .map(|v| BoltType::from(v.as_str()))
            .collect::<Vec<_>>(),
    ))
}

fn opt_str(value: Option<&str>) -> BoltType {
    match value {
        Some(v) => BoltType::from(v),
        None => BoltType::Null(BoltNull),
    }
}

/// Format a timestamp the way Cypher's `datetime()` parses it.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}
