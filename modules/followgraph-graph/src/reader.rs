use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use neo4rs::{query, Row};

use followgraph_common::{Account, ClassificationTag, Direction, EdgeKind, EdgePair, OrgProfile};

use crate::writer::{bolt_row, bolt_strings};
use crate::{GraphClient, GraphError};

/// Ids per UNWIND read, so very large lookups stay bounded.
const READ_CHUNK: usize = 1000;

const ACCOUNT_RETURN: &str = "RETURN a.id AS id, a.handle AS handle, a.display_name AS display_name,
        a.avatar_url AS avatar_url, a.bio AS bio, a.location AS location, a.url AS url,
        a.followers_count AS followers_count, a.following_count AS following_count,
        a.verified AS verified, a.classification AS classification,
        a.department AS department, a.org_type AS org_type, a.org_subtype AS org_subtype,
        a.org_focus AS org_focus, a.updated_at AS updated_at";

/// Read-side wrapper for the graph. Returns identifiers and account snapshots
/// for the sync engine to diff against.
#[derive(Clone)]
pub struct GraphReader {
    client: GraphClient,
}

impl GraphReader {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    /// Ids on the other end of `account_id`'s FOLLOWS edges in the given direction.
    pub async fn connection_ids(
        &self,
        account_id: &str,
        direction: Direction,
    ) -> Result<HashSet<String>, GraphError> {
        let cypher = match direction {
            Direction::Followers => {
                "MATCH (u:Account)-[:FOLLOWS]->(:Account {id: $id}) RETURN u.id AS id"
            }
            Direction::Following => {
                "MATCH (:Account {id: $id})-[:FOLLOWS]->(u:Account) RETURN u.id AS id"
            }
        };
        let q = query(cypher).param("id", account_id);
        let mut ids = HashSet::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let id: String = row.get("id").unwrap_or_default();
            if !id.is_empty() {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    /// Stored accounts for the given ids. Unknown ids are absent from the map.
    pub async fn accounts_by_ids(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Account>, GraphError> {
        let cypher = format!("UNWIND $ids AS id MATCH (a:Account {{id: id}}) {ACCOUNT_RETURN}");
        let mut out = HashMap::new();
        for chunk in ids.chunks(READ_CHUNK) {
            let q = query(&cypher).param("ids", bolt_strings(chunk));
            let mut stream = self.client.graph.execute(q).await?;
            while let Some(row) = stream.next().await? {
                if let Some(account) = row_to_account(&row) {
                    out.insert(account.id.clone(), account);
                }
            }
        }
        Ok(out)
    }

    /// Stored accounts keyed by normalized handle. Expects handles already normalized.
    pub async fn accounts_by_handles(
        &self,
        handles: &[String],
    ) -> Result<HashMap<String, Account>, GraphError> {
        let cypher =
            format!("UNWIND $handles AS h MATCH (a:Account {{handle_lower: h}}) {ACCOUNT_RETURN}");
        let mut out = HashMap::new();
        for chunk in handles.chunks(READ_CHUNK) {
            let q = query(&cypher).param("handles", bolt_strings(chunk));
            let mut stream = self.client.graph.execute(q).await?;
            while let Some(row) = stream.next().await? {
                if let Some(account) = row_to_account(&row) {
                    out.insert(account.normalized_handle(), account);
                }
            }
        }
        Ok(out)
    }

    /// The subset of `pairs` that already exist as `kind` edges.
    pub async fn existing_edges(
        &self,
        kind: EdgeKind,
        pairs: &[EdgePair],
    ) -> Result<HashSet<EdgePair>, GraphError> {
        let rel = kind.rel_type();
        let cypher = format!(
            "UNWIND $rows AS row
             MATCH (s:Account {{id: row.source}})-[:{rel}]->(t:Account {{id: row.target}})
             RETURN s.id AS source, t.id AS target"
        );
        let mut out = HashSet::new();
        for chunk in pairs.chunks(READ_CHUNK) {
            let rows: Vec<neo4rs::BoltType> = chunk
                .iter()
                .map(|p| {
                    bolt_row(vec![
                        ("source", p.source.as_str().into()),
                        ("target", p.target.as_str().into()),
                    ])
                })
                .collect();
            let q = query(&cypher).param("rows", rows);
            let mut stream = self.client.graph.execute(q).await?;
            while let Some(row) = stream.next().await? {
                let source: String = row.get("source").unwrap_or_default();
                let target: String = row.get("target").unwrap_or_default();
                out.insert(EdgePair::new(source, target));
            }
        }
        Ok(out)
    }

    /// All WORKS_AT edges grouped by organization: `(org_id, employee_ids)`.
    pub async fn works_at_by_org(&self) -> Result<Vec<(String, Vec<String>)>, GraphError> {
        let q = query(
            "MATCH (e:Account)-[:WORKS_AT]->(o:Account)
             RETURN o.id AS org_id, collect(e.id) AS employee_ids",
        );
        let mut groups = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let org_id: String = row.get("org_id").unwrap_or_default();
            let employee_ids: Vec<String> = row.get("employee_ids").unwrap_or_default();
            if !org_id.is_empty() {
                groups.push((org_id, employee_ids));
            }
        }
        Ok(groups)
    }
}

// --- Row decoding ---

fn row_to_account(row: &Row) -> Option<Account> {
    let id: String = row.get("id").ok()?;
    if id.is_empty() {
        return None;
    }
    let classification = row
        .get::<String>("classification")
        .map(|t| ClassificationTag::parse_lenient(&t))
        .unwrap_or_default();
    let org_profile = if classification == ClassificationTag::Organization {
        Some(OrgProfile {
            org_type: row.get("org_type").ok(),
            subtype: row.get("org_subtype").ok(),
            focus: row.get("org_focus").ok(),
        })
    } else {
        None
    };
    Some(Account {
        id,
        handle: row.get("handle").unwrap_or_default(),
        display_name: row.get("display_name").unwrap_or_default(),
        avatar_url: row.get("avatar_url").ok(),
        bio: row.get("bio").ok(),
        location: row.get("location").ok(),
        url: row.get("url").ok(),
        followers_count: row.get("followers_count").unwrap_or(0),
        following_count: row.get("following_count").unwrap_or(0),
        verified: row.get("verified").unwrap_or(false),
        classification,
        department: row.get("department").ok(),
        org_profile,
        // A missing timestamp reads as ancient, so the account counts as stale.
        updated_at: row_datetime_opt(row, "updated_at").unwrap_or(DateTime::<Utc>::MIN_UTC),
    })
}

/// Read an optional datetime from a neo4rs Row, handling both Neo4j DateTime types
/// (stored via Cypher `datetime()`) and plain string values.
fn row_datetime_opt(row: &Row, key: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = row.get::<DateTime<chrono::FixedOffset>>(key) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = row.get::<chrono::NaiveDateTime>(key) {
        return Some(ndt.and_utc());
    }
    row.get::<String>(key)
        .ok()
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
