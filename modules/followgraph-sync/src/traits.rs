// Trait seams for the sync engine's two external collaborators.
//
// SocialSource — the paginated social API (implemented by SocialClient).
// GraphStore   — reads and bulk writes against the property graph
//                (implemented by Neo4jStore over GraphReader + GraphWriter).
//
// Both have in-memory mocks in `testing.rs` so the engine can be tested
// without network or Docker.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use followgraph_common::{Account, Direction, EdgeKind, EdgePair};
use followgraph_graph::{
    ClassificationUpdate, DepartmentUpdate, EmploymentSource, GraphClient, GraphError, GraphReader,
    GraphWriter,
};
use social_client::{ApiUser, ConnectionList, ConnectionsPage, SocialClient};

// ---------------------------------------------------------------------------
// SocialSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SocialSource: Send + Sync {
    /// One page of `account_id`'s connections. `cursor = None` is the first page.
    async fn connections_page(
        &self,
        account_id: &str,
        direction: Direction,
        cursor: Option<&str>,
    ) -> social_client::Result<ConnectionsPage>;

    /// Profile lookup by handle.
    async fn user_by_handle(&self, handle: &str) -> social_client::Result<ApiUser>;

    /// Profile lookup by stable id.
    async fn user_by_id(&self, account_id: &str) -> social_client::Result<ApiUser>;
}

#[async_trait]
impl SocialSource for SocialClient {
    async fn connections_page(
        &self,
        account_id: &str,
        direction: Direction,
        cursor: Option<&str>,
    ) -> social_client::Result<ConnectionsPage> {
        let list = match direction {
            Direction::Followers => ConnectionList::Followers,
            Direction::Following => ConnectionList::Following,
        };
        SocialClient::connections_page(self, account_id, list, cursor).await
    }

    async fn user_by_handle(&self, handle: &str) -> social_client::Result<ApiUser> {
        SocialClient::user_by_handle(self, handle).await
    }

    async fn user_by_id(&self, account_id: &str) -> social_client::Result<ApiUser> {
        SocialClient::user_by_id(self, account_id).await
    }
}

// ---------------------------------------------------------------------------
// GraphStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait GraphStore: Send + Sync {
    // --- Reads ---

    /// Ids on the other end of the account's FOLLOWS edges in `direction`.
    async fn connection_ids(
        &self,
        account_id: &str,
        direction: Direction,
    ) -> Result<HashSet<String>, GraphError>;

    /// Stored accounts keyed by id.
    async fn accounts_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Account>, GraphError>;

    /// Stored accounts keyed by normalized handle.
    async fn accounts_by_handles(
        &self,
        handles: &[String],
    ) -> Result<HashMap<String, Account>, GraphError>;

    /// The subset of `pairs` already present as `kind` edges.
    async fn existing_edges(
        &self,
        kind: EdgeKind,
        pairs: &[EdgePair],
    ) -> Result<HashSet<EdgePair>, GraphError>;

    // --- Batched writes ---

    async fn upsert_accounts(&self, accounts: Vec<Account>) -> Result<usize, GraphError>;

    async fn merge_edges(&self, kind: EdgeKind, pairs: Vec<EdgePair>) -> Result<usize, GraphError>;

    async fn delete_edges(&self, kind: EdgeKind, pairs: Vec<EdgePair>) -> Result<usize, GraphError>;

    async fn set_classifications(
        &self,
        updates: Vec<ClassificationUpdate>,
    ) -> Result<usize, GraphError>;

    async fn set_departments(&self, updates: Vec<DepartmentUpdate>) -> Result<usize, GraphError>;
}

/// Production store: Neo4j reads and chunked transactional writes.
pub struct Neo4jStore {
    reader: GraphReader,
    writer: GraphWriter,
}

impl Neo4jStore {
    pub fn new(client: GraphClient) -> Self {
        Self {
            reader: GraphReader::new(client.clone()),
            writer: GraphWriter::new(client),
        }
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn connection_ids(
        &self,
        account_id: &str,
        direction: Direction,
    ) -> Result<HashSet<String>, GraphError> {
        self.reader.connection_ids(account_id, direction).await
    }

    async fn accounts_by_ids(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Account>, GraphError> {
        self.reader.accounts_by_ids(ids).await
    }

    async fn accounts_by_handles(
        &self,
        handles: &[String],
    ) -> Result<HashMap<String, Account>, GraphError> {
        self.reader.accounts_by_handles(handles).await
    }

    async fn existing_edges(
        &self,
        kind: EdgeKind,
        pairs: &[EdgePair],
    ) -> Result<HashSet<EdgePair>, GraphError> {
        self.reader.existing_edges(kind, pairs).await
    }

    async fn upsert_accounts(&self, accounts: Vec<Account>) -> Result<usize, GraphError> {
        self.writer.upsert_accounts(accounts).await
    }

    async fn merge_edges(&self, kind: EdgeKind, pairs: Vec<EdgePair>) -> Result<usize, GraphError> {
        self.writer.merge_edges(kind, pairs).await
    }

    async fn delete_edges(
        &self,
        kind: EdgeKind,
        pairs: Vec<EdgePair>,
    ) -> Result<usize, GraphError> {
        self.writer.delete_edges(kind, pairs).await
    }

    async fn set_classifications(
        &self,
        updates: Vec<ClassificationUpdate>,
    ) -> Result<usize, GraphError> {
        self.writer.set_classifications(updates).await
    }

    async fn set_departments(&self, updates: Vec<DepartmentUpdate>) -> Result<usize, GraphError> {
        self.writer.set_departments(updates).await
    }
}

#[async_trait]
impl EmploymentSource for Neo4jStore {
    async fn works_at_by_org(&self) -> Result<Vec<(String, Vec<String>)>, GraphError> {
        self.reader.works_at_by_org().await
    }
}
