use neo4rs::{ConfigBuilder, Graph};

use followgraph_common::Config;

use crate::GraphError;

/// Thin wrapper around neo4rs::Graph providing connection setup.
#[derive(Clone)]
pub struct GraphClient {
    pub(crate) graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j with the given credentials.
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, GraphError> {
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .fetch_size(500)
            .max_connections(10)
            .build()?;
        let graph = Graph::connect(config).await?;
        Ok(Self { graph })
    }

    /// Connect using the Neo4j section of the application config.
    pub async fn from_config(config: &Config) -> Result<Self, GraphError> {
        Self::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password).await
    }

    /// Get a reference to the underlying neo4rs Graph.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}
