use neo4rs::query;
use tracing::{info, warn};

use crate::{GraphClient, GraphError};

/// Run idempotent schema migrations: the account id uniqueness constraint that
/// every MERGE relies on, plus lookup indexes.
pub async fn migrate(client: &GraphClient) -> Result<(), GraphError> {
    let g = &client.graph;

    info!("Running schema migrations...");

    let constraints = [
        "CREATE CONSTRAINT account_id IF NOT EXISTS FOR (a:Account) REQUIRE a.id IS UNIQUE",
    ];
    for c in &constraints {
        run_ignoring_exists(g, c).await?;
    }
    info!("Account uniqueness constraint created");

    let indexes = [
        "CREATE INDEX account_handle_lower IF NOT EXISTS FOR (a:Account) ON (a.handle_lower)",
        "CREATE INDEX account_classification IF NOT EXISTS FOR (a:Account) ON (a.classification)",
        "CREATE INDEX account_updated_at IF NOT EXISTS FOR (a:Account) ON (a.updated_at)",
    ];
    for idx in &indexes {
        run_ignoring_exists(g, idx).await?;
    }
    info!("Account indexes created");

    // Accounts written before handle_lower existed.
    let backfill = "MATCH (a:Account) WHERE a.handle IS NOT NULL AND a.handle_lower IS NULL
                    SET a.handle_lower = toLower(a.handle)";
    if let Err(e) = g.run(query(backfill)).await {
        warn!("Handle backfill failed (non-fatal): {e}");
    }

    info!("Schema migrations complete");
    Ok(())
}

async fn run_ignoring_exists(g: &neo4rs::Graph, cypher: &str) -> Result<(), GraphError> {
    match g.run(query(cypher)).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let msg = e.to_string().to_lowercase();
            if msg.contains("already exists") || msg.contains("equivalent") {
                warn!("Already exists (skipped): {}", cypher.chars().take(80).collect::<String>());
                Ok(())
            } else {
                Err(e.into())
            }
        }
    }
}
