use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use followgraph_common::{Config, Enrichment};
use followgraph_graph::{migrate::migrate, GraphClient};
use followgraph_sync::{EngineSettings, Neo4jStore, SyncEngine, SyncOutcome};
use social_client::SocialClient;

#[derive(Parser)]
#[command(
    name = "followgraph",
    about = "Keep a Neo4j follow graph in sync with the social API"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create constraints and indexes
    Migrate,
    /// Reconcile one account's follow edges with the API
    Sync {
        account_id: String,
        #[arg(long, value_enum, default_value_t = DirectionArg::Both)]
        direction: DirectionArg,
    },
    /// Apply a JSON array of enrichment records
    Enrich { path: PathBuf },
    /// List employees of an organization
    Employees { org_id: String },
    /// Check whether two accounts share an employer
    Shared { a: String, b: String },
    /// List an account's coworkers
    Coworkers { account_id: String },
    /// Re-sync accounts on an interval until interrupted
    Watch {
        #[arg(required = true)]
        account_ids: Vec<String>,
        #[arg(long, default_value_t = 3600)]
        every_secs: u64,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DirectionArg {
    Followers,
    Following,
    Both,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("followgraph=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.log_redacted();

    let client = GraphClient::from_config(&config).await?;

    if let Command::Migrate = cli.command {
        migrate(&client).await?;
        return Ok(());
    }

    let social = Arc::new(SocialClient::new(
        config.social_api_base_url.as_str(),
        config.social_api_token.as_str(),
    )?);
    let store = Arc::new(Neo4jStore::new(client));
    let engine = SyncEngine::new(social, store, EngineSettings::from_config(&config));

    match cli.command {
        Command::Migrate => {}
        Command::Sync {
            account_id,
            direction,
        } => {
            let result = match direction {
                DirectionArg::Followers => engine.sync_followers(&account_id).await,
                DirectionArg::Following => engine.sync_following(&account_id).await,
                DirectionArg::Both => engine.sync_account(&account_id).await,
            };
            let outcome = SyncOutcome::from_result(&result);
            info!(account_id = account_id.as_str(), outcome = %outcome, "Sync finished");
            if let Ok(report) = &result {
                println!("{}", serde_json::to_string_pretty(report)?);
            }
            println!("{outcome}");
        }
        Command::Enrich { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let records: Vec<Enrichment> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing enrichment records in {}", path.display()))?;
            let report = engine.process_employment(&records).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Employees { org_id } => {
            for id in engine.org_employees(&org_id).await? {
                println!("{id}");
            }
        }
        Command::Shared { a, b } => {
            let shared = engine.shared_employers(&a, &b).await?;
            if shared.is_empty() {
                println!("{a} and {b} share no employer");
            } else {
                println!("{a} and {b} share: {}", shared.join(", "));
            }
        }
        Command::Coworkers { account_id } => {
            for id in engine.coworkers(&account_id).await? {
                println!("{id}");
            }
        }
        Command::Watch {
            account_ids,
            every_secs,
        } => {
            let refresh = engine.spawn_org_index_refresh();
            let mut ticker = tokio::time::interval(Duration::from_secs(every_secs.max(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for account_id in &account_ids {
                            let result = engine.sync_account(account_id).await;
                            let outcome = SyncOutcome::from_result(&result);
                            info!(
                                account_id = account_id.as_str(),
                                outcome = %outcome,
                                "Sync finished"
                            );
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupted, stopping watch");
                        break;
                    }
                }
            }
            refresh.abort();
        }
    }

    Ok(())
}
