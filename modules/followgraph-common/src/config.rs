use std::env;
use std::time::Duration;

use tracing::info;

use crate::error::FollowgraphError;
use crate::types::{ACCOUNT_STALE_DAYS, ORG_INDEX_REFRESH_SECS, ORG_STALE_DAYS};

const DEFAULT_SOCIAL_API_BASE_URL: &str = "https://api.social.example/v2";

/// How connection lists are paginated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategyKind {
    Sequential,
    Hybrid,
}

/// Application configuration. Built once and passed to the clients at construction.
#[derive(Debug, Clone)]
pub struct Config {
    // Neo4j
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    // External social API
    pub social_api_base_url: String,
    pub social_api_token: String,

    // Sync tuning
    pub account_stale_days: i64,
    pub org_stale_days: i64,
    pub org_index_refresh: Duration,
    pub fetch_strategy: FetchStrategyKind,
}

impl Config {
    /// Load configuration from environment variables.
    /// Missing credentials are a fatal configuration error.
    pub fn from_env() -> Result<Self, FollowgraphError> {
        Ok(Self {
            neo4j_uri: required_env("NEO4J_URI")?,
            neo4j_user: required_env("NEO4J_USER")?,
            neo4j_password: required_env("NEO4J_PASSWORD")?,
            social_api_base_url: env::var("SOCIAL_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_SOCIAL_API_BASE_URL.to_string()),
            social_api_token: required_env("SOCIAL_API_TOKEN")?,
            account_stale_days: parsed_env("ACCOUNT_STALE_DAYS", ACCOUNT_STALE_DAYS)?,
            org_stale_days: parsed_env("ORG_STALE_DAYS", ORG_STALE_DAYS)?,
            org_index_refresh: Duration::from_secs(parsed_env(
                "ORG_INDEX_REFRESH_SECS",
                ORG_INDEX_REFRESH_SECS,
            )?),
            fetch_strategy: match env::var("FETCH_STRATEGY").as_deref() {
                Ok("hybrid") => FetchStrategyKind::Hybrid,
                Ok("sequential") | Err(_) => FetchStrategyKind::Sequential,
                Ok(other) => {
                    return Err(FollowgraphError::Config(format!(
                        "FETCH_STRATEGY must be 'sequential' or 'hybrid', got '{other}'"
                    )))
                }
            },
        })
    }

    /// Log the configuration with secrets masked.
    pub fn log_redacted(&self) {
        info!(
            neo4j_uri = self.neo4j_uri.as_str(),
            neo4j_user = self.neo4j_user.as_str(),
            neo4j_password = redact(&self.neo4j_password),
            social_api_base_url = self.social_api_base_url.as_str(),
            social_api_token = redact(&self.social_api_token),
            account_stale_days = self.account_stale_days,
            org_stale_days = self.org_stale_days,
            org_index_refresh_secs = self.org_index_refresh.as_secs(),
            fetch_strategy = ?self.fetch_strategy,
            "Loaded configuration"
        );
    }
}

fn required_env(key: &str) -> Result<String, FollowgraphError> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(FollowgraphError::Config(format!(
            "{key} environment variable is required"
        ))),
    }
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, FollowgraphError> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| FollowgraphError::Config(format!("{key} must be a number, got '{v}'"))),
        Err(_) => Ok(default),
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}
