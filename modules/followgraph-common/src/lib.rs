pub mod types;
pub mod config;
pub mod error;
pub mod retry;

pub use types::*;
pub use config::{Config, FetchStrategyKind};
pub use error::FollowgraphError;
pub use retry::RetryPolicy;
