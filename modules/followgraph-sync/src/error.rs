use thiserror::Error;

use followgraph_common::FollowgraphError;
use followgraph_graph::GraphError;
use social_client::SocialError;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Social API error: {0}")]
    Social(#[from] SocialError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Config(#[from] FollowgraphError),
}
