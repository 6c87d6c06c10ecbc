pub mod differential;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod resolver;
pub mod staleness;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use differential::{compute_delta, DifferentialSync, EdgeDelta, SyncOutcome, SyncReport};
pub use engine::{EngineSettings, SyncEngine};
pub use error::{Result, SyncError};
pub use fetcher::{
    account_from_api, ConnectionFetcher, Connections, FetchStrategy, FetchedConnections,
};
pub use resolver::{OrgResolver, ResolverReport};
pub use staleness::{Freshness, StalenessDetector, WritePlan};
pub use traits::{GraphStore, Neo4jStore, SocialSource};
