pub mod batch;
pub mod client;
pub mod error;
pub mod migrate;
pub mod org_index;
pub mod reader;
pub mod writer;

#[cfg(feature = "test-utils")]
pub mod testutil;

pub use batch::{dedupe_by_key, is_contention, with_contention_retry, write_in_chunks};
pub use client::GraphClient;
pub use error::GraphError;
pub use neo4rs::query;
pub use org_index::{EmploymentSource, OrgIndex, OrgIndexStore};
pub use reader::GraphReader;
pub use writer::{BatchSizes, ClassificationUpdate, DepartmentUpdate, GraphWriter};
