use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Neo4j error: {0}")]
    Neo4j(#[from] neo4rs::Error),

    /// A chunk of a batched write failed. Chunks before it stay committed; the
    /// unprocessed keys can be retried as-is since every write is a merge.
    #[error(
        "{op} failed at chunk {chunk_index} ({chunk_len} items, {committed} committed, {} remaining): {source}",
        .remaining.len()
    )]
    PartialBatch {
        op: &'static str,
        chunk_index: usize,
        chunk_len: usize,
        committed: usize,
        remaining: Vec<String>,
        source: Box<GraphError>,
    },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl GraphError {
    /// Keys that were not written when this is a partial-batch failure.
    pub fn unprocessed_keys(&self) -> &[String] {
        match self {
            GraphError::PartialBatch { remaining, .. } => remaining,
            _ => &[],
        }
    }
}
