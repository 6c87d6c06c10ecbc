//! Chunked, deduplicated, retry-aware execution of bulk graph writes.
//!
//! Every bulk write in [`crate::writer`] goes through [`write_in_chunks`]:
//! input is deduped by a composite key, split into fixed-size chunks, and each
//! chunk runs as its own transaction. A failing chunk stops the run and is
//! reported as [`GraphError::PartialBatch`]; earlier chunks stay committed.

use std::collections::HashMap;
use std::future::Future;

use followgraph_common::RetryPolicy;
use tracing::{debug, warn};

use crate::GraphError;

/// Error-message fragments Neo4j uses for lock contention and deadlocks.
const CONTENTION_SIGNATURES: &[&str] = &[
    "deadlockdetected",
    "deadlock",
    "lockclient",
    "neo.transienterror.transaction",
    "lock acquisition timeout",
];

/// Remove duplicate items by key. The last occurrence wins but keeps the
/// position of the first.
pub fn dedupe_by_key<T>(items: Vec<T>, key: impl Fn(&T) -> String) -> Vec<T> {
    let mut position: HashMap<String, usize> = HashMap::with_capacity(items.len());
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        let k = key(&item);
        match position.get(&k) {
            Some(&i) => out[i] = item,
            None => {
                position.insert(k, out.len());
                out.push(item);
            }
        }
    }
    out
}

/// Whether a failure looks like lock contention, judged from its message.
pub fn is_contention(err: &GraphError) -> bool {
    let msg = err.to_string().to_lowercase();
    CONTENTION_SIGNATURES.iter().any(|sig| msg.contains(sig))
}

/// Run one query-level operation, retrying the whole operation on lock
/// contention. Other failures are returned immediately.
pub async fn with_contention_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, GraphError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GraphError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_contention(&e) && policy.should_retry(attempt) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    label,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Lock contention, retrying query"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Dedupe `items`, then hand them to `write` in chunks of `chunk_size`,
/// sequentially. Returns the number of items written.
pub async fn write_in_chunks<T, K, F, Fut>(
    op: &'static str,
    items: Vec<T>,
    chunk_size: usize,
    key: K,
    mut write: F,
) -> Result<usize, GraphError>
where
    T: Clone,
    K: Fn(&T) -> String,
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = Result<(), GraphError>>,
{
    let items = dedupe_by_key(items, &key);
    if items.is_empty() {
        return Ok(0);
    }

    let chunk_size = chunk_size.max(1);
    let total_chunks = items.len().div_ceil(chunk_size);
    let mut committed = 0usize;

    for (chunk_index, chunk) in items.chunks(chunk_size).enumerate() {
        let chunk_len = chunk.len();
        if let Err(e) = write(chunk.to_vec()).await {
            let remaining: Vec<String> = items[committed..].iter().map(&key).collect();
            warn!(
                op,
                chunk = chunk_index + 1,
                total_chunks,
                chunk_len,
                committed,
                remaining = remaining.len(),
                error = %e,
                "Batch chunk failed, stopping"
            );
            return Err(GraphError::PartialBatch {
                op,
                chunk_index,
                chunk_len,
                committed,
                remaining,
                source: Box::new(e),
            });
        }
        committed += chunk_len;
        debug!(op, chunk = chunk_index + 1, total_chunks, committed, "Batch chunk committed");
    }

    Ok(committed)
}
