//! Merged-view reader — one evaluated document for a whole layer.

use tracing::warn;

use pulsegrid_doc::StatusDoc;
use pulsegrid_store::{KvStore, RetryBackoff, Txn};

use crate::error::{StatusError, StatusResult};

/// Read every entry under `root_key`, absorb the parseable ones, and
/// evaluate all operators at the transaction's read version.
///
/// Unparseable entries are skipped with a warning — deleting them is
/// the collector's job, not the reader's. Retryable store errors retry
/// with backoff; anything else propagates.
pub async fn read_layer_status(store: &KvStore, root_key: &str) -> StatusResult<StatusDoc> {
    let mut backoff = RetryBackoff::new();
    loop {
        let tx = store.begin();
        match merged_view(&tx, root_key).await {
            Ok(doc) => return Ok(doc),
            Err(e) if e.is_retryable() => backoff.pause().await,
            Err(e) => return Err(e),
        }
    }
}

/// Resolve a layer's status root from its discovery pointer.
///
/// Returns `None` when no instance of the layer has registered yet.
pub async fn discover_layer_root(
    store: &KvStore,
    meta_prefix: &str,
    layer: &str,
) -> StatusResult<Option<String>> {
    let tx = store.begin();
    let meta_key = format!("{meta_prefix}/json/{layer}");
    let value = tx.get(&meta_key).await?;
    Ok(value.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
}

async fn merged_view(tx: &Txn, root_key: &str) -> StatusResult<StatusDoc> {
    let reference = tx.read_version().await?;
    let entries = tx.snapshot_range(root_key, usize::MAX).await?;

    let mut merged = StatusDoc::new();
    for entry in &entries {
        let doc = match StatusDoc::parse(&entry.value) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(key = %entry.key, error = %e, "skipping unparseable status entry");
                continue;
            }
        };
        if let Err(e) = merged.absorb(&doc) {
            warn!(key = %entry.key, error = %e, "skipping unmergeable status entry");
        }
    }
    merged.clean_ops(reference).map_err(StatusError::from)?;
    Ok(merged)
}
