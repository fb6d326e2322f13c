//! DeadEntryCollector — opportunistic garbage collection of peer entries.
//!
//! Checks for unparseable or expired status entries and deletes them
//! inside the caller's transaction, so a collection pass and the
//! caller's own snapshot write commit (or retry) together. The common
//! case examines a single entry; a full scan runs only when something
//! suggests deeper inspection is worthwhile.

use tracing::{debug, warn};

use pulsegrid_doc::StatusDoc;
use pulsegrid_store::Txn;

use crate::config::StatusConfig;
use crate::error::StatusResult;

enum Liveness {
    Alive { contains_self: bool },
    Dead(String),
}

/// Scans a layer's status range and deletes dead entries.
pub struct DeadEntryCollector {
    layer: String,
    instance_id: String,
    scan_cap: usize,
}

impl DeadEntryCollector {
    pub fn new(config: &StatusConfig, instance_id: &str) -> Self {
        Self {
            layer: config.layer.clone(),
            instance_id: instance_id.to_string(),
            scan_cap: config.collection_scan_cap,
        }
    }

    /// Run one collection pass against `root_key` inside `tx`.
    ///
    /// Phase one reads only the first entry in the range. The pass
    /// escalates to a full scan (capped) when that cheap pass deleted
    /// something, or when the caller's own id turned up inside a
    /// surviving entry — either alone is reason enough to look at the
    /// whole range. Returns the number of entries deleted.
    ///
    /// Deletions ride the caller's transaction: a concurrent rewrite by
    /// an entry's true owner forces one of the two commits to retry, so
    /// no entry is ever half-deleted under its owner's feet.
    pub async fn collect(&self, tx: &Txn, root_key: &str) -> StatusResult<usize> {
        let reference = tx.read_version().await?;
        let mut docs = tx.snapshot_range(root_key, 1).await?;
        let mut deleted = 0;
        let mut escalated = false;
        let mut i = 0;

        while i < docs.len() {
            let entry = &docs[i];
            let mut escalate = false;
            match self.liveness(&entry.value, reference) {
                Liveness::Alive { contains_self } => {
                    if contains_self && !escalated {
                        escalate = true;
                    }
                }
                Liveness::Dead(reason) => {
                    warn!(key = %entry.key, %reason, "removing dead layer status entry");
                    tx.clear(&entry.key);
                    deleted += 1;
                    if !escalated {
                        escalate = true;
                    }
                }
            }
            i += 1;
            if escalate {
                escalated = true;
                // Re-read through the transaction's own writes, so
                // entries deleted above do not come back.
                docs = tx.snapshot_range(root_key, self.scan_cap).await?;
                i = 0;
            }
        }

        if deleted > 0 {
            debug!(deleted, %root_key, "collection pass finished");
        }
        Ok(deleted)
    }

    fn liveness(&self, value: &[u8], reference: u64) -> Liveness {
        let mut doc = match StatusDoc::parse(value) {
            Ok(doc) => doc,
            Err(e) => return Liveness::Dead(e.to_string()),
        };
        if let Err(e) = doc.clean_ops(reference) {
            return Liveness::Dead(e.to_string());
        }
        if !doc.has(&format!("{}.last_updated", self.layer)) {
            return Liveness::Dead("expired or missing last_updated".to_string());
        }
        Liveness::Alive {
            contains_self: doc.has(&format!("{}.instances.{}", self.layer, self.instance_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::FixedBackupAgent;
    use crate::config::LayerKeys;
    use crate::snapshot::SnapshotBuilder;
    use pulsegrid_store::KvStore;

    fn test_config() -> StatusConfig {
        let mut config = StatusConfig::new("backup");
        config.expiry_horizon_secs = 100;
        config.versions_per_second = 10;
        config
    }

    /// Publish a snapshot for `id` at the store's current version.
    async fn publish(store: &KvStore, config: &StatusConfig, id: &str) {
        let keys = LayerKeys::derive(config, id);
        let mut builder = SnapshotBuilder::new(config, id);
        let agent = FixedBackupAgent::new();
        let tx = store.begin();
        let doc = builder.build(&tx, &agent).await.unwrap();
        tx.set(&keys.instance_key, &doc.to_bytes().unwrap());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn live_entries_are_never_deleted() {
        let store = KvStore::new();
        let config = test_config();
        publish(&store, &config, "peer1").await;
        publish(&store, &config, "peer2").await;

        let collector = DeadEntryCollector::new(&config, "me");
        let keys = LayerKeys::derive(&config, "me");
        let tx = store.begin();
        assert_eq!(collector.collect(&tx, &keys.root_key).await.unwrap(), 0);
        tx.commit().await.unwrap();

        let tx = store.begin();
        assert_eq!(tx.get_range(&keys.root_key, 100).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unparseable_entries_are_deleted() {
        let store = KvStore::new();
        let config = test_config();
        let keys = LayerKeys::derive(&config, "me");
        publish(&store, &config, "peer1").await;

        let tx = store.begin();
        tx.set(&format!("{}/agent-broken", keys.root_key), b"not json");
        tx.commit().await.unwrap();

        let collector = DeadEntryCollector::new(&config, "me");
        let tx = store.begin();
        assert_eq!(collector.collect(&tx, &keys.root_key).await.unwrap(), 1);
        tx.commit().await.unwrap();

        let tx = store.begin();
        let survivors = tx.get_range(&keys.root_key, 100).await.unwrap();
        assert_eq!(survivors.len(), 1);
        assert!(survivors[0].key.contains("peer1"));
    }

    #[tokio::test]
    async fn expired_entries_are_deleted_once_the_horizon_passes() {
        let store = KvStore::new();
        let config = test_config();
        let keys = LayerKeys::derive(&config, "me");
        publish(&store, &config, "crashed").await;

        // Not yet expired.
        let collector = DeadEntryCollector::new(&config, "me");
        let tx = store.begin();
        assert_eq!(collector.collect(&tx, &keys.root_key).await.unwrap(), 0);

        // 100s * 10 versions/s, plus one.
        store.advance_version(1_001).await;
        let tx = store.begin();
        assert_eq!(collector.collect(&tx, &keys.root_key).await.unwrap(), 1);
        tx.commit().await.unwrap();

        let tx = store.begin();
        assert!(tx.get_range(&keys.root_key, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn collection_is_idempotent() {
        let store = KvStore::new();
        let config = test_config();
        let keys = LayerKeys::derive(&config, "me");

        let tx = store.begin();
        tx.set(&format!("{}/agent-junk", keys.root_key), b"{]");
        tx.commit().await.unwrap();

        let collector = DeadEntryCollector::new(&config, "me");
        let tx = store.begin();
        assert_eq!(collector.collect(&tx, &keys.root_key).await.unwrap(), 1);
        tx.commit().await.unwrap();

        // The key is gone; a second pass finds nothing to do.
        let tx = store.begin();
        assert_eq!(collector.collect(&tx, &keys.root_key).await.unwrap(), 0);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn deletion_in_cheap_pass_escalates_to_full_scan() {
        let store = KvStore::new();
        let config = test_config();
        let keys = LayerKeys::derive(&config, "me");

        // Two dead entries; "agent-a..." sorts first so the cheap pass
        // sees one of them and must escalate to find the other.
        let tx = store.begin();
        tx.set(&format!("{}/agent-aaa", keys.root_key), b"bad");
        tx.set(&format!("{}/agent-zzz", keys.root_key), b"also bad");
        tx.commit().await.unwrap();

        let collector = DeadEntryCollector::new(&config, "me");
        let tx = store.begin();
        assert_eq!(collector.collect(&tx, &keys.root_key).await.unwrap(), 2);
        tx.commit().await.unwrap();

        let tx = store.begin();
        assert!(tx.get_range(&keys.root_key, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn own_entry_in_cheap_pass_escalates_to_full_scan() {
        let store = KvStore::new();
        let config = test_config();
        let keys = LayerKeys::derive(&config, "me");

        // The caller's own (live) entry is first in the range; a dead
        // peer hides behind it and is only reachable via escalation.
        publish(&store, &config, "me").await;
        let me_key = keys.instance_key.clone();
        let first_key = format!("{}/agent-0aaa", keys.root_key);
        let tx = store.begin();
        let own = tx.get(&me_key).await.unwrap().unwrap();
        tx.clear(&me_key);
        tx.set(&first_key, &own);
        tx.set(&format!("{}/agent-zzz", keys.root_key), b"dead peer");
        tx.commit().await.unwrap();

        let collector = DeadEntryCollector::new(&config, "me");
        let tx = store.begin();
        assert_eq!(collector.collect(&tx, &keys.root_key).await.unwrap(), 1);
        tx.commit().await.unwrap();

        let tx = store.begin();
        let survivors = tx.get_range(&keys.root_key, 100).await.unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].key, first_key);
    }

    #[tokio::test]
    async fn without_escalation_triggers_only_first_entry_is_examined() {
        let store = KvStore::new();
        let config = test_config();
        let keys = LayerKeys::derive(&config, "me");

        // First entry live and not ours; a dead peer sorts after it.
        publish(&store, &config, "aaa-live").await;
        let tx = store.begin();
        tx.set(&format!("{}/agent-zzz", keys.root_key), b"dead");
        tx.commit().await.unwrap();

        let collector = DeadEntryCollector::new(&config, "me");
        let tx = store.begin();
        // Cheap pass sees only the live first entry; no trigger fires.
        assert_eq!(collector.collect(&tx, &keys.root_key).await.unwrap(), 0);
        tx.commit().await.unwrap();

        let tx = store.begin();
        assert_eq!(tx.get_range(&keys.root_key, 100).await.unwrap().len(), 2);
    }
}
