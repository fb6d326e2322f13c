//! KvStore — versioned in-memory key-value store with optimistic transactions.
//!
//! Values live in a `BTreeMap` keyed by UTF-8 strings, each stamped with
//! the version of the commit that wrote it. Deletions leave tombstones so
//! commit-time validation can see them. The store is `Clone` + `Send` +
//! `Sync` (backed by `Arc<RwLock<..>>`) and is shared by every loop in a
//! process, and by every simulated process in tests.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// One key-value pair returned from a range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
}

/// A committed value. `None` is a tombstone left by a clear so that
/// later validation still sees when the key last changed.
#[derive(Debug, Clone)]
struct VersionedValue {
    value: Option<Vec<u8>>,
    committed_at: u64,
}

struct Inner {
    /// Monotonic version counter; advances by one per committing write
    /// and by [`KvStore::advance_version`].
    version: u64,
    data: BTreeMap<String, VersionedValue>,
    /// Fault switch: when false every operation fails with
    /// [`StoreError::Unavailable`].
    available: bool,
}

/// Thread-safe versioned store handle.
#[derive(Clone)]
pub struct KvStore {
    inner: Arc<RwLock<Inner>>,
}

impl KvStore {
    /// Create an empty store with the version clock at zero.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                version: 0,
                data: BTreeMap::new(),
                available: true,
            })),
        }
    }

    /// Begin a new transaction against the current state.
    pub fn begin(&self) -> Txn {
        Txn {
            store: self.clone(),
            state: Mutex::new(TxnState::default()),
        }
    }

    /// Current version of the store.
    pub async fn version(&self) -> u64 {
        self.inner.read().await.version
    }

    /// Push the version clock forward without committing anything.
    ///
    /// Real deployments get this for free from the backing store's
    /// wall-clock-driven read versions; embedded use and tests drive it
    /// explicitly to let expiry horizons elapse.
    pub async fn advance_version(&self, delta: u64) {
        let mut inner = self.inner.write().await;
        inner.version += delta;
        debug!(version = inner.version, "version clock advanced");
    }

    /// Toggle availability. While unavailable, every transaction
    /// operation fails with [`StoreError::Unavailable`].
    pub async fn set_available(&self, available: bool) {
        self.inner.write().await.available = available;
    }
}

impl Default for KvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct TxnState {
    /// Snapshot version, captured lazily on first read.
    read_version: Option<u64>,
    /// Individually read keys, validated at commit.
    read_keys: BTreeSet<String>,
    /// Range-read prefixes, validated at commit.
    read_prefixes: BTreeSet<String>,
    /// Buffered mutations; `None` is a clear. Last mutation per key wins.
    writes: BTreeMap<String, Option<Vec<u8>>>,
    committed: bool,
}

/// A transaction over a [`KvStore`].
///
/// Reads observe the snapshot at the transaction's read version plus the
/// transaction's own buffered writes. `commit` validates every tracked
/// read key and range prefix, and every written key, against commits
/// that landed after the read version; any interference fails with the
/// retryable [`StoreError::Conflict`].
pub struct Txn {
    store: KvStore,
    state: Mutex<TxnState>,
}

impl Txn {
    fn state(&self) -> MutexGuard<'_, TxnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The snapshot version this transaction reads at.
    pub async fn read_version(&self) -> StoreResult<u64> {
        if let Some(rv) = self.state().read_version {
            return Ok(rv);
        }
        let inner = self.store.inner.read().await;
        if !inner.available {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        let mut st = self.state();
        if st.committed {
            return Err(StoreError::Committed);
        }
        Ok(*st.read_version.get_or_insert(inner.version))
    }

    /// Read a single key. Adds the key to the conflict set.
    pub async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let rv = self.read_version().await?;
        {
            let mut st = self.state();
            if st.committed {
                return Err(StoreError::Committed);
            }
            st.read_keys.insert(key.to_string());
            if let Some(buffered) = st.writes.get(key) {
                return Ok(buffered.clone());
            }
        }
        let inner = self.store.inner.read().await;
        if !inner.available {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        match inner.data.get(key) {
            Some(v) if v.committed_at > rv => Err(StoreError::Conflict(format!(
                "key {key} changed after read version {rv}"
            ))),
            Some(v) => Ok(v.value.clone()),
            None => Ok(None),
        }
    }

    /// Range read of all keys starting with `prefix`, ascending, up to
    /// `limit` entries. Adds the prefix to the conflict set.
    pub async fn get_range(&self, prefix: &str, limit: usize) -> StoreResult<Vec<KeyValue>> {
        self.range_inner(prefix, limit, true).await
    }

    /// Range read without a conflict range. Returns the most recently
    /// committed values; concurrent writers in the range do not force
    /// this transaction to retry.
    pub async fn snapshot_range(&self, prefix: &str, limit: usize) -> StoreResult<Vec<KeyValue>> {
        self.range_inner(prefix, limit, false).await
    }

    async fn range_inner(
        &self,
        prefix: &str,
        limit: usize,
        tracked: bool,
    ) -> StoreResult<Vec<KeyValue>> {
        let rv = self.read_version().await?;
        let overlay: BTreeMap<String, Option<Vec<u8>>> = {
            let mut st = self.state();
            if st.committed {
                return Err(StoreError::Committed);
            }
            if tracked {
                st.read_prefixes.insert(prefix.to_string());
            }
            st.writes
                .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        let inner = self.store.inner.read().await;
        if !inner.available {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }

        let mut merged: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for (key, v) in inner
            .data
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
        {
            if !key.starts_with(prefix) {
                break;
            }
            if tracked && v.committed_at > rv {
                return Err(StoreError::Conflict(format!(
                    "key {key} changed after read version {rv}"
                )));
            }
            if let Some(value) = &v.value {
                merged.insert(key.clone(), value.clone());
            }
        }
        // Read-your-writes: the transaction's own mutations win.
        for (key, mutation) in overlay {
            match mutation {
                Some(value) => {
                    merged.insert(key, value);
                }
                None => {
                    merged.remove(&key);
                }
            }
        }

        Ok(merged
            .into_iter()
            .take(limit)
            .map(|(key, value)| KeyValue { key, value })
            .collect())
    }

    /// Buffer a write. Takes effect at commit.
    pub fn set(&self, key: &str, value: &[u8]) {
        self.state()
            .writes
            .insert(key.to_string(), Some(value.to_vec()));
    }

    /// Buffer a deletion. Takes effect at commit.
    pub fn clear(&self, key: &str) {
        self.state().writes.insert(key.to_string(), None);
    }

    /// Validate and apply the buffered mutations.
    ///
    /// Returns the commit version. Read-only transactions validate and
    /// return the current version without advancing the clock.
    pub async fn commit(&self) -> StoreResult<u64> {
        let mut inner = self.store.inner.write().await;
        if !inner.available {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        let mut st = self.state();
        if st.committed {
            return Err(StoreError::Committed);
        }
        // Transactions that never read validate against the present.
        let rv = st.read_version.unwrap_or(inner.version);

        for key in st.read_keys.iter().chain(st.writes.keys()) {
            if let Some(v) = inner.data.get(key)
                && v.committed_at > rv
            {
                return Err(StoreError::Conflict(format!(
                    "key {key} committed at {} after read version {rv}",
                    v.committed_at
                )));
            }
        }
        for prefix in &st.read_prefixes {
            for (key, v) in inner
                .data
                .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            {
                if !key.starts_with(prefix.as_str()) {
                    break;
                }
                if v.committed_at > rv {
                    return Err(StoreError::Conflict(format!(
                        "range {prefix} changed after read version {rv}"
                    )));
                }
            }
        }

        st.committed = true;
        if st.writes.is_empty() {
            return Ok(inner.version);
        }

        inner.version += 1;
        let commit_version = inner.version;
        for (key, mutation) in std::mem::take(&mut st.writes) {
            inner.data.insert(
                key,
                VersionedValue {
                    value: mutation,
                    committed_at: commit_version,
                },
            );
        }
        debug!(version = commit_version, "transaction committed");
        Ok(commit_version)
    }
}
