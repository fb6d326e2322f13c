//! pulsegrid-store — embedded transactional key-value store.
//!
//! Provides the store contract the status fabric is written against:
//! snapshot reads with a monotonically increasing read version, buffered
//! writes, and optimistic commits that fail with a retryable conflict
//! when another writer touched the same keys first.
//!
//! # Architecture
//!
//! ```text
//! KvStore (Clone, Arc interior)
//!   └── Txn (KvStore::begin)
//!       ├── read_version()       — captured lazily on first read
//!       ├── get / get_range      — read-your-writes, conflict-tracked
//!       ├── snapshot_range       — read without a conflict range
//!       ├── set / clear          — buffered, last mutation wins
//!       └── commit()             — optimistic validation, then apply
//! ```
//!
//! The version counter advances by one per commit and can be pushed
//! forward explicitly with [`KvStore::advance_version`], which is how
//! hosting processes and tests express the passage of the version clock.
//!
//! Conflict classification mirrors the usual optimistic-concurrency
//! discipline: [`StoreError::Conflict`] is retryable, everything else is
//! not. [`RetryBackoff`] provides the capped exponential delay loops use
//! between retries.

pub mod error;
pub mod kv;
pub mod retry;

pub use error::{StoreError, StoreResult};
pub use kv::{KeyValue, KvStore, Txn};
pub use retry::RetryBackoff;
