//! pulsegrid-status — coordinator-free fleet status fabric.
//!
//! Every agent process publishes its own operational snapshot into a
//! shared transactional store under a per-layer namespace. No agent
//! coordinates the fleet: each one periodically rewrites its own entry,
//! opportunistically collects dead peers, and adapts its own publish
//! cadence so the fleet-wide write rate stays bounded. Any reader merges
//! the per-instance contributions into one self-expiring view.
//!
//! # Architecture
//!
//! ```text
//! StatusPublisher (per process)
//!   ├── registration: meta pointer written once, retried to commit
//!   └── publish cycle (one transaction)
//!       ├── SnapshotBuilder    — this instance's contribution
//!       ├── DeadEntryCollector — delete stale/malformed peer entries
//!       ├── set(instance key) + commit
//!       └── jittered sleep from the shared PollDelay cell
//! PollRateController (started after the first successful commit)
//!   └── every tick: merged instances_running → delay = count / target rate
//! ```
//!
//! The snapshot write and the collection deletes commit atomically in
//! one transaction per cycle; conflicts retry the whole cycle. Nothing
//! here is exactly-once — a missed cycle is repaired by the next one,
//! and a crashed instance's entry outlives it only until its embedded
//! expiry version falls behind a surviving publisher's read version.

pub mod backup;
pub mod collector;
pub mod config;
pub mod error;
pub mod publisher;
pub mod rate;
pub mod reader;
pub mod snapshot;

pub use backup::{BackupAgent, FixedBackupAgent, IoCounters, TagState, TagStatus};
pub use collector::DeadEntryCollector;
pub use config::{LayerKeys, StatusConfig};
pub use error::{StatusError, StatusResult};
pub use publisher::StatusPublisher;
pub use rate::{PollDelay, PollRateController};
pub use reader::{discover_layer_root, read_layer_status};
pub use snapshot::SnapshotBuilder;
