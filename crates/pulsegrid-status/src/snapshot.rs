//! SnapshotBuilder — one instance's contribution to the layer view.
//!
//! The document nests the whole payload under an `$expires` operator so
//! the contribution ages out of the merged view on its own: if every
//! agent dies, nobody is left to collect dead entries, and expiry is
//! what keeps readers from trusting a fossil.

use futures::future::try_join_all;
use serde_json::{Map, Value, json};
use sysinfo::{Pid, ProcessesToUpdate, System};

use pulsegrid_doc::StatusDoc;
use pulsegrid_store::Txn;

use crate::backup::{BackupAgent, IoCounters};
use crate::config::StatusConfig;
use crate::error::StatusResult;

/// Builds this instance's status document once per publish cycle.
///
/// Holds the process sampler and the previous I/O counter sample so
/// consecutive builds can publish transfer deltas.
pub struct SnapshotBuilder {
    layer: String,
    instance_id: String,
    workers: u32,
    expiry_horizon_versions: u64,
    versions_per_second: u64,
    sys: System,
    pid: Option<Pid>,
    last_io: Option<(IoCounters, f64)>,
}

#[derive(Debug, Default)]
struct ProcessSample {
    virtual_bytes: u64,
    resident_bytes: u64,
    cpu_seconds: f64,
}

impl SnapshotBuilder {
    pub fn new(config: &StatusConfig, instance_id: &str) -> Self {
        Self {
            layer: config.layer.clone(),
            instance_id: instance_id.to_string(),
            workers: config.workers,
            expiry_horizon_versions: config.expiry_horizon_versions(),
            versions_per_second: config.versions_per_second,
            sys: System::new(),
            pid: sysinfo::get_current_pid().ok(),
            last_io: None,
        }
    }

    /// Build the status document at the transaction's read version.
    ///
    /// Per-tag fetches are issued and awaited in parallel; each tag's
    /// derived fields depend only on that tag's own status.
    pub async fn build(&mut self, tx: &Txn, agent: &dyn BackupAgent) -> StatusResult<StatusDoc> {
        let read_ver = tx.read_version().await?;
        let now = epoch_seconds();
        let sample = self.sample_process();

        let layer = self.layer.clone();
        let ex = format!("{layer}.$expires");
        let mut doc = StatusDoc::new();

        doc.create(
            &format!("{layer}.version"),
            json!(read_ver + self.expiry_horizon_versions),
        );
        doc.create(&format!("{ex}.instances_running.$sum"), json!(1));
        doc.create(&format!("{ex}.total_workers.$sum"), json!(self.workers));
        doc.create(&format!("{ex}.last_updated.$max"), json!(now));

        let inst = format!("{ex}.instances.{}", self.instance_id);
        doc.create(&format!("{inst}.version"), json!(env!("CARGO_PKG_VERSION")));
        doc.create(&format!("{inst}.id"), json!(self.instance_id));
        doc.create(&format!("{inst}.last_updated"), json!(now));
        doc.create(&format!("{inst}.memory_usage"), json!(sample.virtual_bytes));
        doc.create(&format!("{inst}.resident_size"), json!(sample.resident_bytes));
        doc.create(
            &format!("{inst}.process_cpu_seconds"),
            json!(sample.cpu_seconds),
        );
        doc.create(&format!("{inst}.workers"), json!(self.workers));

        let counters = agent.io_counters();
        doc.create(
            &format!("{inst}.io_stats.total.bytes_sent"),
            json!(counters.bytes_sent),
        );
        doc.create(
            &format!("{inst}.io_stats.total.requests"),
            json!(counters.requests),
        );
        if let Some((prev, prev_ts)) = self.last_io {
            let recent = counters.since(&prev);
            let bytes_per_second = if now > prev_ts {
                recent.bytes_sent as f64 / (now - prev_ts)
            } else {
                0.0
            };
            doc.create(
                &format!("{inst}.io_stats.recent.bytes_sent"),
                json!(recent.bytes_sent),
            );
            doc.create(
                &format!("{inst}.io_stats.recent.requests"),
                json!(recent.requests),
            );
            doc.create(
                &format!("{inst}.io_stats.recent.bytes_per_second"),
                json!(bytes_per_second),
            );
            doc.create(
                &format!("{ex}.recent_io.bytes_sent.$sum"),
                json!(recent.bytes_sent),
            );
            doc.create(
                &format!("{ex}.recent_io.requests.$sum"),
                json!(recent.requests),
            );
            doc.create(
                &format!("{ex}.recent_io.bytes_per_second.$sum"),
                json!(bytes_per_second),
            );
        }
        self.last_io = Some((counters, now));

        let names = agent.list_tags(tx).await?;
        let statuses = try_join_all(names.iter().map(|tag| agent.tag_status(tx, tag))).await?;

        let mut tags = Map::new();
        for (name, status) in names.iter().zip(&statuses) {
            let seconds_behind = read_ver.saturating_sub(status.last_restorable_version) as f64
                / self.versions_per_second as f64;
            tags.insert(
                name.clone(),
                json!({
                    "current_container": status.container,
                    "current_status": status.state.as_str(),
                    "last_restorable_version": status.last_restorable_version,
                    "last_restorable_seconds_behind": seconds_behind,
                    "running_backup": status.state.is_running(),
                    "running_backup_is_restorable": status.state.is_restorable(),
                    "range_bytes_written": status.range_bytes_written,
                    "mutation_log_bytes_written": status.log_bytes_written,
                }),
            );
        }
        doc.create(&format!("{ex}.tags.$latest"), Value::Object(tags));
        doc.create(&format!("{ex}.tags.timestamp"), json!(now));

        Ok(doc)
    }

    fn sample_process(&mut self) -> ProcessSample {
        let Some(pid) = self.pid else {
            return ProcessSample::default();
        };
        self.sys
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        match self.sys.process(pid) {
            Some(process) => ProcessSample {
                virtual_bytes: process.virtual_memory(),
                resident_bytes: process.memory(),
                cpu_seconds: process.accumulated_cpu_time() as f64 / 1000.0,
            },
            None => ProcessSample::default(),
        }
    }
}

fn epoch_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
