//! Configuration and key layout for a status layer.

use serde::{Deserialize, Serialize};

/// Tuning for one layer's status publication.
///
/// The defaults pace a fleet the way production deployments expect:
/// a ~40s publish delay that the poll-rate controller re-derives from
/// observed fleet size, a 120s expiry horizon, and a version clock that
/// advances a million versions per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Layer name; the namespace all of this fleet's entries live under.
    pub layer: String,
    /// Key prefix for the per-layer discovery pointer.
    pub meta_prefix: String,
    /// Key prefix for per-layer status roots.
    pub status_prefix: String,
    /// Worker slots this instance advertises.
    pub workers: u32,
    /// Initial per-instance publish delay in seconds; the poll-rate
    /// controller replaces it once fleet size is observable.
    pub status_delay_secs: f64,
    /// Jitter fraction applied to every publish sleep.
    pub status_jitter: f64,
    /// How long a contribution stays alive, in seconds.
    pub expiry_horizon_secs: u64,
    /// Version-clock rate used to convert between versions and seconds.
    pub versions_per_second: u64,
    /// Target aggregate publish rate for the whole fleet, per second.
    pub aggregate_target_rate: f64,
    /// How often the poll-rate controller re-reads fleet size, seconds.
    pub rate_update_interval_secs: f64,
    /// Sleep after a non-retryable publish failure, seconds.
    pub failure_cooldown_secs: f64,
    /// Hard cap on entries examined by an escalated collection scan.
    pub collection_scan_cap: usize,
}

impl StatusConfig {
    /// Defaults for the named layer.
    pub fn new(layer: &str) -> Self {
        Self {
            layer: layer.to_string(),
            meta_prefix: "layer-meta".to_string(),
            status_prefix: "layer-status".to_string(),
            workers: 10,
            status_delay_secs: 40.0,
            status_jitter: 0.05,
            expiry_horizon_secs: 120,
            versions_per_second: 1_000_000,
            aggregate_target_rate: 2.0,
            rate_update_interval_secs: 60.0,
            failure_cooldown_secs: 10.0,
            collection_scan_cap: 10_000,
        }
    }

    /// The expiry horizon expressed in version-clock units.
    pub fn expiry_horizon_versions(&self) -> u64 {
        self.expiry_horizon_secs * self.versions_per_second
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self::new("backup")
    }
}

/// Derived key layout for one instance within a layer.
///
/// ```text
/// meta_key     = <meta_prefix>/json/<layer>          → root_key
/// root_key     = <status_prefix>/<layer>/json        (range of entries)
/// instance_key = <root_key>/agent-<instance_id>      (this instance's entry)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerKeys {
    pub meta_key: String,
    pub root_key: String,
    pub instance_key: String,
}

impl LayerKeys {
    /// Derive the layer's keys for one instance.
    pub fn derive(config: &StatusConfig, instance_id: &str) -> Self {
        let root_key = format!("{}/{}/json", config.status_prefix, config.layer);
        Self {
            meta_key: format!("{}/json/{}", config.meta_prefix, config.layer),
            instance_key: format!("{root_key}/agent-{instance_id}"),
            root_key,
        }
    }
}
