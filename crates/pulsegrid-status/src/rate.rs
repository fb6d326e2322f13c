//! PollRateController — adapts per-instance publish pacing to fleet size.
//!
//! Holds the fleet-wide publish rate near `aggregate_target_rate` by
//! growing each instance's delay proportionally to the observed number
//! of live instances. Readings are hints: a missed or failed tick just
//! leaves the previous delay in place.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use pulsegrid_store::KvStore;

use crate::config::{LayerKeys, StatusConfig};
use crate::reader::read_layer_status;

/// Shared publish-delay cell, in seconds.
///
/// Written by the controller, read by the publisher's sleep and by any
/// task-polling logic in the surrounding engine. Readers treat the
/// value as a hint, so plain atomic loads and stores are enough.
#[derive(Debug)]
pub struct PollDelay(AtomicU64);

impl PollDelay {
    pub fn new(secs: f64) -> Self {
        Self(AtomicU64::new(secs.to_bits()))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, secs: f64) {
        self.0.store(secs.to_bits(), Ordering::Relaxed);
    }
}

/// Periodically recomputes the shared delay from the merged layer view.
pub struct PollRateController {
    store: KvStore,
    layer: String,
    root_key: String,
    aggregate_target_rate: f64,
    update_interval: Duration,
    delay: Arc<PollDelay>,
}

impl PollRateController {
    pub fn new(
        store: KvStore,
        config: &StatusConfig,
        keys: &LayerKeys,
        delay: Arc<PollDelay>,
    ) -> Self {
        Self {
            store,
            layer: config.layer.clone(),
            root_key: keys.root_key.clone(),
            aggregate_target_rate: config.aggregate_target_rate,
            update_interval: Duration::from_secs_f64(config.rate_update_interval_secs),
            delay,
        }
    }

    /// Run the update loop until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            layer = %self.layer,
            interval_secs = self.update_interval.as_secs_f64(),
            "poll rate controller started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.update_interval) => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!(layer = %self.layer, "poll rate controller shutting down");
                    break;
                }
            }
        }
    }

    /// One update: read the merged fleet size and recompute the delay.
    ///
    /// A missing or unreadable aggregate leaves the previous delay in
    /// place; pacing simply is not enforced while the view is dark.
    pub async fn tick(&self) {
        match read_layer_status(&self.store, &self.root_key).await {
            Ok(status) => {
                let path = format!("{}.instances_running", self.layer);
                match status.try_get_i64(&path) {
                    Some(count) if count > 0 => {
                        let delay = count as f64 / self.aggregate_target_rate;
                        self.delay.set(delay);
                        debug!(
                            layer = %self.layer,
                            instances = count,
                            delay_secs = delay,
                            "poll delay updated"
                        );
                    }
                    _ => {
                        debug!(layer = %self.layer, "no live instance count; delay unchanged");
                    }
                }
            }
            Err(e) => {
                warn!(layer = %self.layer, error = %e, "poll rate update failed; delay unchanged");
            }
        }
    }
}
