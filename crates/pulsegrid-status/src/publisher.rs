//! StatusPublisher — the per-process status publication loop.
//!
//! Registers the layer's discovery pointer once, then cycles forever:
//! build this instance's snapshot, collect dead peers, write, commit,
//! sleep. Publication is strictly best-effort — no failure here ever
//! propagates to the work being reported on.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

use pulsegrid_store::{KvStore, RetryBackoff, Txn};

use crate::backup::BackupAgent;
use crate::collector::DeadEntryCollector;
use crate::config::{LayerKeys, StatusConfig};
use crate::error::{StatusError, StatusResult};
use crate::rate::{PollDelay, PollRateController};
use crate::snapshot::SnapshotBuilder;

enum CycleOutcome {
    Committed,
    Cancelled,
    Failed(StatusError),
}

/// Owns one instance's publish loop and its shared delay cell.
pub struct StatusPublisher {
    store: KvStore,
    config: StatusConfig,
    agent: Arc<dyn BackupAgent>,
    instance_id: String,
    keys: LayerKeys,
    delay: Arc<PollDelay>,
    snapshot: SnapshotBuilder,
    collector: DeadEntryCollector,
    poll_rate_started: bool,
}

impl StatusPublisher {
    /// Publisher with a freshly generated instance id.
    pub fn new(store: KvStore, config: StatusConfig, agent: Arc<dyn BackupAgent>) -> Self {
        let instance_id = Uuid::new_v4().simple().to_string();
        Self::with_instance_id(store, config, agent, &instance_id)
    }

    /// Publisher with a caller-chosen instance id.
    pub fn with_instance_id(
        store: KvStore,
        config: StatusConfig,
        agent: Arc<dyn BackupAgent>,
        instance_id: &str,
    ) -> Self {
        let keys = LayerKeys::derive(&config, instance_id);
        let delay = Arc::new(PollDelay::new(config.status_delay_secs));
        let snapshot = SnapshotBuilder::new(&config, instance_id);
        let collector = DeadEntryCollector::new(&config, instance_id);
        Self {
            store,
            config,
            agent,
            instance_id: instance_id.to_string(),
            keys,
            delay,
            snapshot,
            collector,
            poll_rate_started: false,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn keys(&self) -> &LayerKeys {
        &self.keys
    }

    /// The shared delay cell, for task-polling logic that wants to pace
    /// itself the same way.
    pub fn poll_delay(&self) -> Arc<PollDelay> {
        self.delay.clone()
    }

    /// Run until shutdown.
    ///
    /// A non-retryable failure logs, sleeps the failure cooldown, and
    /// restarts from registration. After the first successful commit
    /// the poll-rate controller is started, exactly once.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            layer = %self.config.layer,
            id = %self.instance_id,
            "status publisher started"
        );

        'outer: loop {
            if !self.register(&mut shutdown).await {
                break;
            }

            loop {
                match self.publish_once(&mut shutdown).await {
                    CycleOutcome::Cancelled => break 'outer,
                    CycleOutcome::Failed(e) => {
                        error!(
                            layer = %self.config.layer,
                            error = %e,
                            "unable to write status; cooling down"
                        );
                        let cooldown = Duration::from_secs_f64(self.config.failure_cooldown_secs);
                        if !self.sleep_or_shutdown(cooldown, &mut shutdown).await {
                            break 'outer;
                        }
                        continue 'outer;
                    }
                    CycleOutcome::Committed => {
                        if !self.poll_rate_started {
                            self.start_poll_rate(&shutdown);
                        }
                        let jitter = self.config.status_jitter;
                        let secs = self.delay.get()
                            * (1.0 - jitter + 2.0 * rand::random::<f64>() * jitter);
                        let pause = Duration::from_secs_f64(secs.max(0.0));
                        if !self.sleep_or_shutdown(pause, &mut shutdown).await {
                            break 'outer;
                        }
                    }
                }
            }
        }

        info!(
            layer = %self.config.layer,
            id = %self.instance_id,
            "status publisher stopped"
        );
        Ok(())
    }

    /// Write the layer's discovery pointer in its own short transaction.
    ///
    /// Repeat writes by other instances are harmless; the pointer's
    /// value is the same for everyone. Returns false on shutdown.
    async fn register(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let mut backoff = RetryBackoff::new();
        loop {
            let tx = self.store.begin();
            tx.set(&self.keys.meta_key, self.keys.root_key.as_bytes());
            match tx.commit().await {
                Ok(_) => {
                    info!(
                        layer = %self.config.layer,
                        meta_key = %self.keys.meta_key,
                        "layer registered"
                    );
                    return true;
                }
                Err(e) if e.is_retryable() => {
                    debug!(error = %e, "registration conflicted; retrying");
                    if !self.sleep_or_shutdown(backoff.next_delay(), shutdown).await {
                        return false;
                    }
                }
                Err(e) => {
                    error!(error = %e, "registration failed; cooling down");
                    let cooldown = Duration::from_secs_f64(self.config.failure_cooldown_secs);
                    if !self.sleep_or_shutdown(cooldown, shutdown).await {
                        return false;
                    }
                }
            }
        }
    }

    /// One publish cycle, retried until it commits or fails fatally.
    async fn publish_once(&mut self, shutdown: &mut watch::Receiver<bool>) -> CycleOutcome {
        let mut backoff = RetryBackoff::new();
        loop {
            if *shutdown.borrow() {
                return CycleOutcome::Cancelled;
            }
            let tx = self.store.begin();
            let result = match self.cycle(&tx).await {
                Ok(deleted) => tx
                    .commit()
                    .await
                    .map(|_| deleted)
                    .map_err(StatusError::from),
                Err(e) => Err(e),
            };
            match result {
                Ok(deleted) => {
                    debug!(
                        layer = %self.config.layer,
                        deleted,
                        "status published"
                    );
                    return CycleOutcome::Committed;
                }
                Err(e) if e.is_retryable() => {
                    debug!(error = %e, "publish cycle conflicted; retrying");
                    if !self.sleep_or_shutdown(backoff.next_delay(), shutdown).await {
                        return CycleOutcome::Cancelled;
                    }
                }
                Err(e) => return CycleOutcome::Failed(e),
            }
        }
    }

    /// Snapshot build, collection pass, and the instance-entry write,
    /// all in the caller's transaction.
    async fn cycle(&mut self, tx: &Txn) -> StatusResult<usize> {
        let doc = self.snapshot.build(tx, self.agent.as_ref()).await?;
        let deleted = self.collector.collect(tx, &self.keys.root_key).await?;
        tx.set(&self.keys.instance_key, &doc.to_bytes()?);
        Ok(deleted)
    }

    fn start_poll_rate(&mut self, shutdown: &watch::Receiver<bool>) {
        let controller = PollRateController::new(
            self.store.clone(),
            &self.config,
            &self.keys,
            self.delay.clone(),
        );
        tokio::spawn(controller.run(shutdown.clone()));
        self.poll_rate_started = true;
    }

    async fn sleep_or_shutdown(
        &self,
        duration: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = shutdown.changed() => false,
        }
    }
}
