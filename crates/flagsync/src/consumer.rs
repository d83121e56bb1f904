//! Background consumption loop.
//!
//! One [`ConsumptionLoop`] runs per repository as a tokio task. It owns the
//! inbound [`LogSubscription`] and is the only writer of the state cache and
//! of the consumed offsets. Every poll cycle ends with a fresh
//! [`ConsumedOffsets`] snapshot on a `watch` channel, which the
//! initialization barrier and lag accounting read.
//!
//! The loop only stops when told to through its [`LoopHandle`] (or when the
//! handle is dropped). Poll failures are retried forever with backoff.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{ApplyOutcome, StateCache};
use crate::codec::StateCodec;
use crate::config::RepositoryConfig;
use crate::error::TransportError;
use crate::metrics::RepositoryMetrics;
use crate::offsets::ConsumedOffsets;
use crate::retry::BackoffPolicy;
use crate::transport::{LogRecord, LogSubscription, LogTransport};

/// Lifecycle state of a consumption loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    /// Not started.
    #[default]
    Stopped,
    /// Subscribing to the inbound topic.
    Starting,
    /// Polling and applying records.
    Running,
    /// Stop requested; finishing the current cycle.
    Closing,
    /// Subscription released; the task has exited.
    Closed,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Stopped => write!(f, "Stopped"),
            LoopState::Starting => write!(f, "Starting"),
            LoopState::Running => write!(f, "Running"),
            LoopState::Closing => write!(f, "Closing"),
            LoopState::Closed => write!(f, "Closed"),
        }
    }
}

/// The task body: polls the inbound topic and applies records to the cache.
pub struct ConsumptionLoop {
    topic: String,
    subscription: Box<dyn LogSubscription>,
    codec: Arc<dyn StateCodec>,
    cache: Arc<StateCache>,
    metrics: Arc<RepositoryMetrics>,
    state: Arc<RwLock<LoopState>>,
    consumed: ConsumedOffsets,
    progress: watch::Sender<ConsumedOffsets>,
    polling_timeout: Duration,
    backoff: BackoffPolicy,
}

impl ConsumptionLoop {
    /// Subscribes to the inbound topic and spawns the loop.
    ///
    /// Must be called from within a tokio runtime. The returned handle already
    /// reports [`LoopState::Running`].
    ///
    /// # Errors
    ///
    /// Returns the transport error if the subscription cannot be created;
    /// nothing is spawned in that case.
    pub async fn start(
        transport: &dyn LogTransport,
        config: &RepositoryConfig,
        codec: Arc<dyn StateCodec>,
        cache: Arc<StateCache>,
        metrics: Arc<RepositoryMetrics>,
    ) -> Result<LoopHandle, TransportError> {
        let state = Arc::new(RwLock::new(LoopState::Starting));
        let topic = config.inbound_topic.clone();
        debug!(topic = %topic, "starting consumption loop");

        let subscription = match transport.subscribe(&topic).await {
            Ok(subscription) => subscription,
            Err(e) => {
                *state.write() = LoopState::Closed;
                return Err(e);
            }
        };
        *state.write() = LoopState::Running;

        let (progress, progress_rx) = watch::channel(ConsumedOffsets::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let body = Self {
            topic,
            subscription,
            codec,
            cache,
            metrics,
            state: Arc::clone(&state),
            consumed: ConsumedOffsets::new(),
            progress,
            polling_timeout: config.polling_timeout,
            backoff: BackoffPolicy::exponential(
                config.retry_initial_backoff,
                config.retry_max_backoff,
            ),
        };
        let task = tokio::spawn(body.run(shutdown_rx));

        Ok(LoopHandle {
            state,
            progress: progress_rx,
            shutdown: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
        })
    }

    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        info!(topic = %self.topic, "consumption loop running");

        let mut failures = 0usize;
        loop {
            let polled = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                result = self.subscription.poll(self.polling_timeout) => result,
            };

            match polled {
                Ok(records) => {
                    if failures > 0 {
                        info!(topic = %self.topic, failures, "poll recovered");
                        failures = 0;
                    }
                    self.apply_batch(records);
                }
                Err(e) => {
                    failures += 1;
                    self.metrics.record_poll_error();
                    let delay = self.backoff.delay_for_attempt(failures);
                    warn!(
                        topic = %self.topic,
                        error = %e,
                        attempt = failures,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "poll failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = &mut shutdown => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        *self.state.write() = LoopState::Closing;
        debug!(topic = %self.topic, "consumption loop closing");
        self.subscription.close().await;
        *self.state.write() = LoopState::Closed;
        info!(
            topic = %self.topic,
            partitions = self.consumed.partition_count(),
            "consumption loop closed"
        );
    }

    /// Applies one polled batch in order and publishes the new offsets.
    #[allow(clippy::cast_possible_truncation)]
    fn apply_batch(&mut self, records: Vec<LogRecord>) {
        let bytes: usize = records.iter().map(LogRecord::payload_len).sum();
        self.metrics.record_poll(records.len() as u64, bytes as u64);

        let mut applied = 0usize;
        let received = records.len();
        for record in records {
            if self.consumed.covers(record.partition, record.offset) {
                self.metrics.record_stale();
                continue;
            }
            if self.apply_record(&record) {
                applied += 1;
            }
            self.consumed.advance(record.partition, record.offset);
        }

        // Gaps (compaction, transaction markers, retention) never produce
        // records, so the subscription's own positions are authoritative.
        for (partition, next) in self.subscription.positions() {
            self.consumed.advance(partition, next - 1);
        }

        if received > 0 {
            debug!(topic = %self.topic, received, applied, "applied batch");
        }

        let consumed = &self.consumed;
        self.progress.send_if_modified(|current| {
            if current == consumed {
                return false;
            }
            current.clone_from(consumed);
            true
        });
    }

    fn apply_record(&self, record: &LogRecord) -> bool {
        let Some(payload) = record.payload.as_deref() else {
            debug!(
                partition = record.partition,
                offset = record.offset,
                "skipping tombstone"
            );
            return false;
        };

        match self.codec.decode(payload) {
            Ok(state) => match self.cache.apply(state, record.partition, record.offset) {
                ApplyOutcome::Stale => {
                    self.metrics.record_stale();
                    false
                }
                ApplyOutcome::Inserted | ApplyOutcome::Replaced => {
                    self.metrics.record_applied();
                    true
                }
            },
            Err(e) => {
                self.metrics.record_decode_error();
                warn!(
                    topic = %self.topic,
                    partition = record.partition,
                    offset = record.offset,
                    codec = self.codec.name(),
                    error = %e,
                    "dropping undecodable record"
                );
                false
            }
        }
    }
}

/// Control handle of a spawned [`ConsumptionLoop`].
///
/// Dropping the handle stops the loop.
#[derive(Debug)]
pub struct LoopHandle {
    state: Arc<RwLock<LoopState>>,
    progress: watch::Receiver<ConsumedOffsets>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LoopHandle {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        *self.state.read()
    }

    /// Returns `true` from `Running` until the loop reaches `Closed`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state(), LoopState::Running | LoopState::Closing)
    }

    /// Latest published consumed offsets.
    #[must_use]
    pub fn consumed(&self) -> ConsumedOffsets {
        self.progress.borrow().clone()
    }

    /// A receiver of consumed offset snapshots.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<ConsumedOffsets> {
        self.progress.clone()
    }

    /// Stops the loop and waits until it has released its subscription.
    ///
    /// Idempotent and safe to call concurrently: every caller returns once
    /// the loop has exited.
    pub async fn close(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            // Err means the loop already exited.
            let _ = tx.send(());
        }

        let task = self.task.lock().take();
        match task {
            Some(task) => {
                if let Err(e) = task.await {
                    error!(error = %e, "consumption loop task failed");
                    *self.state.write() = LoopState::Closed;
                }
            }
            None => {
                // Another caller owns the join handle; the sender side of
                // the progress channel drops when the task exits.
                let mut progress = self.progress.clone();
                while progress.changed().await.is_ok() {}
            }
        }
    }
}
