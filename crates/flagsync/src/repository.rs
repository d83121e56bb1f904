//! The repository facade.
//!
//! [`FeatureStateRepository`] ties the pieces together: writes are encoded
//! and published to the outbound topic, the consumption loop keeps the
//! local cache in sync with the inbound topic, and construction waits on the
//! initialization barrier so a new instance starts with the full history.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use flagsync::transport::memory::MemoryLog;
//! use flagsync::{FeatureState, FeatureStateRepository};
//!
//! # async fn example() -> Result<(), flagsync::RepositoryError> {
//! let log = MemoryLog::with_topic("feature-states", 4);
//! let repository = FeatureStateRepository::builder()
//!     .topic("feature-states")
//!     .polling_timeout(Duration::from_millis(100))
//!     .transport(log)
//!     .build()
//!     .await?;
//!
//! repository
//!     .set_feature_state(&FeatureState::new("NEW_CHECKOUT").with_enabled(true))
//!     .await?;
//! let state = repository.get_feature_state("NEW_CHECKOUT");
//! repository.close().await;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::barrier::InitializationBarrier;
use crate::cache::StateCache;
use crate::codec::{JsonCodec, StateCodec};
use crate::config::RepositoryConfig;
use crate::consumer::{ConsumptionLoop, LoopHandle, LoopState};
use crate::error::RepositoryError;
use crate::health::HealthStatus;
use crate::lag;
use crate::metrics::{MetricsSnapshot, RepositoryMetrics};
use crate::offsets::ConsumedOffsets;
use crate::state::FeatureState;
use crate::transport::{LogTransport, RecordPosition};

/// A locally cached, log-replicated view of feature states.
pub struct FeatureStateRepository {
    config: RepositoryConfig,
    transport: Arc<dyn LogTransport>,
    codec: Arc<dyn StateCodec>,
    cache: Arc<StateCache>,
    metrics: Arc<RepositoryMetrics>,
    consumer: LoopHandle,
    closed: AtomicBool,
}

impl fmt::Debug for FeatureStateRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureStateRepository")
            .field("inbound_topic", &self.config.inbound_topic)
            .field("outbound_topic", &self.config.outbound_topic)
            .field("codec", &self.codec.name())
            .field("state", &self.consumer.state())
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl FeatureStateRepository {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> RepositoryBuilder {
        RepositoryBuilder::new()
    }

    /// Opens a repository with the JSON codec.
    ///
    /// Returns once every record present in the inbound topic at call time
    /// has been applied to the local cache.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::ConfigurationError` for an invalid config,
    /// `RepositoryError::Transport` if the log cannot be reached, or
    /// `RepositoryError::InitializationTimeout` if catching up takes longer
    /// than `initialization_timeout`.
    pub async fn open(
        config: RepositoryConfig,
        transport: Arc<dyn LogTransport>,
    ) -> Result<Self, RepositoryError> {
        Self::open_with_codec(config, transport, Arc::new(JsonCodec::new())).await
    }

    /// Opens a repository with a custom codec.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub async fn open_with_codec(
        config: RepositoryConfig,
        transport: Arc<dyn LogTransport>,
        codec: Arc<dyn StateCodec>,
    ) -> Result<Self, RepositoryError> {
        config.validate()?;
        info!(
            inbound = %config.inbound_topic,
            outbound = %config.outbound_topic,
            codec = codec.name(),
            "opening feature state repository"
        );

        // Targets are captured before the loop reads anything.
        let targets = transport.end_offsets(&config.inbound_topic).await?;
        let barrier = InitializationBarrier::new(targets);
        debug!(
            partitions = barrier.targets().partition_count(),
            "captured initialization targets"
        );

        let cache = Arc::new(StateCache::new());
        let metrics = Arc::new(RepositoryMetrics::new());
        let consumer = ConsumptionLoop::start(
            transport.as_ref(),
            &config,
            Arc::clone(&codec),
            Arc::clone(&cache),
            Arc::clone(&metrics),
        )
        .await?;

        let mut progress = consumer.progress();
        if let Err(e) = barrier
            .wait(&mut progress, config.initialization_timeout)
            .await
        {
            warn!(error = %e, "initialization failed, stopping consumption loop");
            consumer.close().await;
            return Err(e);
        }

        info!(
            features = cache.len(),
            "feature state repository initialized"
        );

        Ok(Self {
            config,
            transport,
            codec,
            cache,
            metrics,
            consumer,
            closed: AtomicBool::new(false),
        })
    }

    /// Publishes `state` to the outbound topic, keyed by its feature key.
    ///
    /// Returns once the log has acknowledged the record. The new state shows
    /// up in [`get_feature_state`](Self::get_feature_state) only after the
    /// consumption loop reads it back.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Closed` after [`close`](Self::close),
    /// `RepositoryError::Codec` if the state cannot be encoded, or
    /// `RepositoryError::Transport` if the log rejects the record. Failed
    /// publishes are not retried.
    pub async fn set_feature_state(
        &self,
        state: &FeatureState,
    ) -> Result<RecordPosition, RepositoryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RepositoryError::Closed);
        }

        let payload = self.codec.encode(state)?;
        match self
            .transport
            .publish(
                &self.config.outbound_topic,
                state.key().partition_key(),
                &payload,
            )
            .await
        {
            Ok(position) => {
                self.metrics.record_published();
                debug!(
                    feature = %state.key(),
                    partition = position.partition,
                    offset = position.offset,
                    "published feature state"
                );
                Ok(position)
            }
            Err(e) => {
                self.metrics.record_publish_error();
                warn!(feature = %state.key(), error = %e, "publish failed");
                Err(e.into())
            }
        }
    }

    /// Looks up the latest applied state of a feature.
    ///
    /// `None` means no record for the feature has been applied, which is
    /// distinct from a feature that was explicitly disabled.
    #[must_use]
    pub fn get_feature_state(&self, key: impl AsRef<str>) -> Option<FeatureState> {
        self.cache.get(key.as_ref())
    }

    /// Returns the log position the cached state of a feature was read from.
    #[must_use]
    pub fn feature_origin(&self, key: impl AsRef<str>) -> Option<RecordPosition> {
        self.cache
            .origin(key.as_ref())
            .map(|(partition, offset)| RecordPosition { partition, offset })
    }

    /// Returns `true` while the consumption loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.consumer.is_running()
    }

    /// Number of inbound records not yet applied, against fresh end offsets.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Transport` if end offsets cannot be fetched.
    pub async fn consumer_lag(&self) -> Result<u64, RepositoryError> {
        let end = self
            .transport
            .end_offsets(&self.config.inbound_topic)
            .await?;
        Ok(lag::consumer_lag(&end, &self.consumer.consumed()))
    }

    /// Derives a health status from the loop state and the current lag.
    pub async fn health(&self) -> HealthStatus {
        let state = self.consumer.state();
        let lag = if state == LoopState::Running {
            self.consumer_lag().await.map_err(|e| e.to_string())
        } else {
            Ok(0)
        };
        HealthStatus::evaluate(state, lag, self.config.health_max_lag)
    }

    /// Point-in-time copy of the repository counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Last applied offset per inbound partition.
    #[must_use]
    pub fn consumed_offsets(&self) -> ConsumedOffsets {
        self.consumer.consumed()
    }

    /// Every cached state, ordered by feature key.
    #[must_use]
    pub fn cached_states(&self) -> Vec<FeatureState> {
        self.cache.snapshot()
    }

    /// Lifecycle state of the consumption loop.
    #[must_use]
    pub fn loop_state(&self) -> LoopState {
        self.consumer.state()
    }

    /// The configuration the repository was opened with.
    #[must_use]
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Stops the consumption loop and releases the subscription.
    ///
    /// Idempotent; concurrent callers all return once the loop has exited.
    /// The cache stays readable with its last contents.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(inbound = %self.config.inbound_topic, "closing feature state repository");
        }
        self.consumer.close().await;
    }
}

/// Builder for [`FeatureStateRepository`].
pub struct RepositoryBuilder {
    config: RepositoryConfig,
    transport: Option<Arc<dyn LogTransport>>,
    codec: Arc<dyn StateCodec>,
}

impl Default for RepositoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RepositoryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryBuilder")
            .field("config", &self.config)
            .field("transport", &self.transport.is_some())
            .field("codec", &self.codec.name())
            .finish()
    }
}

impl RepositoryBuilder {
    /// Creates a builder with default configuration and the JSON codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RepositoryConfig::default(),
            transport: None,
            codec: Arc::new(JsonCodec::new()),
        }
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the broker list for the Kafka transport.
    #[must_use]
    pub fn bootstrap_servers(mut self, servers: impl Into<String>) -> Self {
        self.config.bootstrap_servers = servers.into();
        self
    }

    /// Reads and writes the same topic.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        self.config.inbound_topic.clone_from(&topic);
        self.config.outbound_topic = topic;
        self
    }

    /// Sets the topic the consumption loop reads.
    #[must_use]
    pub fn inbound_topic(mut self, topic: impl Into<String>) -> Self {
        self.config.inbound_topic = topic.into();
        self
    }

    /// Sets the topic writes are published to.
    #[must_use]
    pub fn outbound_topic(mut self, topic: impl Into<String>) -> Self {
        self.config.outbound_topic = topic.into();
        self
    }

    /// Sets how long one poll waits for records.
    #[must_use]
    pub fn polling_timeout(mut self, timeout: Duration) -> Self {
        self.config.polling_timeout = timeout;
        self
    }

    /// Sets how long construction waits to catch up with the log.
    #[must_use]
    pub fn initialization_timeout(mut self, timeout: Duration) -> Self {
        self.config.initialization_timeout = timeout;
        self
    }

    /// Adds a librdkafka client property.
    #[must_use]
    pub fn kafka_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .kafka_properties
            .insert(key.into(), value.into());
        self
    }

    /// Uses `transport` instead of a Kafka client.
    #[must_use]
    pub fn transport(mut self, transport: impl LogTransport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Uses an already shared transport.
    #[must_use]
    pub fn shared_transport(mut self, transport: Arc<dyn LogTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the JSON codec.
    #[must_use]
    pub fn codec(mut self, codec: impl StateCodec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Opens the repository.
    ///
    /// Without an explicit transport a Kafka transport is created from the
    /// configuration when the `kafka` feature is enabled.
    ///
    /// # Errors
    ///
    /// See [`FeatureStateRepository::open`]. Also returns
    /// `RepositoryError::ConfigurationError` if no transport is available.
    pub async fn build(self) -> Result<FeatureStateRepository, RepositoryError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport(&self.config)?,
        };
        FeatureStateRepository::open_with_codec(self.config, transport, self.codec).await
    }
}

#[cfg(feature = "kafka")]
fn default_transport(config: &RepositoryConfig) -> Result<Arc<dyn LogTransport>, RepositoryError> {
    config.validate()?;
    Ok(Arc::new(crate::transport::kafka::KafkaTransport::new(
        config,
    )?))
}

#[cfg(not(feature = "kafka"))]
fn default_transport(_config: &RepositoryConfig) -> Result<Arc<dyn LogTransport>, RepositoryError> {
    Err(RepositoryError::ConfigurationError(
        "no transport configured and the `kafka` feature is disabled".into(),
    ))
}
