//! # flagsync
//!
//! A feature-state repository replicated through a partitioned,
//! append-only log.
//!
//! Every [`FeatureStateRepository`] publishes state changes to an outbound
//! topic and tails an inbound topic in a background task, applying each
//! record to a local in-memory cache. Reads are always served from that
//! cache and never touch the transport.
//!
//! ## Architecture
//!
//! ```text
//! set_feature_state ──► StateCodec::encode ──► LogTransport::publish (outbound)
//!
//! ConsumptionLoop:  LogSubscription::poll (inbound)
//!                     ──► StateCodec::decode ──► StateCache::apply
//!                     ──► ConsumedOffsets ──► watch ──► barrier / lag
//!
//! get_feature_state ──► StateCache::get
//! ```
//!
//! Construction blocks on an [`InitializationBarrier`] until every record
//! that existed in the inbound topic at construction time has been applied,
//! so a fresh instance never serves an empty view of an existing log.
//!
//! ## Transports
//!
//! - [`transport::memory::MemoryLog`]: in-process log, always available
//! - `transport::kafka::KafkaTransport`: Apache Kafka via `rdkafka`
//!   (enable the `kafka` feature)
//!
//! [`InitializationBarrier`]: barrier::InitializationBarrier

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(
    test,
    allow(
        clippy::field_reassign_with_default,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss,
        unused_mut
    )
)]

/// Error types.
pub mod error;

/// Repository configuration.
pub mod config;

/// Feature identity and state values.
pub mod state;

/// Encoding of feature states to log payloads.
pub mod codec;

/// Log transport traits and implementations.
pub mod transport;

/// Key-based partition selection.
pub mod partitioner;

/// Local state cache.
pub mod cache;

/// Per-partition offset bookkeeping.
pub mod offsets;

/// Background consumption loop.
pub mod consumer;

/// Startup catch-up barrier.
pub mod barrier;

/// Consumer lag accounting.
pub mod lag;

/// Backoff policy for transient poll failures.
pub mod retry;

/// Health status reporting.
pub mod health;

/// Repository metrics.
pub mod metrics;

/// The repository facade.
pub mod repository;

pub use codec::{JsonCodec, StateCodec};
pub use config::{ConfigMap, RepositoryConfig};
pub use consumer::LoopState;
pub use error::{CodecError, RepositoryError, TransportError};
pub use health::HealthStatus;
pub use metrics::MetricsSnapshot;
pub use offsets::{ConsumedOffsets, EndOffsets, Watermarks};
pub use repository::{FeatureStateRepository, RepositoryBuilder};
pub use state::{FeatureKey, FeatureState};
pub use transport::memory::MemoryLog;
pub use transport::{LogRecord, LogSubscription, LogTransport, RecordPosition};
