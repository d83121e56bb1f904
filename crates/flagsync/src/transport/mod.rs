//! Log transport abstraction.
//!
//! A [`LogTransport`] is a partitioned, append-only log addressed by topic
//! name. The repository needs exactly three things from it: keyed publish
//! with acknowledgement, a snapshot of per-partition watermarks, and a
//! subscription reading every partition of a topic from the beginning.
//!
//! - [`memory::MemoryLog`]: in-process log with fault injection
//! - `kafka::KafkaTransport`: Apache Kafka (feature `kafka`)

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::offsets::EndOffsets;

pub mod memory;

#[cfg(feature = "kafka")]
pub mod kafka;

/// A record read from a log partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Partition the record was read from.
    pub partition: i32,
    /// Offset of the record within its partition.
    pub offset: i64,
    /// Record key, if any.
    pub key: Option<Vec<u8>>,
    /// Record payload. `None` marks a tombstone.
    pub payload: Option<Vec<u8>>,
}

impl LogRecord {
    /// Size of the payload in bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Vec::len)
    }
}

/// Position assigned to an acknowledged publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPosition {
    /// Partition the record was written to.
    pub partition: i32,
    /// Offset assigned to the record.
    pub offset: i64,
}

/// A partitioned append-only log.
#[async_trait]
pub trait LogTransport: Send + Sync {
    /// Appends `payload` under `key` and waits for the log to acknowledge it.
    ///
    /// Records sharing a key land on the same partition.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the record was not acknowledged.
    async fn publish(
        &self,
        topic: &str,
        key: &[u8],
        payload: &[u8],
    ) -> Result<RecordPosition, TransportError>;

    /// Fetches the current low and high watermarks of every partition.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the topic is unknown or unreachable.
    async fn end_offsets(&self, topic: &str) -> Result<EndOffsets, TransportError>;

    /// Opens a subscription over every partition of `topic`, positioned at
    /// the earliest retained record.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the subscription cannot be created.
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn LogSubscription>, TransportError>;
}

/// A cursor over all partitions of a topic.
#[async_trait]
pub trait LogSubscription: Send {
    /// Waits up to `timeout` for records and returns what arrived.
    ///
    /// An empty batch means the timeout elapsed without new records.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` on a failed fetch. The subscription stays
    /// usable and the next poll resumes from the same positions.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<LogRecord>, TransportError>;

    /// Next offset to be read per partition.
    fn positions(&self) -> BTreeMap<i32, i64>;

    /// Releases the subscription. Further polls fail with
    /// `TransportError::Closed`.
    async fn close(&mut self);
}
