//! In-process partitioned log.
//!
//! [`MemoryLog`] behaves like a small Kafka cluster living inside the
//! process: topics are created with a fixed partition count, keyed records
//! are routed with the same murmur2 hash Kafka producers use, offsets are
//! assigned per partition and never reused, and retention can be simulated
//! by moving a partition's low watermark forward.
//!
//! Clones share the same log, so several repositories built on clones of
//! one `MemoryLog` replicate to each other exactly as separate processes
//! sharing a broker would.
//!
//! Faults can be injected to exercise the failure paths of callers: the
//! next N publishes or polls can be made to fail, every poll can be
//! delayed, and the whole log can be switched unavailable.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::error::TransportError;
use crate::offsets::{EndOffsets, Watermarks};
use crate::partitioner::partition_for_key;

use super::{LogRecord, LogSubscription, LogTransport, RecordPosition};

/// Default upper bound on records returned by one poll.
pub const DEFAULT_MAX_BATCH: usize = 500;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Vec<u8>>,
    payload: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct PartitionLog {
    log_start: i64,
    records: VecDeque<StoredRecord>,
}

impl PartitionLog {
    #[allow(clippy::cast_possible_wrap)]
    fn high(&self) -> i64 {
        self.log_start + self.records.len() as i64
    }

    fn append(&mut self, record: StoredRecord) -> i64 {
        let offset = self.high();
        self.records.push_back(record);
        offset
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn read_from(&self, position: i64, limit: usize) -> impl Iterator<Item = (i64, &StoredRecord)> {
        let start = position.max(self.log_start);
        let skip = (start - self.log_start) as usize;
        self.records
            .iter()
            .skip(skip)
            .take(limit)
            .zip(start..)
            .map(|(record, offset)| (offset, record))
    }
}

#[derive(Debug, Default)]
struct Faults {
    publish_failures: AtomicUsize,
    poll_failures: AtomicUsize,
    poll_delay: Mutex<Duration>,
    unavailable: AtomicBool,
}

impl Faults {
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_available(&self) -> Result<(), TransportError> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionFailed("log unavailable".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Inner {
    topics: RwLock<HashMap<String, Vec<PartitionLog>>>,
    appended: Notify,
    faults: Faults,
    max_batch: AtomicUsize,
}

/// Shared in-process partitioned log.
#[derive(Debug, Clone)]
pub struct MemoryLog {
    inner: Arc<Inner>,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLog {
    /// Creates a log with no topics.
    #[must_use]
    pub fn new() -> Self {
        let inner = Inner {
            max_batch: AtomicUsize::new(DEFAULT_MAX_BATCH),
            ..Inner::default()
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Creates a log holding a single topic.
    #[must_use]
    pub fn with_topic(topic: &str, partitions: usize) -> Self {
        let log = Self::new();
        log.create_topic(topic, partitions);
        log
    }

    /// Creates `topic` with `partitions` partitions (at least one).
    ///
    /// Returns `false` if the topic already exists.
    pub fn create_topic(&self, topic: &str, partitions: usize) -> bool {
        let mut topics = self.inner.topics.write();
        if topics.contains_key(topic) {
            return false;
        }
        let partitions = (0..partitions.max(1))
            .map(|_| PartitionLog::default())
            .collect();
        topics.insert(topic.to_string(), partitions);
        true
    }

    /// Number of partitions of `topic`, if it exists.
    #[must_use]
    pub fn partition_count(&self, topic: &str) -> Option<usize> {
        self.inner.topics.read().get(topic).map(Vec::len)
    }

    /// Sets the maximum number of records a single poll returns.
    pub fn set_max_batch(&self, max_batch: usize) {
        self.inner.max_batch.store(max_batch.max(1), Ordering::Release);
    }

    /// Appends a record to an explicit partition, bypassing key routing and
    /// fault injection. A `None` payload writes a tombstone.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::UnknownTopic` if the topic or partition
    /// does not exist.
    pub fn append_raw(
        &self,
        topic: &str,
        partition: i32,
        key: Option<&[u8]>,
        payload: Option<&[u8]>,
    ) -> Result<RecordPosition, TransportError> {
        let offset = {
            let mut topics = self.inner.topics.write();
            let log = partition_mut(&mut topics, topic, partition)?;
            log.append(StoredRecord {
                key: key.map(<[u8]>::to_vec),
                payload: payload.map(<[u8]>::to_vec),
            })
        };
        self.inner.appended.notify_waiters();
        Ok(RecordPosition { partition, offset })
    }

    /// Discards every record of `partition` below `offset`, raising the low
    /// watermark the way log retention does.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::UnknownTopic` if the topic or partition
    /// does not exist.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn truncate_before(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), TransportError> {
        let mut topics = self.inner.topics.write();
        let log = partition_mut(&mut topics, topic, partition)?;
        let new_start = offset.clamp(log.log_start, log.high());
        let drop_count = (new_start - log.log_start) as usize;
        log.records.drain(..drop_count);
        log.log_start = new_start;
        debug!(topic, partition, low = new_start, "truncated partition");
        Ok(())
    }

    /// Makes the next `count` publishes fail with
    /// `TransportError::PublishFailed`.
    pub fn fail_next_publishes(&self, count: usize) {
        self.inner
            .faults
            .publish_failures
            .store(count, Ordering::Release);
    }

    /// Makes the next `count` polls fail with `TransportError::PollFailed`.
    pub fn fail_next_polls(&self, count: usize) {
        self.inner.faults.poll_failures.store(count, Ordering::Release);
    }

    /// Delays every poll by `delay` before it looks at the log.
    pub fn set_poll_delay(&self, delay: Duration) {
        *self.inner.faults.poll_delay.lock() = delay;
    }

    /// Makes every operation fail with `TransportError::ConnectionFailed`
    /// while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner
            .faults
            .unavailable
            .store(unavailable, Ordering::Release);
    }

    fn snapshot_watermarks(&self, topic: &str) -> Result<EndOffsets, TransportError> {
        let topics = self.inner.topics.read();
        let partitions = topics
            .get(topic)
            .ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))?;
        Ok(partitions
            .iter()
            .zip(0..)
            .map(|(log, partition)| (partition, Watermarks::new(log.log_start, log.high())))
            .collect())
    }
}

fn partition_mut<'a>(
    topics: &'a mut HashMap<String, Vec<PartitionLog>>,
    topic: &str,
    partition: i32,
) -> Result<&'a mut PartitionLog, TransportError> {
    topics
        .get_mut(topic)
        .and_then(|partitions| usize::try_from(partition).ok().and_then(|p| partitions.get_mut(p)))
        .ok_or_else(|| TransportError::UnknownTopic(format!("{topic}-{partition}")))
}

#[async_trait]
impl LogTransport for MemoryLog {
    async fn publish(
        &self,
        topic: &str,
        key: &[u8],
        payload: &[u8],
    ) -> Result<RecordPosition, TransportError> {
        self.inner.faults.check_available()?;
        if Faults::take(&self.inner.faults.publish_failures) {
            return Err(TransportError::PublishFailed("injected publish failure".into()));
        }

        let position = {
            let mut topics = self.inner.topics.write();
            let partitions = topics
                .get_mut(topic)
                .ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))?;
            let count = i32::try_from(partitions.len()).unwrap_or(i32::MAX);
            let partition = partition_for_key(key, count)
                .ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))?;
            let log = partition_mut(&mut topics, topic, partition)?;
            let offset = log.append(StoredRecord {
                key: Some(key.to_vec()),
                payload: Some(payload.to_vec()),
            });
            RecordPosition { partition, offset }
        };

        self.inner.appended.notify_waiters();
        Ok(position)
    }

    async fn end_offsets(&self, topic: &str) -> Result<EndOffsets, TransportError> {
        self.inner.faults.check_available()?;
        self.snapshot_watermarks(topic)
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn LogSubscription>, TransportError> {
        self.inner.faults.check_available()?;
        let positions = self
            .snapshot_watermarks(topic)?
            .iter()
            .map(|(partition, watermarks)| (partition, watermarks.low))
            .collect();
        Ok(Box::new(MemorySubscription {
            log: self.clone(),
            topic: topic.to_string(),
            positions,
            next_partition: 0,
            closed: false,
        }))
    }
}

/// Subscription over every partition of a [`MemoryLog`] topic.
#[derive(Debug)]
pub struct MemorySubscription {
    log: MemoryLog,
    topic: String,
    positions: BTreeMap<i32, i64>,
    next_partition: usize,
    closed: bool,
}

impl MemorySubscription {
    /// Reads up to the batch limit, starting at a rotating partition so a
    /// busy partition cannot starve the others.
    fn fetch(&mut self) -> Result<Vec<LogRecord>, TransportError> {
        let limit = self.log.inner.max_batch.load(Ordering::Acquire);
        let topics = self.log.inner.topics.read();
        let partitions = topics
            .get(&self.topic)
            .ok_or_else(|| TransportError::UnknownTopic(self.topic.clone()))?;

        let count = partitions.len();
        let mut batch = Vec::new();
        for step in 0..count {
            let index = (self.next_partition + step) % count;
            let Ok(partition) = i32::try_from(index) else {
                continue;
            };
            let position = self.positions.entry(partition).or_insert(0);
            let remaining = limit.saturating_sub(batch.len());
            if remaining == 0 {
                break;
            }
            for (offset, record) in partitions[index].read_from(*position, remaining) {
                batch.push(LogRecord {
                    partition,
                    offset,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                });
                *position = offset + 1;
            }
            // Skip past records lost to retention even when nothing was read.
            *position = (*position).max(partitions[index].log_start);
        }
        self.next_partition = (self.next_partition + 1) % count.max(1);
        Ok(batch)
    }
}

#[async_trait]
impl LogSubscription for MemorySubscription {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<LogRecord>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let delay = *self.log.inner.faults.poll_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.log.inner.faults.check_available()?;
        if Faults::take(&self.log.inner.faults.poll_failures) {
            return Err(TransportError::PollFailed("injected poll failure".into()));
        }

        let inner = Arc::clone(&self.log.inner);
        let deadline = Instant::now() + timeout;
        loop {
            let notified = inner.appended.notified();
            tokio::pin!(notified);
            // Register before reading so an append in between still wakes us.
            notified.as_mut().enable();

            let batch = self.fetch()?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    fn positions(&self) -> BTreeMap<i32, i64> {
        self.positions.clone()
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
