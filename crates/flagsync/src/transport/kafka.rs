//! Apache Kafka transport.
//!
//! Publishes through an idempotent [`FutureProducer`] using the
//! `murmur2_random` partitioner, so a feature key lands on the same
//! partition a JVM client would pick. Every subscription is a
//! [`StreamConsumer`] with all partitions manually assigned from the
//! beginning: there is no consumer-group rebalancing and no offset commit,
//! since each repository must see the whole topic.
//!
//! Metadata and watermark queries are blocking librdkafka calls and run on
//! the blocking pool.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RepositoryConfig;
use crate::error::{RepositoryError, TransportError};
use crate::offsets::{EndOffsets, Watermarks};

use super::{LogRecord, LogSubscription, LogTransport, RecordPosition};

/// Kafka-backed [`LogTransport`].
pub struct KafkaTransport {
    producer: FutureProducer,
    metadata: Arc<BaseConsumer>,
    config: RepositoryConfig,
    group_id: String,
}

impl std::fmt::Debug for KafkaTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaTransport")
            .field("bootstrap_servers", &self.config.bootstrap_servers)
            .field("group_id", &self.group_id)
            .finish_non_exhaustive()
    }
}

impl KafkaTransport {
    /// Connects to the brokers named in `config.bootstrap_servers`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::MissingConfig` without bootstrap servers,
    /// or `RepositoryError::Transport` if a client cannot be created.
    pub fn new(config: &RepositoryConfig) -> Result<Self, RepositoryError> {
        if config.bootstrap_servers.trim().is_empty() {
            return Err(RepositoryError::MissingConfig("bootstrap.servers".into()));
        }
        let group_id = config.group_id_or_generated();

        let producer: FutureProducer = producer_config(config).create().map_err(|e| {
            TransportError::ConnectionFailed(format!("failed to create producer: {e}"))
        })?;
        let metadata: BaseConsumer = consumer_config(config, &group_id).create().map_err(|e| {
            TransportError::ConnectionFailed(format!("failed to create metadata client: {e}"))
        })?;

        info!(
            brokers = %config.bootstrap_servers,
            group_id = %group_id,
            "created Kafka transport"
        );

        Ok(Self {
            producer,
            metadata: Arc::new(metadata),
            config: config.clone(),
            group_id,
        })
    }

    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, TransportError> {
        let client = Arc::clone(&self.metadata);
        let topic = topic.to_string();
        let timeout = self.config.metadata_timeout;
        run_blocking(move || {
            let metadata = client
                .fetch_metadata(Some(&topic), timeout)
                .map_err(|e| TransportError::MetadataFailed(e.to_string()))?;
            let entry = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .ok_or_else(|| TransportError::UnknownTopic(topic.clone()))?;
            if entry.error().is_some() || entry.partitions().is_empty() {
                return Err(TransportError::UnknownTopic(topic.clone()));
            }
            Ok(entry.partitions().iter().map(|p| p.id()).collect())
        })
        .await
    }
}

fn producer_config(config: &RepositoryConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set("bootstrap.servers", &config.bootstrap_servers);
    client.set("acks", "all");
    client.set("enable.idempotence", "true");
    client.set("partitioner", "murmur2_random");
    client.set(
        "message.timeout.ms",
        config.publish_timeout.as_millis().to_string(),
    );
    for (key, value) in &config.kafka_properties {
        client.set(key, value);
    }
    client
}

fn consumer_config(config: &RepositoryConfig, group_id: &str) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set("bootstrap.servers", &config.bootstrap_servers);
    client.set("group.id", group_id);
    client.set("enable.auto.commit", "false");
    client.set("enable.auto.offset.store", "false");
    client.set("auto.offset.reset", "earliest");
    for (key, value) in &config.kafka_properties {
        client.set(key, value);
    }
    client
}

async fn run_blocking<T, F>(f: F) -> Result<T, TransportError>
where
    F: FnOnce() -> Result<T, TransportError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransportError::MetadataFailed(format!("blocking task failed: {e}")))?
}

/// Maps the broker errors callers can act on; `None` leaves the choice of
/// fallback to the call site.
fn map_kafka_error(topic: &str, err: &KafkaError, timeout: Duration) -> Option<TransportError> {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic) => {
            Some(TransportError::UnknownTopic(topic.to_string()))
        }
        Some(RDKafkaErrorCode::MessageTimedOut | RDKafkaErrorCode::RequestTimedOut) => Some(
            TransportError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
        ),
        _ => None,
    }
}

#[async_trait]
impl LogTransport for KafkaTransport {
    async fn publish(
        &self,
        topic: &str,
        key: &[u8],
        payload: &[u8],
    ) -> Result<RecordPosition, TransportError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);
        match self.producer.send(record, self.config.publish_timeout).await {
            Ok((partition, offset)) => Ok(RecordPosition { partition, offset }),
            Err((err, _msg)) => Err(
                map_kafka_error(topic, &err, self.config.publish_timeout)
                    .unwrap_or_else(|| TransportError::PublishFailed(err.to_string())),
            ),
        }
    }

    async fn end_offsets(&self, topic: &str) -> Result<EndOffsets, TransportError> {
        let partitions = self.partitions(topic).await?;
        let client = Arc::clone(&self.metadata);
        let name = topic.to_string();
        let timeout = self.config.metadata_timeout;
        run_blocking(move || {
            partitions
                .into_iter()
                .map(|partition| {
                    let (low, high) = client
                        .fetch_watermarks(&name, partition, timeout)
                        .map_err(|e| {
                            map_kafka_error(&name, &e, timeout)
                                .unwrap_or_else(|| TransportError::MetadataFailed(e.to_string()))
                        })?;
                    Ok((partition, Watermarks::new(low, high)))
                })
                .collect()
        })
        .await
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn LogSubscription>, TransportError> {
        let partitions = self.partitions(topic).await?;

        let consumer: StreamConsumer = consumer_config(&self.config, &self.group_id)
            .create()
            .map_err(|e| {
                TransportError::ConnectionFailed(format!("failed to create consumer: {e}"))
            })?;

        let mut tpl = TopicPartitionList::new();
        for partition in &partitions {
            tpl.add_partition_offset(topic, *partition, Offset::Beginning)
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        }
        consumer
            .assign(&tpl)
            .map_err(|e| TransportError::ConnectionFailed(format!("failed to assign: {e}")))?;

        info!(
            topic,
            partitions = partitions.len(),
            "assigned all partitions from the beginning"
        );

        Ok(Box::new(KafkaSubscription {
            consumer: Some(consumer),
            topic: topic.to_string(),
            max_poll_records: self.config.max_poll_records,
        }))
    }
}

/// Manually assigned Kafka consumer over one topic.
pub struct KafkaSubscription {
    consumer: Option<StreamConsumer>,
    topic: String,
    max_poll_records: usize,
}

#[async_trait]
impl LogSubscription for KafkaSubscription {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<LogRecord>, TransportError> {
        let consumer = self.consumer.as_ref().ok_or(TransportError::Closed)?;

        let mut batch = Vec::new();
        let poll_start = Instant::now();
        while batch.len() < self.max_poll_records {
            let remaining = timeout.saturating_sub(poll_start.elapsed());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, consumer.recv()).await {
                Ok(Ok(msg)) => batch.push(LogRecord {
                    partition: msg.partition(),
                    offset: msg.offset(),
                    key: msg.key().map(<[u8]>::to_vec),
                    payload: msg.payload().map(<[u8]>::to_vec),
                }),
                Ok(Err(e)) => {
                    // Keep what was read; the error resurfaces on the next
                    // poll if it persists.
                    if batch.is_empty() {
                        return Err(TransportError::PollFailed(e.to_string()));
                    }
                    warn!(topic = %self.topic, error = %e, "Kafka consumer error");
                    break;
                }
                Err(_) => break,
            }
        }
        Ok(batch)
    }

    fn positions(&self) -> BTreeMap<i32, i64> {
        let Some(consumer) = self.consumer.as_ref() else {
            return BTreeMap::new();
        };
        match consumer.position() {
            Ok(tpl) => tpl
                .elements()
                .iter()
                .filter_map(|element| match element.offset() {
                    Offset::Offset(next) => Some((element.partition(), next)),
                    _ => None,
                })
                .collect(),
            Err(e) => {
                debug!(topic = %self.topic, error = %e, "position lookup failed");
                BTreeMap::new()
            }
        }
    }

    async fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            if let Err(e) = consumer.unassign() {
                debug!(topic = %self.topic, error = %e, "unassign failed");
            }
        }
    }
}
