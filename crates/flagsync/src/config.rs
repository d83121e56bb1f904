//! Repository configuration.
//!
//! - [`ConfigMap`]: string key-value properties with typed accessors
//! - [`RepositoryConfig`]: parsed and validated repository settings

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::RepositoryError;

/// String key-value configuration, typically loaded from a properties file
/// or environment by the embedding application.
#[derive(Debug, Clone, Default)]
pub struct ConfigMap {
    properties: HashMap<String, String>,
}

impl ConfigMap {
    /// Creates an empty configuration map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration map from existing properties.
    #[must_use]
    pub fn with_properties(properties: HashMap<String, String>) -> Self {
        Self { properties }
    }

    /// Sets a configuration property.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Gets a configuration property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Gets a required configuration property.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::MissingConfig` if the key is not set.
    pub fn require(&self, key: &str) -> Result<&str, RepositoryError> {
        self.get(key)
            .ok_or_else(|| RepositoryError::MissingConfig(key.to_string()))
    }

    /// Gets a property parsed as the given type.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::ConfigurationError` if the value cannot be parsed.
    pub fn get_parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, RepositoryError>
    where
        T::Err: fmt::Display,
    {
        match self.get(key) {
            Some(v) => v.trim().parse::<T>().map(Some).map_err(|e| {
                RepositoryError::ConfigurationError(format!("invalid value for '{key}': {e}"))
            }),
            None => Ok(None),
        }
    }

    /// Returns all properties.
    #[must_use]
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// Returns properties with a given prefix, with the prefix stripped.
    #[must_use]
    pub fn properties_with_prefix(&self, prefix: &str) -> HashMap<String, String> {
        self.properties
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(prefix)
                    .map(|stripped| (stripped.to_string(), v.clone()))
            })
            .collect()
    }
}

/// Settings for a [`FeatureStateRepository`](crate::FeatureStateRepository).
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    // -- Connection --
    /// Comma-separated list of broker addresses (Kafka transport only).
    pub bootstrap_servers: String,
    /// Topic the consumption loop reads from.
    pub inbound_topic: String,
    /// Topic `set_feature_state` publishes to.
    pub outbound_topic: String,

    // -- Timing --
    /// Upper bound for a single poll; also bounds write-visibility latency.
    pub polling_timeout: Duration,
    /// How long construction may block waiting for the initial catch-up.
    pub initialization_timeout: Duration,
    /// How long a publish may wait for the log's acknowledgment.
    pub publish_timeout: Duration,
    /// Timeout for metadata and watermark requests.
    pub metadata_timeout: Duration,

    // -- Consumer tuning --
    /// Maximum records returned by one poll.
    pub max_poll_records: usize,
    /// First delay after a failed poll.
    pub retry_initial_backoff: Duration,
    /// Cap on the delay between failed polls.
    pub retry_max_backoff: Duration,
    /// Lag above which the repository reports itself as degraded.
    pub health_max_lag: u64,
    /// Consumer group id handed to the transport client.
    ///
    /// Partitions are assigned manually, so the group is never joined; the
    /// id only labels the client. Generated when unset.
    pub group_id: Option<String>,

    // -- Pass-through --
    /// Additional transport client properties (`kafka.*` keys, prefix stripped).
    pub kafka_properties: HashMap<String, String>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: String::new(),
            inbound_topic: String::new(),
            outbound_topic: String::new(),
            polling_timeout: Duration::from_millis(200),
            initialization_timeout: Duration::from_secs(30),
            publish_timeout: Duration::from_secs(5),
            metadata_timeout: Duration::from_secs(5),
            max_poll_records: 500,
            retry_initial_backoff: Duration::from_millis(100),
            retry_max_backoff: Duration::from_secs(5),
            health_max_lag: 1000,
            group_id: None,
            kafka_properties: HashMap::new(),
        }
    }
}

impl RepositoryConfig {
    /// Creates a config reading and writing the same topic, with defaults
    /// for everything else.
    #[must_use]
    pub fn for_topic(topic: impl Into<String>) -> Self {
        let topic = topic.into();
        Self {
            inbound_topic: topic.clone(),
            outbound_topic: topic,
            ..Self::default()
        }
    }

    /// Parses a [`RepositoryConfig`] from a [`ConfigMap`].
    ///
    /// `topic` sets both topics; `inbound.topic` and `outbound.topic`
    /// override it individually.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if required keys are missing or values are invalid.
    pub fn from_config(config: &ConfigMap) -> Result<Self, RepositoryError> {
        let defaults = Self::default();

        let shared_topic = config.get("topic").map(|t| t.trim().to_string());
        let inbound_topic = match config.get("inbound.topic") {
            Some(t) => t.trim().to_string(),
            None => shared_topic
                .clone()
                .ok_or_else(|| RepositoryError::MissingConfig("inbound.topic".into()))?,
        };
        let outbound_topic = match config.get("outbound.topic") {
            Some(t) => t.trim().to_string(),
            None => shared_topic
                .ok_or_else(|| RepositoryError::MissingConfig("outbound.topic".into()))?,
        };

        let millis = |key: &str, default: Duration| -> Result<Duration, RepositoryError> {
            Ok(config
                .get_parsed::<u64>(key)?
                .map_or(default, Duration::from_millis))
        };

        let cfg = Self {
            bootstrap_servers: config
                .get("bootstrap.servers")
                .unwrap_or_default()
                .to_string(),
            inbound_topic,
            outbound_topic,
            polling_timeout: millis("polling.timeout.ms", defaults.polling_timeout)?,
            initialization_timeout: millis(
                "initialization.timeout.ms",
                defaults.initialization_timeout,
            )?,
            publish_timeout: millis("publish.timeout.ms", defaults.publish_timeout)?,
            metadata_timeout: millis("metadata.timeout.ms", defaults.metadata_timeout)?,
            max_poll_records: config
                .get_parsed::<usize>("max.poll.records")?
                .unwrap_or(defaults.max_poll_records),
            retry_initial_backoff: millis(
                "retry.backoff.initial.ms",
                defaults.retry_initial_backoff,
            )?,
            retry_max_backoff: millis("retry.backoff.max.ms", defaults.retry_max_backoff)?,
            health_max_lag: config
                .get_parsed::<u64>("health.max.lag")?
                .unwrap_or(defaults.health_max_lag),
            group_id: config.get("group.id").map(String::from),
            kafka_properties: config.properties_with_prefix("kafka."),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::ConfigurationError` if the configuration is invalid.
    pub fn validate(&self) -> Result<(), RepositoryError> {
        if self.inbound_topic.is_empty() {
            return Err(RepositoryError::ConfigurationError(
                "inbound.topic cannot be empty".into(),
            ));
        }
        if self.outbound_topic.is_empty() {
            return Err(RepositoryError::ConfigurationError(
                "outbound.topic cannot be empty".into(),
            ));
        }
        if self.polling_timeout.is_zero() {
            return Err(RepositoryError::ConfigurationError(
                "polling.timeout.ms must be > 0".into(),
            ));
        }
        // The barrier needs at least one full poll cycle to observe a backlog.
        if self.initialization_timeout <= self.polling_timeout {
            return Err(RepositoryError::ConfigurationError(
                "initialization.timeout.ms must be greater than polling.timeout.ms".into(),
            ));
        }
        if self.publish_timeout.is_zero() || self.metadata_timeout.is_zero() {
            return Err(RepositoryError::ConfigurationError(
                "publish.timeout.ms and metadata.timeout.ms must be > 0".into(),
            ));
        }
        if self.max_poll_records == 0 {
            return Err(RepositoryError::ConfigurationError(
                "max.poll.records must be > 0".into(),
            ));
        }
        if self.retry_max_backoff < self.retry_initial_backoff {
            return Err(RepositoryError::ConfigurationError(
                "retry.backoff.max.ms must be >= retry.backoff.initial.ms".into(),
            ));
        }
        Ok(())
    }

    /// Returns the configured group id, or a process-unique generated one.
    #[must_use]
    pub fn group_id_or_generated(&self) -> String {
        if let Some(id) = &self.group_id {
            return id.clone();
        }
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        format!("flagsync-{}-{nanos}", std::process::id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config(extra: &[(&str, &str)]) -> ConfigMap {
        let mut config = ConfigMap::new();
        config.set("bootstrap.servers", "localhost:9092");
        config.set("topic", "feature-states");
        for (k, v) in extra {
            config.set(*k, *v);
        }
        config
    }

    #[test]
    fn test_parse_shared_topic() {
        let cfg = RepositoryConfig::from_config(&make_config(&[])).unwrap();
        assert_eq!(cfg.bootstrap_servers, "localhost:9092");
        assert_eq!(cfg.inbound_topic, "feature-states");
        assert_eq!(cfg.outbound_topic, "feature-states");
    }

    #[test]
    fn test_parse_split_topics() {
        let cfg = RepositoryConfig::from_config(&make_config(&[
            ("inbound.topic", "states-in"),
            ("outbound.topic", "states-out"),
        ]))
        .unwrap();
        assert_eq!(cfg.inbound_topic, "states-in");
        assert_eq!(cfg.outbound_topic, "states-out");
    }

    #[test]
    fn test_parse_missing_topic() {
        let mut config = ConfigMap::new();
        config.set("bootstrap.servers", "localhost:9092");
        let err = RepositoryConfig::from_config(&config).unwrap_err();
        assert!(matches!(err, RepositoryError::MissingConfig(key) if key == "inbound.topic"));
    }

    #[test]
    fn test_parse_defaults() {
        let cfg = RepositoryConfig::from_config(&make_config(&[])).unwrap();
        assert_eq!(cfg.polling_timeout, Duration::from_millis(200));
        assert_eq!(cfg.initialization_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_poll_records, 500);
        assert_eq!(cfg.health_max_lag, 1000);
        assert!(cfg.group_id.is_none());
        assert!(cfg.kafka_properties.is_empty());
    }

    #[test]
    fn test_parse_optional_fields() {
        let cfg = RepositoryConfig::from_config(&make_config(&[
            ("polling.timeout.ms", "50"),
            ("initialization.timeout.ms", "1000"),
            ("publish.timeout.ms", "750"),
            ("max.poll.records", "42"),
            ("retry.backoff.initial.ms", "10"),
            ("retry.backoff.max.ms", "80"),
            ("health.max.lag", "7"),
            ("group.id", "flags-node-1"),
        ]))
        .unwrap();

        assert_eq!(cfg.polling_timeout, Duration::from_millis(50));
        assert_eq!(cfg.initialization_timeout, Duration::from_secs(1));
        assert_eq!(cfg.publish_timeout, Duration::from_millis(750));
        assert_eq!(cfg.max_poll_records, 42);
        assert_eq!(cfg.retry_initial_backoff, Duration::from_millis(10));
        assert_eq!(cfg.retry_max_backoff, Duration::from_millis(80));
        assert_eq!(cfg.health_max_lag, 7);
        assert_eq!(cfg.group_id.as_deref(), Some("flags-node-1"));
    }

    #[test]
    fn test_parse_kafka_passthrough() {
        let cfg = RepositoryConfig::from_config(&make_config(&[
            ("kafka.security.protocol", "SASL_SSL"),
            ("kafka.sasl.mechanism", "PLAIN"),
        ]))
        .unwrap();
        assert_eq!(cfg.kafka_properties.len(), 2);
        assert_eq!(
            cfg.kafka_properties.get("security.protocol"),
            Some(&"SASL_SSL".to_string())
        );
    }

    #[test]
    fn test_parse_invalid_number() {
        let err =
            RepositoryConfig::from_config(&make_config(&[("polling.timeout.ms", "soon")]))
                .unwrap_err();
        assert!(err.to_string().contains("polling.timeout.ms"));
    }

    #[test]
    fn test_validate_initialization_must_exceed_polling() {
        let mut cfg = RepositoryConfig::for_topic("t");
        cfg.polling_timeout = Duration::from_secs(2);
        cfg.initialization_timeout = Duration::from_secs(1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_backoff_bounds() {
        let mut cfg = RepositoryConfig::for_topic("t");
        cfg.retry_initial_backoff = Duration::from_secs(10);
        cfg.retry_max_backoff = Duration::from_secs(1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_zero_poll_records() {
        let mut cfg = RepositoryConfig::for_topic("t");
        cfg.max_poll_records = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_for_topic_is_valid() {
        assert!(RepositoryConfig::for_topic("t").validate().is_ok());
        assert!(RepositoryConfig::default().validate().is_err());
    }

    #[test]
    fn test_group_id_generated_when_unset() {
        let mut cfg = RepositoryConfig::for_topic("t");
        assert!(cfg.group_id_or_generated().starts_with("flagsync-"));
        cfg.group_id = Some("fixed".into());
        assert_eq!(cfg.group_id_or_generated(), "fixed");
    }
}
