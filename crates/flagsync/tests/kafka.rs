//! Round trip against a real broker.
//!
//! Run with a broker whose topic already exists:
//!
//! ```text
//! FLAGSYNC_KAFKA_BROKERS=localhost:9092 FLAGSYNC_KAFKA_TOPIC=feature-states \
//!     cargo test -p flagsync --features kafka --test kafka -- --ignored
//! ```

#![cfg(feature = "kafka")]

use std::time::Duration;

use flagsync::{FeatureState, FeatureStateRepository};

fn brokers() -> String {
    std::env::var("FLAGSYNC_KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".into())
}

fn topic() -> String {
    std::env::var("FLAGSYNC_KAFKA_TOPIC").unwrap_or_else(|_| "flagsync-test".into())
}

async fn open() -> FeatureStateRepository {
    FeatureStateRepository::builder()
        .bootstrap_servers(brokers())
        .topic(topic())
        .polling_timeout(Duration::from_millis(200))
        .initialization_timeout(Duration::from_secs(30))
        .kafka_property("client.id", "flagsync-integration")
        .build()
        .await
        .unwrap()
}

#[tokio::test]
#[ignore = "requires a running Kafka broker"]
async fn test_kafka_cross_instance_round_trip() {
    let writer = open().await;
    let reader = open().await;
    assert!(writer.is_running());
    assert_eq!(reader.consumer_lag().await.unwrap(), 0);

    let key = format!(
        "FEATURE_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis()
    );
    let state = FeatureState::new(key.as_str())
        .with_enabled(true)
        .with_strategy("gradual")
        .with_parameter("percentage", "50");
    writer.set_feature_state(&state).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while reader.get_feature_state(&key).is_none() {
        assert!(tokio::time::Instant::now() < deadline, "state never arrived");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(reader.get_feature_state(&key), Some(state.clone()));

    // A fresh instance sees the write as part of its initial catch-up.
    let late = open().await;
    assert_eq!(late.get_feature_state(&key), Some(state));

    writer.close().await;
    reader.close().await;
    late.close().await;
}
