use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::OwnedMessage;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Message, Offset, TopicPartitionList};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::RedpandaConfig;
use crate::error::NotifierError;

pub type RedpandaProducer = Arc<FutureProducer>;
pub type RedpandaConsumer = Arc<StreamConsumer>;

pub mod topics {
    /// Task lifecycle events from the task service.
    pub const TASK_EVENTS: &str = "task.events";
    /// Notification requests from other services and the publish endpoint.
    pub const NOTIFICATION_REQUESTS: &str = "notification.requests";
    /// In-app feed consumed by the realtime gateway.
    pub const IN_APP_FEED: &str = "notification.inapp";
    pub const DEAD_LETTER: &str = "notification.dlq";
}

fn build_client_config(config: &RedpandaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();

    client_config
        .set("bootstrap.servers", &config.brokers)
        .set("metadata.request.timeout.ms", "30000")
        .set("socket.timeout.ms", "30000")
        .set("socket.keepalive.enable", "true")
        .set("broker.address.family", "v4");

    if let Ok(ssl_enabled) = std::env::var("REDPANDA_SSL_ENABLED") {
        if ssl_enabled == "true" || ssl_enabled == "1" {
            tracing::info!("SSL/TLS enabled for Redpanda connection");
            client_config.set("security.protocol", "ssl");

            if let Ok(ca_location) = std::env::var("REDPANDA_SSL_CA_LOCATION") {
                client_config.set("ssl.ca.location", &ca_location);
            }
            if let Ok(cert_location) = std::env::var("REDPANDA_SSL_CERT_LOCATION") {
                client_config.set("ssl.certificate.location", &cert_location);
            }
            if let Ok(key_location) = std::env::var("REDPANDA_SSL_KEY_LOCATION") {
                client_config.set("ssl.key.location", &key_location);
            }
        }
    }

    client_config
}

pub fn create_producer(config: &RedpandaConfig) -> Result<RedpandaProducer> {
    tracing::info!("Creating Redpanda producer for brokers {}", config.brokers);

    let producer: FutureProducer = build_client_config(config)
        .set("message.timeout.ms", "5000")
        .set("acks", "all")
        .set("retries", "3")
        .create()
        .map_err(|e| {
            tracing::error!("Failed to create Redpanda producer: {}", e);
            tracing::error!("Broker address: {}", config.brokers);
            anyhow!("Failed to create Redpanda producer: {}", e)
        })?;

    Ok(Arc::new(producer))
}

/// Offsets are committed by `run_consumer` once a message is handled or dead-lettered.
pub fn create_consumer(config: &RedpandaConfig, group_id: Option<&str>) -> Result<RedpandaConsumer> {
    let group = group_id.unwrap_or(&config.consumer_group);
    tracing::info!(
        "Creating Redpanda consumer for brokers {} (group {})",
        config.brokers,
        group
    );

    let consumer: StreamConsumer = build_client_config(config)
        .set("group.id", group)
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", "30000")
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()
        .map_err(|e| {
            tracing::error!("Failed to create Redpanda consumer: {}", e);
            tracing::error!("Broker address: {}", config.brokers);
            tracing::error!("Consumer group: {}", group);
            anyhow!("Failed to create Redpanda consumer: {}", e)
        })?;

    Ok(Arc::new(consumer))
}

pub async fn produce_message(
    producer: &RedpandaProducer,
    topic: &str,
    key: Option<&str>,
    payload: &[u8],
) -> Result<(), NotifierError> {
    let mut record = FutureRecord::to(topic).payload(payload);

    if let Some(k) = key {
        record = record.key(k);
    }

    match producer.send(record, Duration::from_secs(5)).await {
        Ok((partition, offset)) => {
            tracing::debug!(
                "Message delivered to topic {} partition {} offset {}",
                topic,
                partition,
                offset
            );
            Ok(())
        }
        Err((e, _)) => {
            tracing::error!("Failed to deliver message to topic {}: {:?}", topic, e);
            Err(NotifierError::Transport(format!(
                "failed to deliver message to {}: {}",
                topic, e
            )))
        }
    }
}

pub async fn produce_json<T: Serialize>(
    producer: &RedpandaProducer,
    topic: &str,
    key: Option<&str>,
    value: &T,
) -> Result<(), NotifierError> {
    let payload = serde_json::to_vec(value)?;
    produce_message(producer, topic, key, &payload).await
}

/// Envelope published to the dead-letter topic for messages no handler could process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub source_topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: String,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RedeliveryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RedeliveryPolicy {
    pub fn from_config(config: &RedpandaConfig) -> Self {
        Self {
            max_attempts: config.max_delivery_attempts.max(1),
            base_delay: Duration::from_secs(1),
        }
    }

    /// Pause after the given failed attempt: 1s, 2s, 4s, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2_u32.pow(attempt.saturating_sub(1).min(10))
    }
}

#[derive(Debug, PartialEq)]
pub enum HandleOutcome {
    Handled { attempts: u32 },
    Exhausted { attempts: u32, error: String },
}

/// Errors that carry a non-retryable `NotifierError` skip further attempts.
fn is_retryable(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<NotifierError>()
        .map_or(true, NotifierError::is_retryable)
}

/// Runs `handler` until it succeeds or the policy's attempt ceiling is reached.
pub async fn handle_with_redelivery<F, Fut>(
    payload: &[u8],
    policy: &RedeliveryPolicy,
    handler: &F,
) -> HandleOutcome
where
    F: Fn(Vec<u8>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut attempt = 1;
    loop {
        match handler(payload.to_vec()).await {
            Ok(()) => return HandleOutcome::Handled { attempts: attempt },
            Err(e) if attempt >= policy.max_attempts || !is_retryable(&e) => {
                return HandleOutcome::Exhausted {
                    attempts: attempt,
                    error: format!("{:#}", e),
                }
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(attempt, ?delay, "Message handler failed, retrying: {:#}", e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

async fn dead_letter(
    producer: &RedpandaProducer,
    message: &OwnedMessage,
    error: String,
    attempts: u32,
) -> Result<(), NotifierError> {
    let key = message.key().map(|k| String::from_utf8_lossy(k).into_owned());
    let envelope = DeadLetter {
        source_topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: key.clone(),
        payload: String::from_utf8_lossy(message.payload().unwrap_or_default()).into_owned(),
        error,
        attempts,
        failed_at: Utc::now(),
    };
    produce_json(producer, topics::DEAD_LETTER, key.as_deref(), &envelope).await
}

fn commit(consumer: &StreamConsumer, message: &OwnedMessage) -> Result<()> {
    let mut offsets = TopicPartitionList::new();
    offsets.add_partition_offset(
        message.topic(),
        message.partition(),
        Offset::Offset(message.offset() + 1),
    )?;
    consumer.commit(&offsets, CommitMode::Async)?;
    Ok(())
}

/// Consumes `topics` until `shutdown` flips to true. Each message is handed to
/// `handler` under `policy`; exhausted messages go to the dead-letter topic.
/// A message's offset is committed only after it was handled or dead-lettered.
pub async fn run_consumer<F, Fut>(
    consumer: RedpandaConsumer,
    producer: RedpandaProducer,
    topics: &[&str],
    policy: RedeliveryPolicy,
    mut shutdown: watch::Receiver<bool>,
    handler: F,
) -> Result<()>
where
    F: Fn(Vec<u8>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    consumer.subscribe(topics)?;
    tracing::info!("Subscribed to topics: {:?}", topics);

    let mut error_count = 0u32;
    let mut last_error_log = std::time::Instant::now();

    loop {
        let received = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Consumer for {:?} shutting down", topics);
                    return Ok(());
                }
                continue;
            }
            received = consumer.recv() => received.map(|m| m.detach()),
        };

        let message = match received {
            Ok(message) => {
                error_count = 0;
                message
            }
            Err(e) => {
                error_count += 1;
                if last_error_log.elapsed().as_secs() >= 30 {
                    tracing::warn!(
                        "Error receiving message from Redpanda (error count: {}): {}",
                        error_count,
                        e
                    );
                    last_error_log = std::time::Instant::now();
                }
                let backoff =
                    Duration::from_secs(1 << error_count.min(5)).min(Duration::from_secs(30));
                tokio::time::sleep(backoff).await;
                continue;
            }
        };

        let payload = message.payload().unwrap_or_default();
        match handle_with_redelivery(payload, &policy, &handler).await {
            HandleOutcome::Handled { attempts } => {
                tracing::debug!(
                    topic = message.topic(),
                    offset = message.offset(),
                    attempts,
                    "Processed message"
                );
            }
            HandleOutcome::Exhausted { attempts, error } => {
                tracing::error!(
                    topic = message.topic(),
                    offset = message.offset(),
                    attempts,
                    "Message exhausted delivery attempts, dead-lettering: {}",
                    error
                );
                if let Err(e) = dead_letter(&producer, &message, error, attempts).await {
                    // Leave the offset uncommitted so the message is redelivered.
                    tracing::error!("Failed to publish dead letter: {}", e);
                    continue;
                }
            }
        }

        if let Err(e) = commit(&consumer, &message) {
            tracing::warn!("Failed to commit offset {}: {}", message.offset(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RedeliveryPolicy {
        RedeliveryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_delay_after_doubles() {
        let policy = RedeliveryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_handled_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let handler = |_payload: Vec<u8>| {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if call < 2 {
                    Err(anyhow!("database unavailable"))
                } else {
                    Ok(())
                }
            }
        };

        let outcome = handle_with_redelivery(b"{}", &fast_policy(3), &handler).await;
        assert_eq!(outcome, HandleOutcome::Handled { attempts: 2 });
    }

    #[tokio::test]
    async fn test_exhausted_at_ceiling() {
        let calls = AtomicU32::new(0);
        let handler = |payload: Vec<u8>| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(anyhow!("cannot parse {} bytes", payload.len())) }
        };

        let outcome = handle_with_redelivery(b"oops", &fast_policy(3), &handler).await;
        assert_eq!(
            outcome,
            HandleOutcome::Exhausted {
                attempts: 3,
                error: "cannot parse 4 bytes".to_string()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let handler = |_payload: Vec<u8>| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Err(anyhow::Error::new(NotifierError::Validation(
                    "userId is required".into(),
                )))
            }
        };

        let outcome = handle_with_redelivery(b"{}", &fast_policy(3), &handler).await;
        assert!(matches!(outcome, HandleOutcome::Exhausted { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dead_letter_serializes_camel_case() {
        let envelope = DeadLetter {
            source_topic: topics::TASK_EVENTS.to_string(),
            partition: 0,
            offset: 12,
            key: Some("task-1".into()),
            payload: "{}".into(),
            error: "bad payload".into(),
            attempts: 3,
            failed_at: Utc::now(),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["sourceTopic"], "task.events");
        assert_eq!(json["attempts"], 3);
    }
}
