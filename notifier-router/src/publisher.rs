use async_trait::async_trait;
use notifier_core::redpanda::{produce_json, topics};
use notifier_core::{NotificationRequest, NotifierError, RedpandaProducer};

/// Hands a request to the async transport instead of routing it inline.
#[async_trait]
pub trait RequestPublisher: Send + Sync {
    async fn publish(&self, request: &NotificationRequest) -> Result<(), NotifierError>;
}

pub struct KafkaRequestPublisher {
    producer: RedpandaProducer,
}

impl KafkaRequestPublisher {
    pub fn new(producer: RedpandaProducer) -> Self {
        Self { producer }
    }
}

/// Requests sharing a key land on one partition, keeping redeliveries ordered.
pub fn partition_key(request: &NotificationRequest) -> &str {
    request
        .request_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or(&request.user_id)
}

#[async_trait]
impl RequestPublisher for KafkaRequestPublisher {
    async fn publish(&self, request: &NotificationRequest) -> Result<(), NotifierError> {
        if request.user_id.trim().is_empty() {
            return Err(NotifierError::Validation("userId is required".into()));
        }
        produce_json(
            &self.producer,
            topics::NOTIFICATION_REQUESTS,
            Some(partition_key(request)),
            request,
        )
        .await?;
        tracing::debug!(
            user_id = %request.user_id,
            notification_type = %request.notification_type,
            "Published notification request"
        );
        Ok(())
    }
}
