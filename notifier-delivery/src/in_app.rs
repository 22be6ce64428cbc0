use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notifier_core::redis::push_inbox;
use notifier_core::redpanda::{produce_message, topics};
use notifier_core::{Channel, Notification, NotificationType, RedisPool, RedpandaProducer};
use serde::Serialize;
use uuid::Uuid;

use crate::error::DeliveryError;
use crate::renderer::RenderedContent;
use crate::transport::ChannelTransport;

/// Entry written to the in-app feed topic and the user's inbox.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InAppMessage<'a> {
    id: Uuid,
    user_id: &'a str,
    #[serde(rename = "type")]
    notification_type: NotificationType,
    subject: &'a str,
    message: &'a str,
    related_entity_id: Option<&'a str>,
    related_entity_type: Option<&'a str>,
    created_at: DateTime<Utc>,
}

impl<'a> InAppMessage<'a> {
    fn new(notification: &'a Notification, content: &'a RenderedContent) -> Self {
        Self {
            id: notification.id,
            user_id: &notification.user_id,
            notification_type: notification.notification_type,
            subject: content.subject(),
            message: content.body(),
            related_entity_id: notification.related_entity_id.as_deref(),
            related_entity_type: notification.related_entity_type.as_deref(),
            created_at: notification.created_at,
        }
    }
}

pub struct InAppTransport {
    producer: RedpandaProducer,
    redis_pool: RedisPool,
}

impl InAppTransport {
    pub fn new(producer: RedpandaProducer, redis_pool: RedisPool) -> Self {
        Self {
            producer,
            redis_pool,
        }
    }
}

#[async_trait]
impl ChannelTransport for InAppTransport {
    async fn send(
        &self,
        notification: &Notification,
        content: &RenderedContent,
    ) -> Result<(), DeliveryError> {
        let entry = serde_json::to_string(&InAppMessage::new(notification, content))
            .map_err(|e| DeliveryError::transport(Channel::InApp, e.to_string()))?;

        produce_message(
            &self.producer,
            topics::IN_APP_FEED,
            Some(&notification.user_id),
            entry.as_bytes(),
        )
        .await
        .map_err(|e| DeliveryError::transport(Channel::InApp, e.to_string()))?;

        push_inbox(&self.redis_pool, &notification.user_id, &entry)
            .await
            .map_err(|e| DeliveryError::transport(Channel::InApp, e.to_string()))?;

        tracing::debug!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            "Published in-app notification"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in-app-feed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifier_core::NotificationRequest;

    #[test]
    fn test_in_app_message_shape() {
        let mut request = NotificationRequest::new("u1", NotificationType::CommentAdded);
        request.related_entity_id = Some("task-9".into());
        request.related_entity_type = Some("task".into());
        let n = Notification::from_request(&request, Channel::InApp, Utc::now());
        let content = RenderedContent::Inline {
            subject: "New comment".into(),
            body: "Bo commented on T9".into(),
        };

        let json = serde_json::to_value(InAppMessage::new(&n, &content)).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["type"], "COMMENT_ADDED");
        assert_eq!(json["message"], "Bo commented on T9");
        assert_eq!(json["relatedEntityId"], "task-9");
    }
}
