use anyhow::Result;
use notifier_core::redpanda::{run_consumer, topics, RedeliveryPolicy};
use notifier_core::{NotificationRequest, NotifierContext, NotifierError, TaskEvent};
use std::sync::Arc;
use tokio::sync::watch;

use crate::router::NotificationRouter;
use crate::translator::translate;

const TASK_EVENTS_GROUP: &str = "notifier-task-events";
const REQUESTS_GROUP: &str = "notifier-requests";

/// Consumes task lifecycle events and routes the notifications they imply.
pub async fn run_task_events(
    ctx: NotifierContext,
    router: Arc<NotificationRouter>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    tracing::info!("Starting task event consumer");
    let consumer = ctx.create_consumer(Some(TASK_EVENTS_GROUP))?;
    run_consumer(
        consumer,
        ctx.redpanda_producer.clone(),
        &[topics::TASK_EVENTS],
        RedeliveryPolicy::from_config(&ctx.config.redpanda),
        shutdown,
        |payload| {
            let router = router.clone();
            async move { handle_task_event(&router, &payload).await }
        },
    )
    .await
}

/// Consumes notification requests published by other services.
pub async fn run_requests(
    ctx: NotifierContext,
    router: Arc<NotificationRouter>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    tracing::info!("Starting notification request consumer");
    let consumer = ctx.create_consumer(Some(REQUESTS_GROUP))?;
    run_consumer(
        consumer,
        ctx.redpanda_producer.clone(),
        &[topics::NOTIFICATION_REQUESTS],
        RedeliveryPolicy::from_config(&ctx.config.redpanda),
        shutdown,
        |payload| {
            let router = router.clone();
            async move { handle_request(&router, &payload).await }
        },
    )
    .await
}

fn parse<'a, T: serde::Deserialize<'a>>(payload: &'a [u8]) -> Result<T> {
    // Malformed payloads never succeed on redelivery.
    serde_json::from_slice(payload).map_err(|e| anyhow::Error::new(NotifierError::from(e)))
}

pub async fn handle_task_event(router: &NotificationRouter, payload: &[u8]) -> Result<()> {
    let event: TaskEvent = parse(payload)?;
    let Some(request) = translate(&event) else {
        return Ok(());
    };
    if let Some(response) = router.route(request).await? {
        tracing::debug!(
            task_id = %event.task_id,
            notification_id = %response.id,
            "Handled task event"
        );
    }
    Ok(())
}

pub async fn handle_request(router: &NotificationRouter, payload: &[u8]) -> Result<()> {
    let request: NotificationRequest = parse(payload)?;
    router.route(request).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::PreferenceResolver;
    use notifier_core::memory::{
        InMemoryNotificationStore, InMemoryPreferenceStore, InMemoryTemplateStore,
    };
    use notifier_core::{Channel, NotificationStatus, NotificationType};
    use notifier_delivery::{ChannelSet, Dispatcher};
    use serde_json::json;

    fn router() -> (NotificationRouter, InMemoryNotificationStore) {
        let store = InMemoryNotificationStore::new();
        let dispatcher = Dispatcher::new(
            Arc::new(store.clone()),
            Arc::new(InMemoryTemplateStore::new()),
            ChannelSet::logging(),
        );
        let router = NotificationRouter::new(
            Arc::new(store.clone()),
            Arc::new(PreferenceResolver::new(Arc::new(InMemoryPreferenceStore::new()))),
            Arc::new(dispatcher),
        );
        (router, store)
    }

    #[tokio::test]
    async fn test_task_event_creates_notifications_once() {
        let (router, store) = router();
        let payload = json!({
            "eventId": "evt-7",
            "eventType": "ASSIGNED",
            "taskId": "task-1",
            "userId": "owner",
            "assignedUserId": "assignee",
            "title": "Ship it",
            "metadata": { "recipientEmail": "assignee@example.com" }
        })
        .to_string();

        handle_task_event(&router, payload.as_bytes()).await.unwrap();
        handle_task_event(&router, payload.as_bytes()).await.unwrap();

        let created = store.all();
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|n| n.user_id == "assignee"));
        assert!(created.iter().all(|n| n.status == NotificationStatus::Sent));
        assert!(created.iter().any(|n| n.channel == Channel::InApp));
    }

    #[tokio::test]
    async fn test_due_reminder_fans_out_to_email_and_push() {
        let (router, store) = router();
        let payload = json!({
            "eventId": "evt-9",
            "eventType": "DUE_REMINDER",
            "taskId": "task-1",
            "userId": "U1",
            "title": "T1",
            "metadata": {
                "recipientEmail": "u1@example.com",
                "deviceToken": "a1b2c3devicetoken"
            }
        })
        .to_string();

        handle_task_event(&router, payload.as_bytes()).await.unwrap();

        let created = store.all();
        assert_eq!(created.len(), 2);
        let mut channels: Vec<Channel> = created.iter().map(|n| n.channel).collect();
        channels.sort();
        assert_eq!(channels, vec![Channel::Email, Channel::Push]);
        for n in &created {
            assert_eq!(n.notification_type, NotificationType::TaskDueReminder);
            assert_eq!(n.subject.as_deref(), Some("Task Due Soon: T1"));
            assert_eq!(n.user_id, "U1");
            assert_eq!(n.related_entity_id.as_deref(), Some("task-1"));
            assert_eq!(n.related_entity_type.as_deref(), Some("task"));
            let expected = match n.channel {
                Channel::Push => "a1b2c3devicetoken",
                _ => "u1@example.com",
            };
            assert_eq!(n.recipient_address.as_deref(), Some(expected));
        }
    }

    #[tokio::test]
    async fn test_unknown_event_is_acknowledged() {
        let (router, store) = router();
        let payload = json!({ "eventType": "ARCHIVED", "taskId": "t", "title": "x" }).to_string();
        handle_task_event(&router, payload.as_bytes()).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_not_retryable() {
        let (router, _) = router();
        let err = handle_request(&router, b"{not json").await.unwrap_err();
        let inner = err.downcast_ref::<NotifierError>().unwrap();
        assert!(!inner.is_retryable());
    }

    #[tokio::test]
    async fn test_request_is_routed() {
        let (router, store) = router();
        let payload = json!({
            "userId": "u1",
            "type": "COMMENT_ADDED",
            "channels": ["IN_APP"],
            "message": "New comment"
        })
        .to_string();
        handle_request(&router, payload.as_bytes()).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
