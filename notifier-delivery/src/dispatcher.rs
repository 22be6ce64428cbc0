use chrono::Utc;
use notifier_core::{
    FailureOutcome, Notification, NotificationStore, NotifierError, RetryPolicy, TemplateStore,
};
use std::sync::Arc;

use crate::error::DeliveryError;
use crate::renderer::TemplateRenderer;
use crate::transport::ChannelSet;

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Sent,
    /// Already SENT/DELIVERED or out of retries; nothing was attempted.
    Skipped,
    Failed(FailureOutcome),
}

/// Attempts single-channel deliveries and records the outcome.
pub struct Dispatcher {
    store: Arc<dyn NotificationStore>,
    renderer: TemplateRenderer,
    channels: ChannelSet,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        templates: Arc<dyn TemplateStore>,
        channels: ChannelSet,
    ) -> Self {
        Self {
            store,
            renderer: TemplateRenderer::new(templates),
            channels,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Delivers `notification` on its channel and persists the new state.
    ///
    /// The stored row wins over the passed-in copy, so a message redelivered
    /// after a successful send is skipped. Only store errors are returned;
    /// delivery failures are recorded on the notification.
    pub async fn dispatch(&self, notification: Notification) -> Result<DispatchOutcome, NotifierError> {
        let mut notification = self
            .store
            .find_by_id(notification.id)
            .await?
            .unwrap_or(notification);

        if notification.is_terminal(&self.policy) {
            tracing::debug!(
                notification_id = %notification.id,
                status = %notification.status,
                "Skipping notification already in a final state"
            );
            return Ok(DispatchOutcome::Skipped);
        }

        match self.attempt(&notification).await {
            Ok(()) => {
                notification.mark_sent(Utc::now());
                self.store.save(&notification).await?;
                tracing::info!(
                    notification_id = %notification.id,
                    channel = %notification.channel,
                    user_id = %notification.user_id,
                    "Notification sent"
                );
                Ok(DispatchOutcome::Sent)
            }
            Err(e) => {
                let outcome = self.handle_failure(&mut notification, &e.to_string()).await?;
                Ok(DispatchOutcome::Failed(outcome))
            }
        }
    }

    async fn attempt(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let content = self.renderer.render(notification).await?;
        self.channels
            .transport_for(notification.channel)
            .send(notification, &content)
            .await
    }

    /// Applies the retry policy to a failed attempt and persists the result.
    pub async fn handle_failure(
        &self,
        notification: &mut Notification,
        reason: &str,
    ) -> Result<FailureOutcome, NotifierError> {
        let outcome = notification.record_failure(reason, &self.policy, Utc::now());
        self.store.save(notification).await?;

        match &outcome {
            FailureOutcome::RetryScheduled {
                retry_count,
                retry_at,
            } => tracing::warn!(
                notification_id = %notification.id,
                channel = %notification.channel,
                retry_count,
                %retry_at,
                "Delivery failed, retry scheduled: {}",
                reason
            ),
            FailureOutcome::Exhausted { retry_count } => tracing::error!(
                notification_id = %notification.id,
                channel = %notification.channel,
                retry_count,
                "Delivery failed permanently: {}",
                reason
            ),
        }
        Ok(outcome)
    }
}
