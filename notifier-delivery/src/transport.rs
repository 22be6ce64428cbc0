use async_trait::async_trait;
use notifier_core::{Channel, Notification, NotifierContext};
use std::sync::Arc;

use crate::apns::PushTransport;
use crate::email::EmailTransport;
use crate::error::DeliveryError;
use crate::in_app::InAppTransport;
use crate::renderer::RenderedContent;
use crate::sms::SmsTransport;

/// Delivers rendered content over one channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn send(
        &self,
        notification: &Notification,
        content: &RenderedContent,
    ) -> Result<(), DeliveryError>;

    fn name(&self) -> &'static str;
}

/// Stand-in for channels without provider configuration: records and succeeds.
pub struct LoggingTransport {
    channel: Channel,
}

impl LoggingTransport {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelTransport for LoggingTransport {
    async fn send(
        &self,
        notification: &Notification,
        content: &RenderedContent,
    ) -> Result<(), DeliveryError> {
        tracing::info!(
            notification_id = %notification.id,
            channel = %self.channel,
            user_id = %notification.user_id,
            recipient = notification.recipient_address.as_deref().unwrap_or("-"),
            subject = content.subject(),
            "Channel not configured, logged notification instead of sending"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}

/// One transport per channel.
#[derive(Clone)]
pub struct ChannelSet {
    email: Arc<dyn ChannelTransport>,
    in_app: Arc<dyn ChannelTransport>,
    sms: Arc<dyn ChannelTransport>,
    push: Arc<dyn ChannelTransport>,
}

impl ChannelSet {
    pub fn new(
        email: Arc<dyn ChannelTransport>,
        in_app: Arc<dyn ChannelTransport>,
        sms: Arc<dyn ChannelTransport>,
        push: Arc<dyn ChannelTransport>,
    ) -> Self {
        Self {
            email,
            in_app,
            sms,
            push,
        }
    }

    pub fn logging() -> Self {
        Self::new(
            Arc::new(LoggingTransport::new(Channel::Email)),
            Arc::new(LoggingTransport::new(Channel::InApp)),
            Arc::new(LoggingTransport::new(Channel::Sms)),
            Arc::new(LoggingTransport::new(Channel::Push)),
        )
    }

    /// Provider-backed transports where configured, logging transports elsewhere.
    pub fn from_context(ctx: &NotifierContext) -> anyhow::Result<Self> {
        let delivery = &ctx.config.delivery;

        let email: Arc<dyn ChannelTransport> = match EmailTransport::new(delivery)? {
            Some(transport) => Arc::new(transport),
            None => Arc::new(LoggingTransport::new(Channel::Email)),
        };
        let sms: Arc<dyn ChannelTransport> = match SmsTransport::new(delivery)? {
            Some(transport) => Arc::new(transport),
            None => Arc::new(LoggingTransport::new(Channel::Sms)),
        };
        let push: Arc<dyn ChannelTransport> = match PushTransport::new(delivery)? {
            Some(transport) => Arc::new(transport),
            None => Arc::new(LoggingTransport::new(Channel::Push)),
        };
        let in_app = Arc::new(InAppTransport::new(
            ctx.redpanda_producer.clone(),
            ctx.redis_pool.clone(),
        ));

        let set = Self::new(email, in_app, sms, push);
        for channel in Channel::ALL {
            tracing::info!("{} channel uses {} transport", channel, set.transport_for(*channel).name());
        }
        Ok(set)
    }

    pub fn transport_for(&self, channel: Channel) -> &Arc<dyn ChannelTransport> {
        match channel {
            Channel::Email => &self.email,
            Channel::InApp => &self.in_app,
            Channel::Sms => &self.sms,
            Channel::Push => &self.push,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use notifier_core::{NotificationRequest, NotificationType};

    #[tokio::test]
    async fn test_logging_transport_succeeds() {
        let request = NotificationRequest::new("u1", NotificationType::SystemNotification);
        let n = Notification::from_request(&request, Channel::Sms, Utc::now());
        let content = RenderedContent::Inline {
            subject: "Maintenance".into(),
            body: "Tonight at 22:00".into(),
        };
        LoggingTransport::new(Channel::Sms)
            .send(&n, &content)
            .await
            .unwrap();
    }

    #[test]
    fn test_channel_set_selects_by_channel() {
        let mut email = MockChannelTransport::new();
        email.expect_name().return_const("email");
        let mut push = MockChannelTransport::new();
        push.expect_name().return_const("apns");

        let set = ChannelSet::new(
            Arc::new(email),
            Arc::new(LoggingTransport::new(Channel::InApp)),
            Arc::new(LoggingTransport::new(Channel::Sms)),
            Arc::new(push),
        );
        assert_eq!(set.transport_for(Channel::Email).name(), "email");
        assert_eq!(set.transport_for(Channel::Push).name(), "apns");
        assert_eq!(set.transport_for(Channel::Sms).name(), "logging");
    }
}
