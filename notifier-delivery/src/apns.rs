use a2::{Client, NotificationBuilder, NotificationOptions, PlainNotificationBuilder};
use anyhow::anyhow;
use async_trait::async_trait;
use base64::Engine;
use notifier_core::config::DeliveryConfig;
use notifier_core::{Channel, Notification};
use std::fs;

use crate::error::DeliveryError;
use crate::renderer::RenderedContent;
use crate::sms::to_plain_text;
use crate::transport::ChannelTransport;

/// Push over APNs. The PUSH row's recipient address is the device token.
pub struct PushTransport {
    client: Client,
    bundle_id: String,
}

impl PushTransport {
    pub fn new(config: &DeliveryConfig) -> anyhow::Result<Option<Self>> {
        let (Some(key_id), Some(team_id)) = (&config.apns_key_id, &config.apns_team_id) else {
            tracing::warn!("Push delivery disabled (missing APNS_KEY_ID or APNS_TEAM_ID)");
            return Ok(None);
        };

        let key_content = if let Some(key_content_base64) = &config.apns_key_content {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(key_content_base64)
                .map_err(|e| anyhow!("Failed to decode base64 APNs key: {}", e))?;
            String::from_utf8(decoded)
                .map_err(|e| anyhow!("Failed to convert APNs key to UTF-8: {}", e))?
        } else if let Some(key_path) = &config.apns_key_path {
            fs::read_to_string(key_path)
                .map_err(|e| anyhow!("Failed to read APNs key file {}: {}", key_path, e))?
        } else {
            return Err(anyhow!("Either APNS_KEY_PATH or APNS_KEY_CONTENT must be provided"));
        };

        let endpoint = if config.apns_production {
            a2::Endpoint::Production
        } else {
            a2::Endpoint::Sandbox
        };

        let client = Client::token(key_content.as_bytes(), key_id, team_id, endpoint)
            .map_err(|e| anyhow!("Failed to create APNs client: {}", e))?;

        tracing::info!("APNs client initialized");
        Ok(Some(Self {
            client,
            bundle_id: config.apns_bundle_id.clone().unwrap_or_default(),
        }))
    }
}

/// Alert text: subject line, then the plain-text body.
fn alert_text(content: &RenderedContent) -> String {
    let body = to_plain_text(content.body());
    if body.is_empty() {
        content.subject().to_string()
    } else {
        format!("{}\n{}", content.subject(), body)
    }
}

#[async_trait]
impl ChannelTransport for PushTransport {
    async fn send(
        &self,
        notification: &Notification,
        content: &RenderedContent,
    ) -> Result<(), DeliveryError> {
        let device_token = notification
            .recipient_address
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| DeliveryError::transport(Channel::Push, "no device token"))?;

        let text = alert_text(content);
        let mut builder = PlainNotificationBuilder::new(&text);
        builder.set_sound("default");
        builder.set_category(notification.notification_type.as_str());

        let mut options = NotificationOptions::default();
        if !self.bundle_id.is_empty() {
            options.apns_topic = Some(&self.bundle_id);
        }

        let payload = builder.build(device_token, options);

        let response = self
            .client
            .send(payload)
            .await
            .map_err(|e| DeliveryError::transport(Channel::Push, e.to_string()))?;

        tracing::debug!(
            notification_id = %notification.id,
            "APNs accepted notification: {:?}",
            response
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "apns"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_text() {
        let content = RenderedContent::Inline {
            subject: "Task Overdue: T1".into(),
            body: "<strong>T1</strong> is overdue".into(),
        };
        assert_eq!(alert_text(&content), "Task Overdue: T1\nT1 is overdue");
    }

    #[test]
    fn test_disabled_without_key_id() {
        let config = DeliveryConfig {
            email_api_url: String::new(),
            resend_api_key: None,
            resend_from_email: None,
            sms_gateway_url: None,
            sms_api_key: None,
            apns_bundle_id: Some("com.example.tasks".into()),
            apns_key_id: None,
            apns_team_id: Some("TEAM".into()),
            apns_key_path: None,
            apns_key_content: None,
            apns_production: false,
        };
        assert!(PushTransport::new(&config).unwrap().is_none());
    }
}
