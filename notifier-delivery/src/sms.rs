use anyhow::anyhow;
use async_trait::async_trait;
use notifier_core::config::DeliveryConfig;
use notifier_core::{Channel, Notification};
use serde::Serialize;

use crate::error::DeliveryError;
use crate::renderer::RenderedContent;
use crate::transport::ChannelTransport;

/// Carrier limit for a concatenated SMS body.
const MAX_SMS_CHARS: usize = 480;

#[derive(Debug, Serialize)]
struct SmsRequest<'a> {
    to: &'a str,
    body: String,
    reference: String,
}

pub struct SmsTransport {
    client: reqwest::Client,
    gateway_url: String,
    api_key: Option<String>,
}

impl SmsTransport {
    pub fn new(config: &DeliveryConfig) -> anyhow::Result<Option<Self>> {
        let Some(gateway_url) = &config.sms_gateway_url else {
            tracing::warn!("SMS delivery disabled (missing SMS_GATEWAY_URL)");
            return Ok(None);
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Some(Self {
            client,
            gateway_url: gateway_url.clone(),
            api_key: config.sms_api_key.clone(),
        }))
    }
}

/// Flattens the HTML fragments used in notification bodies into plain text.
pub(crate) fn to_plain_text(html: &str) -> String {
    let with_breaks = html
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n");

    let mut out = String::with_capacity(with_breaks.len());
    let mut in_tag = false;
    for c in with_breaks.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }

    out.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .trim()
        .to_string()
}

fn sms_body(content: &RenderedContent) -> String {
    let text = to_plain_text(content.body());
    if text.chars().count() <= MAX_SMS_CHARS {
        return text;
    }
    let mut truncated: String = text.chars().take(MAX_SMS_CHARS - 1).collect();
    truncated.push('…');
    truncated
}

#[async_trait]
impl ChannelTransport for SmsTransport {
    async fn send(
        &self,
        notification: &Notification,
        content: &RenderedContent,
    ) -> Result<(), DeliveryError> {
        let to = notification
            .recipient_address
            .as_deref()
            .filter(|addr| !addr.trim().is_empty())
            .ok_or_else(|| DeliveryError::transport(Channel::Sms, "no recipient phone number"))?;

        let request = SmsRequest {
            to,
            body: sms_body(content),
            reference: notification.id.to_string(),
        };

        let mut builder = self.client.post(&self.gateway_url).json(&request);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DeliveryError::transport(Channel::Sms, format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DeliveryError::transport(
                Channel::Sms,
                format!("gateway returned {}: {}", status, error_text),
            ));
        }

        tracing::debug!(notification_id = %notification.id, "SMS accepted by gateway");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sms-gateway"
    }
}
