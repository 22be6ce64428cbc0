use anyhow::anyhow;
use async_trait::async_trait;
use notifier_core::config::DeliveryConfig;
use notifier_core::{Channel, Notification, TemplateData};
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;
use crate::renderer::RenderedContent;
use crate::transport::ChannelTransport;

fn html_escape(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '&' => "&amp;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&#x27;".to_string(),
            _ => c.to_string(),
        })
        .collect()
}

#[derive(Debug, Serialize, PartialEq)]
struct EmailTemplateRef {
    id: String,
    variables: TemplateData,
}

#[derive(Debug, Serialize, PartialEq)]
struct EmailRequest {
    from: String,
    to: Vec<String>,
    subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<EmailTemplateRef>,
}

#[derive(Debug, Deserialize)]
struct EmailResponse {
    id: String,
}

/// Email over a Resend-compatible HTTP API.
pub struct EmailTransport {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from_email: String,
}

impl EmailTransport {
    /// `None` when no API key or sender address is configured.
    pub fn new(config: &DeliveryConfig) -> anyhow::Result<Option<Self>> {
        let (Some(api_key), Some(from_email)) = (&config.resend_api_key, &config.resend_from_email)
        else {
            tracing::warn!("Email delivery disabled (missing RESEND_API_KEY or RESEND_FROM_EMAIL)");
            return Ok(None);
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        tracing::info!("Email client initialized for {}", config.email_api_url);
        Ok(Some(Self {
            client,
            api_url: config.email_api_url.clone(),
            api_key: api_key.clone(),
            from_email: from_email.clone(),
        }))
    }

    fn build_request(&self, to: &str, content: &RenderedContent) -> EmailRequest {
        match content {
            RenderedContent::Inline { subject, body } => EmailRequest {
                from: self.from_email.clone(),
                to: vec![to.to_string()],
                subject: subject.clone(),
                html: Some(html_layout(subject, body)),
                template: None,
            },
            RenderedContent::Dynamic {
                template_ref,
                subject,
                data,
            } => EmailRequest {
                from: self.from_email.clone(),
                to: vec![to.to_string()],
                subject: subject.clone(),
                html: None,
                template: Some(EmailTemplateRef {
                    id: template_ref.clone(),
                    variables: data.clone(),
                }),
            },
        }
    }
}

/// Wraps an HTML body fragment in the standard email layout. The body is
/// trusted markup; the subject is escaped.
fn html_layout(subject: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
</head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <div style="background-color: #f8f9fa; border-radius: 8px; padding: 24px; margin-bottom: 20px;">
        <h1 style="margin: 0 0 16px 0; font-size: 22px; color: #212529;">{}</h1>
        <div style="font-size: 16px; color: #495057;">{}</div>
    </div>
    <p style="font-size: 13px; color: #6c757d;">You are receiving this because of your task notification settings.</p>
</body>
</html>"#,
        html_escape(subject),
        body
    )
}

#[async_trait]
impl ChannelTransport for EmailTransport {
    async fn send(
        &self,
        notification: &Notification,
        content: &RenderedContent,
    ) -> Result<(), DeliveryError> {
        let to = notification
            .recipient_address
            .as_deref()
            .filter(|addr| !addr.trim().is_empty())
            .ok_or_else(|| DeliveryError::transport(Channel::Email, "no recipient address"))?;

        let request = self.build_request(to, content);

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryError::transport(Channel::Email, format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DeliveryError::transport(
                Channel::Email,
                format!("email API returned {}: {}", status, error_text),
            ));
        }

        match response.json::<EmailResponse>().await {
            Ok(body) => tracing::debug!(
                notification_id = %notification.id,
                email_id = %body.id,
                "Email accepted by provider"
            ),
            Err(e) => tracing::debug!(
                notification_id = %notification.id,
                "Email accepted, response body unreadable: {}",
                e
            ),
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "email-http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transport() -> EmailTransport {
        EmailTransport {
            client: reqwest::Client::new(),
            api_url: "http://localhost:9/emails".into(),
            api_key: "re_test".into(),
            from_email: "tasks@example.com".into(),
        }
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<b>\"Q&A\"</b>"), "&lt;b&gt;&quot;Q&amp;A&quot;&lt;/b&gt;");
    }

    #[test]
    fn test_inline_request_keeps_markup_and_escapes_subject() {
        let content = RenderedContent::Inline {
            subject: "Task Due Soon: <T1>".into(),
            body: "<strong>T1</strong> is due".into(),
        };
        let request = transport().build_request("ana@example.com", &content);
        assert_eq!(request.to, vec!["ana@example.com".to_string()]);
        assert!(request.template.is_none());
        let html = request.html.unwrap();
        assert!(html.contains("<strong>T1</strong> is due"));
        assert!(html.contains("Task Due Soon: &lt;T1&gt;"));
    }

    #[test]
    fn test_dynamic_request_sends_template_reference() {
        let mut data = TemplateData::new();
        data.insert("taskTitle".into(), json!("T1"));
        let content = RenderedContent::Dynamic {
            template_ref: "d-123".into(),
            subject: "Task Assigned to You: T1".into(),
            data,
        };
        let request = transport().build_request("ana@example.com", &content);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["template"]["id"], "d-123");
        assert_eq!(json["template"]["variables"]["taskTitle"], "T1");
        assert!(json.get("html").is_none());
    }

    #[test]
    fn test_disabled_without_credentials() {
        let config = DeliveryConfig {
            email_api_url: "https://api.resend.com/emails".into(),
            resend_api_key: None,
            resend_from_email: Some("tasks@example.com".into()),
            sms_gateway_url: None,
            sms_api_key: None,
            apns_bundle_id: None,
            apns_key_id: None,
            apns_team_id: None,
            apns_key_path: None,
            apns_key_content: None,
            apns_production: false,
        };
        assert!(EmailTransport::new(&config).unwrap().is_none());
    }
}
