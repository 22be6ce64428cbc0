use notifier_core::{Channel, Notification, NotificationTemplate, TemplateData, TemplateStore};
use serde_json::Value;
use std::sync::Arc;

use crate::error::DeliveryError;

pub const DEFAULT_SUBJECT: &str = "Task Management Notification";

/// Final content handed to a channel transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedContent {
    /// Subject and body resolved locally.
    Inline { subject: String, body: String },
    /// Rendering is left to the provider's stored template.
    Dynamic {
        template_ref: String,
        subject: String,
        data: TemplateData,
    },
}

impl RenderedContent {
    pub fn subject(&self) -> &str {
        match self {
            Self::Inline { subject, .. } | Self::Dynamic { subject, .. } => subject,
        }
    }

    /// Body for channels that cannot use provider templates.
    pub fn body(&self) -> &str {
        match self {
            Self::Inline { body, .. } => body,
            Self::Dynamic { data, subject, .. } => {
                data.get("message").and_then(Value::as_str).unwrap_or(subject.as_str())
            }
        }
    }
}

pub struct TemplateRenderer {
    templates: Arc<dyn TemplateStore>,
}

impl TemplateRenderer {
    pub fn new(templates: Arc<dyn TemplateStore>) -> Self {
        Self { templates }
    }

    pub async fn render(&self, notification: &Notification) -> Result<RenderedContent, DeliveryError> {
        let template = match notification.template_id.as_deref() {
            Some(id) => match self.templates.find_by_id(id).await? {
                Some(template) if template.active => Some(template),
                Some(_) => {
                    tracing::warn!(template_id = id, "Template is inactive, using inline content");
                    None
                }
                None => {
                    tracing::warn!(template_id = id, "Template not found, using inline content");
                    None
                }
            },
            None => None,
        };

        match template {
            Some(template) => render_template(notification, &template),
            None => render_inline(notification),
        }
    }
}

fn fallback_subject(notification: &Notification) -> String {
    notification
        .subject
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SUBJECT.to_string())
}

fn render_inline(notification: &Notification) -> Result<RenderedContent, DeliveryError> {
    let body = notification.message.clone().unwrap_or_default();
    if body.trim().is_empty() {
        return Err(DeliveryError::Render(format!(
            "notification {} has no message content",
            notification.id
        )));
    }
    Ok(RenderedContent::Inline {
        subject: fallback_subject(notification),
        body,
    })
}

fn render_template(
    notification: &Notification,
    template: &NotificationTemplate,
) -> Result<RenderedContent, DeliveryError> {
    let data = &notification.template_data;

    if let Some(template_ref) = template
        .external_template_ref
        .as_ref()
        .filter(|r| !r.trim().is_empty())
    {
        let mut data = data.clone();
        if let Some(subject) = &notification.subject {
            data.entry("subject")
                .or_insert_with(|| Value::String(subject.clone()));
        }
        if let Some(message) = &notification.message {
            data.entry("message")
                .or_insert_with(|| Value::String(message.clone()));
        }
        return Ok(RenderedContent::Dynamic {
            template_ref: template_ref.clone(),
            subject: fallback_subject(notification),
            data,
        });
    }

    let subject = match &template.subject {
        Some(subject) => substitute(subject, data),
        None => fallback_subject(notification),
    };
    let source = match notification.channel {
        Channel::Email => template.html_content.as_ref(),
        _ => template.text_content.as_ref().or(template.html_content.as_ref()),
    };
    let body = match source {
        Some(content) => substitute(content, data),
        None => notification.message.clone().unwrap_or_default(),
    };
    if body.trim().is_empty() {
        return Err(DeliveryError::Render(format!(
            "template {} produced empty content for {}",
            template.id, notification.channel
        )));
    }

    Ok(RenderedContent::Inline { subject, body })
}

fn placeholder_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Replaces every `{{key}}` with the matching entry of `data`, or with nothing
/// when the key is absent. Substituted values are not scanned again.
pub fn substitute(template: &str, data: &TemplateData) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let key = after_open[..end].trim();
                out.push_str(&placeholder_value(data.get(key)));
                rest = &after_open[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use notifier_core::memory::InMemoryTemplateStore;
    use notifier_core::{NotificationRequest, NotificationType};
    use serde_json::json;

    fn data(value: Value) -> TemplateData {
        match value {
            Value::Object(map) => map,
            _ => TemplateData::new(),
        }
    }

    fn notification(channel: Channel, template_id: Option<&str>) -> Notification {
        let mut request = NotificationRequest::new("u1", NotificationType::TaskAssigned);
        request.subject = Some("Task Assigned to You: T1".into());
        request.message = Some("You have been assigned <strong>T1</strong>".into());
        request.template_id = template_id.map(str::to_string);
        request.template_data = data(json!({"name": "Ana", "taskTitle": "T1"}));
        Notification::from_request(&request, channel, Utc::now())
    }

    fn template(id: &str) -> NotificationTemplate {
        NotificationTemplate {
            id: id.into(),
            name: "Assignment".into(),
            notification_type: NotificationType::TaskAssigned,
            channel: Channel::Email,
            subject: Some("Hello {{name}}".into()),
            html_content: Some("<p>{{taskTitle}} is yours, {{name}}{{missing}}</p>".into()),
            text_content: Some("{{taskTitle}} is yours".into()),
            external_template_ref: None,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn renderer_with(templates: Vec<NotificationTemplate>) -> TemplateRenderer {
        let store = InMemoryTemplateStore::new();
        for t in &templates {
            store.save(t).await.unwrap();
        }
        TemplateRenderer::new(Arc::new(store))
    }

    #[test]
    fn test_substitute() {
        let values = data(json!({"name": "Ana", "count": 3, "gone": null}));
        assert_eq!(substitute("Hello {{name}}", &values), "Hello Ana");
        assert_eq!(substitute("{{missing}}", &values), "");
        assert_eq!(substitute("{{ count }} items{{gone}}", &values), "3 items");
        assert_eq!(substitute("open {{name", &values), "open {{name");
        assert_eq!(substitute("no placeholders", &values), "no placeholders");
    }

    #[test]
    fn test_substitute_is_single_pass() {
        let values = data(json!({"a": "{{b}}", "b": "nested"}));
        assert_eq!(substitute("{{a}}", &values), "{{b}}");
    }

    #[tokio::test]
    async fn test_inline_without_template() {
        let renderer = renderer_with(vec![]).await;
        let mut n = notification(Channel::Email, None);
        n.subject = None;
        let content = renderer.render(&n).await.unwrap();
        assert_eq!(
            content,
            RenderedContent::Inline {
                subject: DEFAULT_SUBJECT.to_string(),
                body: "You have been assigned <strong>T1</strong>".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_missing_template_falls_back_to_inline() {
        let renderer = renderer_with(vec![]).await;
        let n = notification(Channel::Email, Some("nope"));
        let content = renderer.render(&n).await.unwrap();
        assert_eq!(content.subject(), "Task Assigned to You: T1");
        assert_eq!(content.body(), "You have been assigned <strong>T1</strong>");
    }

    #[tokio::test]
    async fn test_inactive_template_falls_back_to_inline() {
        let mut inactive = template("tpl-1");
        inactive.active = false;
        let renderer = renderer_with(vec![inactive]).await;
        let content = renderer
            .render(&notification(Channel::Email, Some("tpl-1")))
            .await
            .unwrap();
        assert_eq!(content.subject(), "Task Assigned to You: T1");
    }

    #[tokio::test]
    async fn test_local_template_per_channel() {
        let renderer = renderer_with(vec![template("tpl-1")]).await;

        let email = renderer
            .render(&notification(Channel::Email, Some("tpl-1")))
            .await
            .unwrap();
        assert_eq!(email.subject(), "Hello Ana");
        assert_eq!(email.body(), "<p>T1 is yours, Ana</p>");

        let in_app = renderer
            .render(&notification(Channel::InApp, Some("tpl-1")))
            .await
            .unwrap();
        assert_eq!(in_app.body(), "T1 is yours");
    }

    #[tokio::test]
    async fn test_external_template_seeds_subject_and_message() {
        let mut external = template("tpl-ext");
        external.external_template_ref = Some("d-123".into());
        let renderer = renderer_with(vec![external]).await;

        let mut n = notification(Channel::Email, Some("tpl-ext"));
        n.template_data.insert("subject".into(), json!("Kept"));
        let content = renderer.render(&n).await.unwrap();

        match content {
            RenderedContent::Dynamic {
                template_ref, data, ..
            } => {
                assert_eq!(template_ref, "d-123");
                assert_eq!(data["subject"], "Kept");
                assert_eq!(data["message"], "You have been assigned <strong>T1</strong>");
                assert_eq!(data["name"], "Ana");
            }
            other => panic!("expected dynamic content, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_content_is_render_error() {
        let renderer = renderer_with(vec![]).await;
        let mut n = notification(Channel::Sms, None);
        n.message = Some("   ".into());
        let err = renderer.render(&n).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Render(_)));
    }
}
