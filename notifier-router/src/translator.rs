use notifier_core::{Channel, NotificationRequest, NotificationType, TaskEvent, TemplateData};
use serde_json::Value;
use std::collections::BTreeMap;

pub const TASK_ENTITY_TYPE: &str = "task";

/// Task event kinds the notification service reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEventKind {
    Created,
    Updated,
    Completed,
    Assigned,
    DueReminder,
    Overdue,
}

impl TaskEventKind {
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type.trim().to_ascii_uppercase().as_str() {
            "CREATED" => Some(Self::Created),
            "UPDATED" => Some(Self::Updated),
            "COMPLETED" => Some(Self::Completed),
            "ASSIGNED" => Some(Self::Assigned),
            "DUE_REMINDER" => Some(Self::DueReminder),
            "OVERDUE" => Some(Self::Overdue),
            _ => None,
        }
    }

    pub fn notification_type(&self) -> NotificationType {
        match self {
            Self::Created => NotificationType::TaskCreated,
            Self::Updated => NotificationType::TaskUpdated,
            Self::Completed => NotificationType::TaskCompleted,
            Self::Assigned => NotificationType::TaskAssigned,
            Self::DueReminder => NotificationType::TaskDueReminder,
            Self::Overdue => NotificationType::TaskOverdue,
        }
    }

    pub fn default_channels(&self) -> Vec<Channel> {
        match self {
            Self::DueReminder | Self::Overdue => vec![Channel::Email, Channel::Push],
            Self::Assigned => vec![Channel::Email, Channel::InApp],
            Self::Created | Self::Updated | Self::Completed => vec![Channel::InApp],
        }
    }

    fn subject(&self, title: &str) -> String {
        let prefix = match self {
            Self::Created => "New Task Created",
            Self::Updated => "Task Updated",
            Self::Completed => "Task Completed",
            Self::Assigned => "Task Assigned to You",
            Self::DueReminder => "Task Due Soon",
            Self::Overdue => "Task Overdue",
        };
        format!("{}: {}", prefix, title)
    }

    fn headline(&self, title: &str) -> String {
        match self {
            Self::Created => format!("A new task has been created: <strong>{}</strong>", title),
            Self::Updated => format!("Task <strong>{}</strong> has been updated", title),
            Self::Completed => format!("Task <strong>{}</strong> has been completed", title),
            Self::Assigned => {
                format!("You have been assigned to task: <strong>{}</strong>", title)
            }
            Self::DueReminder => format!("Task <strong>{}</strong> is due soon", title),
            Self::Overdue => format!("Task <strong>{}</strong> is overdue", title),
        }
    }
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.trim().is_empty())
}

fn recipient(event: &TaskEvent, kind: TaskEventKind) -> Option<String> {
    let assignee = match kind {
        TaskEventKind::Assigned => non_blank(event.assigned_user_id.as_ref()),
        _ => None,
    };
    assignee
        .or_else(|| non_blank(event.user_id.as_ref()))
        .map(str::to_string)
}

fn message(event: &TaskEvent, kind: TaskEventKind) -> String {
    let mut message = kind.headline(&event.title);
    if let Some(description) = non_blank(event.description.as_ref()) {
        message.push_str("<br><br>Description: ");
        message.push_str(description);
    }
    if let Some(due_date) = event.due_date {
        message.push_str("<br>Due Date: ");
        message.push_str(&due_date.format("%Y-%m-%d %H:%M").to_string());
    }
    if let Some(priority) = &event.priority {
        message.push_str("<br>Priority: ");
        message.push_str(priority);
    }
    message
}

fn template_data(event: &TaskEvent) -> TemplateData {
    let optional = |value: &Option<String>| value.clone().map(Value::String).unwrap_or(Value::Null);

    let mut data = TemplateData::new();
    data.insert("taskId".into(), Value::String(event.task_id.clone()));
    data.insert("taskTitle".into(), Value::String(event.title.clone()));
    data.insert("taskDescription".into(), optional(&event.description));
    data.insert("taskPriority".into(), optional(&event.priority));
    data.insert("taskStatus".into(), optional(&event.status));
    data.insert(
        "dueDate".into(),
        event
            .due_date
            .map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S").to_string()))
            .unwrap_or(Value::Null),
    );
    data.insert("eventType".into(), Value::String(event.event_type.clone()));
    data
}

/// Channels named in `metadata.channels`; unknown names are ignored.
fn explicit_channels(event: &TaskEvent) -> Option<Vec<Channel>> {
    let names = event.metadata.get("channels")?.as_array()?;
    let channels: Vec<Channel> = names
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|name| match name.to_ascii_uppercase().parse::<Channel>() {
            Ok(channel) => Some(channel),
            Err(_) => {
                tracing::warn!(task_id = %event.task_id, "Ignoring unknown channel '{}'", name);
                None
            }
        })
        .collect();
    (!channels.is_empty()).then_some(channels)
}

fn recipient_address(event: &TaskEvent) -> Option<String> {
    ["recipientAddress", "recipientEmail"]
        .iter()
        .find_map(|key| event.metadata.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Per-channel destinations carried in event metadata.
fn channel_recipients(event: &TaskEvent) -> BTreeMap<Channel, String> {
    [(Channel::Push, "deviceToken"), (Channel::Sms, "phoneNumber")]
        .into_iter()
        .filter_map(|(channel, key)| {
            let value = event.metadata.get(key).and_then(Value::as_str)?;
            (!value.trim().is_empty()).then(|| (channel, value.to_string()))
        })
        .collect()
}

/// Maps a task event onto a notification request. Returns `None` for event
/// types that do not notify anyone or events without a recipient.
pub fn translate(event: &TaskEvent) -> Option<NotificationRequest> {
    let Some(kind) = TaskEventKind::parse(&event.event_type) else {
        tracing::warn!(
            task_id = %event.task_id,
            "Unknown task event type: {}",
            event.event_type
        );
        return None;
    };

    let Some(user_id) = recipient(event, kind) else {
        tracing::warn!(
            task_id = %event.task_id,
            event_type = %event.event_type,
            "Task event has no recipient, dropping"
        );
        return None;
    };

    let mut request = NotificationRequest::new(user_id, kind.notification_type());
    request.request_id = event
        .event_id
        .as_ref()
        .map(|id| format!("task-event:{}", id));
    request.recipient_address = recipient_address(event);
    request.recipients = channel_recipients(event);
    request.channels = Some(explicit_channels(event).unwrap_or_else(|| kind.default_channels()));
    request.subject = Some(kind.subject(&event.title));
    request.message = Some(message(event, kind));
    request.template_data = template_data(event);
    request.related_entity_id = Some(event.task_id.clone());
    request.related_entity_type = Some(TASK_ENTITY_TYPE.to_string());
    Some(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn event(event_type: &str) -> TaskEvent {
        TaskEvent {
            event_id: Some("evt-1".into()),
            event_type: event_type.into(),
            task_id: "task-1".into(),
            user_id: Some("owner".into()),
            assigned_user_id: Some("assignee".into()),
            title: "T1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_due_reminder() {
        let mut e = event("DUE_REMINDER");
        e.due_date = NaiveDate::from_ymd_opt(2024, 5, 1).and_then(|d| d.and_hms_opt(9, 30, 0));
        e.priority = Some("HIGH".into());

        let request = translate(&e).unwrap();
        assert_eq!(request.notification_type, NotificationType::TaskDueReminder);
        assert_eq!(request.user_id, "owner");
        assert_eq!(request.channels, Some(vec![Channel::Email, Channel::Push]));
        assert_eq!(request.subject.as_deref(), Some("Task Due Soon: T1"));
        assert_eq!(
            request.message.as_deref(),
            Some("Task <strong>T1</strong> is due soon<br>Due Date: 2024-05-01 09:30<br>Priority: HIGH")
        );
        assert_eq!(request.related_entity_id.as_deref(), Some("task-1"));
        assert_eq!(request.related_entity_type.as_deref(), Some("task"));
        assert_eq!(request.request_id.as_deref(), Some("task-event:evt-1"));
        assert_eq!(request.template_data["dueDate"], "2024-05-01T09:30:00");
    }

    #[test]
    fn test_assigned_goes_to_assignee() {
        let request = translate(&event("assigned")).unwrap();
        assert_eq!(request.user_id, "assignee");
        assert_eq!(request.channels, Some(vec![Channel::Email, Channel::InApp]));
        assert_eq!(request.subject.as_deref(), Some("Task Assigned to You: T1"));
    }

    #[test]
    fn test_assigned_without_assignee_falls_back_to_owner() {
        let mut e = event("ASSIGNED");
        e.assigned_user_id = None;
        assert_eq!(translate(&e).unwrap().user_id, "owner");
    }

    #[test]
    fn test_other_events_go_to_owner_in_app() {
        let request = translate(&event("COMPLETED")).unwrap();
        assert_eq!(request.user_id, "owner");
        assert_eq!(request.channels, Some(vec![Channel::InApp]));
        assert_eq!(
            request.message.as_deref(),
            Some("Task <strong>T1</strong> has been completed")
        );
    }

    #[test]
    fn test_description_section() {
        let mut e = event("CREATED");
        e.description = Some("Write the report".into());
        assert_eq!(
            translate(&e).unwrap().message.as_deref(),
            Some("A new task has been created: <strong>T1</strong><br><br>Description: Write the report")
        );
    }

    #[test]
    fn test_unknown_type_and_missing_recipient_are_dropped() {
        assert!(translate(&event("ARCHIVED")).is_none());
        let mut e = event("UPDATED");
        e.user_id = None;
        assert!(translate(&e).is_none());
    }

    #[test]
    fn test_metadata_channels_override_defaults() {
        let mut e = event("CREATED");
        e.metadata.insert("channels".into(), json!(["email", "SMS", "FAX"]));
        e.metadata.insert("recipientEmail".into(), json!("owner@example.com"));
        let request = translate(&e).unwrap();
        assert_eq!(request.channels, Some(vec![Channel::Email, Channel::Sms]));
        assert_eq!(request.recipient_address.as_deref(), Some("owner@example.com"));
    }

    #[test]
    fn test_channel_destinations_from_metadata() {
        let mut e = event("OVERDUE");
        e.metadata.insert("recipientEmail".into(), json!("owner@example.com"));
        e.metadata.insert("deviceToken".into(), json!("a1b2c3"));
        e.metadata.insert("phoneNumber".into(), json!(" "));
        let request = translate(&e).unwrap();
        assert_eq!(request.recipients.get(&Channel::Push).map(String::as_str), Some("a1b2c3"));
        assert!(!request.recipients.contains_key(&Channel::Sms));
        assert_eq!(request.recipient_for(Channel::Email).as_deref(), Some("owner@example.com"));
        assert_eq!(request.recipient_for(Channel::Push).as_deref(), Some("a1b2c3"));
    }

    #[test]
    fn test_template_data_order() {
        let request = translate(&event("UPDATED")).unwrap();
        let keys: Vec<&str> = request.template_data.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "taskId",
                "taskTitle",
                "taskDescription",
                "taskPriority",
                "taskStatus",
                "dueDate",
                "eventType"
            ]
        );
        assert_eq!(request.template_data["taskDescription"], Value::Null);
    }
}
