use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{NotifierError, Result};
use crate::retry::RetryPolicy;

/// Ordered key/value data handed to templates.
pub type TemplateData = Map<String, Value>;

/// Dispatch window: anything scheduled before `now + IMMEDIATE_WINDOW` goes out right away.
pub const IMMEDIATE_WINDOW_SECS: i64 = 60;

macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = NotifierError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(NotifierError::Validation(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    TaskCreated,
    TaskUpdated,
    TaskCompleted,
    TaskAssigned,
    TaskDueReminder,
    TaskOverdue,
    SubtaskCompleted,
    CommentAdded,
    CollaborationInvite,
    SystemNotification,
}

wire_enum!(NotificationType {
    TaskCreated => "TASK_CREATED",
    TaskUpdated => "TASK_UPDATED",
    TaskCompleted => "TASK_COMPLETED",
    TaskAssigned => "TASK_ASSIGNED",
    TaskDueReminder => "TASK_DUE_REMINDER",
    TaskOverdue => "TASK_OVERDUE",
    SubtaskCompleted => "SUBTASK_COMPLETED",
    CommentAdded => "COMMENT_ADDED",
    CollaborationInvite => "COLLABORATION_INVITE",
    SystemNotification => "SYSTEM_NOTIFICATION",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Email,
    InApp,
    Sms,
    Push,
}

wire_enum!(Channel {
    Email => "EMAIL",
    InApp => "IN_APP",
    Sms => "SMS",
    Push => "PUSH",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    Retrying,
}

wire_enum!(NotificationStatus {
    Pending => "PENDING",
    Sent => "SENT",
    Delivered => "DELIVERED",
    Failed => "FAILED",
    Retrying => "RETRYING",
});

/// A single channel delivery of one notification intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub recipient_address: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub channel: Channel,
    pub status: NotificationStatus,
    pub subject: Option<String>,
    pub message: Option<String>,
    pub template_id: Option<String>,
    #[serde(default)]
    pub template_data: TemplateData,
    pub related_entity_id: Option<String>,
    pub related_entity_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// What the failure handler decided for a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    RetryScheduled {
        retry_count: i32,
        retry_at: DateTime<Utc>,
    },
    Exhausted {
        retry_count: i32,
    },
}

impl Notification {
    /// Builds the PENDING row for one channel of a request.
    pub fn from_request(request: &NotificationRequest, channel: Channel, now: DateTime<Utc>) -> Self {
        Self {
            id: Self::fan_out_id(request.request_id.as_deref(), channel),
            user_id: request.user_id.clone(),
            recipient_address: request.recipient_for(channel),
            notification_type: request.notification_type,
            channel,
            status: NotificationStatus::Pending,
            subject: request.subject.clone(),
            message: request.message.clone(),
            template_id: request.template_id.clone(),
            template_data: request.template_data.clone(),
            related_entity_id: request.related_entity_id.clone(),
            related_entity_type: request.related_entity_type.clone(),
            created_at: now,
            scheduled_at: request.scheduled_at,
            sent_at: None,
            delivered_at: None,
            retry_count: 0,
            error_message: None,
            metadata: request.metadata.clone(),
        }
    }

    /// Request-keyed ids are stable across redeliveries; anonymous requests get a random id.
    pub fn fan_out_id(request_id: Option<&str>, channel: Channel) -> Uuid {
        match request_id {
            Some(key) if !key.trim().is_empty() => Uuid::new_v5(
                &Uuid::NAMESPACE_OID,
                format!("{}:{}", key, channel.as_str()).as_bytes(),
            ),
            _ => Uuid::new_v4(),
        }
    }

    pub fn is_immediate(&self, now: DateTime<Utc>) -> bool {
        match self.scheduled_at {
            None => true,
            Some(at) => at < now + Duration::seconds(IMMEDIATE_WINDOW_SECS),
        }
    }

    /// SENT and DELIVERED rows must not be attempted again.
    pub fn is_settled(&self) -> bool {
        matches!(
            self.status,
            NotificationStatus::Sent | NotificationStatus::Delivered
        )
    }

    pub fn is_terminal(&self, policy: &RetryPolicy) -> bool {
        self.is_settled()
            || (self.status == NotificationStatus::Failed && !policy.should_retry(self.retry_count))
    }

    pub fn mark_sent(&mut self, at: DateTime<Utc>) {
        self.status = NotificationStatus::Sent;
        self.sent_at = Some(at);
        self.error_message = None;
    }

    pub fn record_failure(
        &mut self,
        reason: impl Into<String>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> FailureOutcome {
        self.retry_count += 1;
        self.status = NotificationStatus::Failed;
        self.error_message = Some(reason.into());

        if policy.should_retry(self.retry_count) {
            let retry_at = now + policy.delay_for(self.retry_count);
            self.scheduled_at = Some(retry_at);
            self.status = NotificationStatus::Retrying;
            FailureOutcome::RetryScheduled {
                retry_count: self.retry_count,
                retry_at,
            }
        } else {
            FailureOutcome::Exhausted {
                retry_count: self.retry_count,
            }
        }
    }

    pub fn confirm_delivery(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.status != NotificationStatus::Sent {
            return Err(NotifierError::InvalidTransition {
                from: self.status,
                to: NotificationStatus::Delivered,
            });
        }
        self.status = NotificationStatus::Delivered;
        self.delivered_at = Some(at);
        Ok(())
    }
}

/// Inbound notification intent, from the HTTP API or the request topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default, alias = "recipientEmail")]
    pub recipient_address: Option<String>,
    /// Per-channel destinations, e.g. a device token for PUSH or a phone number for SMS.
    #[serde(default)]
    pub recipients: BTreeMap<Channel, String>,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub channels: Option<Vec<Channel>>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub template_data: TemplateData,
    #[serde(default)]
    pub related_entity_id: Option<String>,
    #[serde(default)]
    pub related_entity_type: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl NotificationRequest {
    pub fn new(user_id: impl Into<String>, notification_type: NotificationType) -> Self {
        Self {
            request_id: None,
            user_id: user_id.into(),
            recipient_address: None,
            recipients: BTreeMap::new(),
            notification_type,
            channels: None,
            subject: None,
            message: None,
            template_id: None,
            template_data: TemplateData::new(),
            related_entity_id: None,
            related_entity_type: None,
            scheduled_at: None,
            metadata: Map::new(),
        }
    }

    /// Destination for one channel of the fan-out. A `recipients` entry wins.
    /// The shared `recipientAddress` serves EMAIL and IN_APP, and PUSH or SMS
    /// only when that channel is the single explicit target.
    pub fn recipient_for(&self, channel: Channel) -> Option<String> {
        if let Some(address) = self.recipients.get(&channel) {
            return Some(address.clone());
        }
        let shared_applies = match channel {
            Channel::Email | Channel::InApp => true,
            Channel::Push | Channel::Sms => self.channels.as_deref() == Some(&[channel][..]),
        };
        self.recipient_address.clone().filter(|_| shared_applies)
    }
}

/// Public projection of a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    pub id: Uuid,
    pub user_id: String,
    pub recipient_address: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub channel: Channel,
    pub status: NotificationStatus,
    pub subject: Option<String>,
    pub message: Option<String>,
    pub related_entity_id: Option<String>,
    pub related_entity_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub metadata: Map<String, Value>,
}

impl From<&Notification> for NotificationResponse {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id,
            user_id: n.user_id.clone(),
            recipient_address: n.recipient_address.clone(),
            notification_type: n.notification_type,
            channel: n.channel,
            status: n.status,
            subject: n.subject.clone(),
            message: n.message.clone(),
            related_entity_id: n.related_entity_id.clone(),
            related_entity_type: n.related_entity_type.clone(),
            created_at: n.created_at,
            scheduled_at: n.scheduled_at,
            sent_at: n.sent_at,
            delivered_at: n.delivered_at,
            retry_count: n.retry_count,
            error_message: n.error_message.clone(),
            metadata: n.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub user_id: String,
    pub channel_preferences: BTreeMap<NotificationType, BTreeSet<Channel>>,
    pub email_enabled: bool,
    pub in_app_enabled: bool,
    pub sms_enabled: bool,
    pub push_enabled: bool,
    pub immediate_notifications: bool,
    pub digest_frequency: String,
    pub quiet_hours_start: String,
    pub quiet_hours_end: String,
    pub timezone: String,
    pub task_reminders: bool,
    pub reminder_minutes_before: i32,
    pub overdue_notifications: bool,
    pub collaboration_notifications: bool,
    pub system_notifications: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreferences {
    /// Global on/off switch for a channel.
    pub fn channel_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email_enabled,
            Channel::InApp => self.in_app_enabled,
            Channel::Sms => self.sms_enabled,
            Channel::Push => self.push_enabled,
        }
    }

    pub fn allows(&self, notification_type: NotificationType, channel: Channel) -> bool {
        self.channel_enabled(channel)
            && self
                .channel_preferences
                .get(&notification_type)
                .map(|channels| channels.contains(&channel))
                .unwrap_or(false)
    }

    pub fn apply(&mut self, update: PreferencesUpdate, now: DateTime<Utc>) {
        if let Some(channel_preferences) = update.channel_preferences {
            self.channel_preferences = channel_preferences;
        }
        self.email_enabled = update.email_enabled;
        self.in_app_enabled = update.in_app_enabled;
        self.sms_enabled = update.sms_enabled;
        self.push_enabled = update.push_enabled;
        self.immediate_notifications = update.immediate_notifications;
        if let Some(digest_frequency) = update.digest_frequency {
            self.digest_frequency = digest_frequency;
        }
        if let Some(start) = update.quiet_hours_start {
            self.quiet_hours_start = start;
        }
        if let Some(end) = update.quiet_hours_end {
            self.quiet_hours_end = end;
        }
        if let Some(timezone) = update.timezone {
            self.timezone = timezone;
        }
        self.task_reminders = update.task_reminders;
        self.reminder_minutes_before = update.reminder_minutes_before;
        self.overdue_notifications = update.overdue_notifications;
        self.collaboration_notifications = update.collaboration_notifications;
        self.system_notifications = update.system_notifications;
        self.updated_at = now;
    }
}

/// Wholesale preferences update. Omitted booleans read as `false`;
/// omitted text fields and mapping keep their stored values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreferencesUpdate {
    pub user_id: String,
    pub channel_preferences: Option<BTreeMap<NotificationType, BTreeSet<Channel>>>,
    pub email_enabled: bool,
    pub in_app_enabled: bool,
    pub sms_enabled: bool,
    pub push_enabled: bool,
    pub immediate_notifications: bool,
    pub digest_frequency: Option<String>,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    pub timezone: Option<String>,
    pub task_reminders: bool,
    pub reminder_minutes_before: i32,
    pub overdue_notifications: bool,
    pub collaboration_notifications: bool,
    pub system_notifications: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTemplate {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub channel: Channel,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub html_content: Option<String>,
    #[serde(default)]
    pub text_content: Option<String>,
    #[serde(default)]
    pub external_template_ref: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

/// Task lifecycle event published by the task service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    #[serde(default)]
    pub event_id: Option<String>,
    pub event_type: String,
    pub task_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub assigned_user_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub updated_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}
