//! In-memory stores backed by `DashMap`, used by tests and local runs without Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::store::{NotificationStore, Page, PageRequest, PreferenceStore, TemplateStore};
use crate::types::{
    Channel, Notification, NotificationPreferences, NotificationStatus, NotificationTemplate,
    NotificationType,
};

#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationStore {
    rows: Arc<DashMap<Uuid, Notification>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.rows.iter().map(|entry| entry.value().clone()).collect()
    }

    fn select<F>(&self, predicate: F) -> Vec<Notification>
    where
        F: Fn(&Notification) -> bool,
    {
        self.rows
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert_batch(&self, notifications: Vec<Notification>) -> Result<Vec<Notification>> {
        let mut inserted = Vec::with_capacity(notifications.len());
        for notification in notifications {
            if let Entry::Vacant(slot) = self.rows.entry(notification.id) {
                slot.insert(notification.clone());
                inserted.push(notification);
            }
        }
        Ok(inserted)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>> {
        Ok(self.rows.get(&id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, notification: &Notification) -> Result<()> {
        self.rows.insert(notification.id, notification.clone());
        Ok(())
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        orphaned_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let mut due = self.select(|n| {
            n.status == NotificationStatus::Pending
                && match n.scheduled_at {
                    Some(at) => at <= now,
                    None => n.created_at <= orphaned_before,
                }
        });
        due.sort_by_key(|n| n.scheduled_at.unwrap_or(n.created_at));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn find_retrying(&self, max_retries: i32, limit: i64) -> Result<Vec<Notification>> {
        let mut retrying = self.select(|n| {
            n.status == NotificationStatus::Retrying && n.retry_count < max_retries
        });
        retrying.sort_by_key(|n| n.scheduled_at);
        retrying.truncate(limit.max(0) as usize);
        Ok(retrying)
    }

    async fn find_by_user(&self, user_id: &str, page: PageRequest) -> Result<Page<Notification>> {
        let mut rows = self.select(|n| n.user_id == user_id);
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = rows.len() as i64;
        let content = rows
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect();
        Ok(Page::new(content, page, total))
    }

    async fn find_by_related_entity(
        &self,
        entity_id: &str,
        entity_type: &str,
    ) -> Result<Vec<Notification>> {
        let mut rows = self.select(|n| {
            n.related_entity_id.as_deref() == Some(entity_id)
                && n.related_entity_type.as_deref() == Some(entity_type)
        });
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn count_by_user_and_status(
        &self,
        user_id: &str,
        status: NotificationStatus,
    ) -> Result<i64> {
        Ok(self
            .rows
            .iter()
            .filter(|entry| entry.user_id == user_id && entry.status == status)
            .count() as i64)
    }

    async fn find_completed_before(
        &self,
        cutoff: DateTime<Utc>,
        max_retries: i32,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        let mut rows = self.select(|n| {
            n.created_at < cutoff
                && match n.status {
                    NotificationStatus::Sent | NotificationStatus::Delivered => true,
                    NotificationStatus::Failed => n.retry_count >= max_retries,
                    _ => false,
                }
        });
        rows.sort_by_key(|n| n.created_at);
        Ok(rows
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|n| n.id)
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryPreferenceStore {
    rows: Arc<DashMap<String, NotificationPreferences>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn find(&self, user_id: &str) -> Result<Option<NotificationPreferences>> {
        Ok(self.rows.get(user_id).map(|entry| entry.value().clone()))
    }

    async fn insert_if_absent(
        &self,
        preferences: NotificationPreferences,
    ) -> Result<NotificationPreferences> {
        let stored = self
            .rows
            .entry(preferences.user_id.clone())
            .or_insert(preferences);
        Ok(stored.value().clone())
    }

    async fn save(&self, preferences: &NotificationPreferences) -> Result<()> {
        self.rows
            .insert(preferences.user_id.clone(), preferences.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryTemplateStore {
    rows: Arc<DashMap<String, NotificationTemplate>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<NotificationTemplate>> {
        Ok(self.rows.get(id).map(|entry| entry.value().clone()))
    }

    async fn find_active(
        &self,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<Option<NotificationTemplate>> {
        Ok(self
            .rows
            .iter()
            .filter(|entry| {
                entry.active
                    && entry.notification_type == notification_type
                    && entry.channel == channel
            })
            .map(|entry| entry.value().clone())
            .max_by_key(|t| t.updated_at))
    }

    async fn save(&self, template: &NotificationTemplate) -> Result<()> {
        self.rows.insert(template.id.clone(), template.clone());
        Ok(())
    }
}
