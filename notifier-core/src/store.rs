use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    Channel, Notification, NotificationPreferences, NotificationStatus, NotificationTemplate,
    NotificationType,
};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub size: i64,
}

impl PageRequest {
    /// Clamps a caller-supplied page/size pair into a valid request.
    pub fn new(page: Option<i64>, size: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(0).max(0),
            size: size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        self.page * self.size
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: i64,
    pub size: i64,
    pub total_elements: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: PageRequest, total_elements: i64) -> Self {
        let total_pages = (total_elements + request.size - 1) / request.size;
        Self {
            content,
            page: request.page,
            size: request.size,
            total_elements,
            total_pages,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total_elements: self.total_elements,
            total_pages: self.total_pages,
        }
    }
}

/// Durable record of notifications and their delivery state.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Inserts the batch in one transaction. Rows whose id already exists are
    /// left untouched; the returned vector holds only the newly inserted rows,
    /// in input order.
    async fn insert_batch(&self, notifications: Vec<Notification>) -> Result<Vec<Notification>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>>;

    async fn save(&self, notification: &Notification) -> Result<()>;

    /// PENDING rows scheduled at or before `now`, plus unscheduled PENDING rows
    /// created at or before `orphaned_before`.
    async fn find_due(
        &self,
        now: DateTime<Utc>,
        orphaned_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>>;

    /// RETRYING rows with `retry_count < max_retries`, oldest schedule first.
    async fn find_retrying(&self, max_retries: i32, limit: i64) -> Result<Vec<Notification>>;

    /// Newest first.
    async fn find_by_user(&self, user_id: &str, page: PageRequest) -> Result<Page<Notification>>;

    async fn find_by_related_entity(
        &self,
        entity_id: &str,
        entity_type: &str,
    ) -> Result<Vec<Notification>>;

    async fn count_by_user_and_status(
        &self,
        user_id: &str,
        status: NotificationStatus,
    ) -> Result<i64>;

    /// Ids of SENT, DELIVERED or exhausted FAILED rows created before `cutoff`.
    async fn find_completed_before(
        &self,
        cutoff: DateTime<Utc>,
        max_retries: i32,
        limit: i64,
    ) -> Result<Vec<Uuid>>;
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn find(&self, user_id: &str) -> Result<Option<NotificationPreferences>>;

    /// Persists `preferences` unless a record already exists, and returns
    /// whichever record is stored afterwards.
    async fn insert_if_absent(
        &self,
        preferences: NotificationPreferences,
    ) -> Result<NotificationPreferences>;

    async fn save(&self, preferences: &NotificationPreferences) -> Result<()>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<NotificationTemplate>>;

    async fn find_active(
        &self,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<Option<NotificationTemplate>>;

    async fn save(&self, template: &NotificationTemplate) -> Result<()>;
}
