use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::RunQueryDsl;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{DbConnection, DbPool};
use crate::error::{NotifierError, Result};
use crate::schema::{notification_preferences, notification_templates, notifications};
use crate::store::{NotificationStore, Page, PageRequest, PreferenceStore, TemplateStore};
use crate::types::{
    Channel, Notification, NotificationPreferences, NotificationStatus, NotificationTemplate,
    NotificationType,
};

async fn connection(pool: &DbPool) -> Result<DbConnection> {
    pool.get()
        .await
        .map_err(|e| NotifierError::Pool(e.to_string()))
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
struct NotificationRow {
    id: Uuid,
    user_id: String,
    recipient_address: Option<String>,
    notification_type: String,
    channel: String,
    status: String,
    subject: Option<String>,
    message: Option<String>,
    template_id: Option<String>,
    template_data: Value,
    related_entity_id: Option<String>,
    related_entity_type: Option<String>,
    created_at: DateTime<Utc>,
    scheduled_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    retry_count: i32,
    error_message: Option<String>,
    metadata: Value,
}

impl From<&Notification> for NotificationRow {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id,
            user_id: n.user_id.clone(),
            recipient_address: n.recipient_address.clone(),
            notification_type: n.notification_type.as_str().to_string(),
            channel: n.channel.as_str().to_string(),
            status: n.status.as_str().to_string(),
            subject: n.subject.clone(),
            message: n.message.clone(),
            template_id: n.template_id.clone(),
            template_data: Value::Object(n.template_data.clone()),
            related_entity_id: n.related_entity_id.clone(),
            related_entity_type: n.related_entity_type.clone(),
            created_at: n.created_at,
            scheduled_at: n.scheduled_at,
            sent_at: n.sent_at,
            delivered_at: n.delivered_at,
            retry_count: n.retry_count,
            error_message: n.error_message.clone(),
            metadata: Value::Object(n.metadata.clone()),
        }
    }
}

impl TryFrom<NotificationRow> for Notification {
    type Error = NotifierError;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            recipient_address: row.recipient_address,
            notification_type: row.notification_type.parse()?,
            channel: row.channel.parse()?,
            status: row.status.parse()?,
            subject: row.subject,
            message: row.message,
            template_id: row.template_id,
            template_data: into_object(row.template_data),
            related_entity_id: row.related_entity_id,
            related_entity_type: row.related_entity_type,
            created_at: row.created_at,
            scheduled_at: row.scheduled_at,
            sent_at: row.sent_at,
            delivered_at: row.delivered_at,
            retry_count: row.retry_count,
            error_message: row.error_message,
            metadata: into_object(row.metadata),
        })
    }
}

fn into_notifications(rows: Vec<NotificationRow>) -> Result<Vec<Notification>> {
    rows.into_iter().map(Notification::try_from).collect()
}

#[derive(Clone)]
pub struct PgNotificationStore {
    pool: Arc<DbPool>,
}

impl PgNotificationStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn insert_batch(&self, batch: Vec<Notification>) -> Result<Vec<Notification>> {
        if batch.is_empty() {
            return Ok(batch);
        }
        let mut conn = connection(&self.pool).await?;
        let rows: Vec<NotificationRow> = batch.iter().map(NotificationRow::from).collect();

        // A single multi-row INSERT commits or fails as a whole.
        let inserted: Vec<Uuid> = diesel::insert_into(notifications::table)
            .values(&rows)
            .on_conflict(notifications::id)
            .do_nothing()
            .returning(notifications::id)
            .get_results(&mut conn)
            .await?;

        let inserted: HashSet<Uuid> = inserted.into_iter().collect();
        Ok(batch
            .into_iter()
            .filter(|n| inserted.contains(&n.id))
            .collect())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>> {
        let mut conn = connection(&self.pool).await?;
        let row = notifications::table
            .find(id)
            .select(NotificationRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(Notification::try_from).transpose()
    }

    async fn save(&self, notification: &Notification) -> Result<()> {
        let mut conn = connection(&self.pool).await?;
        let row = NotificationRow::from(notification);
        diesel::insert_into(notifications::table)
            .values(&row)
            .on_conflict(notifications::id)
            .do_update()
            .set(&row)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        orphaned_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let mut conn = connection(&self.pool).await?;
        let rows = notifications::table
            .filter(notifications::status.eq(NotificationStatus::Pending.as_str()))
            .filter(
                notifications::scheduled_at.le(now).or(notifications::scheduled_at
                    .is_null()
                    .and(notifications::created_at.le(orphaned_before))
                    .nullable()),
            )
            .order(notifications::created_at.asc())
            .limit(limit)
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;
        into_notifications(rows)
    }

    async fn find_retrying(&self, max_retries: i32, limit: i64) -> Result<Vec<Notification>> {
        let mut conn = connection(&self.pool).await?;
        let rows = notifications::table
            .filter(notifications::status.eq(NotificationStatus::Retrying.as_str()))
            .filter(notifications::retry_count.lt(max_retries))
            .order(notifications::scheduled_at.asc())
            .limit(limit)
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;
        into_notifications(rows)
    }

    async fn find_by_user(&self, user_id: &str, page: PageRequest) -> Result<Page<Notification>> {
        let mut conn = connection(&self.pool).await?;
        let total: i64 = notifications::table
            .filter(notifications::user_id.eq(user_id))
            .count()
            .get_result(&mut conn)
            .await?;
        let rows = notifications::table
            .filter(notifications::user_id.eq(user_id))
            .order(notifications::created_at.desc())
            .limit(page.size)
            .offset(page.offset())
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;
        Ok(Page::new(into_notifications(rows)?, page, total))
    }

    async fn find_by_related_entity(
        &self,
        entity_id: &str,
        entity_type: &str,
    ) -> Result<Vec<Notification>> {
        let mut conn = connection(&self.pool).await?;
        let rows = notifications::table
            .filter(notifications::related_entity_id.eq(entity_id))
            .filter(notifications::related_entity_type.eq(entity_type))
            .order(notifications::created_at.desc())
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;
        into_notifications(rows)
    }

    async fn count_by_user_and_status(
        &self,
        user_id: &str,
        status: NotificationStatus,
    ) -> Result<i64> {
        let mut conn = connection(&self.pool).await?;
        let count = notifications::table
            .filter(notifications::user_id.eq(user_id))
            .filter(notifications::status.eq(status.as_str()))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count)
    }

    async fn find_completed_before(
        &self,
        cutoff: DateTime<Utc>,
        max_retries: i32,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        let mut conn = connection(&self.pool).await?;
        let settled = vec![
            NotificationStatus::Sent.as_str(),
            NotificationStatus::Delivered.as_str(),
        ];
        let ids = notifications::table
            .filter(notifications::created_at.lt(cutoff))
            .filter(
                notifications::status.eq_any(settled).or(notifications::status
                    .eq(NotificationStatus::Failed.as_str())
                    .and(notifications::retry_count.ge(max_retries))),
            )
            .order(notifications::created_at.asc())
            .limit(limit)
            .select(notifications::id)
            .load(&mut conn)
            .await?;
        Ok(ids)
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = notification_preferences)]
#[diesel(primary_key(user_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct PreferencesRow {
    user_id: String,
    channel_preferences: Value,
    email_enabled: bool,
    in_app_enabled: bool,
    sms_enabled: bool,
    push_enabled: bool,
    immediate_notifications: bool,
    digest_frequency: String,
    quiet_hours_start: String,
    quiet_hours_end: String,
    timezone: String,
    task_reminders: bool,
    reminder_minutes_before: i32,
    overdue_notifications: bool,
    collaboration_notifications: bool,
    system_notifications: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<&NotificationPreferences> for PreferencesRow {
    type Error = NotifierError;

    fn try_from(p: &NotificationPreferences) -> Result<Self> {
        Ok(Self {
            user_id: p.user_id.clone(),
            channel_preferences: serde_json::to_value(&p.channel_preferences)?,
            email_enabled: p.email_enabled,
            in_app_enabled: p.in_app_enabled,
            sms_enabled: p.sms_enabled,
            push_enabled: p.push_enabled,
            immediate_notifications: p.immediate_notifications,
            digest_frequency: p.digest_frequency.clone(),
            quiet_hours_start: p.quiet_hours_start.clone(),
            quiet_hours_end: p.quiet_hours_end.clone(),
            timezone: p.timezone.clone(),
            task_reminders: p.task_reminders,
            reminder_minutes_before: p.reminder_minutes_before,
            overdue_notifications: p.overdue_notifications,
            collaboration_notifications: p.collaboration_notifications,
            system_notifications: p.system_notifications,
            created_at: p.created_at,
            updated_at: p.updated_at,
        })
    }
}

impl TryFrom<PreferencesRow> for NotificationPreferences {
    type Error = NotifierError;

    fn try_from(row: PreferencesRow) -> Result<Self> {
        Ok(Self {
            user_id: row.user_id,
            channel_preferences: serde_json::from_value(row.channel_preferences)?,
            email_enabled: row.email_enabled,
            in_app_enabled: row.in_app_enabled,
            sms_enabled: row.sms_enabled,
            push_enabled: row.push_enabled,
            immediate_notifications: row.immediate_notifications,
            digest_frequency: row.digest_frequency,
            quiet_hours_start: row.quiet_hours_start,
            quiet_hours_end: row.quiet_hours_end,
            timezone: row.timezone,
            task_reminders: row.task_reminders,
            reminder_minutes_before: row.reminder_minutes_before,
            overdue_notifications: row.overdue_notifications,
            collaboration_notifications: row.collaboration_notifications,
            system_notifications: row.system_notifications,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgPreferenceStore {
    pool: Arc<DbPool>,
}

impl PgPreferenceStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferenceStore for PgPreferenceStore {
    async fn find(&self, user_id: &str) -> Result<Option<NotificationPreferences>> {
        let mut conn = connection(&self.pool).await?;
        let row = notification_preferences::table
            .find(user_id)
            .select(PreferencesRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(NotificationPreferences::try_from).transpose()
    }

    async fn insert_if_absent(
        &self,
        preferences: NotificationPreferences,
    ) -> Result<NotificationPreferences> {
        let mut conn = connection(&self.pool).await?;
        let row = PreferencesRow::try_from(&preferences)?;
        diesel::insert_into(notification_preferences::table)
            .values(&row)
            .on_conflict(notification_preferences::user_id)
            .do_nothing()
            .execute(&mut conn)
            .await?;

        let stored = notification_preferences::table
            .find(&preferences.user_id)
            .select(PreferencesRow::as_select())
            .first(&mut conn)
            .await?;
        NotificationPreferences::try_from(stored)
    }

    async fn save(&self, preferences: &NotificationPreferences) -> Result<()> {
        let mut conn = connection(&self.pool).await?;
        let row = PreferencesRow::try_from(preferences)?;
        diesel::insert_into(notification_preferences::table)
            .values(&row)
            .on_conflict(notification_preferences::user_id)
            .do_update()
            .set(&row)
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = notification_templates)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct TemplateRow {
    id: String,
    name: String,
    notification_type: String,
    channel: String,
    subject: Option<String>,
    html_content: Option<String>,
    text_content: Option<String>,
    external_template_ref: Option<String>,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&NotificationTemplate> for TemplateRow {
    fn from(t: &NotificationTemplate) -> Self {
        Self {
            id: t.id.clone(),
            name: t.name.clone(),
            notification_type: t.notification_type.as_str().to_string(),
            channel: t.channel.as_str().to_string(),
            subject: t.subject.clone(),
            html_content: t.html_content.clone(),
            text_content: t.text_content.clone(),
            external_template_ref: t.external_template_ref.clone(),
            active: t.active,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

impl TryFrom<TemplateRow> for NotificationTemplate {
    type Error = NotifierError;

    fn try_from(row: TemplateRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            notification_type: row.notification_type.parse()?,
            channel: row.channel.parse()?,
            subject: row.subject,
            html_content: row.html_content,
            text_content: row.text_content,
            external_template_ref: row.external_template_ref,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgTemplateStore {
    pool: Arc<DbPool>,
}

impl PgTemplateStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateStore for PgTemplateStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<NotificationTemplate>> {
        let mut conn = connection(&self.pool).await?;
        let row = notification_templates::table
            .find(id)
            .select(TemplateRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(NotificationTemplate::try_from).transpose()
    }

    async fn find_active(
        &self,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<Option<NotificationTemplate>> {
        let mut conn = connection(&self.pool).await?;
        let row = notification_templates::table
            .filter(notification_templates::notification_type.eq(notification_type.as_str()))
            .filter(notification_templates::channel.eq(channel.as_str()))
            .filter(notification_templates::active.eq(true))
            .order(notification_templates::updated_at.desc())
            .select(TemplateRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(NotificationTemplate::try_from).transpose()
    }

    async fn save(&self, template: &NotificationTemplate) -> Result<()> {
        let mut conn = connection(&self.pool).await?;
        let row = TemplateRow::from(template);
        diesel::insert_into(notification_templates::table)
            .values(&row)
            .on_conflict(notification_templates::id)
            .do_update()
            .set((
                notification_templates::name.eq(excluded(notification_templates::name)),
                notification_templates::notification_type
                    .eq(excluded(notification_templates::notification_type)),
                notification_templates::channel.eq(excluded(notification_templates::channel)),
                notification_templates::subject.eq(excluded(notification_templates::subject)),
                notification_templates::html_content
                    .eq(excluded(notification_templates::html_content)),
                notification_templates::text_content
                    .eq(excluded(notification_templates::text_content)),
                notification_templates::external_template_ref
                    .eq(excluded(notification_templates::external_template_ref)),
                notification_templates::active.eq(excluded(notification_templates::active)),
                notification_templates::updated_at
                    .eq(excluded(notification_templates::updated_at)),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}
