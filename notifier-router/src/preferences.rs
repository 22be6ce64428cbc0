use chrono::{DateTime, Utc};
use notifier_core::{
    Channel, NotificationPreferences, NotificationType, NotifierError, PreferenceStore,
    PreferencesUpdate,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Channel mapping given to users who never saved preferences.
pub fn default_channel_preferences() -> BTreeMap<NotificationType, BTreeSet<Channel>> {
    NotificationType::ALL
        .iter()
        .map(|t| {
            let channels = match t {
                NotificationType::TaskCreated
                | NotificationType::TaskAssigned
                | NotificationType::CommentAdded
                | NotificationType::CollaborationInvite
                | NotificationType::SystemNotification => {
                    BTreeSet::from([Channel::Email, Channel::InApp])
                }
                NotificationType::TaskUpdated
                | NotificationType::TaskCompleted
                | NotificationType::SubtaskCompleted => BTreeSet::from([Channel::InApp]),
                NotificationType::TaskDueReminder | NotificationType::TaskOverdue => {
                    BTreeSet::from([Channel::Email, Channel::Push])
                }
            };
            (*t, channels)
        })
        .collect()
}

pub fn default_preferences(user_id: &str, now: DateTime<Utc>) -> NotificationPreferences {
    NotificationPreferences {
        user_id: user_id.to_string(),
        channel_preferences: default_channel_preferences(),
        email_enabled: true,
        in_app_enabled: true,
        sms_enabled: false,
        push_enabled: true,
        immediate_notifications: true,
        digest_frequency: "daily".to_string(),
        quiet_hours_start: "22:00".to_string(),
        quiet_hours_end: "08:00".to_string(),
        timezone: "UTC".to_string(),
        task_reminders: true,
        reminder_minutes_before: 30,
        overdue_notifications: true,
        collaboration_notifications: true,
        system_notifications: true,
        created_at: now,
        updated_at: now,
    }
}

pub struct PreferenceResolver {
    store: Arc<dyn PreferenceStore>,
}

impl PreferenceResolver {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    /// Stored preferences, or defaults persisted on first access.
    pub async fn get_preferences(&self, user_id: &str) -> Result<NotificationPreferences, NotifierError> {
        if let Some(preferences) = self.store.find(user_id).await? {
            return Ok(preferences);
        }
        tracing::debug!(user_id, "Creating default notification preferences");
        self.store
            .insert_if_absent(default_preferences(user_id, Utc::now()))
            .await
    }

    pub async fn update_preferences(
        &self,
        update: PreferencesUpdate,
    ) -> Result<NotificationPreferences, NotifierError> {
        if update.user_id.trim().is_empty() {
            return Err(NotifierError::Validation("userId is required".into()));
        }
        let mut preferences = self.get_preferences(&update.user_id).await?;
        preferences.apply(update, Utc::now());
        self.store.save(&preferences).await?;
        tracing::info!(user_id = %preferences.user_id, "Updated notification preferences");
        Ok(preferences)
    }

    pub async fn is_channel_enabled_for_user(
        &self,
        user_id: &str,
        channel: Channel,
    ) -> Result<bool, NotifierError> {
        Ok(self.get_preferences(user_id).await?.channel_enabled(channel))
    }

    pub async fn should_send(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<bool, NotifierError> {
        Ok(self
            .get_preferences(user_id)
            .await?
            .allows(notification_type, channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifier_core::memory::InMemoryPreferenceStore;

    fn resolver() -> (PreferenceResolver, InMemoryPreferenceStore) {
        let store = InMemoryPreferenceStore::new();
        (PreferenceResolver::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_defaults_are_synthesized_once() {
        let (resolver, store) = resolver();

        let first = resolver.get_preferences("u1").await.unwrap();
        let second = resolver.get_preferences("u1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);

        assert!(first.email_enabled && first.in_app_enabled && first.push_enabled);
        assert!(!first.sms_enabled);
        assert_eq!(first.reminder_minutes_before, 30);
        assert_eq!(first.digest_frequency, "daily");
        assert_eq!(
            first.channel_preferences[&NotificationType::TaskOverdue],
            BTreeSet::from([Channel::Email, Channel::Push])
        );
        assert_eq!(
            first.channel_preferences[&NotificationType::SubtaskCompleted],
            BTreeSet::from([Channel::InApp])
        );
    }

    #[tokio::test]
    async fn test_concurrent_first_access_persists_one_record() {
        let (resolver, store) = resolver();
        let resolver = Arc::new(resolver);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.get_preferences("u1").await.unwrap() })
            })
            .collect();
        let mut created = Vec::new();
        for handle in handles {
            created.push(handle.await.unwrap().created_at);
        }

        assert_eq!(store.len(), 1);
        assert!(created.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_should_send() {
        let (resolver, _) = resolver();
        assert!(resolver
            .should_send("u1", NotificationType::TaskCreated, Channel::Email)
            .await
            .unwrap());
        assert!(!resolver
            .should_send("u1", NotificationType::TaskUpdated, Channel::Email)
            .await
            .unwrap());
        assert!(!resolver
            .should_send("u1", NotificationType::TaskCreated, Channel::Sms)
            .await
            .unwrap());
        assert!(!resolver
            .is_channel_enabled_for_user("u1", Channel::Sms)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_update_replaces_fields() {
        let (resolver, _) = resolver();
        let update = PreferencesUpdate {
            user_id: "u1".into(),
            channel_preferences: Some(BTreeMap::from([(
                NotificationType::TaskCreated,
                BTreeSet::from([Channel::Sms]),
            )])),
            email_enabled: true,
            sms_enabled: true,
            timezone: Some("Europe/Lisbon".into()),
            reminder_minutes_before: 15,
            ..Default::default()
        };

        let updated = resolver.update_preferences(update).await.unwrap();
        assert_eq!(updated.timezone, "Europe/Lisbon");
        assert!(!updated.in_app_enabled);
        assert!(resolver
            .should_send("u1", NotificationType::TaskCreated, Channel::Sms)
            .await
            .unwrap());
        assert!(!resolver
            .should_send("u1", NotificationType::TaskCreated, Channel::Email)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_update_requires_user() {
        let (resolver, _) = resolver();
        let err = resolver
            .update_preferences(PreferencesUpdate::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
