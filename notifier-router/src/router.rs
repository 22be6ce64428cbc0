use chrono::Utc;
use futures::future::join_all;
use notifier_core::{
    Channel, Notification, NotificationRequest, NotificationResponse, NotificationStore,
    NotifierError,
};
use notifier_delivery::Dispatcher;
use std::sync::Arc;

use crate::preferences::PreferenceResolver;

/// Fans a request out into one notification per resolved channel.
pub struct NotificationRouter {
    store: Arc<dyn NotificationStore>,
    preferences: Arc<PreferenceResolver>,
    dispatcher: Arc<Dispatcher>,
}

fn is_valid_email(address: &str) -> bool {
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !address.chars().any(char::is_whitespace)
}

fn validate(request: &NotificationRequest, channels: &[Channel]) -> Result<(), NotifierError> {
    if let Some(address) = &request.recipient_address {
        if address.trim().is_empty() {
            return Err(NotifierError::Validation(
                "recipientAddress must not be blank".into(),
            ));
        }
        if channels.contains(&Channel::Email) && !is_valid_email(address) {
            return Err(NotifierError::Validation(format!(
                "recipientAddress '{}' is not a valid email address",
                address
            )));
        }
    }
    Ok(())
}

fn dedupe(channels: &[Channel]) -> Vec<Channel> {
    let mut seen = Vec::with_capacity(channels.len());
    for channel in channels {
        if !seen.contains(channel) {
            seen.push(*channel);
        }
    }
    seen
}

impl NotificationRouter {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        preferences: Arc<PreferenceResolver>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            store,
            preferences,
            dispatcher,
        }
    }

    /// Explicit channels win outright. Otherwise the user's mapping for the
    /// type, minus globally disabled channels; `{EMAIL}` when unmapped.
    pub async fn resolve_channels(
        &self,
        request: &NotificationRequest,
    ) -> Result<Vec<Channel>, NotifierError> {
        if let Some(explicit) = request.channels.as_ref().filter(|c| !c.is_empty()) {
            return Ok(dedupe(explicit));
        }

        let preferences = self.preferences.get_preferences(&request.user_id).await?;
        let channels = match preferences
            .channel_preferences
            .get(&request.notification_type)
        {
            Some(mapped) => mapped
                .iter()
                .copied()
                .filter(|c| preferences.channel_enabled(*c))
                .collect(),
            None => vec![Channel::Email],
        };
        Ok(channels)
    }

    /// Creates and persists the per-channel notifications for `request`,
    /// dispatching the ones that are due now. Returns the first created
    /// notification, or `None` when nothing new was created.
    pub async fn route(
        &self,
        request: NotificationRequest,
    ) -> Result<Option<NotificationResponse>, NotifierError> {
        if request.user_id.trim().is_empty() {
            return Err(NotifierError::Validation("userId is required".into()));
        }

        let channels = self.resolve_channels(&request).await?;
        validate(&request, &channels)?;

        if channels.is_empty() {
            tracing::info!(
                user_id = %request.user_id,
                notification_type = %request.notification_type,
                "All channels disabled by preferences, nothing to send"
            );
            return Ok(None);
        }

        let now = Utc::now();
        let batch: Vec<Notification> = channels
            .iter()
            .map(|channel| Notification::from_request(&request, *channel, now))
            .collect();
        let created = self.store.insert_batch(batch).await?;

        let Some(first) = created.first().cloned() else {
            tracing::info!(
                request_id = request.request_id.as_deref().unwrap_or("-"),
                "Duplicate request, notifications already exist"
            );
            return Ok(None);
        };

        tracing::info!(
            user_id = %request.user_id,
            notification_type = %request.notification_type,
            count = created.len(),
            "Created notifications"
        );

        let due: Vec<Notification> = created
            .into_iter()
            .filter(|n| n.is_immediate(now))
            .collect();
        self.dispatch_all(due).await;

        let current = self.store.find_by_id(first.id).await?.unwrap_or(first);
        Ok(Some(NotificationResponse::from(&current)))
    }

    /// Dispatches each notification independently; one channel's failure
    /// never affects another or the caller.
    pub async fn dispatch_all(&self, notifications: Vec<Notification>) {
        let attempts = notifications.into_iter().map(|n| {
            let id = n.id;
            let dispatcher = self.dispatcher.clone();
            async move {
                if let Err(e) = dispatcher.dispatch(n).await {
                    tracing::error!(
                        notification_id = %id,
                        "Dispatch failed, left for the scheduler: {}",
                        e
                    );
                }
            }
        });
        join_all(attempts).await;
    }
}
