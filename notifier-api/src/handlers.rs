use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use notifier_core::{
    Channel, NotificationPreferences, NotificationRequest, NotificationResponse,
    NotificationStatus, NotificationTemplate, NotificationType, NotifierError, Page, PageRequest,
    PreferencesUpdate,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::ApiState;

type ApiResult<T> = Result<T, ApiError>;

fn accepted() -> Response {
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted" })),
    )
        .into_response()
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "notifier"
    }))
}

/// Routes the request inline. 202 when every channel was filtered out or the
/// request was a duplicate.
pub async fn send_notification(
    Extension(state): Extension<ApiState>,
    Json(request): Json<NotificationRequest>,
) -> ApiResult<Response> {
    match state.router.route(request).await? {
        Some(response) => Ok(Json(response).into_response()),
        None => Ok(accepted()),
    }
}

pub async fn publish_notification(
    Extension(state): Extension<ApiState>,
    Json(request): Json<NotificationRequest>,
) -> ApiResult<Response> {
    state.publisher.publish(&request).await?;
    Ok(accepted())
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub size: Option<i64>,
}

pub async fn get_user_notifications(
    Extension(state): Extension<ApiState>,
    Path(user_id): Path<String>,
    Query(params): Query<PageQuery>,
) -> ApiResult<Json<Page<NotificationResponse>>> {
    let page = state
        .notifications
        .find_by_user(&user_id, PageRequest::new(params.page, params.size))
        .await?;
    Ok(Json(page.map(|n| NotificationResponse::from(&n))))
}

pub async fn get_entity_notifications(
    Extension(state): Extension<ApiState>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> ApiResult<Json<Vec<NotificationResponse>>> {
    let notifications = state
        .notifications
        .find_by_related_entity(&entity_id, &entity_type)
        .await?;
    Ok(Json(
        notifications.iter().map(NotificationResponse::from).collect(),
    ))
}

pub async fn get_unread_count(
    Extension(state): Extension<ApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let count = state
        .notifications
        .count_by_user_and_status(&user_id, NotificationStatus::Sent)
        .await?;
    Ok(Json(serde_json::json!({ "unreadCount": count })))
}

pub async fn confirm_delivery(
    Extension(state): Extension<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<NotificationResponse>> {
    let mut notification = state
        .notifications
        .find_by_id(id)
        .await?
        .ok_or_else(|| NotifierError::not_found("Notification", id.to_string()))?;
    notification.confirm_delivery(Utc::now())?;
    state.notifications.save(&notification).await?;
    tracing::info!(notification_id = %id, "Delivery confirmed");
    Ok(Json(NotificationResponse::from(&notification)))
}

pub async fn get_preferences(
    Extension(state): Extension<ApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<NotificationPreferences>> {
    Ok(Json(state.preferences.get_preferences(&user_id).await?))
}

pub async fn update_preferences(
    Extension(state): Extension<ApiState>,
    Json(update): Json<PreferencesUpdate>,
) -> ApiResult<Json<NotificationPreferences>> {
    Ok(Json(state.preferences.update_preferences(update).await?))
}

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub channel: Channel,
}

pub async fn should_send(
    Extension(state): Extension<ApiState>,
    Path(user_id): Path<String>,
    Query(params): Query<ChannelQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let preferences = state.preferences.get_preferences(&user_id).await?;
    Ok(Json(serde_json::json!({
        "shouldSend": preferences.allows(params.notification_type, params.channel),
        "channelEnabled": preferences.channel_enabled(params.channel),
    })))
}

pub async fn save_template(
    Extension(state): Extension<ApiState>,
    Json(mut template): Json<NotificationTemplate>,
) -> ApiResult<Json<NotificationTemplate>> {
    if template.id.trim().is_empty() {
        return Err(NotifierError::Validation("template id is required".into()).into());
    }
    template.updated_at = Utc::now();
    state.templates.save(&template).await?;
    tracing::info!(template_id = %template.id, "Saved notification template");
    Ok(Json(template))
}

pub async fn get_template(
    Extension(state): Extension<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<NotificationTemplate>> {
    let template = state
        .templates
        .find_by_id(&id)
        .await?
        .ok_or_else(|| NotifierError::not_found("Template", id))?;
    Ok(Json(template))
}

pub async fn find_active_template(
    Extension(state): Extension<ApiState>,
    Query(params): Query<ChannelQuery>,
) -> ApiResult<Json<NotificationTemplate>> {
    let template = state
        .templates
        .find_active(params.notification_type, params.channel)
        .await?
        .ok_or_else(|| {
            NotifierError::not_found(
                "Template",
                format!("{}/{}", params.notification_type, params.channel),
            )
        })?;
    Ok(Json(template))
}
