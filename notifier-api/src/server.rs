use anyhow::Result;
use axum::{
    extract::Extension,
    routing::{get, post, put},
    Router,
};
use notifier_core::config::ServerConfig;
use std::net::SocketAddr;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::ApiState;

fn cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins {
        Some(origins) => {
            let mut cors = CorsLayer::new();
            for origin in origins.split(',').map(str::trim) {
                if let Ok(parsed) = origin.parse::<axum::http::HeaderValue>() {
                    cors = cors.allow_origin(parsed);
                }
            }
            cors.allow_methods(Any).allow_headers(Any)
        }
        None => {
            tracing::warn!("CORS_ORIGINS not set, using permissive CORS. Set CORS_ORIGINS for production!");
            CorsLayer::permissive()
        }
    }
}

pub fn router(state: ApiState, cors_origins: Option<&str>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/notifications/send", post(handlers::send_notification))
        .route(
            "/api/v1/notifications/publish",
            post(handlers::publish_notification),
        )
        .route(
            "/api/v1/notifications/user/:user_id",
            get(handlers::get_user_notifications),
        )
        .route(
            "/api/v1/notifications/user/:user_id/unread-count",
            get(handlers::get_unread_count),
        )
        .route(
            "/api/v1/notifications/entity/:entity_type/:entity_id",
            get(handlers::get_entity_notifications),
        )
        .route(
            "/api/v1/notifications/:id/delivered",
            post(handlers::confirm_delivery),
        )
        .route(
            "/api/v1/preferences/user/:user_id",
            get(handlers::get_preferences),
        )
        .route(
            "/api/v1/preferences/user/:user_id/should-send",
            get(handlers::should_send),
        )
        .route("/api/v1/preferences", put(handlers::update_preferences))
        .route(
            "/api/v1/templates",
            get(handlers::find_active_template).put(handlers::save_template),
        )
        .route("/api/v1/templates/:id", get(handlers::get_template))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(Extension(state))
                .layer(cors_layer(cors_origins)),
        )
}

pub async fn run(
    state: ApiState,
    config: &ServerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = router(state, config.cors_origins.as_deref());

    let host: std::net::IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((host, config.api_port));
    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use mockall::mock;
    use notifier_core::memory::{
        InMemoryNotificationStore, InMemoryPreferenceStore, InMemoryTemplateStore,
    };
    use notifier_core::{
        Channel, Notification, NotificationRequest, NotificationStatus, NotificationStore,
        NotificationType, NotifierError,
    };
    use notifier_delivery::{ChannelSet, Dispatcher};
    use notifier_router::{NotificationRouter, PreferenceResolver, RequestPublisher};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    mock! {
        Publisher {}

        #[async_trait]
        impl RequestPublisher for Publisher {
            async fn publish(&self, request: &NotificationRequest) -> Result<(), NotifierError>;
        }
    }

    fn app_with(publisher: MockPublisher) -> (Router, InMemoryNotificationStore) {
        let store = InMemoryNotificationStore::new();
        let templates = Arc::new(InMemoryTemplateStore::new());
        let preferences = Arc::new(PreferenceResolver::new(Arc::new(
            InMemoryPreferenceStore::new(),
        )));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(store.clone()),
            templates.clone(),
            ChannelSet::logging(),
        ));
        let state = ApiState {
            notifications: Arc::new(store.clone()),
            templates,
            preferences: preferences.clone(),
            router: Arc::new(NotificationRouter::new(
                Arc::new(store.clone()),
                preferences,
                dispatcher,
            )),
            publisher: Arc::new(publisher),
        };
        (router(state, None), store)
    }

    fn app() -> (Router, InMemoryNotificationStore) {
        app_with(MockPublisher::new())
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_send_then_list_and_count() {
        let (app, _) = app();
        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/notifications/send",
            Some(json!({
                "userId": "u1",
                "type": "TASK_ASSIGNED",
                "recipientEmail": "u1@example.com",
                "channels": ["EMAIL", "IN_APP"],
                "subject": "Hi",
                "message": "Body",
                "relatedEntityId": "task-1",
                "relatedEntityType": "task"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "SENT");
        assert_eq!(body["channel"], "EMAIL");

        let (status, page) = call(&app, "GET", "/api/v1/notifications/user/u1?size=1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["totalElements"], 2);
        assert_eq!(page["totalPages"], 2);
        assert_eq!(page["content"].as_array().unwrap().len(), 1);

        let (_, count) = call(&app, "GET", "/api/v1/notifications/user/u1/unread-count", None).await;
        assert_eq!(count["unreadCount"], 2);

        let (_, related) = call(&app, "GET", "/api/v1/notifications/entity/task/task-1", None).await;
        assert_eq!(related.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_send_validation_error() {
        let (app, store) = app();
        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/notifications/send",
            Some(json!({ "userId": "", "type": "TASK_CREATED" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_send_with_every_channel_disabled_is_accepted() {
        let (app, _) = app();
        let (status, _) = call(
            &app,
            "PUT",
            "/api/v1/preferences",
            Some(json!({ "userId": "u2" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/notifications/send",
            Some(json!({ "userId": "u2", "type": "TASK_CREATED", "message": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "accepted");
    }

    #[tokio::test]
    async fn test_publish_hands_off_request() {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .withf(|request| request.user_id == "u1")
            .times(1)
            .returning(|_| Ok(()));
        let (app, store) = app_with(publisher);

        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/notifications/publish",
            Some(json!({ "userId": "u1", "type": "COMMENT_ADDED" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_confirm_delivery() {
        let (app, store) = app();
        let request = NotificationRequest::new("u1", NotificationType::TaskCreated);
        let mut sent = Notification::from_request(&request, Channel::InApp, chrono::Utc::now());
        sent.mark_sent(chrono::Utc::now());
        store.save(&sent).await.unwrap();
        let pending = Notification::from_request(&request, Channel::Email, chrono::Utc::now());
        store.save(&pending).await.unwrap();

        let uri = format!("/api/v1/notifications/{}/delivered", sent.id);
        let (status, body) = call(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "DELIVERED");
        assert_eq!(
            store.find_by_id(sent.id).await.unwrap().unwrap().status,
            NotificationStatus::Delivered
        );

        let uri = format!("/api/v1/notifications/{}/delivered", pending.id);
        let (status, body) = call(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "INVALID_TRANSITION");

        let uri = format!("/api/v1/notifications/{}/delivered", uuid::Uuid::new_v4());
        let (status, _) = call(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_preferences_and_should_send() {
        let (app, _) = app();
        let (status, prefs) = call(&app, "GET", "/api/v1/preferences/user/u1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(prefs["emailEnabled"], true);
        assert_eq!(prefs["smsEnabled"], false);

        let (_, decision) = call(
            &app,
            "GET",
            "/api/v1/preferences/user/u1/should-send?type=TASK_DUE_REMINDER&channel=PUSH",
            None,
        )
        .await;
        assert_eq!(decision["shouldSend"], true);
        assert_eq!(decision["channelEnabled"], true);

        let (_, decision) = call(
            &app,
            "GET",
            "/api/v1/preferences/user/u1/should-send?type=TASK_UPDATED&channel=EMAIL",
            None,
        )
        .await;
        assert_eq!(decision["shouldSend"], false);
        assert_eq!(decision["channelEnabled"], true);
    }

    #[tokio::test]
    async fn test_templates() {
        let (app, _) = app();
        let (status, _) = call(
            &app,
            "PUT",
            "/api/v1/templates",
            Some(json!({
                "id": "task-assigned-email",
                "name": "Task assigned",
                "type": "TASK_ASSIGNED",
                "channel": "EMAIL",
                "subject": "Assigned: {{taskTitle}}",
                "htmlContent": "<p>{{taskTitle}}</p>"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, template) = call(&app, "GET", "/api/v1/templates/task-assigned-email", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(template["active"], true);

        let (status, template) = call(
            &app,
            "GET",
            "/api/v1/templates?type=TASK_ASSIGNED&channel=EMAIL",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(template["id"], "task-assigned-email");

        let (status, _) = call(&app, "GET", "/api/v1/templates?type=TASK_ASSIGNED&channel=SMS", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
