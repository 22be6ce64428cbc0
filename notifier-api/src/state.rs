use notifier_core::{NotificationStore, TemplateStore};
use notifier_router::{NotificationRouter, PreferenceResolver, RequestPublisher};
use std::sync::Arc;

/// Everything the handlers reach for, injected as an `Extension`.
#[derive(Clone)]
pub struct ApiState {
    pub notifications: Arc<dyn NotificationStore>,
    pub templates: Arc<dyn TemplateStore>,
    pub preferences: Arc<PreferenceResolver>,
    pub router: Arc<NotificationRouter>,
    pub publisher: Arc<dyn RequestPublisher>,
}
