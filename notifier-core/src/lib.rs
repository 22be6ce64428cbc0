pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod memory;
pub mod pg_store;
pub mod redis;
pub mod redpanda;
pub mod retry;
pub mod schema;
pub mod store;
pub mod types;

pub use config::Config;
pub use context::NotifierContext;
pub use db::DbPool;
pub use error::{NotifierError, Result};
pub use redis::RedisPool;
pub use redpanda::{RedpandaConsumer, RedpandaProducer};
pub use retry::{RetryPolicy, MAX_RETRIES};
pub use store::{NotificationStore, Page, PageRequest, PreferenceStore, TemplateStore};
pub use types::{
    Channel, FailureOutcome, Notification, NotificationPreferences, NotificationRequest,
    NotificationResponse, NotificationStatus, NotificationTemplate, NotificationType,
    PreferencesUpdate, TaskEvent, TemplateData,
};
