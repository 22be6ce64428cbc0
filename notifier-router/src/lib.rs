pub mod consumer;
pub mod preferences;
pub mod publisher;
pub mod router;
pub mod translator;

pub use preferences::PreferenceResolver;
pub use publisher::{KafkaRequestPublisher, RequestPublisher};
pub use router::NotificationRouter;
pub use translator::translate;
