use notifier_core::{Channel, NotifierError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{channel} delivery failed: {reason}")]
    Transport { channel: Channel, reason: String },

    #[error("Render failed: {0}")]
    Render(String),

    #[error(transparent)]
    Store(#[from] NotifierError),
}

impl DeliveryError {
    pub fn transport(channel: Channel, reason: impl Into<String>) -> Self {
        Self::Transport {
            channel,
            reason: reason.into(),
        }
    }
}
