pub mod apns;
pub mod dispatcher;
pub mod email;
pub mod error;
pub mod in_app;
pub mod renderer;
pub mod sms;
pub mod transport;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::DeliveryError;
pub use renderer::{RenderedContent, TemplateRenderer};
pub use transport::{ChannelSet, ChannelTransport, LoggingTransport};
