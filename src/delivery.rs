//! Everything needed to turn one recipient into one accepted API call:
//! template rendering, the HTTP transport seam, and the retrying sender that
//! ties them together.

pub(crate) mod auth;
pub(crate) mod backoff;
pub mod options;
pub mod render;
pub mod sender;
pub mod transport;

pub use options::TransportOptions;
pub use render::{
    MessageField, MessageRenderer, MessageTemplate, RenderError, RenderedMessage,
    TemplateRenderer,
};
pub use sender::{DispatchError, DispatchTask, RetryPolicy, RetryingSender};
pub use transport::{DeliveryTransport, MailgunTransport, TransportError};
