pub mod delivery;
pub mod dispatch;
pub mod pool;
pub mod recipients;
pub mod runtime;

pub use delivery::{
    DeliveryTransport, DispatchError, DispatchTask, MailgunTransport, MessageRenderer,
    MessageTemplate, RenderError, RenderedMessage, RetryPolicy, RetryingSender, TemplateRenderer,
    TransportError, TransportOptions,
};
pub use dispatch::{
    ControlError, DispatchEngine, DispatchEvent, ProgressUpdate, RunCounters, RunOutcome,
    RunState, RunStatus, RunSummary,
};
pub use pool::{ResultSlots, SlotError, WorkerPool};
pub use recipients::{
    DispatchResult, DispatchStatus, InMemoryRecipientStore, Recipient, RecipientId,
    RecipientPage, RecipientPatch, RecipientStore, StoreError,
};
pub use runtime::config::{DispatchConfig, DispatchConfigBuilder, DispatchConfigParams};
pub use runtime::fatal::{FatalErrorHandler, RunStage};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
