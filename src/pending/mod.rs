/// Negotiated-change coordinator and its cancellation timer.
pub mod coordinator;
/// Batching of change requests until the negotiation resolves.
pub mod queue;
/// Change request trait and closure-backed implementation.
pub mod request;

pub use self::coordinator::{
    ChangeListener, DEFAULT_PENDING_CHANGE_TIMEOUT, MAX_CANCELLATION_RESETS, MeterCollectStatus,
    PendingChangeCoordinator, PendingChangeException, PendingChangeReporter, PendingChangeSettings,
    TracingExceptionReporter,
};
pub use self::queue::{ChangeRequestQueue, DEFAULT_CHANGE_REQUEST_TIMEOUT};
pub use self::request::{ChangeRequest, ChangeType, FnChangeRequest};
