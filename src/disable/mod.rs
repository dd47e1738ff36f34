/// Per-protocol disable engine.
pub mod engine;
/// Disable reason trait and bitset.
pub mod reason;
/// Per-reason metadata lookup.
pub mod registry;
/// External lockup and message-display boundaries.
pub mod sinks;

pub use self::engine::{DisableSnapshot, ProtocolDisableEngine, ProtocolDisableEngineBuilder};
pub use self::reason::{DisableReason, DisableStates};
pub use self::registry::{DisableRegistry, DisableRegistryEntry, MessageProducer, static_message};
pub use self::sinks::{
    DisplayableMessage, MessageDisplaySink, SystemDisablePriority, SystemDisableSink,
    TracingDisableSink, TracingMessageDisplay,
};
