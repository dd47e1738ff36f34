//! Events broadcast after each effective transition, serialized flat with a
//! `kind` tag and an RFC 3339 `at` timestamp.

use serde::Serialize;
use uuid::Uuid;

use crate::{
    disable::sinks::SystemDisablePriority,
    dto::now_rfc3339,
    pending::coordinator::{MeterCollectStatus, PendingChangeException},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Effective transition applied to one disable reason.
pub enum DisableTransition {
    /// The reason now holds a hard lockup.
    Locked {
        /// Priority forwarded to the disable sink.
        priority: SystemDisablePriority,
    },
    /// The reason is now displayed as a soft error.
    SoftError,
    /// The reason was cleared (lockup or soft error).
    Cleared,
}

#[derive(Debug, Clone, Serialize)]
/// Broadcast by an engine after each effective transition.
pub struct DisableEvent {
    /// Protocol whose engine applied the transition.
    pub protocol: String,
    /// Debug name of the reason, e.g. `DisabledByHost0`.
    pub reason: String,
    /// Correlation id registered for the reason.
    pub id: Uuid,
    /// What happened to the reason.
    #[serde(flatten)]
    pub transition: DisableTransition,
    /// When the transition was applied.
    pub at: String,
}

impl DisableEvent {
    /// Stamp a transition for `reason` with the current time.
    pub fn new(
        protocol: &str,
        reason: impl std::fmt::Debug,
        id: Uuid,
        transition: DisableTransition,
    ) -> Self {
        Self {
            protocol: protocol.to_owned(),
            reason: format!("{reason:?}"),
            id,
            transition,
            at: now_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Lifecycle step of a negotiated change.
pub enum PendingChangeStep {
    /// A negotiation started or its status changed.
    Started {
        /// Status now outstanding.
        status: MeterCollectStatus,
    },
    /// The host acknowledged and the deadline was restarted.
    Acknowledged {
        /// Acknowledgments received so far for this negotiation.
        reset_count: u32,
    },
    /// The change was committed.
    Committed {
        /// Status that was committed.
        status: MeterCollectStatus,
    },
    /// The change was cancelled.
    Cancelled {
        /// Status that was cancelled.
        status: MeterCollectStatus,
        /// What triggered the cancellation.
        cause: CancelCause,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
/// Why a pending change was cancelled.
pub enum CancelCause {
    /// The protocol asked for it.
    Requested,
    /// The deadline elapsed without acknowledgment.
    Timeout,
    /// The host acknowledged too many times.
    ResetLimit,
}

#[derive(Debug, Clone, Serialize)]
/// Broadcast by the pending-change coordinator.
pub struct PendingChangeEvent {
    /// Lifecycle step reached.
    #[serde(flatten)]
    pub step: PendingChangeStep,
    /// Exception reported to the host for this step, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<PendingChangeException>,
    /// When the step happened.
    pub at: String,
}

impl PendingChangeEvent {
    /// Stamp `step` with the current time.
    pub fn new(step: PendingChangeStep, exception: Option<PendingChangeException>) -> Self {
        Self {
            step,
            exception,
            at: now_rfc3339(),
        }
    }
}
