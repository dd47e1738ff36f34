//! Boundary traits for the system-wide lockup manager and the operator message
//! banner, plus tracing-backed implementations for headless use.

use std::fmt;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::disable::registry::MessageProducer;

/// Ordinal priority passed through to the [`SystemDisableSink`] unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemDisablePriority {
    /// Take effect once the current game round has ended.
    Normal,
    /// Take effect immediately, even mid-round.
    Immediate,
}

/// A soft-error message handed to the [`MessageDisplaySink`].
#[derive(Clone)]
pub struct DisplayableMessage {
    /// Correlation id; the same id later removes the message.
    pub id: Uuid,
    /// Deferred message text.
    pub text: MessageProducer,
}

impl DisplayableMessage {
    /// Build a soft-error message.
    pub fn soft_error(id: Uuid, text: MessageProducer) -> Self {
        Self { id, text }
    }

    /// Evaluate the text now.
    pub fn render(&self) -> String {
        (self.text)()
    }
}

impl fmt::Debug for DisplayableMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayableMessage")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// System-wide lockup manager shared by every protocol.
///
/// Implementations must be safe to call concurrently from several engines.
pub trait SystemDisableSink: Send + Sync {
    /// Lock the machine up for `id`.
    fn disable(&self, id: Uuid, priority: SystemDisablePriority, message: MessageProducer);
    /// Clear the lockup previously requested for `id`.
    fn enable(&self, id: Uuid);
}

/// Operator/player facing banner for soft errors.
pub trait MessageDisplaySink: Send + Sync {
    /// Show `message`.
    fn display_message(&self, message: DisplayableMessage);
    /// Remove the message previously shown with `id`.
    fn remove_message(&self, id: Uuid);
}

/// [`SystemDisableSink`] that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDisableSink;

impl SystemDisableSink for TracingDisableSink {
    fn disable(&self, id: Uuid, priority: SystemDisablePriority, message: MessageProducer) {
        info!(%id, ?priority, text = %message(), "system disabled");
    }

    fn enable(&self, id: Uuid) {
        info!(%id, "system enabled");
    }
}

/// [`MessageDisplaySink`] that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMessageDisplay;

impl MessageDisplaySink for TracingMessageDisplay {
    fn display_message(&self, message: DisplayableMessage) {
        info!(
            id = %message.id,
            text = %message.render(),
            "message displayed"
        );
    }

    fn remove_message(&self, id: Uuid) {
        info!(%id, "message removed");
    }
}
