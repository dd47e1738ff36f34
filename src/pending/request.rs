use std::fmt;

use serde::Serialize;

use crate::pending::coordinator::MeterCollectStatus;

/// What a queued change touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Lifetime meters are reset or rewritten.
    Meters,
    /// Games are enabled or disabled.
    Games,
    /// Denominations are enabled or disabled.
    Denominations,
    /// Paytables are switched.
    Paytables,
}

impl ChangeType {
    /// Negotiation kind the host must acknowledge for this change.
    pub fn meter_collect_status(self) -> MeterCollectStatus {
        match self {
            ChangeType::Meters => MeterCollectStatus::LifetimeMeterChange,
            ChangeType::Games | ChangeType::Denominations | ChangeType::Paytables => {
                MeterCollectStatus::GameDenomPaytableChange
            }
        }
    }
}

/// A unit of work held back until the outstanding negotiation resolves.
pub trait ChangeRequest: Send {
    /// Category used to pick the negotiation kind.
    fn change_type(&self) -> ChangeType;
    /// Apply the change.
    fn commit(&mut self);
    /// Roll the change back.
    fn cancel(&mut self);
}

/// [`ChangeRequest`] backed by a pair of closures.
pub struct FnChangeRequest<C, X> {
    change_type: ChangeType,
    on_commit: C,
    on_cancel: X,
}

impl<C, X> FnChangeRequest<C, X>
where
    C: FnMut() + Send,
    X: FnMut() + Send,
{
    /// Create a request running `on_commit` or `on_cancel` on resolution.
    pub fn new(change_type: ChangeType, on_commit: C, on_cancel: X) -> Self {
        Self {
            change_type,
            on_commit,
            on_cancel,
        }
    }
}

impl<C, X> ChangeRequest for FnChangeRequest<C, X>
where
    C: FnMut() + Send,
    X: FnMut() + Send,
{
    fn change_type(&self) -> ChangeType {
        self.change_type
    }

    fn commit(&mut self) {
        (self.on_commit)()
    }

    fn cancel(&mut self) {
        (self.on_cancel)()
    }
}

impl<C, X> fmt::Debug for FnChangeRequest<C, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnChangeRequest")
            .field("change_type", &self.change_type)
            .finish_non_exhaustive()
    }
}
