//! Negotiated-change coordinator: one outstanding change at a time, bounded by a
//! cancellation deadline that the host may only extend a limited number of times.

use std::{
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use serde::Serialize;
use tokio::{
    runtime::Handle,
    sync::broadcast,
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::events::{CancelCause, PendingChangeEvent, PendingChangeStep},
    error::BuildError,
    hub::{DEFAULT_EVENT_CAPACITY, EventHub},
    lock,
};

/// Deadline used when a caller does not supply one.
pub const DEFAULT_PENDING_CHANGE_TIMEOUT: Duration = Duration::from_secs(30);
/// Acknowledgments tolerated before a pending change is forcibly cancelled.
pub const MAX_CANCELLATION_RESETS: u32 = 5;

/// Kind of negotiation currently outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeterCollectStatus {
    /// Nothing is being negotiated.
    #[default]
    NotPending,
    /// Lifetime meters are about to change. Takes priority over game changes.
    LifetimeMeterChange,
    /// Enabled games, denominations or paytables are about to change.
    GameDenomPaytableChange,
}

/// Host-visible exception raised as a negotiation progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingChangeException {
    /// A change is waiting for host acknowledgment.
    MeterChangePending,
    /// Lifetime meters were changed.
    LifetimeMetersChanged,
    /// Enabled games or denominations were changed.
    EnabledGamesDenomsChanged,
    /// The pending change was cancelled.
    MeterChangeCanceled,
}

/// Forwards negotiation exceptions to the owning protocol.
pub trait PendingChangeReporter: Send + Sync {
    /// Report `exception` to the host.
    fn report(&self, exception: PendingChangeException);
}

/// [`PendingChangeReporter`] that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingExceptionReporter;

impl PendingChangeReporter for TracingExceptionReporter {
    fn report(&self, exception: PendingChangeException) {
        info!(?exception, "pending change exception reported");
    }
}

/// Observer notified when the outstanding change resolves.
///
/// Callbacks run synchronously on whichever thread resolved the change: a
/// protocol handler or the cancellation timer task. `negotiation` is the id
/// [`PendingChangeCoordinator::start_pending_change`] returned for the change.
pub trait ChangeListener: Send + Sync {
    /// The change was committed.
    fn on_change_commit(&self, negotiation: Uuid);
    /// The change was cancelled.
    fn on_change_cancel(&self, negotiation: Uuid);
}

/// Tunables for [`PendingChangeCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChangeSettings {
    /// Deadline used when `start_pending_change` gets no timeout.
    pub default_timeout: Duration,
    /// Acknowledgments allowed before forced cancellation.
    pub max_cancellation_resets: u32,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for PendingChangeSettings {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_PENDING_CHANGE_TIMEOUT,
            max_cancellation_resets: MAX_CANCELLATION_RESETS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Resolution {
    Commit,
    Cancel,
}

enum Acknowledgment {
    Reset(u32),
    Exhausted(MeterCollectStatus, Uuid),
}

#[derive(Debug, Default)]
struct CoordinatorState {
    status: MeterCollectStatus,
    /// Id of the outstanding negotiation; `Some` exactly while `status` is pending.
    negotiation: Option<Uuid>,
    timeout: Duration,
    reset_count: u32,
    timer: Option<JoinHandle<()>>,
    generation: u64,
    disposed: bool,
}

impl CoordinatorState {
    /// Abort the running timer and invalidate any callback already in flight.
    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    /// Stop the timer and return to `NotPending`, yielding the status and
    /// negotiation id that were active.
    fn take_pending(&mut self) -> Option<(MeterCollectStatus, Uuid)> {
        self.stop_timer();
        self.reset_count = 0;
        let status = std::mem::take(&mut self.status);
        let negotiation = self.negotiation.take()?;
        (status != MeterCollectStatus::NotPending).then_some((status, negotiation))
    }
}

/// Tracks the single outstanding negotiated change and its cancellation deadline.
pub struct PendingChangeCoordinator {
    settings: PendingChangeSettings,
    reporter: Arc<dyn PendingChangeReporter>,
    runtime: Handle,
    state: Mutex<CoordinatorState>,
    listeners: Mutex<Vec<Weak<dyn ChangeListener>>>,
    events: EventHub<PendingChangeEvent>,
    this: Weak<Self>,
}

impl PendingChangeCoordinator {
    /// Create a coordinator whose timer runs on the current Tokio runtime.
    pub fn new(
        settings: PendingChangeSettings,
        reporter: Arc<dyn PendingChangeReporter>,
    ) -> Result<Arc<Self>, BuildError> {
        let runtime = Handle::try_current().map_err(|_| BuildError::NoRuntime)?;
        Ok(Self::with_runtime(settings, reporter, runtime))
    }

    /// Create a coordinator whose timer runs on `runtime`.
    pub fn with_runtime(
        settings: PendingChangeSettings,
        reporter: Arc<dyn PendingChangeReporter>,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            settings,
            reporter,
            runtime,
            state: Mutex::new(CoordinatorState {
                timeout: settings.default_timeout,
                ..CoordinatorState::default()
            }),
            listeners: Mutex::new(Vec::new()),
            events: EventHub::new(settings.event_capacity),
            this: this.clone(),
        })
    }

    /// Settings in effect.
    pub fn settings(&self) -> &PendingChangeSettings {
        &self.settings
    }

    /// Current negotiation status.
    pub fn status(&self) -> MeterCollectStatus {
        lock(&self.state).status
    }

    /// Whether a change is outstanding.
    pub fn is_pending(&self) -> bool {
        self.status() != MeterCollectStatus::NotPending
    }

    /// Acknowledgments received for the outstanding change.
    pub fn reset_count(&self) -> u32 {
        lock(&self.state).reset_count
    }

    /// Subscribe to negotiation events.
    pub fn subscribe(&self) -> broadcast::Receiver<PendingChangeEvent> {
        self.events.subscribe()
    }

    /// Register `listener` for commit/cancel callbacks. Held weakly.
    pub fn add_listener(&self, listener: Weak<dyn ChangeListener>) {
        lock(&self.listeners).push(listener);
    }

    /// Begin (or refresh) a negotiation and restart the cancellation deadline.
    ///
    /// `timeout` falls back to the configured default when `None`. An outstanding
    /// `LifetimeMeterChange` is never downgraded to `GameDenomPaytableChange`.
    /// Returns the id of the negotiation now outstanding, which listeners receive
    /// when it resolves, or `None` when the call was ignored.
    pub fn start_pending_change(
        &self,
        status: MeterCollectStatus,
        timeout: Option<Duration>,
    ) -> Option<Uuid> {
        if status == MeterCollectStatus::NotPending {
            warn!("ignoring request to start a pending change without a status");
            return None;
        }

        let (started, negotiation) = {
            let mut state = lock(&self.state);
            if state.disposed {
                debug!(?status, "coordinator shut down; ignoring start");
                return None;
            }

            let previous = state.status;
            if previous == MeterCollectStatus::NotPending {
                state.reset_count = 0;
                state.negotiation = Some(Uuid::new_v4());
            }
            if !(previous == MeterCollectStatus::LifetimeMeterChange
                && status == MeterCollectStatus::GameDenomPaytableChange)
            {
                state.status = status;
            }
            state.timeout = timeout.unwrap_or(self.settings.default_timeout);
            self.restart_timer(&mut state);

            (
                (state.status != previous).then_some(state.status),
                state.negotiation,
            )
        };

        if let Some(status) = started {
            info!(?status, ?negotiation, "pending change started");
            self.report(
                PendingChangeStep::Started { status },
                PendingChangeException::MeterChangePending,
            );
        }
        negotiation
    }

    /// Host acknowledged the outstanding change; extend the deadline or, once the
    /// reset limit is reached, cancel.
    pub fn acknowledge_pending_change(&self) {
        let outcome = {
            let mut state = lock(&self.state);
            if state.disposed || state.status == MeterCollectStatus::NotPending {
                debug!("no pending change to acknowledge");
                return;
            }

            state.reset_count += 1;
            if state.reset_count >= self.settings.max_cancellation_resets {
                match state.take_pending() {
                    Some((status, negotiation)) => Acknowledgment::Exhausted(status, negotiation),
                    None => return,
                }
            } else {
                self.restart_timer(&mut state);
                Acknowledgment::Reset(state.reset_count)
            }
        };

        match outcome {
            Acknowledgment::Reset(reset_count) => {
                debug!(reset_count, "pending change deadline restarted");
                self.events.broadcast(PendingChangeEvent::new(
                    PendingChangeStep::Acknowledged { reset_count },
                    None,
                ));
            }
            Acknowledgment::Exhausted(status, negotiation) => {
                warn!(
                    ?status,
                    max = self.settings.max_cancellation_resets,
                    "pending change acknowledged too often; cancelling"
                );
                self.finish_cancel(status, negotiation, CancelCause::ResetLimit);
            }
        }
    }

    /// The protocol is ready: commit the outstanding change.
    pub fn ready_for_pending_change(&self) {
        let taken = {
            let mut state = lock(&self.state);
            if state.disposed {
                return;
            }
            state.take_pending()
        };

        let Some((status, negotiation)) = taken else {
            debug!("no pending change to commit");
            return;
        };

        let exception = match status {
            MeterCollectStatus::LifetimeMeterChange => {
                PendingChangeException::LifetimeMetersChanged
            }
            _ => PendingChangeException::EnabledGamesDenomsChanged,
        };
        info!(?status, %negotiation, "pending change committed");
        self.report(PendingChangeStep::Committed { status }, exception);
        self.notify(Resolution::Commit, negotiation);
    }

    /// Cancel the outstanding change, if any.
    pub fn cancel_pending_change(&self) {
        let taken = {
            let mut state = lock(&self.state);
            if state.disposed {
                return;
            }
            state.take_pending()
        };

        match taken {
            Some((status, negotiation)) => {
                self.finish_cancel(status, negotiation, CancelCause::Requested)
            }
            None => debug!("no pending change to cancel"),
        }
    }

    /// Stop the timer and ignore every later call, including in-flight timer callbacks.
    pub fn shutdown(&self) {
        let mut state = lock(&self.state);
        state.disposed = true;
        state.stop_timer();
    }

    fn on_timer_elapsed(&self, generation: u64) {
        let taken = {
            let mut state = lock(&self.state);
            if state.disposed || state.generation != generation {
                debug!("stale cancellation timer fired; ignoring");
                return;
            }
            state.timer = None;
            state.take_pending()
        };

        if let Some((status, negotiation)) = taken {
            warn!(?status, "pending change not acknowledged in time; cancelling");
            self.finish_cancel(status, negotiation, CancelCause::Timeout);
        }
    }

    fn restart_timer(&self, state: &mut CoordinatorState) {
        state.stop_timer();
        let generation = state.generation;
        let timeout = state.timeout;
        let this = self.this.clone();
        state.timer = Some(self.runtime.spawn(async move {
            sleep(timeout).await;
            if let Some(coordinator) = this.upgrade() {
                coordinator.on_timer_elapsed(generation);
            }
        }));
    }

    fn finish_cancel(&self, status: MeterCollectStatus, negotiation: Uuid, cause: CancelCause) {
        info!(?status, %negotiation, ?cause, "pending change cancelled");
        self.report(
            PendingChangeStep::Cancelled { status, cause },
            PendingChangeException::MeterChangeCanceled,
        );
        self.notify(Resolution::Cancel, negotiation);
    }

    fn report(&self, step: PendingChangeStep, exception: PendingChangeException) {
        self.reporter.report(exception);
        self.events
            .broadcast(PendingChangeEvent::new(step, Some(exception)));
    }

    fn notify(&self, resolution: Resolution, negotiation: Uuid) {
        let listeners: Vec<Arc<dyn ChangeListener>> = {
            let mut guard = lock(&self.listeners);
            guard.retain(|listener| listener.strong_count() > 0);
            guard.iter().filter_map(Weak::upgrade).collect()
        };

        for listener in listeners {
            match resolution {
                Resolution::Commit => listener.on_change_commit(negotiation),
                Resolution::Cancel => listener.on_change_cancel(negotiation),
            }
        }
    }
}

impl Drop for PendingChangeCoordinator {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.disposed = true;
        state.stop_timer();
    }
}
