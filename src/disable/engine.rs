//! Per-protocol disable engine reconciling concurrent lockup and soft-error
//! requests against the shared system disable sink and message banner.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    thread,
};

use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    disable::{
        reason::{DisableReason, DisableStates},
        registry::{DisableRegistry, DisableRegistryEntry, MessageProducer},
        sinks::{DisplayableMessage, MessageDisplaySink, SystemDisablePriority, SystemDisableSink},
    },
    dto::events::{DisableEvent, DisableTransition},
    error::BuildError,
    hub::{DEFAULT_EVENT_CAPACITY, EventHub},
    lock,
};

/// Sink call decided under the state lock and issued after it is released.
enum SinkAction {
    Disable {
        id: Uuid,
        priority: SystemDisablePriority,
        message: MessageProducer,
    },
    Enable(Uuid),
    Display(DisplayableMessage),
    Remove(Uuid),
}

/// Bit state owned by one engine. A reason is never set in both fields.
struct EngineState<R: DisableReason> {
    disable_state: DisableStates<R>,
    soft_error_state: DisableStates<R>,
    /// Sink calls in the order their transitions were applied.
    outbox: VecDeque<SinkAction>,
    /// Set while some caller is draining `outbox`.
    dispatching: bool,
}

/// Consistent view of both bit fields taken under one lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisableSnapshot<R: DisableReason> {
    /// Reasons holding a hard lockup.
    pub disable_state: DisableStates<R>,
    /// Reasons displayed as soft errors.
    pub soft_error_state: DisableStates<R>,
}

impl<R: DisableReason> Default for EngineState<R> {
    fn default() -> Self {
        Self {
            disable_state: DisableStates::empty(),
            soft_error_state: DisableStates::empty(),
            outbox: VecDeque::new(),
            dispatching: false,
        }
    }
}

/// Tracks one protocol's active disable reasons and drives the external sinks.
///
/// Each transition is decided and applied to the bit state under a single lock,
/// and the matching sink calls are appended to an outbox in the same critical
/// section. The outbox is drained by one caller at a time with no engine lock
/// held, so sinks see calls in state-change order and may call back into any
/// engine method; a nested call queues its sink calls behind the current one.
pub struct ProtocolDisableEngine<R: DisableReason> {
    protocol: String,
    registry: DisableRegistry<R>,
    disable_sink: Arc<dyn SystemDisableSink>,
    message_display: Arc<dyn MessageDisplaySink>,
    state: Mutex<EngineState<R>>,
    events: EventHub<DisableEvent>,
}

/// Builder for [`ProtocolDisableEngine`].
pub struct ProtocolDisableEngineBuilder<R: DisableReason> {
    protocol: String,
    registry: DisableRegistry<R>,
    disable_sink: Option<Arc<dyn SystemDisableSink>>,
    message_display: Option<Arc<dyn MessageDisplaySink>>,
    event_capacity: usize,
}

impl<R: DisableReason> ProtocolDisableEngineBuilder<R> {
    /// Reason metadata used by the engine.
    pub fn registry(mut self, registry: DisableRegistry<R>) -> Self {
        self.registry = registry;
        self
    }

    /// System-wide lockup manager.
    pub fn disable_sink(mut self, sink: Arc<dyn SystemDisableSink>) -> Self {
        self.disable_sink = Some(sink);
        self
    }

    /// Soft-error message banner.
    pub fn message_display(mut self, display: Arc<dyn MessageDisplaySink>) -> Self {
        self.message_display = Some(display);
        self
    }

    /// Capacity of the transition event channel.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate collaborators and build the engine.
    pub fn build(self) -> Result<ProtocolDisableEngine<R>, BuildError> {
        let disable_sink = self
            .disable_sink
            .ok_or_else(|| BuildError::missing("disable sink"))?;
        let message_display = self
            .message_display
            .ok_or_else(|| BuildError::missing("message display"))?;

        Ok(ProtocolDisableEngine {
            protocol: self.protocol,
            registry: self.registry,
            disable_sink,
            message_display,
            state: Mutex::new(EngineState::default()),
            events: EventHub::new(self.event_capacity),
        })
    }
}

impl<R: DisableReason> ProtocolDisableEngine<R> {
    /// Start building an engine for `protocol`.
    pub fn builder(protocol: impl Into<String>) -> ProtocolDisableEngineBuilder<R> {
        ProtocolDisableEngineBuilder {
            protocol: protocol.into(),
            registry: DisableRegistry::new(),
            disable_sink: None,
            message_display: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Name of the protocol this engine serves.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Reason metadata in use.
    pub fn registry(&self) -> &DisableRegistry<R> {
        &self.registry
    }

    /// Subscribe to transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<DisableEvent> {
        self.events.subscribe()
    }

    /// Hard-lock every listed reason that is registered and not already locked.
    ///
    /// A reason currently shown as a soft error has its message removed first.
    pub fn disable(&self, priority: SystemDisablePriority, reasons: &[R]) {
        {
            let mut state = self.state();
            for &reason in reasons {
                let Some(entry) = self.lookup(reason) else {
                    continue;
                };
                if state.disable_state.contains(reason) {
                    debug!(protocol = %self.protocol, ?reason, "already locked up; skipping");
                    continue;
                }
                self.lock_up(&mut state, priority, reason, entry);
            }
        }
        self.dispatch();
    }

    /// Disable a single reason, either as a lockup or as a soft error.
    ///
    /// With `is_lockup == false` the reason is displayed as a soft error unless it
    /// is already locked up or already displayed. With `is_lockup == true` this is
    /// the single-reason form of [`disable`](Self::disable).
    pub fn disable_reason(&self, priority: SystemDisablePriority, reason: R, is_lockup: bool) {
        let Some(entry) = self.lookup(reason) else {
            return;
        };

        {
            let mut state = self.state();
            if state.disable_state.contains(reason) {
                debug!(protocol = %self.protocol, ?reason, "already locked up; skipping");
                return;
            }

            if is_lockup {
                self.lock_up(&mut state, priority, reason, entry);
            } else if state.soft_error_state.contains(reason) {
                debug!(protocol = %self.protocol, ?reason, "soft error already displayed; skipping");
                return;
            } else {
                state.outbox.push_back(SinkAction::Display(DisplayableMessage::soft_error(
                    entry.id,
                    entry.message.clone(),
                )));
                state.soft_error_state.set(reason);
                info!(protocol = %self.protocol, ?reason, id = %entry.id, "soft error displayed");
                self.publish(reason, entry, DisableTransition::SoftError);
            }
        }
        self.dispatch();
    }

    /// Clear every listed reason that is currently active, lockup or soft error.
    pub fn enable(&self, reasons: &[R]) {
        {
            let mut state = self.state();
            for &reason in reasons {
                let Some(entry) = self.lookup(reason) else {
                    continue;
                };

                if state.soft_error_state.contains(reason) {
                    self.clear_soft_error(&mut state, reason, entry);
                } else if state.disable_state.contains(reason) {
                    state.outbox.push_back(SinkAction::Enable(entry.id));
                    state.disable_state.clear(reason);
                    info!(protocol = %self.protocol, ?reason, id = %entry.id, "lockup cleared");
                } else {
                    debug!(protocol = %self.protocol, ?reason, "reason not active; skipping");
                    continue;
                }
                self.publish(reason, entry, DisableTransition::Cleared);
            }
        }
        self.dispatch();
    }

    /// Whether `reason` currently holds a hard lockup.
    pub fn is_disable_state_active(&self, reason: R) -> bool {
        self.state().disable_state.contains(reason)
    }

    /// Whether `reason` is currently displayed as a soft error.
    pub fn is_soft_error_state_active(&self, reason: R) -> bool {
        self.state().soft_error_state.contains(reason)
    }

    /// Whether any reason holds a hard lockup.
    pub fn is_any_disable_active(&self) -> bool {
        !self.state().disable_state.is_empty()
    }

    /// Snapshot of both bit fields at once.
    pub fn snapshot(&self) -> DisableSnapshot<R> {
        let state = self.state();
        DisableSnapshot {
            disable_state: state.disable_state,
            soft_error_state: state.soft_error_state,
        }
    }

    /// Snapshot of the active lockups.
    pub fn disable_states(&self) -> DisableStates<R> {
        self.state().disable_state
    }

    /// Snapshot of the active soft errors.
    pub fn soft_error_states(&self) -> DisableStates<R> {
        self.state().soft_error_state
    }

    /// Escalate `reason` to a hard lockup, clearing a soft error first.
    /// Caller has checked the reason is not locked.
    fn lock_up(
        &self,
        state: &mut EngineState<R>,
        priority: SystemDisablePriority,
        reason: R,
        entry: &DisableRegistryEntry,
    ) {
        if state.soft_error_state.contains(reason) {
            self.clear_soft_error(state, reason, entry);
        }

        state.outbox.push_back(SinkAction::Disable {
            id: entry.id,
            priority,
            message: entry.message.clone(),
        });
        state.disable_state.set(reason);
        info!(protocol = %self.protocol, ?reason, id = %entry.id, ?priority, "locked up");
        self.publish(reason, entry, DisableTransition::Locked { priority });
    }

    fn clear_soft_error(&self, state: &mut EngineState<R>, reason: R, entry: &DisableRegistryEntry) {
        state.outbox.push_back(SinkAction::Remove(entry.id));
        state.soft_error_state.clear(reason);
        info!(protocol = %self.protocol, ?reason, id = %entry.id, "soft error removed");
    }

    /// Issue queued sink calls in order until the outbox is empty.
    ///
    /// Returns at once when another caller (or an outer frame of this one) is
    /// already draining; that caller picks up the actions queued here.
    fn dispatch(&self) {
        {
            let mut state = self.state();
            if state.dispatching {
                return;
            }
            state.dispatching = true;
        }
        let _reset = DispatchReset(self);

        loop {
            let action = {
                let mut state = self.state();
                match state.outbox.pop_front() {
                    Some(action) => action,
                    None => {
                        state.dispatching = false;
                        return;
                    }
                }
            };

            match action {
                SinkAction::Disable {
                    id,
                    priority,
                    message,
                } => self.disable_sink.disable(id, priority, message),
                SinkAction::Enable(id) => self.disable_sink.enable(id),
                SinkAction::Display(message) => self.message_display.display_message(message),
                SinkAction::Remove(id) => self.message_display.remove_message(id),
            }
        }
    }

    fn lookup(&self, reason: R) -> Option<&DisableRegistryEntry> {
        if reason.is_none() {
            debug!(protocol = %self.protocol, "ignoring zero disable reason");
            return None;
        }
        let entry = self.registry.get(reason);
        if entry.is_none() {
            debug!(protocol = %self.protocol, ?reason, "no registry entry; ignoring");
        }
        entry
    }

    fn publish(&self, reason: R, entry: &DisableRegistryEntry, transition: DisableTransition) {
        self.events
            .broadcast(DisableEvent::new(&self.protocol, reason, entry.id, transition));
    }

    fn state(&self) -> MutexGuard<'_, EngineState<R>> {
        lock(&self.state)
    }
}

/// Releases the dispatch flag if a sink panics mid-drain.
struct DispatchReset<'a, R: DisableReason>(&'a ProtocolDisableEngine<R>);

impl<R: DisableReason> Drop for DispatchReset<'_, R> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.state().dispatching = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Mutex, OnceLock, Weak, mpsc},
        time::Duration,
    };

    use uuid::Uuid;

    use super::*;
    use crate::disable::{
        reason::tests::TestReason,
        registry::{MessageProducer, static_message},
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum SinkCall {
        Disable(Uuid, SystemDisablePriority, String),
        Enable(Uuid),
        Display(Uuid, String),
        Remove(Uuid),
    }

    /// Records every sink call in a single ordered log.
    #[derive(Default)]
    struct RecordingSinks {
        calls: Mutex<Vec<SinkCall>>,
    }

    impl RecordingSinks {
        fn calls(&self) -> Vec<SinkCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SystemDisableSink for RecordingSinks {
        fn disable(&self, id: Uuid, priority: SystemDisablePriority, message: MessageProducer) {
            self.calls
                .lock()
                .unwrap()
                .push(SinkCall::Disable(id, priority, message()));
        }

        fn enable(&self, id: Uuid) {
            self.calls.lock().unwrap().push(SinkCall::Enable(id));
        }
    }

    impl MessageDisplaySink for RecordingSinks {
        fn display_message(&self, message: DisplayableMessage) {
            let text = message.render();
            self.calls
                .lock()
                .unwrap()
                .push(SinkCall::Display(message.id, text));
        }

        fn remove_message(&self, id: Uuid) {
            self.calls.lock().unwrap().push(SinkCall::Remove(id));
        }
    }

    const HOST_ID: Uuid = Uuid::from_u128(0x1);
    const LINK_ID: Uuid = Uuid::from_u128(0x2);
    const TILT_ID: Uuid = Uuid::from_u128(0x3);

    fn engine() -> (ProtocolDisableEngine<TestReason>, Arc<RecordingSinks>) {
        let sinks = Arc::new(RecordingSinks::default());
        let registry = DisableRegistry::new()
            .with(TestReason::HostDisabled, HOST_ID, static_message("Disabled by host"))
            .with(TestReason::LinkDown, LINK_ID, static_message("Link down"))
            .with(TestReason::Tilt, TILT_ID, static_message("Tilt"));
        let engine = ProtocolDisableEngine::builder("test")
            .registry(registry)
            .disable_sink(sinks.clone())
            .message_display(sinks.clone())
            .build()
            .unwrap();
        (engine, sinks)
    }

    const NORMAL: SystemDisablePriority = SystemDisablePriority::Normal;

    #[test]
    fn build_requires_both_sinks() {
        let sinks = Arc::new(RecordingSinks::default());
        let err = ProtocolDisableEngine::<TestReason>::builder("test")
            .message_display(sinks.clone())
            .build()
            .err();
        assert_eq!(err, Some(BuildError::missing("disable sink")));

        let err = ProtocolDisableEngine::<TestReason>::builder("test")
            .disable_sink(sinks)
            .build()
            .err();
        assert_eq!(err, Some(BuildError::missing("message display")));
    }

    #[test]
    fn disable_then_enable_round_trips_state() {
        let (engine, sinks) = engine();

        engine.disable(NORMAL, &[TestReason::HostDisabled]);
        assert!(engine.is_disable_state_active(TestReason::HostDisabled));
        assert!(engine.is_any_disable_active());

        engine.enable(&[TestReason::HostDisabled]);
        assert!(!engine.is_disable_state_active(TestReason::HostDisabled));
        assert!(!engine.is_any_disable_active());

        assert_eq!(
            sinks.calls(),
            vec![
                SinkCall::Disable(HOST_ID, NORMAL, "Disabled by host".into()),
                SinkCall::Enable(HOST_ID),
            ]
        );
    }

    #[test]
    fn unregistered_and_zero_reasons_are_ignored() {
        let (engine, sinks) = engine();

        engine.disable(NORMAL, &[TestReason::None, TestReason::Unregistered]);
        engine.disable_reason(NORMAL, TestReason::Unregistered, false);
        engine.disable_reason(NORMAL, TestReason::None, true);
        engine.enable(&[TestReason::None, TestReason::Unregistered]);

        assert!(engine.disable_states().is_empty());
        assert!(engine.soft_error_states().is_empty());
        assert!(sinks.calls().is_empty());
    }

    #[test]
    fn disable_twice_calls_sink_once() {
        let (engine, sinks) = engine();

        engine.disable(NORMAL, &[TestReason::LinkDown]);
        let after_first = engine.disable_states();
        engine.disable(NORMAL, &[TestReason::LinkDown]);
        engine.disable_reason(NORMAL, TestReason::LinkDown, true);

        assert_eq!(engine.disable_states(), after_first);
        assert_eq!(sinks.calls().len(), 1);
    }

    #[test]
    fn soft_error_is_displayed_once() {
        let (engine, sinks) = engine();

        engine.disable_reason(NORMAL, TestReason::Tilt, false);
        engine.disable_reason(NORMAL, TestReason::Tilt, false);

        assert!(engine.is_soft_error_state_active(TestReason::Tilt));
        assert!(!engine.is_disable_state_active(TestReason::Tilt));
        assert_eq!(sinks.calls(), vec![SinkCall::Display(TILT_ID, "Tilt".into())]);
    }

    #[test]
    fn escalation_removes_message_before_locking() {
        let (engine, sinks) = engine();

        engine.disable_reason(NORMAL, TestReason::Tilt, false);
        engine.disable_reason(SystemDisablePriority::Immediate, TestReason::Tilt, true);

        assert!(!engine.is_soft_error_state_active(TestReason::Tilt));
        assert!(engine.is_disable_state_active(TestReason::Tilt));
        assert_eq!(
            sinks.calls(),
            vec![
                SinkCall::Display(TILT_ID, "Tilt".into()),
                SinkCall::Remove(TILT_ID),
                SinkCall::Disable(TILT_ID, SystemDisablePriority::Immediate, "Tilt".into()),
            ]
        );
    }

    #[test]
    fn batch_disable_escalates_soft_errors() {
        let (engine, sinks) = engine();

        engine.disable_reason(NORMAL, TestReason::Tilt, false);
        engine.disable(NORMAL, &[TestReason::Tilt, TestReason::LinkDown]);

        assert!(!engine.is_soft_error_state_active(TestReason::Tilt));
        assert!(engine.is_disable_state_active(TestReason::Tilt));
        assert!(engine.is_disable_state_active(TestReason::LinkDown));
        let removes = sinks
            .calls()
            .into_iter()
            .filter(|call| matches!(call, SinkCall::Remove(_)))
            .count();
        assert_eq!(removes, 1);
    }

    #[test]
    fn soft_error_does_not_downgrade_lockup() {
        let (engine, sinks) = engine();

        engine.disable(NORMAL, &[TestReason::HostDisabled]);
        engine.disable_reason(NORMAL, TestReason::HostDisabled, false);

        assert!(engine.is_disable_state_active(TestReason::HostDisabled));
        assert!(!engine.is_soft_error_state_active(TestReason::HostDisabled));
        assert_eq!(sinks.calls().len(), 1);
    }

    #[test]
    fn soft_error_unaffected_by_unrelated_lockups() {
        let (engine, _sinks) = engine();

        engine.disable(NORMAL, &[TestReason::HostDisabled]);
        engine.disable_reason(NORMAL, TestReason::Tilt, false);

        assert!(engine.is_soft_error_state_active(TestReason::Tilt));
    }

    #[test]
    fn enable_clears_soft_error_through_display() {
        let (engine, sinks) = engine();

        engine.disable_reason(NORMAL, TestReason::Tilt, false);
        engine.enable(&[TestReason::Tilt]);
        engine.enable(&[TestReason::Tilt]);

        assert!(!engine.is_soft_error_state_active(TestReason::Tilt));
        assert_eq!(
            sinks.calls(),
            vec![
                SinkCall::Display(TILT_ID, "Tilt".into()),
                SinkCall::Remove(TILT_ID),
            ]
        );
    }

    #[test]
    fn reasons_are_independent() {
        let (engine, _sinks) = engine();

        engine.disable(NORMAL, &[TestReason::HostDisabled, TestReason::LinkDown]);
        engine.enable(&[TestReason::HostDisabled]);

        assert!(!engine.is_disable_state_active(TestReason::HostDisabled));
        assert!(engine.is_disable_state_active(TestReason::LinkDown));
    }

    #[test]
    fn transitions_are_broadcast() {
        let (engine, _sinks) = engine();
        let mut rx = engine.subscribe();

        engine.disable_reason(NORMAL, TestReason::Tilt, false);
        engine.disable(NORMAL, &[TestReason::Tilt]);
        engine.enable(&[TestReason::Tilt]);

        let transitions: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|event| event.transition)
            .collect();
        assert_eq!(
            transitions,
            vec![
                DisableTransition::SoftError,
                DisableTransition::Locked { priority: NORMAL },
                DisableTransition::Cleared,
            ]
        );
    }

    #[test]
    fn soft_and_hard_never_overlap_under_contention() {
        let (engine, _sinks) = engine();
        let engine = Arc::new(engine);

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    for round in 0..200 {
                        match (worker + round) % 3 {
                            0 => engine.disable_reason(NORMAL, TestReason::Tilt, false),
                            1 => engine.disable_reason(NORMAL, TestReason::Tilt, true),
                            _ => engine.enable(&[TestReason::Tilt]),
                        }
                        let snapshot = engine.snapshot();
                        assert!(!snapshot.disable_state.intersects(snapshot.soft_error_state));
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
    }

    /// Lockup manager that clears the link lockup whenever the host locks the machine.
    #[derive(Default)]
    struct ReentrantSinks {
        engine: OnceLock<Weak<ProtocolDisableEngine<TestReason>>>,
        recorded: RecordingSinks,
    }

    impl SystemDisableSink for ReentrantSinks {
        fn disable(&self, id: Uuid, priority: SystemDisablePriority, message: MessageProducer) {
            self.recorded.disable(id, priority, message);
            if id == HOST_ID {
                if let Some(engine) = self.engine.get().and_then(Weak::upgrade) {
                    engine.enable(&[TestReason::LinkDown]);
                    assert!(!engine.is_disable_state_active(TestReason::LinkDown));
                }
            }
        }

        fn enable(&self, id: Uuid) {
            self.recorded.enable(id);
        }
    }

    impl MessageDisplaySink for ReentrantSinks {
        fn display_message(&self, message: DisplayableMessage) {
            self.recorded.display_message(message);
        }

        fn remove_message(&self, id: Uuid) {
            self.recorded.remove_message(id);
        }
    }

    #[test]
    fn sink_may_call_back_into_the_engine() {
        let sinks = Arc::new(ReentrantSinks::default());
        let registry = DisableRegistry::new()
            .with(TestReason::HostDisabled, HOST_ID, static_message("Disabled by host"))
            .with(TestReason::LinkDown, LINK_ID, static_message("Link down"));
        let engine = Arc::new(
            ProtocolDisableEngine::builder("test")
                .registry(registry)
                .disable_sink(sinks.clone())
                .message_display(sinks.clone())
                .build()
                .unwrap(),
        );
        assert!(sinks.engine.set(Arc::downgrade(&engine)).is_ok());

        engine.disable(NORMAL, &[TestReason::LinkDown]);

        let (done_tx, done_rx) = mpsc::channel();
        let worker_engine = engine.clone();
        std::thread::spawn(move || {
            worker_engine.disable(NORMAL, &[TestReason::HostDisabled]);
            let _ = done_tx.send(());
        });
        done_rx
            .recv_timeout(Duration::from_secs(3))
            .expect("disable hung while the sink re-entered the engine");

        assert!(engine.is_disable_state_active(TestReason::HostDisabled));
        assert!(!engine.is_disable_state_active(TestReason::LinkDown));
        assert_eq!(
            sinks.recorded.calls(),
            vec![
                SinkCall::Disable(LINK_ID, NORMAL, "Link down".into()),
                SinkCall::Disable(HOST_ID, NORMAL, "Disabled by host".into()),
                SinkCall::Enable(LINK_ID),
            ]
        );
    }
}
