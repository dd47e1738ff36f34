use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use tracing::warn;
use uuid::Uuid;

use crate::disable::reason::DisableReason;

/// Deferred producer of a human-readable message.
///
/// Evaluated when the message is shown, so localized or live text is fetched
/// at display time rather than at registration.
pub type MessageProducer = Arc<dyn Fn() -> String + Send + Sync>;

/// Wrap a static string into a [`MessageProducer`].
pub fn static_message(text: &'static str) -> MessageProducer {
    Arc::new(move || text.to_owned())
}

/// Static metadata attached to a single disable reason.
#[derive(Clone)]
pub struct DisableRegistryEntry {
    /// Correlation id used for every disable/enable call for this reason.
    pub id: Uuid,
    /// Message shown to the operator while the reason is active.
    pub message: MessageProducer,
}

impl DisableRegistryEntry {
    /// Create an entry from a correlation id and message producer.
    pub fn new(id: Uuid, message: MessageProducer) -> Self {
        Self { id, message }
    }

    /// Evaluate the message producer now.
    pub fn message_text(&self) -> String {
        (self.message)()
    }
}

impl fmt::Debug for DisableRegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisableRegistryEntry")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Lookup table from reason to its [`DisableRegistryEntry`].
///
/// Immutable once handed to an engine; reasons missing here are skipped by
/// every engine operation.
#[derive(Clone, Debug)]
pub struct DisableRegistry<R: DisableReason> {
    entries: IndexMap<R, DisableRegistryEntry>,
}

impl<R: DisableReason> DisableRegistry<R> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Register `reason`, replacing any previous entry. The zero reason is rejected.
    pub fn register(&mut self, reason: R, id: Uuid, message: MessageProducer) -> &mut Self {
        if reason.is_none() {
            warn!(?reason, "refusing to register the zero disable reason");
            return self;
        }
        self.entries
            .insert(reason, DisableRegistryEntry::new(id, message));
        self
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with(mut self, reason: R, id: Uuid, message: MessageProducer) -> Self {
        self.register(reason, id, message);
        self
    }

    /// Look up the entry for `reason`.
    pub fn get(&self, reason: R) -> Option<&DisableRegistryEntry> {
        if reason.is_none() {
            return None;
        }
        self.entries.get(&reason)
    }

    /// Whether `reason` has an entry.
    pub fn contains(&self, reason: R) -> bool {
        self.get(reason).is_some()
    }

    /// Number of registered reasons.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over reasons in registration order.
    pub fn reasons(&self) -> impl Iterator<Item = R> + '_ {
        self.entries.keys().copied()
    }
}

impl<R: DisableReason> Default for DisableRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::disable::reason::tests::TestReason;

    #[test]
    fn zero_reason_is_not_registered() {
        let registry = DisableRegistry::new().with(
            TestReason::None,
            Uuid::new_v4(),
            static_message("nothing"),
        );
        assert!(registry.is_empty());
        assert!(registry.get(TestReason::None).is_none());
    }

    #[test]
    fn message_is_evaluated_lazily() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = DisableRegistry::new().with(
            TestReason::Tilt,
            Uuid::new_v4(),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                "tilt".to_owned()
            }),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let entry = registry.get(TestReason::Tilt).unwrap();
        assert_eq!(entry.message_text(), "tilt");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reasons_keep_registration_order() {
        let registry = DisableRegistry::new()
            .with(TestReason::Tilt, Uuid::new_v4(), static_message("b"))
            .with(TestReason::HostDisabled, Uuid::new_v4(), static_message("a"));
        let reasons: Vec<_> = registry.reasons().collect();
        assert_eq!(reasons, vec![TestReason::Tilt, TestReason::HostDisabled]);
    }
}
