use std::{
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    lock,
    pending::{
        coordinator::{ChangeListener, PendingChangeCoordinator},
        request::ChangeRequest,
    },
};

/// Deadline used for negotiations started by queued requests.
pub const DEFAULT_CHANGE_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Ordered batch of change requests resolved together by the coordinator.
///
/// Each request is tagged with the negotiation it joined, and a resolution only
/// drains the requests of its own negotiation. Requests run with the list lock
/// released, so `commit` and `cancel` may queue follow-up requests.
pub struct ChangeRequestQueue {
    coordinator: Arc<PendingChangeCoordinator>,
    timeout: Duration,
    requests: Mutex<Vec<(Uuid, Box<dyn ChangeRequest>)>>,
}

impl ChangeRequestQueue {
    /// Create a queue and subscribe it to `coordinator`'s commit/cancel callbacks.
    pub fn new(coordinator: Arc<PendingChangeCoordinator>, timeout: Duration) -> Arc<Self> {
        let queue = Arc::new(Self {
            coordinator,
            timeout,
            requests: Mutex::new(Vec::new()),
        });
        let listener: Weak<dyn ChangeListener> = Arc::downgrade(&queue) as Weak<dyn ChangeListener>;
        queue.coordinator.add_listener(listener);
        queue
    }

    /// Queue `request` and start (or refresh) the negotiation it needs.
    ///
    /// The negotiation is started with the list lock held, so a commit or cancel
    /// racing this call either sees the request or belongs to an earlier
    /// negotiation. A request the coordinator refuses is cancelled at once.
    pub fn add_request(&self, mut request: Box<dyn ChangeRequest>) {
        let status = request.change_type().meter_collect_status();
        let mut requests = lock(&self.requests);
        match self
            .coordinator
            .start_pending_change(status, Some(self.timeout))
        {
            Some(negotiation) => {
                requests.push((negotiation, request));
                debug!(queued = requests.len(), ?status, %negotiation, "change request queued");
            }
            None => {
                drop(requests);
                warn!(?status, "coordinator refused change request; cancelling it");
                request.cancel();
            }
        }
    }

    /// Number of requests awaiting resolution.
    pub fn len(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drain(&self, negotiation: Uuid, commit: bool) {
        let mut resolved: Vec<Box<dyn ChangeRequest>> = {
            let mut requests = lock(&self.requests);
            let (matching, rest) = std::mem::take(&mut *requests)
                .into_iter()
                .partition::<Vec<_>, _>(|(id, _)| *id == negotiation);
            *requests = rest;
            matching.into_iter().map(|(_, request)| request).collect()
        };
        if resolved.is_empty() {
            return;
        }

        info!(count = resolved.len(), commit, %negotiation, "resolving queued change requests");
        for request in &mut resolved {
            if commit {
                request.commit();
            } else {
                request.cancel();
            }
        }
    }
}

impl ChangeListener for ChangeRequestQueue {
    fn on_change_commit(&self, negotiation: Uuid) {
        self.drain(negotiation, true);
    }

    fn on_change_cancel(&self, negotiation: Uuid) {
        self.drain(negotiation, false);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::pending::{
        coordinator::{MeterCollectStatus, PendingChangeSettings, tests::RecordingReporter},
        request::{ChangeType, FnChangeRequest},
    };

    type Log = Arc<Mutex<Vec<String>>>;

    fn request(change_type: ChangeType, name: &'static str, log: &Log) -> Box<dyn ChangeRequest> {
        let commit_log = log.clone();
        let cancel_log = log.clone();
        Box::new(FnChangeRequest::new(
            change_type,
            move || commit_log.lock().unwrap().push(format!("commit {name}")),
            move || cancel_log.lock().unwrap().push(format!("cancel {name}")),
        ))
    }

    fn queue() -> (Arc<ChangeRequestQueue>, Arc<PendingChangeCoordinator>) {
        let coordinator = PendingChangeCoordinator::new(
            PendingChangeSettings::default(),
            Arc::new(RecordingReporter::default()),
        )
        .unwrap();
        let queue = ChangeRequestQueue::new(coordinator.clone(), DEFAULT_CHANGE_REQUEST_TIMEOUT);
        (queue, coordinator)
    }

    #[tokio::test(start_paused = true)]
    async fn add_request_starts_matching_negotiation() {
        let (queue, coordinator) = queue();
        let log = Log::default();

        queue.add_request(request(ChangeType::Games, "game 7", &log));
        assert_eq!(
            coordinator.status(),
            MeterCollectStatus::GameDenomPaytableChange
        );

        queue.add_request(request(ChangeType::Meters, "meters", &log));
        assert_eq!(coordinator.status(), MeterCollectStatus::LifetimeMeterChange);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_commits_each_request_once() {
        let (queue, coordinator) = queue();
        let log = Log::default();

        queue.add_request(request(ChangeType::Denominations, "denom", &log));
        coordinator.ready_for_pending_change();
        coordinator.ready_for_pending_change();

        assert!(queue.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["commit denom".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_rolls_back_in_order() {
        let (queue, coordinator) = queue();
        let log = Log::default();

        queue.add_request(request(ChangeType::Games, "first", &log));
        queue.add_request(request(ChangeType::Paytables, "second", &log));
        coordinator.cancel_pending_change();

        assert!(queue.is_empty());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["cancel first".to_owned(), "cancel second".to_owned()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_queued_requests() {
        let (queue, _coordinator) = queue();
        let log = Log::default();

        queue.add_request(request(ChangeType::Games, "late", &log));
        tokio::time::sleep(DEFAULT_CHANGE_REQUEST_TIMEOUT + Duration::from_millis(1)).await;

        assert!(queue.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["cancel late".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_request_is_cancelled_immediately() {
        let (queue, coordinator) = queue();
        let log = Log::default();

        coordinator.shutdown();
        queue.add_request(request(ChangeType::Paytables, "late", &log));

        assert!(queue.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["cancel late".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_request_may_queue_a_retry() {
        let (queue, coordinator) = queue();
        let log = Log::default();

        let retry_queue = Arc::downgrade(&queue);
        let retry_log = log.clone();
        queue.add_request(Box::new(FnChangeRequest::new(
            ChangeType::Games,
            || {},
            move || {
                if let Some(queue) = retry_queue.upgrade() {
                    queue.add_request(request(ChangeType::Games, "retry", &retry_log));
                }
            },
        )));
        coordinator.cancel_pending_change();

        assert_eq!(queue.len(), 1);
        assert!(coordinator.is_pending());

        coordinator.ready_for_pending_change();
        assert!(queue.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["commit retry".to_owned()]);
    }

    #[tokio::test]
    async fn racing_add_and_ready_never_orphan_a_negotiation() {
        let (queue, coordinator) = queue();
        let committed = Arc::new(AtomicUsize::new(0));
        let counted = |committed: &Arc<AtomicUsize>| -> Box<dyn ChangeRequest> {
            let committed = committed.clone();
            Box::new(FnChangeRequest::new(
                ChangeType::Denominations,
                move || {
                    committed.fetch_add(1, Ordering::SeqCst);
                },
                || panic!("no request should be cancelled"),
            ))
        };

        const ROUNDS: usize = 500;
        for _ in 0..ROUNDS {
            queue.add_request(counted(&committed));

            let adder = {
                let queue = queue.clone();
                let request = counted(&committed);
                std::thread::spawn(move || queue.add_request(request))
            };
            let committer = {
                let coordinator = coordinator.clone();
                std::thread::spawn(move || coordinator.ready_for_pending_change())
            };
            adder.join().unwrap();
            committer.join().unwrap();

            assert_eq!(coordinator.is_pending(), !queue.is_empty());
            coordinator.ready_for_pending_change();
            assert!(queue.is_empty());
            assert!(!coordinator.is_pending());
        }

        assert_eq!(committed.load(Ordering::SeqCst), ROUNDS * 2);
        coordinator.shutdown();
    }
}
