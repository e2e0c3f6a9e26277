use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{watch, Mutex};
use tokio::task::{self, JoinHandle};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::archive::{archive_name, Archiver};
use crate::models::DonationRecord;
use crate::remote::{SubmitError, TransportSlot, SEND_TIMEOUT_SECS};

use super::state::{
    AttemptId, AttemptResult, Effect, Event, SubmissionSnapshot, SubmissionState, WorkflowError,
};

struct ActiveAttempt {
    id: AttemptId,
    token: CancellationToken,
}

struct Inner {
    state: SubmissionState,
    active: Option<ActiveAttempt>,
    task: Option<JoinHandle<()>>,
}

/// Runs the submission workflow: applies events to [`SubmissionState`] under
/// one lock and carries out the effects it asks for.
#[derive(Clone)]
pub struct SubmissionController {
    inner: Arc<Mutex<Inner>>,
    transport: TransportSlot,
    archiver: Arc<dyn Archiver>,
    updates: Arc<watch::Sender<SubmissionSnapshot>>,
    send_timeout: Duration,
}

impl SubmissionController {
    pub fn new(transport: TransportSlot, archiver: Arc<dyn Archiver>) -> Self {
        Self::with_timeout(transport, archiver, Duration::from_secs(SEND_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        transport: TransportSlot,
        archiver: Arc<dyn Archiver>,
        send_timeout: Duration,
    ) -> Self {
        let state = SubmissionState::new();
        let (updates, _) = watch::channel(state.snapshot());

        Self {
            inner: Arc::new(Mutex::new(Inner {
                state,
                active: None,
                task: None,
            })),
            transport,
            archiver,
            updates: Arc::new(updates),
            send_timeout,
        }
    }

    pub fn transport(&self) -> &TransportSlot {
        &self.transport
    }

    pub async fn snapshot(&self) -> SubmissionSnapshot {
        self.inner.lock().await.state.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SubmissionSnapshot> {
        self.updates.subscribe()
    }

    /// Makes `record` the donation to send next.
    pub async fn load_scrape(&self, record: DonationRecord) -> Result<(), WorkflowError> {
        let mut inner = self.inner.lock().await;
        inner.state.handle(Event::Scraped(record))?;
        self.publish(&inner.state);
        Ok(())
    }

    pub async fn set_name(&self, name: impl Into<String>) -> Result<(), WorkflowError> {
        let mut inner = self.inner.lock().await;
        inner.state.handle(Event::NameEdited(name.into()))?;
        self.publish(&inner.state);
        Ok(())
    }

    /// Starts sending the loaded donation under the current name. Returns as
    /// soon as the request is issued; the outcome arrives through
    /// [`SubmissionController::subscribe`].
    pub async fn send(&self) -> Result<AttemptId, WorkflowError> {
        let mut inner = self.inner.lock().await;

        let effects = match inner.state.handle(Event::SendRequested) {
            Ok(effects) => effects,
            Err(err) => {
                // The name error is part of the state the UI shows.
                if matches!(err, WorkflowError::InvalidName(_)) {
                    self.publish(&inner.state);
                }
                return Err(err);
            }
        };

        let mut started = None;
        for effect in effects {
            if let Effect::StartSend { attempt, record } = effect {
                let token = CancellationToken::new();
                let worker = self.clone();
                let child = token.clone();

                info!(
                    "Sending donation from {} ({} coins), attempt {}",
                    record.from().unwrap_or_default(),
                    record.amount(),
                    attempt.0
                );

                inner.active = Some(ActiveAttempt { id: attempt, token });
                inner.task = Some(tokio::spawn(async move {
                    worker.run_attempt(attempt, record, child).await;
                }));
                started = Some(attempt);
            }
        }

        self.publish(&inner.state);
        started.ok_or(WorkflowError::NothingToSend)
    }

    /// Asks the in-flight send to stop. The send may still complete first,
    /// in which case its own outcome stands. Returns `false` when nothing is
    /// being sent.
    pub async fn cancel(&self) -> bool {
        let mut inner = self.inner.lock().await;

        let effects = match inner.state.handle(Event::CancelRequested) {
            Ok(effects) => effects,
            Err(err) => {
                debug!("Ignoring cancel: {err}");
                return false;
            }
        };

        for effect in effects {
            if let Effect::CancelSend(id) = effect {
                match &inner.active {
                    Some(active) if active.id == id => {
                        info!("Cancelling donation attempt {}", id.0);
                        active.token.cancel();
                    }
                    _ => warn!("No running task for attempt {}", id.0),
                }
            }
        }

        self.publish(&inner.state);
        true
    }

    /// Waits for the most recent send task, if any, to finish including its
    /// archival.
    pub async fn wait_for_attempt(&self) {
        let task = self.inner.lock().await.task.take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                error!("Donation send task failed: {err}");
            }
        }
    }

    async fn run_attempt(&self, id: AttemptId, record: DonationRecord, token: CancellationToken) {
        let result = match self.transport.current() {
            None => AttemptResult::Completed(Err(SubmitError::NotConfigured.to_string())),
            Some(transport) => {
                tokio::select! {
                    biased;
                    result = time::timeout(self.send_timeout, transport.submit(&record)) => {
                        match result {
                            Ok(Ok(())) => AttemptResult::Completed(Ok(())),
                            Ok(Err(err)) => AttemptResult::Completed(Err(err.to_string())),
                            Err(_) => AttemptResult::Completed(Err(SubmitError::TimedOut.to_string())),
                        }
                    }
                    _ = token.cancelled() => AttemptResult::Stopped,
                }
            }
        };

        self.finish(id, result).await;
    }

    async fn finish(&self, id: AttemptId, result: AttemptResult) {
        match &result {
            AttemptResult::Completed(Ok(())) => info!("Donation attempt {} succeeded", id.0),
            AttemptResult::Completed(Err(reason)) => {
                warn!("Donation attempt {} failed: {reason}", id.0)
            }
            AttemptResult::Stopped => info!("Donation attempt {} cancelled", id.0),
        }

        let effects = {
            let mut inner = self.inner.lock().await;
            if inner.active.as_ref().is_some_and(|active| active.id == id) {
                inner.active = None;
            }

            match inner.state.handle(Event::Finished { attempt: id, result }) {
                Ok(effects) => effects,
                Err(err) => {
                    error!("Rejected result of attempt {}: {err}", id.0);
                    Vec::new()
                }
            }
        };

        for effect in effects {
            if let Effect::Archive { record, success } = effect {
                self.archive(record, success).await;
            }
        }

        let inner = self.inner.lock().await;
        self.publish(&inner.state);
    }

    async fn archive(&self, record: DonationRecord, success: bool) {
        let archiver = Arc::clone(&self.archiver);
        let name = archive_name(&record, success);

        let result =
            task::spawn_blocking(move || archiver.archive(record.screenshot(), &name, success))
                .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("Failed to archive donation screenshot: {err:#}"),
            Err(err) => error!("Archive task failed: {err}"),
        }
    }

    fn publish(&self, state: &SubmissionState) {
        self.updates.send_replace(state.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::Transport;
    use crate::submission::Outcome;
    use async_trait::async_trait;
    use image::RgbaImage;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    /// Completes a submission only once released.
    struct GatedTransport {
        release: Arc<Notify>,
        succeed: bool,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn submit(&self, _record: &DonationRecord) -> Result<(), SubmitError> {
            self.release.notified().await;
            if self.succeed {
                Ok(())
            } else {
                Err(SubmitError::UnexpectedStatus(StatusCode::BAD_GATEWAY))
            }
        }
    }

    #[derive(Default)]
    struct RecordingArchiver {
        calls: AtomicUsize,
        names: StdMutex<Vec<(String, bool)>>,
    }

    impl Archiver for RecordingArchiver {
        fn archive(&self, _image: &RgbaImage, base_name: &str, success: bool) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.names
                .lock()
                .unwrap()
                .push((base_name.to_string(), success));
            Ok(())
        }
    }

    struct Harness {
        controller: SubmissionController,
        archiver: Arc<RecordingArchiver>,
        release: Arc<Notify>,
    }

    fn harness(succeed: bool) -> Harness {
        let release = Arc::new(Notify::new());
        let transport = TransportSlot::with_transport(Arc::new(GatedTransport {
            release: Arc::clone(&release),
            succeed,
        }));
        let archiver = Arc::new(RecordingArchiver::default());
        let controller = SubmissionController::new(transport, archiver.clone());

        Harness {
            controller,
            archiver,
            release,
        }
    }

    async fn start(controller: &SubmissionController) {
        controller
            .load_scrape(DonationRecord::new(
                None,
                "Receiver".into(),
                12_345,
                RgbaImage::new(2, 2),
            ))
            .await
            .unwrap();
        controller.set_name("Zezima").await.unwrap();
        controller.send().await.unwrap();
    }

    #[tokio::test]
    async fn cancel_before_completion_skips_archival() {
        let h = harness(true);
        start(&h.controller).await;

        // Never released, so only the cancellation can end the request.
        assert!(h.controller.cancel().await);
        h.controller.wait_for_attempt().await;

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.last_outcome, Some(Outcome::Cancelled));
        assert!(snapshot.can_send);
        assert_eq!(snapshot.name_input, "Zezima");
        assert_eq!(h.archiver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_after_completion_keeps_the_outcome() {
        let h = harness(true);
        start(&h.controller).await;

        h.release.notify_one();
        h.controller.wait_for_attempt().await;
        assert!(!h.controller.cancel().await);

        assert_eq!(
            h.controller.snapshot().await.last_outcome,
            Some(Outcome::Succeeded)
        );
        assert_eq!(
            *h.archiver.names.lock().unwrap(),
            vec![("Donation (Zezima) (12.3k)".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn failure_is_archived_with_marker() {
        let h = harness(false);
        start(&h.controller).await;

        h.release.notify_one();
        h.controller.wait_for_attempt().await;

        let snapshot = h.controller.snapshot().await;
        assert!(matches!(snapshot.last_outcome, Some(Outcome::Failed(_))));
        assert!(!snapshot.can_send);
        assert_eq!(
            *h.archiver.names.lock().unwrap(),
            vec![("Donation (Zezima) (12.3k) (Failed)".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn unconfigured_transport_fails_immediately() {
        let archiver = Arc::new(RecordingArchiver::default());
        let controller = SubmissionController::new(TransportSlot::new(), archiver.clone());
        start(&controller).await;
        controller.wait_for_attempt().await;

        assert_eq!(
            controller.snapshot().await.last_outcome,
            Some(Outcome::Failed(SubmitError::NotConfigured.to_string()))
        );
        assert_eq!(archiver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_remote_times_out() {
        let release = Arc::new(Notify::new());
        let transport = TransportSlot::with_transport(Arc::new(GatedTransport {
            release,
            succeed: true,
        }));
        let archiver = Arc::new(RecordingArchiver::default());
        let controller = SubmissionController::with_timeout(
            transport,
            archiver.clone(),
            Duration::from_millis(50),
        );

        start(&controller).await;
        controller.wait_for_attempt().await;

        assert_eq!(
            controller.snapshot().await.last_outcome,
            Some(Outcome::Failed(SubmitError::TimedOut.to_string()))
        );
        assert_eq!(archiver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_name_is_published() {
        let h = harness(true);
        let mut updates = h.controller.subscribe();
        h.controller
            .load_scrape(DonationRecord::new(None, "Receiver".into(), 1, RgbaImage::new(1, 1)))
            .await
            .unwrap();
        h.controller.set_name("bad_name").await.unwrap();

        assert!(h.controller.send().await.is_err());
        let snapshot = updates.borrow_and_update().clone();
        assert!(snapshot.name_error.is_some());
        assert!(snapshot.can_send);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exactly_one_archive_per_terminal_outcome() {
        for seed in 0..100u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let h = harness(rng.gen_bool(0.5));
            start(&h.controller).await;

            let cancel_first = rng.gen_bool(0.5);
            let pause = rng.gen_range(0..4);

            if cancel_first {
                h.controller.cancel().await;
                for _ in 0..pause {
                    task::yield_now().await;
                }
                h.release.notify_one();
            } else {
                h.release.notify_one();
                for _ in 0..pause {
                    task::yield_now().await;
                }
                h.controller.cancel().await;
            }

            h.controller.wait_for_attempt().await;

            let outcome = h.controller.snapshot().await.last_outcome;
            let archived = h.archiver.calls.load(Ordering::SeqCst);
            match outcome {
                Some(Outcome::Succeeded) | Some(Outcome::Failed(_)) => {
                    assert_eq!(archived, 1, "seed {seed}")
                }
                Some(Outcome::Cancelled) => assert_eq!(archived, 0, "seed {seed}"),
                None => panic!("seed {seed}: attempt never settled"),
            }
        }
    }
}
