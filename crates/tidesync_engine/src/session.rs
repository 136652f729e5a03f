//! The run coordinator.
//!
//! A [`ReplicationSession`] owns the lifecycle of replication against one
//! endpoint: it executes pull-then-push runs one at a time, coalesces run
//! requests, retries failed runs after a fixed delay and, in live mode,
//! triggers runs from a polling timer and from local writes.
//!
//! ## Coalescing
//!
//! Run requests set a `pending` flag. A single driver task, guarded by an
//! `in_flight` flag, clears `pending` before each run and loops while it was
//! set, so any number of requests made during a run collapse into one
//! trailing run.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tidesync_protocol::{is_reserved_key, Body, ChangeRecord, Document, EchoTagger, EndpointId};
use tidesync_store::LocalStore;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::config::ReplicationOptions;
use crate::context::RunContext;
use crate::error::{ReplicationError, ReplicationResult};
use crate::events::ReplicationEvents;
use crate::pull::pull_cycle;
use crate::push::push_cycle;
use crate::state::{PullOutcome, PushOutcome, ReplicationStats, RunState};
use crate::transport::Transport;

/// A replication session between a local store and one remote endpoint.
///
/// Cloning a session yields another handle to the same session.
///
/// # Example
///
/// ```rust,ignore
/// let session = ReplicationSession::start(
///     store,
///     transport,
///     ReplicationOptions::new("https://example.com/graphql")
///         .with_live(true)
///         .with_pull(pull)
///         .with_push(push),
/// )?;
/// session.await_initial_replication().await;
/// ```
pub struct ReplicationSession<S: LocalStore, T: Transport> {
    inner: Arc<SessionInner<S, T>>,
}

impl<S: LocalStore, T: Transport> Clone for ReplicationSession<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SessionInner<S: LocalStore, T: Transport> {
    id: Uuid,
    store: Arc<S>,
    transport: Arc<T>,
    options: Arc<ReplicationOptions>,
    checkpoints: Arc<CheckpointStore<S>>,
    tagger: EchoTagger,
    events: ReplicationEvents,
    runtime: Handle,

    headers: RwLock<BTreeMap<String, String>>,
    state: RwLock<RunState>,
    stats: RwLock<ReplicationStats>,

    cancelled: Arc<AtomicBool>,
    pending: AtomicBool,
    in_flight: AtomicBool,
    retry_scheduled: AtomicBool,
    started_runs: AtomicU64,

    finished_tx: watch::Sender<u64>,
    initial_tx: watch::Sender<bool>,
    stopped_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: LocalStore, T: Transport> ReplicationSession<S, T> {
    /// Validates `options` and starts a session.
    ///
    /// Must be called within a tokio runtime. Configuration problems are
    /// returned here; every later failure is reported on the error channel.
    pub fn start(
        store: Arc<S>,
        transport: Arc<T>,
        options: ReplicationOptions,
    ) -> ReplicationResult<Self> {
        options.validate()?;
        let runtime = Handle::try_current().map_err(|_| {
            ReplicationError::Configuration("sessions must be started within a tokio runtime".into())
        })?;
        let changes = store.subscribe()?;

        let endpoint = EndpointId::from_url(&options.url);
        let inner = Arc::new(SessionInner {
            id: Uuid::new_v4(),
            checkpoints: Arc::new(CheckpointStore::new(Arc::clone(&store), endpoint.clone())),
            tagger: EchoTagger::new(endpoint),
            store,
            transport,
            events: ReplicationEvents::new(),
            runtime,
            headers: RwLock::new(options.headers.clone()),
            state: RwLock::new(RunState::Idle),
            stats: RwLock::new(ReplicationStats::default()),
            cancelled: Arc::new(AtomicBool::new(false)),
            pending: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            retry_scheduled: AtomicBool::new(false),
            started_runs: AtomicU64::new(0),
            finished_tx: watch::channel(0).0,
            initial_tx: watch::channel(false).0,
            stopped_tx: watch::channel(false).0,
            tasks: Mutex::new(Vec::new()),
            options: Arc::new(options),
        });

        info!(
            session = %inner.id,
            endpoint = %inner.tagger.endpoint().short(),
            live = inner.options.live,
            "replication session started"
        );

        inner.spawn_change_listener(changes);
        if inner.options.live {
            inner.spawn_live_timer();
        }
        if inner.options.auto_start {
            inner.trigger();
        }

        Ok(Self { inner })
    }

    /// Requests a pull-then-push run and waits until a run that started
    /// after this call has finished, or until the session stopped.
    ///
    /// Concurrent calls are coalesced. Failures are reported on the error
    /// channel, never returned.
    pub async fn run(&self) {
        if self.is_stopped() {
            return;
        }
        let mut finished = self.inner.finished_tx.subscribe();
        let mut stopped = self.inner.stopped_tx.subscribe();
        let needed = self.inner.trigger();

        tokio::select! {
            _ = finished.wait_for(|done| *done >= needed) => {}
            _ = stopped.wait_for(|stopped| *stopped) => {}
        }
    }

    /// Triggers a run without waiting for it, e.g. when the remote signals
    /// that it has new data.
    pub fn notify_remote_change(&self) {
        if !self.is_stopped() {
            self.inner.trigger();
        }
    }

    /// Stops the session. Idempotent.
    ///
    /// A request already in flight is allowed to finish but its result is
    /// discarded.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Returns true once the session stopped.
    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Resolves once the session stopped.
    pub async fn stopped(&self) {
        let mut stopped = self.inner.stopped_tx.subscribe();
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }

    /// Resolves after the first run that completed without error.
    ///
    /// Never resolves while runs keep failing; callers needing a bound
    /// must apply their own timeout.
    pub async fn await_initial_replication(&self) {
        let mut initial = self.inner.initial_tx.subscribe();
        let _ = initial.wait_for(|done| *done).await;
    }

    /// Replaces the request headers. Applies from the next run on.
    pub fn set_headers(&self, headers: BTreeMap<String, String>) {
        *self.inner.headers.write() = headers;
    }

    /// Returns the current request headers.
    pub fn headers(&self) -> BTreeMap<String, String> {
        self.inner.headers.read().clone()
    }

    /// Subscribes to documents written by pulls.
    pub fn subscribe_received(&self) -> broadcast::Receiver<Document> {
        self.inner.events.subscribe_received()
    }

    /// Subscribes to rows acknowledged by the remote.
    pub fn subscribe_sent(&self) -> broadcast::Receiver<Body> {
        self.inner.events.subscribe_sent()
    }

    /// Subscribes to run start (`true`) and end (`false`) transitions.
    pub fn subscribe_active(&self) -> broadcast::Receiver<bool> {
        self.inner.events.subscribe_active()
    }

    /// Subscribes to errors.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ReplicationError> {
        self.inner.events.subscribe_errors()
    }

    /// Returns the current run state.
    pub fn state(&self) -> RunState {
        *self.inner.state.read()
    }

    /// Returns a snapshot of the session statistics.
    pub fn stats(&self) -> ReplicationStats {
        self.inner.stats.read().clone()
    }

    /// Returns the endpoint identity.
    pub fn endpoint(&self) -> &EndpointId {
        self.inner.tagger.endpoint()
    }

    /// Returns the checkpoint store of this session's endpoint.
    pub fn checkpoints(&self) -> &CheckpointStore<S> {
        &self.inner.checkpoints
    }
}

impl<S: LocalStore, T: Transport> SessionInner<S, T> {
    fn is_stopped(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Records run intent and makes sure a driver is running. Returns the
    /// number of the first run that will observe this intent.
    fn trigger(self: &Arc<Self>) -> u64 {
        let needed = self.started_runs.load(Ordering::SeqCst) + 1;
        self.pending.store(true, Ordering::SeqCst);

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let inner = Arc::clone(self);
            self.runtime.spawn(async move { inner.drive().await });
        }
        needed
    }

    async fn drive(self: Arc<Self>) {
        loop {
            while self.pending.swap(false, Ordering::SeqCst) {
                if self.is_stopped() {
                    break;
                }
                let run = self.started_runs.fetch_add(1, Ordering::SeqCst) + 1;
                self.execute(run).await;
                self.finished_tx.send_replace(run);
            }

            self.in_flight.store(false, Ordering::SeqCst);
            // A request may have landed between the last swap and the store.
            if self.is_stopped()
                || !self.pending.load(Ordering::SeqCst)
                || self
                    .in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
            {
                break;
            }
        }
    }

    async fn execute(self: &Arc<Self>, run: u64) {
        self.set_state_unless_stopped(RunState::Running);
        self.stats.write().runs_started += 1;
        self.events.active(true);
        debug!(session = %self.id, run, "run started");

        let ctx = RunContext {
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            options: Arc::clone(&self.options),
            checkpoints: Arc::clone(&self.checkpoints),
            tagger: self.tagger.clone(),
            events: self.events.clone(),
            headers: self.headers.read().clone(),
            cancelled: Arc::clone(&self.cancelled),
        };
        let result = self.cycle(&ctx).await;
        self.events.active(false);

        match result {
            Ok(()) => {
                {
                    let mut stats = self.stats.write();
                    stats.runs_succeeded += 1;
                    stats.last_success = Some(Instant::now());
                }
                debug!(session = %self.id, run, "run finished");
                self.initial_tx.send_replace(true);
                if self.options.live {
                    self.set_state_unless_stopped(RunState::Idle);
                } else {
                    self.cancel();
                }
            }
            Err(ReplicationError::Cancelled) => {}
            Err(_) if self.is_stopped() => {}
            Err(err) => {
                warn!(session = %self.id, run, error = %err, "run failed");
                {
                    let mut stats = self.stats.write();
                    stats.runs_failed += 1;
                    stats.last_error = Some(err.to_string());
                }
                self.events.error(err);
                self.set_state_unless_stopped(RunState::Retrying);
                self.schedule_retry();
            }
        }
    }

    async fn cycle(&self, ctx: &RunContext<S, T>) -> ReplicationResult<()> {
        if let Some(pull) = &self.options.pull {
            let mut outcome = PullOutcome::default();
            let result = pull_cycle(ctx, pull, &mut outcome).await;
            self.stats.write().record_pull(&outcome);
            result?;
        }
        if let Some(push) = &self.options.push {
            let mut outcome = PushOutcome::default();
            let result = push_cycle(ctx, push, &mut outcome).await;
            self.stats.write().record_push(&outcome);
            result?;
        }
        Ok(())
    }

    fn set_state_unless_stopped(&self, next: RunState) {
        let mut state = self.state.write();
        if *state != RunState::Stopped {
            *state = next;
        }
    }

    /// Arms the retry timer unless one is already armed.
    fn schedule_retry(self: &Arc<Self>) {
        if self.retry_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(self);
        let delay = self.options.retry_time;
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.retry_scheduled.store(false, Ordering::SeqCst);
            if !inner.is_stopped() {
                inner.stats.write().retries += 1;
                debug!(session = %inner.id, "retrying");
                inner.trigger();
            }
        });
        self.track(handle);
    }

    fn spawn_live_timer(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = self.options.live_interval;
        let handle = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = upgrade_active(&weak) else {
                    break;
                };
                inner.trigger();
            }
        });
        self.track(handle);
    }

    /// Watches the local change stream. In live mode, application writes
    /// trigger runs; checkpoint writes and this endpoint's pull writes do
    /// not. The stream closing means the store was destroyed.
    fn spawn_change_listener(self: &Arc<Self>, mut changes: broadcast::Receiver<ChangeRecord>) {
        let weak = Arc::downgrade(self);
        let live = self.options.live;
        let tagger = self.tagger.clone();
        let handle = self.runtime.spawn(async move {
            loop {
                let triggered = match changes.recv().await {
                    Ok(record) => {
                        live
                            && !is_reserved_key(record.primary_key())
                            && !tagger.was_tagged_by(&record.document.revision)
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "change listener lagged");
                        live
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        if let Some(inner) = weak.upgrade() {
                            info!(session = %inner.id, "local store closed");
                            inner.cancel();
                        }
                        break;
                    }
                };

                if triggered {
                    let Some(inner) = upgrade_active(&weak) else {
                        break;
                    };
                    inner.trigger();
                }
            }
        });
        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        if self.is_stopped() {
            handle.abort();
        } else {
            tasks.push(handle);
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.write() = RunState::Stopped;
        self.stopped_tx.send_replace(true);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!(session = %self.id, "replication session stopped");
    }
}

fn upgrade_active<S: LocalStore, T: Transport>(
    weak: &Weak<SessionInner<S, T>>,
) -> Option<Arc<SessionInner<S, T>>> {
    weak.upgrade().filter(|inner| !inner.is_stopped())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::*;
    use crate::transport::{MockTransport, RequestKind};
    use serde_json::json;
    use std::time::Duration;
    use tidesync_store::MemoryStore;

    fn options() -> ReplicationOptions {
        ReplicationOptions::new(URL)
            .with_pull(pull_options())
            .with_push(push_options())
            .with_auto_start(false)
    }

    fn healthy_transport() -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        transport.set_fallback(RequestKind::Pull, Ok(json!({"data": {"pull": []}})));
        transport.set_fallback(RequestKind::Push, Ok(json!({"data": {"push": {}}})));
        transport
    }

    fn failing_transport() -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        transport.set_fallback(
            RequestKind::Pull,
            Err(ReplicationError::transport_retryable("unreachable")),
        );
        transport
    }

    #[test]
    fn start_requires_runtime() {
        let result = ReplicationSession::start(
            Arc::new(MemoryStore::new()),
            healthy_transport(),
            options(),
        );
        assert!(matches!(result, Err(ReplicationError::Configuration(_))));
    }

    #[tokio::test]
    async fn start_rejects_invalid_options() {
        let result = ReplicationSession::start(
            Arc::new(MemoryStore::new()),
            healthy_transport(),
            ReplicationOptions::new(URL),
        );
        assert!(matches!(result, Err(ReplicationError::Configuration(_))));
    }

    #[tokio::test]
    async fn one_shot_stops_after_success() {
        let session =
            ReplicationSession::start(Arc::new(MemoryStore::new()), healthy_transport(), options())
                .unwrap();
        assert_eq!(session.state(), RunState::Idle);

        session.run().await;

        assert!(session.is_stopped());
        assert_eq!(session.state(), RunState::Stopped);
        assert_eq!(session.stats().runs_succeeded, 1);
        session.await_initial_replication().await;
    }

    #[tokio::test]
    async fn live_session_returns_to_idle() {
        let session = ReplicationSession::start(
            Arc::new(MemoryStore::new()),
            healthy_transport(),
            options().with_live(true),
        )
        .unwrap();

        session.run().await;

        assert_eq!(session.state(), RunState::Idle);
        assert!(!session.is_stopped());
        session.cancel();
        session.cancel();
        assert_eq!(session.state(), RunState::Stopped);
    }

    #[tokio::test]
    async fn failures_are_reported_not_returned() {
        let transport = failing_transport();
        let session = ReplicationSession::start(
            Arc::new(MemoryStore::new()),
            Arc::clone(&transport),
            options().with_retry_time(Duration::from_secs(3600)),
        )
        .unwrap();
        let mut errors = session.subscribe_errors();

        session.run().await;

        assert!(errors.recv().await.unwrap().is_retryable());
        assert_eq!(session.state(), RunState::Retrying);
        assert_eq!(session.stats().runs_failed, 1);
        assert!(!session.is_stopped());
        session.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_runs_retry_after_delay() {
        let transport = failing_transport();
        let session = ReplicationSession::start(
            Arc::new(MemoryStore::new()),
            Arc::clone(&transport),
            options().with_retry_time(Duration::from_millis(100)),
        )
        .unwrap();

        session.run().await;
        assert_eq!(transport.request_count(RequestKind::Pull), 1);

        tokio::time::sleep(Duration::from_millis(350)).await;

        assert_eq!(transport.request_count(RequestKind::Pull), 4);
        assert_eq!(session.stats().retries, 3);
        session.cancel();
    }

    #[tokio::test]
    async fn active_events_bracket_each_run() {
        let session = ReplicationSession::start(
            Arc::new(MemoryStore::new()),
            healthy_transport(),
            options().with_live(true),
        )
        .unwrap();
        let mut active = session.subscribe_active();

        session.run().await;

        assert!(active.recv().await.unwrap());
        assert!(!active.recv().await.unwrap());
        session.cancel();
    }

    #[tokio::test]
    async fn run_after_cancel_returns_immediately() {
        let transport = healthy_transport();
        let session = ReplicationSession::start(
            Arc::new(MemoryStore::new()),
            Arc::clone(&transport),
            options().with_live(true),
        )
        .unwrap();

        session.cancel();
        session.run().await;
        session.stopped().await;

        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn headers_are_snapshotted_per_run() {
        let transport = healthy_transport();
        let session = ReplicationSession::start(
            Arc::new(MemoryStore::new()),
            Arc::clone(&transport),
            options().with_live(true).with_header("authorization", "Bearer one"),
        )
        .unwrap();

        session.run().await;
        let mut headers = BTreeMap::new();
        headers.insert("authorization".to_string(), "Bearer two".to_string());
        session.set_headers(headers.clone());
        session.run().await;

        let seen: Vec<String> = transport
            .requests()
            .iter()
            .map(|request| request.headers["authorization"].clone())
            .collect();
        // No local writes, so each run issues a single pull request.
        assert_eq!(seen, vec!["Bearer one", "Bearer two"]);
        assert_eq!(session.headers(), headers);
        session.cancel();
    }

    #[tokio::test]
    async fn destroying_the_store_stops_the_session() {
        let store = Arc::new(MemoryStore::new());
        let session = ReplicationSession::start(
            Arc::clone(&store),
            healthy_transport(),
            options().with_live(true),
        )
        .unwrap();

        store.destroy();
        session.stopped().await;

        assert_eq!(session.state(), RunState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_start_triggers_first_run() {
        let transport = healthy_transport();
        let session = ReplicationSession::start(
            Arc::new(MemoryStore::new()),
            Arc::clone(&transport),
            options().with_auto_start(true),
        )
        .unwrap();

        session.await_initial_replication().await;
        session.stopped().await;

        assert_eq!(transport.request_count(RequestKind::Pull), 1);
    }

    #[tokio::test]
    async fn cancel_before_execution_stays_stopped() {
        let session =
            ReplicationSession::start(Arc::new(MemoryStore::new()), healthy_transport(), options())
                .unwrap();

        session.cancel();
        session.inner.execute(1).await;

        assert_eq!(session.state(), RunState::Stopped);
        assert_eq!(session.stats().runs_failed, 0);
    }

    #[tokio::test]
    async fn failed_run_counts_pages_already_applied() {
        let transport = Arc::new(MockTransport::new());
        transport.enqueue(
            RequestKind::Pull,
            Ok(json!({"data": {"pull": [{"id": "a"}, {"id": "b"}]}})),
        );
        transport.set_fallback(
            RequestKind::Pull,
            Err(ReplicationError::transport_retryable("reset")),
        );
        let store = Arc::new(MemoryStore::new());
        let session = ReplicationSession::start(
            Arc::clone(&store),
            Arc::clone(&transport),
            ReplicationOptions::new(URL)
                .with_pull(pull_options().with_page_size(2))
                .with_auto_start(false)
                .with_retry_time(Duration::from_secs(3600)),
        )
        .unwrap();

        session.run().await;

        let stats = session.stats();
        assert_eq!(stats.runs_failed, 1);
        assert_eq!(stats.pages_pulled, 1);
        assert_eq!(stats.documents_received, 2);
        assert_eq!(store.len(), 2);
        session.cancel();
    }
}
