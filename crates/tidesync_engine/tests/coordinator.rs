//! Run coordination: coalescing, retry, live mode, cancellation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tidesync_engine::{ReplicationError, ReplicationOptions, ReplicationSession, RunState};
use tidesync_server::{bearer, ServerConfig, SyncServer};
use tidesync_store::MemoryStore;
use tidesync_testkit::prelude::*;

const WAIT: Duration = Duration::from_secs(5);

fn failing_session(
    transport: &Arc<FailingTransport>,
    options: ReplicationOptions,
) -> ReplicationSession<MemoryStore, FailingTransport> {
    ReplicationSession::start(
        Arc::new(MemoryStore::new()),
        Arc::clone(transport),
        options,
    )
    .unwrap()
}

#[tokio::test]
async fn concurrent_runs_are_coalesced() {
    let transport = Arc::new(FailingTransport::with_latency(Duration::from_millis(50)));
    let session = failing_session(
        &transport,
        replication_options()
            .with_auto_start(false)
            .with_retry_time(Duration::from_secs(3600)),
    );

    join_all((0..50).map(|_| session.run())).await;

    assert!(transport.attempts() < 10, "{} attempts", transport.attempts());
    assert!(transport.attempts() >= 1);
    assert_eq!(session.state(), RunState::Retrying);
    session.cancel();
}

#[tokio::test(start_paused = true)]
async fn initial_replication_waits_for_a_success() {
    let transport = Arc::new(FailingTransport::new());
    let session = failing_session(
        &transport,
        replication_options().with_retry_time(Duration::from_millis(100)),
    );

    let resolved = within(Duration::from_secs(1), session.await_initial_replication()).await;

    assert!(resolved.is_none());
    // The first attempt plus one retry per 100ms.
    assert!(transport.attempts() >= 9, "{} attempts", transport.attempts());
    assert!(session.stats().retries >= 8);
    session.cancel();
}

#[tokio::test]
async fn initial_replication_resolves_after_recovery() {
    let setup = TestReplication::new();
    setup.server.set_unavailable(true);
    let session = setup.start(
        replication_options()
            .with_live(true)
            .with_retry_time(Duration::from_millis(20)),
    );
    let mut errors = session.subscribe_errors();

    let first = next_event(&mut errors, WAIT).await.unwrap();
    assert!(first.is_retryable());
    setup.server.set_unavailable(false);

    within(WAIT, session.await_initial_replication())
        .await
        .expect("replication never recovered");
    assert!(session.stats().runs_succeeded >= 1);
    assert!(session.stats().runs_failed >= 1);
    session.cancel();
}

#[tokio::test]
async fn live_session_pushes_local_writes() {
    let setup = TestReplication::new();
    let session = setup.start(
        replication_options()
            .with_live(true)
            .with_live_interval(Duration::from_secs(3600)),
    );
    within(WAIT, session.await_initial_replication()).await.unwrap();

    setup.put_local(human("h1", "Ada", 36));

    assert!(eventually(WAIT, || setup.server.live_count() == 1).await);
    assert!(!session.is_stopped());
    session.cancel();
}

#[tokio::test]
async fn own_writes_do_not_retrigger_live_runs() {
    let setup = TestReplication::new();
    for doc in humans(3) {
        setup.server.insert(doc).unwrap();
    }
    setup.put_local(human("local", "Ada", 36));
    let session = setup.start(
        replication_options()
            .with_live(true)
            .with_live_interval(Duration::from_secs(3600)),
    );
    within(WAIT, session.await_initial_replication()).await.unwrap();
    assert_eq!(setup.store.len(), 4);
    assert_eq!(setup.server.live_count(), 4);

    // Pulled rows and checkpoint writes land on the change stream too.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let settled = session.stats().runs_started;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(session.stats().runs_started, settled);
    assert_eq!(settled, 1);
    assert_eq!(session.state(), RunState::Idle);
    session.cancel();
}

#[tokio::test]
async fn remote_change_notification_pulls() {
    let setup = TestReplication::new();
    let session = setup.start(
        replication_options()
            .with_live(true)
            .with_live_interval(Duration::from_secs(3600)),
    );
    within(WAIT, session.await_initial_replication()).await.unwrap();

    setup.server.insert(human("r1", "remote", 50)).unwrap();
    session.notify_remote_change();

    assert!(eventually(WAIT, || setup.store.document("r1").is_some()).await);
    session.cancel();
}

#[tokio::test(start_paused = true)]
async fn live_interval_polls_the_remote() {
    let setup = TestReplication::new();
    let session = setup.start(
        replication_options()
            .with_live(true)
            .with_live_interval(Duration::from_secs(10)),
    );
    within(WAIT, session.await_initial_replication()).await.unwrap();

    setup.server.insert(human("r1", "remote", 50)).unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;

    assert!(eventually(WAIT, || setup.store.document("r1").is_some()).await);
    session.cancel();
}

#[tokio::test]
async fn cancel_is_idempotent_and_final() {
    let setup = TestReplication::new();
    let session = setup.start(replication_options().with_live(true));
    let mut active = session.subscribe_active();

    session.cancel();
    session.cancel();
    within(WAIT, session.stopped()).await.unwrap();

    session.run().await;
    session.notify_remote_change();
    setup.put_local(human("h1", "Ada", 36));

    assert!(session.is_stopped());
    assert_eq!(session.state(), RunState::Stopped);
    assert_eq!(setup.request_count(), 0);
    assert!(drain(&mut active).is_empty());
}

#[tokio::test]
async fn cancel_discards_in_flight_response() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    server.insert(human("r1", "remote", 50)).unwrap();
    let transport = loopback_with_latency(&server, Duration::from_millis(100));
    let store = Arc::new(MemoryStore::new());
    let session = ReplicationSession::start(
        Arc::clone(&store),
        Arc::clone(&transport),
        replication_options().with_live(true),
    )
    .unwrap();

    assert!(eventually(WAIT, || transport.client().request_count() == 1).await);
    session.cancel();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(store.document("r1").is_none());
    assert_eq!(session.checkpoints().get_pull_checkpoint().await.unwrap(), None);
}

#[tokio::test]
async fn destroying_the_store_stops_replication() {
    let setup = TestReplication::new();
    let session = setup.start(replication_options().with_live(true));
    within(WAIT, session.await_initial_replication()).await.unwrap();

    setup.store.destroy();

    within(WAIT, session.stopped()).await.expect("session kept running");
    assert_eq!(session.state(), RunState::Stopped);
}

#[tokio::test]
async fn headers_authenticate_each_run() {
    let server = Arc::new(SyncServer::new(
        ServerConfig::new().with_auth(b"replication-secret".to_vec()),
    ));
    server.insert(human("r1", "remote", 50)).unwrap();
    let setup = TestReplication::with_server(Arc::clone(&server));
    let session = setup.start(
        replication_options()
            .with_live(true)
            .with_header("authorization", "Bearer not-a-token")
            .with_retry_time(Duration::from_millis(20)),
    );
    let mut errors = session.subscribe_errors();

    let err = next_event(&mut errors, WAIT).await.unwrap();
    assert!(matches!(err, ReplicationError::Transport { retryable: false, .. }));
    assert!(setup.store.document("r1").is_none());

    let token = server.issue_token("device-1").unwrap();
    session.set_headers(BTreeMap::from([(
        "authorization".to_string(),
        bearer(&token),
    )]));

    within(WAIT, session.await_initial_replication())
        .await
        .expect("authorized run never succeeded");
    assert!(setup.store.document("r1").is_some());
    let seen = setup.transport.client().seen_headers();
    assert_eq!(seen.last().unwrap()["authorization"], bearer(&token));
    session.cancel();
}

#[tokio::test]
async fn active_events_bracket_runs() {
    let setup = TestReplication::new();
    let session = setup.start(replication_options().with_auto_start(false));
    let mut active = session.subscribe_active();

    session.run().await;

    assert_eq!(drain(&mut active), vec![true, false]);
    assert!(session.is_stopped());
}
