//! Integration tests for the sync engine: durability, retry
//! bookkeeping, realtime/polling interplay and inbound dispatch.

use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use syncbox_core::{
    ChangeStatus, EnvelopeSealer, MemoryOutbox, NewChange, OutboxStore, RecordId, RootKey,
    StaticSecretProvider,
};
use syncbox_engine::{
    ChangeHandler, ConnectionState, HandlerError, MockChannel, MockOutcome, MockTransport,
    ReconnectConfig, SyncConfig, SyncEngine,
};
use syncbox_protocol::{Action, ChangeMessage};

struct Harness {
    engine: SyncEngine<MemoryOutbox, MockTransport, MockChannel>,
    store: Arc<MemoryOutbox>,
    transport: Arc<MockTransport>,
    channel: Arc<MockChannel>,
}

fn harness(config: SyncConfig) -> Harness {
    harness_with_channel(config, MockChannel::new())
}

fn harness_with_channel(config: SyncConfig, channel: MockChannel) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let store = Arc::new(MemoryOutbox::new());
    let transport = Arc::new(MockTransport::new());
    let channel = Arc::new(channel);
    let engine = SyncEngine::new(
        config,
        Arc::clone(&store),
        Arc::clone(&transport),
        Arc::clone(&channel),
        &StaticSecretProvider::new(RootKey::generate()),
    )
    .unwrap();

    Harness {
        engine,
        store,
        transport,
        channel,
    }
}

struct RecordingHandler {
    applied: Mutex<Vec<(Action, String, Option<serde_json::Value>)>>,
}

impl RecordingHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            applied: Mutex::new(Vec::new()),
        })
    }

    fn applied(&self) -> Vec<(Action, String, Option<serde_json::Value>)> {
        self.applied.lock().clone()
    }
}

impl ChangeHandler for RecordingHandler {
    fn apply(
        &self,
        action: Action,
        entity_id: &str,
        data: Option<serde_json::Value>,
    ) -> Result<(), HandlerError> {
        self.applied.lock().push((action, entity_id.into(), data));
        Ok(())
    }
}

fn status(harness: &Harness, id: RecordId) -> ChangeStatus {
    harness.engine.record(id).unwrap().unwrap().status
}

fn retry_count(harness: &Harness, id: RecordId) -> u32 {
    harness.engine.record(id).unwrap().unwrap().retry_count
}

/// Polls a condition under paused time, letting the runtime
/// auto-advance through the engine's timers.
async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..600 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn enqueue_is_durable_before_any_delivery() {
    // Everything is down: channel refuses, transport refuses.
    let h = harness_with_channel(SyncConfig::new(), MockChannel::refusing());
    h.transport.set_post_fallback(MockOutcome::TransportError);

    let id = h
        .engine
        .enqueue(
            "settings",
            "theme",
            Action::Update,
            Some(&json!({"value": "dark"})),
        )
        .unwrap();

    // Persisted, pending, untouched: no attempt was even made.
    assert_eq!(status(&h, id), ChangeStatus::Pending);
    assert_eq!(retry_count(&h, id), 0);
    assert_eq!(h.transport.post_count(), 0);
    assert!(h.channel.sent().is_empty());
}

#[tokio::test]
async fn offline_change_delivered_by_reconcile() {
    let h = harness(SyncConfig::new());

    let id = h
        .engine
        .enqueue(
            "settings",
            "theme",
            Action::Update,
            Some(&json!({"value": "dark"})),
        )
        .unwrap();
    h.engine.reconcile().await;

    assert_eq!(status(&h, id), ChangeStatus::Completed);
    assert_eq!(retry_count(&h, id), 0);

    // The wire message carries the decrypted payload.
    let posts = h.transport.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].entity_type, "settings");
    assert_eq!(posts[0].entity_id, "theme");
    assert_eq!(posts[0].action, Action::Update);
    assert_eq!(posts[0].data, Some(json!({"value": "dark"})));
}

#[tokio::test]
async fn retries_are_bounded_then_failed() {
    let h = harness(SyncConfig::new().with_max_retries(3));
    h.transport.script_post(MockOutcome::ServerError);
    h.transport.script_post(MockOutcome::ServerError);
    h.transport.script_post(MockOutcome::ServerError);

    let id = h
        .engine
        .enqueue("settings", "theme", Action::Update, None)
        .unwrap();

    h.engine.reconcile().await;
    assert_eq!(status(&h, id), ChangeStatus::Pending);
    assert_eq!(retry_count(&h, id), 1);

    h.engine.reconcile().await;
    assert_eq!(status(&h, id), ChangeStatus::Pending);
    assert_eq!(retry_count(&h, id), 2);

    h.engine.reconcile().await;
    assert_eq!(status(&h, id), ChangeStatus::Failed);
    assert_eq!(retry_count(&h, id), 3);

    // Failed is terminal: further sweeps never pick the record up.
    h.engine.reconcile().await;
    assert_eq!(h.transport.post_count(), 3);
    assert_eq!(h.engine.stats().failed, 1);
}

#[tokio::test]
async fn auth_rejection_consumes_retry_budget() {
    let h = harness(SyncConfig::new().with_max_retries(1));
    h.transport.set_post_fallback(MockOutcome::AuthError);

    let id = h
        .engine
        .enqueue("settings", "theme", Action::Update, None)
        .unwrap();
    h.engine.reconcile().await;

    assert_eq!(status(&h, id), ChangeStatus::Failed);
    assert_eq!(retry_count(&h, id), 1);
}

#[tokio::test]
async fn undecryptable_payload_fails_without_delivery_attempt() {
    let h = harness(SyncConfig::new());

    // A record sealed under a different root key cannot be opened.
    let foreign =
        EnvelopeSealer::new(&StaticSecretProvider::new(RootKey::generate())).unwrap();
    let envelope = foreign.seal(b"{\"value\":1}", "settings").unwrap();
    let id = h
        .store
        .enqueue(NewChange::new(
            "settings",
            "theme",
            Action::Update,
            Some(envelope),
        ))
        .unwrap();

    h.engine.reconcile().await;

    // Failed immediately, bypassing the retry budget, nothing sent.
    assert_eq!(status(&h, id), ChangeStatus::Failed);
    assert_eq!(retry_count(&h, id), 0);
    assert_eq!(h.transport.post_count(), 0);
}

#[tokio::test]
async fn push_sweep_preserves_enqueue_order() {
    let h = harness(SyncConfig::new());
    for entity_id in ["a", "b", "c"] {
        h.engine
            .enqueue("settings", entity_id, Action::Create, None)
            .unwrap();
    }

    h.engine.reconcile().await;

    let order: Vec<String> = h
        .transport
        .posts()
        .into_iter()
        .map(|m| m.entity_id)
        .collect();
    assert_eq!(order, ["a", "b", "c"]);
}

#[tokio::test]
async fn pull_sweep_routes_and_isolates_failures() {
    let h = harness(SyncConfig::new());
    let handler = RecordingHandler::new();
    h.engine.register_handler("settings", handler.clone());

    h.transport.queue_pull(vec![
        ChangeMessage::new("unknown", "x", Action::Create, None),
        ChangeMessage::new(
            "settings",
            "theme",
            Action::Update,
            Some(json!({"value": "dark"})),
        ),
    ]);
    h.engine.reconcile().await;

    // The unregistered type was dropped; the registered one applied.
    let applied = handler.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].1, "theme");
    assert_eq!(h.engine.stats().dispatched, 1);
    assert_eq!(h.engine.stats().dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_sweeps_deliver_exactly_once() {
    let h = harness(SyncConfig::new());
    h.transport.set_post_delay(Duration::from_millis(50));

    let id = h
        .engine
        .enqueue("settings", "theme", Action::Update, None)
        .unwrap();
    tokio::join!(h.engine.reconcile(), h.engine.reconcile());

    assert_eq!(h.transport.post_count(), 1);
    assert_eq!(status(&h, id), ChangeStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn channel_and_poller_race_delivers_exactly_once() {
    let h = harness(SyncConfig::new());
    let id = h
        .engine
        .enqueue("settings", "theme", Action::Update, None)
        .unwrap();

    // Flush-on-connect and an on-demand sweep race for the record.
    h.engine.start().unwrap();
    h.engine.reconcile().await;
    wait_until("record to settle", || {
        status(&h, id) == ChangeStatus::Completed
    })
    .await;
    h.engine.stop().await;

    assert_eq!(h.channel.sent().len() + h.transport.post_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn backlog_flushed_on_connect() {
    let h = harness(SyncConfig::new());
    let ids: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|entity_id| {
            h.engine
                .enqueue("settings", entity_id, Action::Create, None)
                .unwrap()
        })
        .collect();

    h.engine.start().unwrap();
    wait_until("backlog to flush", || {
        ids.iter().all(|&id| status(&h, id) == ChangeStatus::Completed)
    })
    .await;
    h.engine.stop().await;

    let sent: Vec<String> = h.channel.sent().into_iter().map(|m| m.entity_id).collect();
    assert_eq!(sent, ["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn enqueue_flushes_opportunistically_while_connected() {
    let h = harness(SyncConfig::new());
    h.engine.start().unwrap();
    wait_until("channel to connect", || {
        h.engine.connection_state() == ConnectionState::Connected
    })
    .await;

    let id = h
        .engine
        .enqueue("settings", "theme", Action::Update, None)
        .unwrap();
    wait_until("record to settle", || {
        status(&h, id) == ChangeStatus::Completed
    })
    .await;
    h.engine.stop().await;

    // Delivered over the channel; the poller never had to touch it.
    assert_eq!(h.channel.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn inbound_channel_messages_dispatch_in_order() {
    let h = harness(SyncConfig::new());
    let handler = RecordingHandler::new();
    h.engine.register_handler("settings", handler.clone());
    let tx = h.channel.inbound_sender().unwrap();

    h.engine.start().unwrap();
    tx.send(ChangeMessage::new("settings", "first", Action::Update, None))
        .unwrap();
    tx.send(ChangeMessage::new(
        "settings",
        "second",
        Action::Delete,
        None,
    ))
    .unwrap();

    wait_until("inbound messages to apply", || handler.applied().len() == 2).await;
    h.engine.stop().await;

    let applied = handler.applied();
    assert_eq!(applied[0].1, "first");
    assert_eq!(applied[1].1, "second");
    assert_eq!(applied[1].0, Action::Delete);
}

#[tokio::test(start_paused = true)]
async fn reconnects_stop_after_budget_but_polling_still_delivers() {
    let config = SyncConfig::new().with_reconnect(ReconnectConfig {
        max_attempts: 3,
        delay: Duration::from_secs(30),
    });
    let h = harness_with_channel(config, MockChannel::refusing());

    h.engine.start().unwrap();
    wait_until("reconnects to exhaust", || h.channel.connect_attempts() == 3).await;

    // The budget is spent; the supervisor must not try again.
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.channel.connect_attempts(), 3);
    assert_eq!(h.engine.connection_state(), ConnectionState::Disconnected);

    // Liveness survives: the request/response path still delivers.
    let id = h
        .engine
        .enqueue("settings", "theme", Action::Update, None)
        .unwrap();
    h.engine.reconcile().await;
    assert_eq!(status(&h, id), ChangeStatus::Completed);

    h.engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn poller_sweeps_on_its_interval() {
    let config = SyncConfig::new().with_poll_interval(Duration::from_secs(60));
    let h = harness_with_channel(config, MockChannel::refusing());

    let id = h
        .engine
        .enqueue("settings", "theme", Action::Update, None)
        .unwrap();
    h.engine.start().unwrap();

    wait_until("poller to deliver", || {
        status(&h, id) == ChangeStatus::Completed
    })
    .await;
    h.engine.stop().await;
    assert_eq!(h.transport.post_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_timers() {
    let config = SyncConfig::new().with_poll_interval(Duration::from_secs(5));
    let h = harness_with_channel(config, MockChannel::refusing());

    let id = h
        .engine
        .enqueue("settings", "theme", Action::Update, None)
        .unwrap();
    h.engine.start().unwrap();
    h.engine.stop().await;

    // Long past several poll intervals: nothing fires after stop.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(status(&h, id), ChangeStatus::Pending);
    assert_eq!(h.transport.post_count(), 0);
}
