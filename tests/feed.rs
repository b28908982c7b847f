use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use ulid::Ulid;

use slotwise::{ChangeEvent, ChangeFeed, ChangeOp, Engine, EngineError, FeedError, Span, Status};

// ── Test infrastructure ──────────────────────────────────────

const H: i64 = 3_600_000; // 1 hour in ms

fn start_test_engine(name: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("slotwise_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    Arc::new(Engine::new(path, Arc::new(ChangeFeed::new())).unwrap())
}

/// Forward a listener into an mpsc channel, like a request layer pushing
/// events to a connected subscriber.
fn pump_listener(
    mut listener: slotwise::Listener,
) -> mpsc::UnboundedReceiver<Result<ChangeEvent, FeedError>> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            match listener.recv().await {
                Ok(event) => {
                    if tx.send(Ok(event)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });
    rx
}

/// Wait for the next event with timeout.
async fn recv_event(
    rx: &mut mpsc::UnboundedReceiver<Result<ChangeEvent, FeedError>>,
    timeout: Duration,
) -> Option<Result<ChangeEvent, FeedError>> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn listener_receives_committed_mutation() {
    let engine = start_test_engine("basic.wal");
    let mut rx = pump_listener(engine.listen());

    let r = engine
        .reserve("alice", "room-1", Span::new(10 * H, 11 * H), "")
        .await
        .unwrap();

    let event = recv_event(&mut rx, Duration::from_secs(5))
        .await
        .expect("expected event")
        .unwrap();
    assert_eq!(event.op, ChangeOp::Create);
    assert_eq!(event.reservation_id(), r.id);
    assert_eq!(event.snapshot.resource_id, "room-1");
}

#[tokio::test]
async fn listener_sees_cross_task_mutations_in_order() {
    let engine = start_test_engine("cross_task.wal");
    let mut rx = pump_listener(engine.listen());

    // Mutate from a separate task, as a second connection would.
    let mutator = engine.clone();
    tokio::spawn(async move {
        let r = mutator
            .reserve("bob", "room-1", Span::new(10 * H, 11 * H), "")
            .await
            .unwrap();
        mutator.confirm(r.id).await.unwrap();
        mutator.cancel(r.id).await.unwrap();
    });

    let mut seen = Vec::new();
    for _ in 0..3 {
        let event = recv_event(&mut rx, Duration::from_secs(5))
            .await
            .expect("expected event")
            .unwrap();
        seen.push(event);
    }

    assert_eq!(
        seen.iter().map(|e| e.op).collect::<Vec<_>>(),
        vec![ChangeOp::Create, ChangeOp::Update, ChangeOp::Cancel]
    );
    assert!(seen[0].sequence < seen[1].sequence);
    assert!(seen[1].sequence < seen[2].sequence);
}

#[tokio::test]
async fn listener_subscribed_late_misses_earlier_events() {
    let engine = start_test_engine("late_subscribe.wal");

    engine
        .reserve("alice", "room-1", Span::new(10 * H, 11 * H), "")
        .await
        .unwrap();

    // Subscribe after the first commit.
    let mut rx = pump_listener(engine.listen());

    engine
        .reserve("alice", "room-2", Span::new(10 * H, 11 * H), "")
        .await
        .unwrap();

    let event = recv_event(&mut rx, Duration::from_secs(5))
        .await
        .expect("expected event")
        .unwrap();
    assert_eq!(event.snapshot.resource_id, "room-2");

    // Nothing else: the pre-subscription event is not replayed.
    let extra = recv_event(&mut rx, Duration::from_millis(300)).await;
    assert!(extra.is_none());
}

#[tokio::test]
async fn rejected_mutation_produces_no_event() {
    let engine = start_test_engine("rejected.wal");

    engine
        .reserve("alice", "room-1", Span::new(10 * H, 11 * H), "")
        .await
        .unwrap();

    let mut rx = pump_listener(engine.listen());

    let err = engine
        .reserve("bob", "room-1", Span::new(10 * H, 11 * H), "")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let event = recv_event(&mut rx, Duration::from_millis(300)).await;
    assert!(event.is_none(), "conflict must not reach the feed");
}

#[tokio::test]
async fn independent_listeners_get_full_stream() {
    let engine = start_test_engine("independent.wal");
    let mut rx1 = pump_listener(engine.listen());
    let mut rx2 = pump_listener(engine.listen());

    for i in 0..3i64 {
        engine
            .reserve("alice", "room-1", Span::new(i * 2 * H, i * 2 * H + H), "")
            .await
            .unwrap();
    }

    for rx in [&mut rx1, &mut rx2] {
        let mut sequences = Vec::new();
        for _ in 0..3 {
            let event = recv_event(rx, Duration::from_secs(5))
                .await
                .expect("expected event")
                .unwrap();
            sequences.push(event.sequence);
        }
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    }
}

#[tokio::test]
async fn dropped_listener_does_not_disturb_others() {
    let engine = start_test_engine("dropped.wal");

    let doomed = engine.listen();
    let mut rx = pump_listener(engine.listen());
    drop(doomed);

    engine
        .reserve("alice", "room-1", Span::new(10 * H, 11 * H), "")
        .await
        .unwrap();

    let event = recv_event(&mut rx, Duration::from_secs(5)).await;
    assert!(event.is_some(), "surviving listener still receives events");
}

#[tokio::test]
async fn lagging_listener_gets_terminal_error() {
    let engine = start_test_engine("lagging.wal");

    // Subscribe but never drain until the ring has been overrun.
    let mut listener = engine.listen();

    for i in 0..(slotwise::limits::FEED_CHANNEL_CAPACITY as i64 + 50) {
        engine
            .reserve("alice", "room-1", Span::new(i * 2 * H, i * 2 * H + H), "")
            .await
            .unwrap();
    }

    match listener.recv().await {
        Err(FeedError::Lagged(missed)) => assert!(missed > 0),
        other => panic!("expected Lagged, got {other:?}"),
    }
    // The termination is sticky.
    assert!(matches!(listener.recv().await, Err(FeedError::Lagged(_))));
}

#[tokio::test]
async fn event_snapshot_serializes_to_json() {
    let engine = start_test_engine("json.wal");
    let mut rx = pump_listener(engine.listen());

    engine
        .reserve("alice", "room-1", Span::new(10 * H, 11 * H), "standup")
        .await
        .unwrap();

    let event = recv_event(&mut rx, Duration::from_secs(5))
        .await
        .expect("expected event")
        .unwrap();

    // A request layer would push this over the wire; it must be valid JSON.
    let payload = serde_json::to_string(&event).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(parsed["snapshot"]["note"], "standup");
    assert_eq!(parsed["snapshot"]["status"], "Pending");
}

#[tokio::test]
async fn feed_orders_match_store_state_per_resource() {
    let engine = start_test_engine("per_resource_order.wal");
    let mut rx = pump_listener(engine.listen());

    // Interleave mutations on two resources from two tasks.
    let mut handles = Vec::new();
    for room in ["room-1", "room-2"] {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let r = engine
                .reserve("alice", room, Span::new(10 * H, 11 * H), "")
                .await
                .unwrap();
            engine.confirm(r.id).await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    // Per resource, Create must arrive before Update, and the listener's
    // sequence numbers must strictly increase overall.
    let mut last_seq = 0;
    let mut per_resource: std::collections::HashMap<String, Vec<ChangeOp>> =
        std::collections::HashMap::new();
    for _ in 0..4 {
        let event = recv_event(&mut rx, Duration::from_secs(5))
            .await
            .expect("expected event")
            .unwrap();
        assert!(event.sequence > last_seq);
        last_seq = event.sequence;
        per_resource
            .entry(event.snapshot.resource_id.clone())
            .or_default()
            .push(event.op);
    }
    for (resource, ops) in per_resource {
        assert_eq!(
            ops,
            vec![ChangeOp::Create, ChangeOp::Update],
            "commit order violated for {resource}"
        );
    }

    let confirmed = engine
        .query(None, None, Some(Status::Confirmed), Span::new(0, 24 * H))
        .await
        .unwrap();
    assert_eq!(confirmed.len(), 2);
}
