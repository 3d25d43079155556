#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration tests for `ChatSession`.
//!
//! Each test scripts the server side with `MockTransport` and checks the
//! handshake, the outbound commands, the callbacks fired, and how the
//! session ends.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chaturbate_chat::{ChatConfig, ChatError, HandshakeState, RoomMessage};
use serde_json::json;
use tokio::sync::mpsc;

use common::{
    app_notice, auth_ok, auth_response, data_frame, data_frame_many, decode_sent, frames, notify,
    room_entry, room_leave, room_msg, sent_methods, test_session, test_session_with, tip_alert,
    MockTransport, HEARTBEAT, OPEN, ROOM,
};

const WAIT: Duration = Duration::from_secs(5);

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("callback channel closed")
}

// ════════════════════════════════════════════════════════════════════
// Handshake
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn open_frame_sends_connect_with_session_credentials() {
    let mut script = frames([OPEN]);
    script.push(None);
    let (transport, sent, _closed) = MockTransport::new(script);

    let session = test_session();
    session.run(transport).await.unwrap();

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let connect = decode_sent(&sent[0]);
    assert_eq!(
        connect,
        json!({
            "method": "connect",
            "data": {
                "user": "__anonymous__tester",
                "password": "{\"t\": 1}",
                "room": ROOM,
                "room_password": "room-pass"
            }
        })
    );
}

#[tokio::test]
async fn auth_ok_sends_join_room_with_room_name() {
    let mut script = frames([OPEN.to_string(), auth_ok()]);
    script.push(None);
    let (transport, sent, _closed) = MockTransport::new(script);

    let session = test_session();
    session.run(transport).await.unwrap();

    assert_eq!(sent_methods(&sent), ["connect", "joinRoom"]);
    let join = decode_sent(&sent.lock().unwrap()[1]);
    assert_eq!(join["data"]["room"], ROOM);
}

#[tokio::test]
async fn auth_rejected_fails_without_join() {
    let mut script = frames([OPEN.to_string(), auth_response("0"), room_entry("late")]);
    script.push(None);
    let (transport, sent, closed) = MockTransport::new(script);

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut session = test_session();
    session.on_user_entry(move |user| {
        let _ = tx.send(user);
    });

    let err = session.run(transport).await.unwrap_err();
    assert!(matches!(err, ChatError::AuthenticationFailed { ref result } if result == "0"));
    assert_eq!(session.state(), HandshakeState::Failed);
    assert_eq!(sent_methods(&sent), ["connect"]);
    assert!(closed.load(std::sync::atomic::Ordering::Relaxed));

    // Frames after the failure are never read.
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unparsable_auth_result_fails_with_raw_value() {
    let mut script = frames([OPEN.to_string(), auth_response("banana")]);
    script.push(None);
    let (transport, sent, _closed) = MockTransport::new(script);

    let session = test_session();
    let err = session.run(transport).await.unwrap_err();

    assert!(matches!(err, ChatError::AuthenticationFailed { ref result } if result == "banana"));
    assert_eq!(sent_methods(&sent), ["connect"]);
}

#[tokio::test]
async fn auth_response_without_args_fails() {
    let mut script = frames([OPEN.to_string(), data_frame("onAuthResponse", json!([]))]);
    script.push(None);
    let (transport, _sent, _closed) = MockTransport::new(script);

    let err = test_session().run(transport).await.unwrap_err();
    assert!(matches!(err, ChatError::AuthenticationFailed { .. }));
}

#[tokio::test]
async fn auth_ok_moves_session_to_joining() {
    let (transport, _sent, _closed) =
        MockTransport::new(frames([OPEN.to_string(), auth_ok()]));

    let session = Arc::new(test_session());
    let mut states = session.subscribe_state();
    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run(transport).await });

    tokio::time::timeout(WAIT, states.wait_for(|s| *s == HandshakeState::Joining))
        .await
        .unwrap()
        .unwrap();
    assert!(session.is_connected());

    session.stop().unwrap();
    task.await.unwrap().unwrap();
    assert_eq!(session.state(), HandshakeState::Closed);
}

#[tokio::test]
async fn first_event_after_join_activates_session() {
    let (transport, _sent, _closed) =
        MockTransport::new(frames([OPEN.to_string(), auth_ok(), room_entry("carol")]));

    let session = Arc::new(test_session());
    let mut states = session.subscribe_state();
    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run(transport).await });

    tokio::time::timeout(WAIT, states.wait_for(|s| *s == HandshakeState::Active))
        .await
        .unwrap()
        .unwrap();

    session.stop().unwrap();
    task.await.unwrap().unwrap();
    assert_eq!(session.state(), HandshakeState::Closed);
}

// ════════════════════════════════════════════════════════════════════
// Callbacks
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn tip_callback_receives_user_and_amount() {
    let mut script = frames([OPEN.to_string(), auth_ok(), tip_alert("bob", 50)]);
    script.push(None);
    let (transport, _sent, _closed) = MockTransport::new(script);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = test_session();
    session.on_tip(move |user, amount| {
        let _ = tx.send((user, amount));
    });

    session.run(transport).await.unwrap();
    assert_eq!(next(&mut rx).await, ("bob".to_string(), 50));
}

#[tokio::test]
async fn every_event_kind_reaches_its_callback() {
    let mut script = frames([
        OPEN.to_string(),
        auth_ok(),
        room_entry("carol"),
        room_msg("carol", "hello"),
        app_notice(&["Welcome!", "Be nice."]),
        room_leave("carol"),
    ]);
    script.push(None);
    let (transport, _sent, _closed) = MockTransport::new(script);

    let (entry_tx, mut entries) = mpsc::unbounded_channel();
    let (leave_tx, mut leaves) = mpsc::unbounded_channel();
    let (msg_tx, mut messages) = mpsc::unbounded_channel::<RoomMessage>();
    let (notice_tx, mut notices) = mpsc::unbounded_channel();

    let mut session = test_session();
    session
        .on_user_entry(move |u| {
            let _ = entry_tx.send(u);
        })
        .on_user_leave(move |u| {
            let _ = leave_tx.send(u);
        })
        .on_message(move |m| {
            let _ = msg_tx.send(m);
        })
        .on_notice(move |lines| {
            let _ = notice_tx.send(lines);
        });

    session.run(transport).await.unwrap();

    assert_eq!(next(&mut entries).await, "carol");
    assert_eq!(next(&mut leaves).await, "carol");
    let msg = next(&mut messages).await;
    assert_eq!(msg.author, "carol");
    assert_eq!(msg.message, "hello");
    assert!(msg.x_successful);
    assert_eq!(next(&mut notices).await, vec!["Welcome!", "Be nice."]);
}

#[tokio::test]
async fn unknown_notify_type_fires_nothing_and_session_stays_active() {
    let (transport, _sent, _closed) = MockTransport::new(frames([
        OPEN.to_string(),
        auth_ok(),
        tip_alert("bob", 1),
        notify(json!({ "type": "some_future_feature", "payload": [1, 2, 3] })),
        room_entry("after"),
    ]));

    let (tip_tx, mut tips) = mpsc::unbounded_channel();
    let (entry_tx, mut entries) = mpsc::unbounded_channel();
    let mut session = test_session();
    session
        .on_tip(move |u, a| {
            let _ = tip_tx.send((u, a));
        })
        .on_user_entry(move |u| {
            let _ = entry_tx.send(u);
        });

    let session = Arc::new(session);
    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run(transport).await });

    assert_eq!(next(&mut tips).await, ("bob".to_string(), 1));
    // The entry after the unknown notify proves it was read and skipped.
    assert_eq!(next(&mut entries).await, "after");
    assert!(tips.try_recv().is_err());
    assert_eq!(session.state(), HandshakeState::Active);
    assert!(session.is_connected());

    session.stop().unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn events_without_callbacks_are_dropped_quietly() {
    let mut script = frames([
        OPEN.to_string(),
        auth_ok(),
        room_msg("x", "y"),
        tip_alert("z", 5),
    ]);
    script.push(None);
    let (transport, _sent, _closed) = MockTransport::new(script);

    test_session().run(transport).await.unwrap();
}

#[tokio::test]
async fn single_slot_pool_delivers_callbacks_in_frame_order() {
    let mut script = frames([OPEN.to_string(), auth_ok()]);
    script.extend(frames((0..20).map(|i| room_msg("alice", &i.to_string()))));
    script.push(None);
    let (transport, _sent, _closed) = MockTransport::new(script);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = test_session_with(ChatConfig::new().with_callback_concurrency(1));
    session.on_message(move |m| {
        let _ = tx.send(m.message);
    });

    session.run(transport).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(m) = rx.try_recv() {
        seen.push(m);
    }
    let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn slow_callback_does_not_stall_the_read_loop() {
    let (transport, _sent, _closed) = MockTransport::new(frames([
        OPEN.to_string(),
        auth_ok(),
        room_msg("slow", "block"),
        room_entry("fast"),
    ]));

    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = std::sync::Mutex::new(release_rx);
    let (entry_tx, mut entries) = mpsc::unbounded_channel();

    let mut session = test_session();
    session
        .on_message(move |_| {
            let _ = release_rx.lock().unwrap().recv_timeout(WAIT);
        })
        .on_user_entry(move |u| {
            let _ = entry_tx.send(u);
        });

    let session = Arc::new(session);
    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run(transport).await });

    // The entry callback runs while the message callback is still blocked.
    assert_eq!(next(&mut entries).await, "fast");

    release_tx.send(()).unwrap();
    session.stop().unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn multiple_invocations_in_one_frame_are_all_dispatched() {
    let frame = data_frame_many(&[
        ("onRoomCountUpdate", json!(["42"])),
        (
            "onNotify",
            json!([json!({"type": "room_entry", "username": "a"}).to_string()]),
        ),
        (
            "onNotify",
            json!([json!({"type": "room_entry", "username": "b"}).to_string()]),
        ),
    ]);
    let mut script = frames([OPEN.to_string(), auth_ok(), frame]);
    script.push(None);
    let (transport, _sent, _closed) = MockTransport::new(script);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = test_session_with(ChatConfig::new().with_callback_concurrency(1));
    session.on_user_entry(move |u| {
        let _ = tx.send(u);
    });
    session.run(transport).await.unwrap();

    assert_eq!(next(&mut rx).await, "a");
    assert_eq!(next(&mut rx).await, "b");
}

// ════════════════════════════════════════════════════════════════════
// Defensive decoding
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn heartbeat_produces_no_outbound_command() {
    let mut script = frames([HEARTBEAT, HEARTBEAT, HEARTBEAT]);
    script.push(None);
    let (transport, sent, _closed) = MockTransport::new(script);

    tokio_test::assert_ok!(test_session().run(transport).await);
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn bad_frames_are_dropped_and_the_session_continues() {
    let mut script = frames([
        OPEN.to_string(),
        String::new(),
        "x-what-is-this".to_string(),
        "a{{{".to_string(),
        "a[]".to_string(),
        r#"a["not json"]"#.to_string(),
        auth_ok(),
        data_frame("onNotify", json!([42])),
        data_frame("onNotify", json!(["{broken"])),
        notify(json!({ "type": "tip_alert", "from_username": "neg", "amount": -1 })),
        data_frame("onRoomMsg", json!(["only-author"])),
        data_frame("onRoomMsg", json!(["author", "{broken"])),
        data_frame("onTitleChange", json!(["new title"])),
        data_frame("onSilence", json!(["someone"])),
        data_frame("onMysteryMethod", json!([])),
        room_msg("survivor", "still here"),
    ]);
    script.push(None);
    let (transport, sent, _closed) = MockTransport::new(script);

    let (tx, mut rx) = mpsc::unbounded_channel::<RoomMessage>();
    let (tip_tx, mut tips) = mpsc::unbounded_channel::<(String, u64)>();
    let mut session = test_session();
    session
        .on_message(move |m| {
            let _ = tx.send(m);
        })
        .on_tip(move |u, a| {
            let _ = tip_tx.send((u, a));
        });

    session.run(transport).await.unwrap();

    assert_eq!(sent_methods(&sent), ["connect", "joinRoom"]);
    let msg = next(&mut rx).await;
    assert_eq!(msg.author, "survivor");
    assert!(rx.try_recv().is_err());
    assert!(tips.try_recv().is_err());
}

// ════════════════════════════════════════════════════════════════════
// Termination
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn server_close_ends_session_cleanly() {
    let (transport, _sent, closed) = MockTransport::new(vec![Some(Ok(OPEN.into())), None]);

    let session = test_session();
    session.run(transport).await.unwrap();

    assert!(!session.is_connected());
    assert_eq!(session.state(), HandshakeState::Closed);
    assert!(closed.load(std::sync::atomic::Ordering::Relaxed));
}

#[tokio::test]
async fn read_error_is_the_termination_cause() {
    let (transport, _sent, closed) = MockTransport::new(vec![
        Some(Ok(OPEN.into())),
        Some(Err(ChatError::TransportReceive("connection reset".into()))),
        Some(Ok(auth_ok())),
    ]);

    let session = test_session();
    let err = session.run(transport).await.unwrap_err();

    assert!(matches!(err, ChatError::TransportReceive(_)));
    assert_eq!(session.state(), HandshakeState::Closed);
    assert!(closed.load(std::sync::atomic::Ordering::Relaxed));
}

#[tokio::test]
async fn stop_handle_ends_a_running_session() {
    let (transport, _sent, closed) = MockTransport::new(frames([OPEN]));

    let session = Arc::new(test_session());
    let stop = session.stop_handle();
    let mut states = session.subscribe_state();
    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run(transport).await });

    tokio::time::timeout(WAIT, states.wait_for(|s| *s == HandshakeState::AwaitingAuth))
        .await
        .unwrap()
        .unwrap();

    stop.stop().unwrap();
    task.await.unwrap().unwrap();

    assert!(closed.load(std::sync::atomic::Ordering::Relaxed));
    assert_eq!(session.state(), HandshakeState::Closed);
    assert!(matches!(stop.stop(), Err(ChatError::NotConnected)));
    assert!(matches!(session.stop(), Err(ChatError::NotConnected)));
}

#[tokio::test]
async fn stop_interrupts_wait_for_a_callback_slot() {
    let (transport, _sent, closed) = MockTransport::new(frames([
        OPEN.to_string(),
        auth_ok(),
        room_msg("alice", "first"),
        room_msg("alice", "second"),
    ]));

    let (started_tx, mut started) = mpsc::unbounded_channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = std::sync::Mutex::new(release_rx);

    let mut session = test_session_with(
        ChatConfig::new()
            .with_callback_concurrency(1)
            .with_shutdown_timeout(Duration::from_millis(50)),
    );
    session.on_message(move |m| {
        let _ = started_tx.send(m.message);
        let _ = release_rx.lock().unwrap().recv_timeout(WAIT);
    });

    let session = Arc::new(session);
    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run(transport).await });

    // The only slot is now held, so the second message waits for it.
    assert_eq!(next(&mut started).await, "first");
    tokio::time::sleep(Duration::from_millis(50)).await;

    session.stop().unwrap();
    let outcome = tokio::time::timeout(WAIT, task)
        .await
        .expect("session did not end after stop");
    outcome.unwrap().unwrap();

    assert!(closed.load(std::sync::atomic::Ordering::Relaxed));
    assert!(!session.is_connected());
    assert_eq!(session.state(), HandshakeState::Closed);

    release_tx.send(()).unwrap();
    // The queued message was dropped with the session.
    assert!(started.try_recv().is_err());
}

#[tokio::test]
async fn closed_session_cannot_be_restarted() {
    let session = test_session();
    let (transport, _, _) = MockTransport::new(vec![None]);
    session.run(transport).await.unwrap();

    let (transport, _, _) = MockTransport::new(vec![None]);
    let err = tokio_test::assert_err!(session.run(transport).await);
    assert!(matches!(err, ChatError::SessionClosed));
}

#[tokio::test]
async fn session_end_abandons_callbacks_after_shutdown_timeout() {
    let mut script = frames([OPEN.to_string(), auth_ok(), room_msg("a", "b")]);
    script.push(None);
    let (transport, _sent, _closed) = MockTransport::new(script);

    let mut session =
        test_session_with(ChatConfig::new().with_shutdown_timeout(Duration::from_millis(50)));
    session.on_message(|_| std::thread::sleep(Duration::from_millis(500)));

    let started = std::time::Instant::now();
    session.run(transport).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(450));
}
