#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the integration tests.
//!
//! Provides a scripted [`MockTransport`] and helpers that build inbound
//! frames the way the chat server sends them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chaturbate_chat::{ChatConfig, ChatError, ChatSession, SessionCredentials, Transport};
use serde_json::{json, Value};

// ── MockTransport ───────────────────────────────────────────────────

/// Scripted inbound item: a frame, a read error, or a clean close (`None`).
pub type Scripted = Option<Result<String, ChatError>>;

/// A scripted mock transport.
///
/// Scripted items are consumed in order by `recv()`. Once the script runs
/// out, `recv()` pends forever so the session stays up until stopped.
pub struct MockTransport {
    incoming: VecDeque<Scripted>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Returns the transport plus shared handles on sent messages and the
    /// closed flag.
    pub fn new(incoming: Vec<Scripted>) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, sent, closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), ChatError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, ChatError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), ChatError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Wrap frames as successful reads.
pub fn frames<I, S>(items: I) -> Vec<Scripted>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(|f| Some(Ok(f.into()))).collect()
}

// ── Session helpers ─────────────────────────────────────────────────

pub const ROOM: &str = "test_room";

pub fn test_credentials() -> SessionCredentials {
    SessionCredentials {
        chat_host: "wss://chat.example.com/ws".into(),
        username: "__anonymous__tester".into(),
        password: r#"{"t": 1}"#.into(),
        room_password: "room-pass".into(),
    }
}

pub fn test_session() -> ChatSession {
    ChatSession::with_credentials(ROOM, test_credentials(), ChatConfig::new())
}

pub fn test_session_with(config: ChatConfig) -> ChatSession {
    ChatSession::with_credentials(ROOM, test_credentials(), config)
}

/// Decode a sent wire message back to its inner `{"method", "data"}` object.
pub fn decode_sent(wire: &str) -> Value {
    let outer: Vec<String> = serde_json::from_str(wire).expect("outer array");
    assert_eq!(outer.len(), 1, "outbound envelope must hold one string");
    serde_json::from_str(&outer[0]).expect("inner object")
}

/// Method names of every message the session sent.
pub fn sent_methods(sent: &StdMutex<Vec<String>>) -> Vec<String> {
    sent.lock()
        .unwrap()
        .iter()
        .map(|m| decode_sent(m)["method"].as_str().unwrap().to_string())
        .collect()
}

// ── Frame builders ──────────────────────────────────────────────────

pub const OPEN: &str = "o";
pub const HEARTBEAT: &str = "h";

/// A data frame carrying one invocation.
pub fn data_frame(method: &str, args: Value) -> String {
    data_frame_many(&[(method, args)])
}

/// A data frame carrying several invocations.
pub fn data_frame_many(invocations: &[(&str, Value)]) -> String {
    let elements: Vec<String> = invocations
        .iter()
        .map(|(method, args)| json!({ "method": method, "args": args, "callback": null }).to_string())
        .collect();
    format!("a{}", serde_json::to_string(&elements).unwrap())
}

pub fn auth_response(result: &str) -> String {
    data_frame("onAuthResponse", json!([result]))
}

pub fn auth_ok() -> String {
    auth_response("1")
}

pub fn notify(body: Value) -> String {
    data_frame("onNotify", json!([body.to_string()]))
}

pub fn tip_alert(from: &str, amount: u64) -> String {
    notify(json!({
        "type": "tip_alert",
        "from_username": from,
        "amount": amount,
        "is_mod": false,
        "in_fanclub": false,
        "history": false,
    }))
}

pub fn room_entry(user: &str) -> String {
    notify(json!({ "type": "room_entry", "username": user, "has_tokens": true }))
}

pub fn room_leave(user: &str) -> String {
    notify(json!({ "type": "room_leave", "username": user }))
}

pub fn app_notice(lines: &[&str]) -> String {
    notify(json!({ "type": "appnotice", "msg": lines, "background": "#FFFFFF", "weight": "bold" }))
}

pub fn room_msg(author: &str, text: &str) -> String {
    let body = json!({
        "user": author,
        "m": text,
        "c": "#494949",
        "f": "default",
        "gender": "m",
        "is_mod": false,
        "in_fanclub": false,
        "has_tokens": true,
        "tipped_recently": false,
        "tipped_alot_recently": false,
        "tipped_tons_recently": false,
        "X-Successful": true,
    });
    data_frame("onRoomMsg", json!([author, body.to_string()]))
}
