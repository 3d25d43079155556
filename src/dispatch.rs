//! Routing of decoded method invocations to domain events and callbacks.
//!
//! [`route`] is a pure function from a [`MethodInvocation`] to a [`Dispatch`]
//! outcome. Events that reach callers are handed to [`Callbacks::bind`], and
//! the resulting jobs run on a [`CallbackQueue`] so that caller code never
//! blocks the read loop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::{
    AuthResult, MethodInvocation, NotifyEvent, RoomMessage, SILENT_NOTIFY_TYPES,
};

/// Methods the server sends that are recognized but not surfaced.
const SILENT_METHODS: &[&str] = &["onTitleChange", "onRoomCountUpdate", "onSilence"];

/// A user-relevant room event.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A chat message was posted.
    Message(RoomMessage),
    /// A user tipped.
    Tip { from_username: String, amount: u64 },
    /// Application notice lines.
    Notice(Vec<String>),
    /// A user entered the room.
    UserEntry(String),
    /// A user left the room.
    UserLeave(String),
    /// The client was muted. No server message currently maps to this.
    Mute,
}

/// Outcome of routing one method invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Response to the `connect` command.
    Auth { result: AuthResult, raw: String },
    /// A user-relevant event.
    Event(ChatEvent),
    /// A recognized method or notify type with nothing to surface.
    Ignored,
    /// An unknown method or notify type.
    Unhandled,
}

/// Route a method invocation.
///
/// # Errors
///
/// Returns [`ChatError::MalformedPayload`](crate::ChatError::MalformedPayload)
/// when the arguments of a recognized method cannot be decoded. Callers drop
/// the invocation and continue.
pub fn route(invocation: &MethodInvocation) -> Result<Dispatch> {
    match invocation.method.as_str() {
        "onAuthResponse" => {
            let (result, raw) = AuthResult::from_arg(invocation.arg(0));
            Ok(Dispatch::Auth { result, raw })
        }
        "onNotify" => {
            let notify = NotifyEvent::from_json(invocation.arg_str(0)?)?;
            Ok(route_notify(notify))
        }
        "onRoomMsg" => {
            let author = invocation.arg_str(0)?;
            let message = RoomMessage::from_json(author, invocation.arg_str(1)?)?;
            Ok(Dispatch::Event(ChatEvent::Message(message)))
        }
        method if SILENT_METHODS.contains(&method) => {
            debug!(method, "ignoring method");
            Ok(Dispatch::Ignored)
        }
        method => {
            warn!(method, args = ?invocation.args, "unknown method");
            Ok(Dispatch::Unhandled)
        }
    }
}

fn route_notify(notify: NotifyEvent) -> Dispatch {
    let event = match notify {
        NotifyEvent::RoomEntry { username } => ChatEvent::UserEntry(username),
        NotifyEvent::RoomLeave { username } => ChatEvent::UserLeave(username),
        NotifyEvent::Notice { messages } => ChatEvent::Notice(messages),
        NotifyEvent::TipAlert {
            from_username,
            amount,
        } => ChatEvent::Tip {
            from_username,
            amount,
        },
        NotifyEvent::Unhandled { kind, .. } if SILENT_NOTIFY_TYPES.contains(&kind.as_str()) => {
            debug!(kind = %kind, "ignoring notification");
            return Dispatch::Ignored;
        }
        NotifyEvent::Unhandled { kind, raw } => {
            warn!(kind = %kind, "unknown notification type: {raw}");
            return Dispatch::Unhandled;
        }
    };
    Dispatch::Event(event)
}

// ── Callbacks ───────────────────────────────────────────────────────

/// A unit of callback work, ready to run on a [`CallbackQueue`].
pub type CallbackJob = Box<dyn FnOnce() + Send + 'static>;

/// Caller-supplied event handlers. Every slot is optional.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub(crate) on_message: Option<Arc<dyn Fn(RoomMessage) + Send + Sync>>,
    pub(crate) on_tip: Option<Arc<dyn Fn(String, u64) + Send + Sync>>,
    pub(crate) on_notice: Option<Arc<dyn Fn(Vec<String>) + Send + Sync>>,
    pub(crate) on_user_entry: Option<Arc<dyn Fn(String) + Send + Sync>>,
    pub(crate) on_user_leave: Option<Arc<dyn Fn(String) + Send + Sync>>,
    pub(crate) on_mute: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Callbacks {
    /// Pair an event with its registered handler.
    ///
    /// Returns `None` when no handler is registered for the event.
    pub fn bind(&self, event: ChatEvent) -> Option<CallbackJob> {
        match event {
            ChatEvent::Message(message) => {
                let f = self.on_message.clone()?;
                Some(Box::new(move || f(message)))
            }
            ChatEvent::Tip {
                from_username,
                amount,
            } => {
                let f = self.on_tip.clone()?;
                Some(Box::new(move || f(from_username, amount)))
            }
            ChatEvent::Notice(lines) => {
                let f = self.on_notice.clone()?;
                Some(Box::new(move || f(lines)))
            }
            ChatEvent::UserEntry(user) => {
                let f = self.on_user_entry.clone()?;
                Some(Box::new(move || f(user)))
            }
            ChatEvent::UserLeave(user) => {
                let f = self.on_user_leave.clone()?;
                Some(Box::new(move || f(user)))
            }
            ChatEvent::Mute => {
                let f = self.on_mute.clone()?;
                Some(Box::new(move || f()))
            }
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_message", &self.on_message.is_some())
            .field("on_tip", &self.on_tip.is_some())
            .field("on_notice", &self.on_notice.is_some())
            .field("on_user_entry", &self.on_user_entry.is_some())
            .field("on_user_leave", &self.on_user_leave.is_some())
            .field("on_mute", &self.on_mute.is_some())
            .finish()
    }
}

// ── Callback queue ──────────────────────────────────────────────────

/// Bounded pool of in-flight callback invocations.
///
/// Each job runs on the blocking thread pool, so callbacks may run
/// concurrently with each other and with frame decoding. At most
/// `concurrency` jobs are in flight; once the limit is reached,
/// [`submit`](Self::submit) waits for a slot, which applies back-pressure to
/// the read loop.
///
/// Only a concurrency of 1 keeps submission order: each job finishes before
/// the next starts. Above that, the blocking pool may start jobs in any order.
pub struct CallbackQueue {
    tasks: JoinSet<()>,
    permits: Arc<Semaphore>,
}

impl CallbackQueue {
    /// Create a queue allowing `concurrency` jobs in flight (at least 1).
    pub fn new(concurrency: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Number of jobs that have been submitted and not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Start a job once a concurrency slot is available.
    pub async fn submit(&mut self, job: CallbackJob) {
        while let Some(finished) = self.tasks.try_join_next() {
            log_join_result(finished);
        }

        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            debug!("callback queue closed, dropping job");
            return;
        };
        self.tasks.spawn_blocking(move || {
            let _permit = permit;
            job();
        });
    }

    /// Wait up to `timeout` for in-flight jobs, then abort the rest.
    pub async fn drain(&mut self, timeout: Duration) {
        let tasks = &mut self.tasks;
        let wait_all = async {
            while let Some(finished) = tasks.join_next().await {
                log_join_result(finished);
            }
        };
        if tokio::time::timeout(timeout, wait_all).await.is_err() {
            warn!(
                pending = self.tasks.len(),
                "callbacks did not finish within timeout; abandoning them"
            );
            self.tasks.abort_all();
        }
    }
}

impl fmt::Debug for CallbackQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackQueue")
            .field("in_flight", &self.tasks.len())
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

fn log_join_result(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            warn!("callback panicked: {e}");
        } else {
            debug!("callback task cancelled: {e}");
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn notify(body: &str) -> MethodInvocation {
        MethodInvocation::new("onNotify", vec![json!(body)])
    }

    #[test]
    fn auth_response_routes_to_auth() {
        let d = route(&MethodInvocation::new("onAuthResponse", vec![json!("1")])).unwrap();
        assert_eq!(
            d,
            Dispatch::Auth {
                result: AuthResult::Ok,
                raw: "1".into()
            }
        );

        let d = route(&MethodInvocation::new("onAuthResponse", vec![])).unwrap();
        assert!(matches!(
            d,
            Dispatch::Auth {
                result: AuthResult::Unknown,
                ..
            }
        ));
    }

    #[test]
    fn tip_alert_routes_to_tip_event() {
        let d = route(&notify(
            r#"{"type":"tip_alert","from_username":"bob","amount":50}"#,
        ))
        .unwrap();
        assert_eq!(
            d,
            Dispatch::Event(ChatEvent::Tip {
                from_username: "bob".into(),
                amount: 50
            })
        );
    }

    #[test]
    fn silent_and_unknown_notify_types() {
        let d = route(&notify(r#"{"type":"refresh_panel"}"#)).unwrap();
        assert_eq!(d, Dispatch::Ignored);

        let d = route(&notify(r#"{"type":"brand_new_thing","x":1}"#)).unwrap();
        assert_eq!(d, Dispatch::Unhandled);
    }

    #[test]
    fn notify_with_non_string_argument_is_malformed() {
        let err = route(&MethodInvocation::new("onNotify", vec![json!({"type": "x"})]))
            .unwrap_err();
        assert!(matches!(err, ChatError::MalformedPayload(_)));
    }

    #[test]
    fn room_msg_routes_to_message_event() {
        let inv = MethodInvocation::new(
            "onRoomMsg",
            vec![json!("alice"), json!(r#"{"m":"hi","gender":"f"}"#)],
        );
        let Dispatch::Event(ChatEvent::Message(msg)) = route(&inv).unwrap() else {
            panic!("expected message event");
        };
        assert_eq!(msg.author, "alice");
        assert_eq!(msg.message, "hi");
        assert_eq!(msg.gender, "f");
    }

    #[test]
    fn room_msg_with_missing_body_is_malformed() {
        let inv = MethodInvocation::new("onRoomMsg", vec![json!("alice")]);
        assert!(route(&inv).is_err());

        let inv = MethodInvocation::new("onRoomMsg", vec![json!("alice"), json!("{bad")]);
        assert!(route(&inv).is_err());
    }

    #[test]
    fn reserved_methods_are_ignored_and_unknown_methods_unhandled() {
        for method in ["onTitleChange", "onRoomCountUpdate", "onSilence"] {
            let d = route(&MethodInvocation::new(method, vec![json!("x")])).unwrap();
            assert_eq!(d, Dispatch::Ignored, "{method}");
        }
        let d = route(&MethodInvocation::new("onSomethingElse", vec![])).unwrap();
        assert_eq!(d, Dispatch::Unhandled);
    }

    #[test]
    fn bind_returns_none_without_handler() {
        let callbacks = Callbacks::default();
        assert!(callbacks.bind(ChatEvent::UserEntry("x".into())).is_none());
        assert!(callbacks.bind(ChatEvent::Mute).is_none());
    }

    #[test]
    fn bind_passes_event_fields_to_handler() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callbacks = Callbacks {
            on_tip: Some(Arc::new(move |user: String, amount: u64| {
                sink.lock().unwrap().push((user, amount));
            })),
            ..Callbacks::default()
        };

        let job = callbacks
            .bind(ChatEvent::Tip {
                from_username: "bob".into(),
                amount: 50,
            })
            .unwrap();
        job();

        assert_eq!(*seen.lock().unwrap(), vec![("bob".to_string(), 50)]);
    }

    #[tokio::test]
    async fn queue_runs_jobs_and_drains() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut queue = CallbackQueue::new(4);
        for _ in 0..10 {
            let c = Arc::clone(&counter);
            queue
                .submit(Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }))
                .await;
        }
        queue.drain(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn slow_job_does_not_block_submission_below_limit() {
        let mut queue = CallbackQueue::new(2);
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        queue
            .submit(Box::new(move || {
                let _ = rx.recv_timeout(Duration::from_secs(5));
            }))
            .await;

        // A second job still gets a slot while the first is parked.
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        queue
            .submit(Box::new(move || {
                d.fetch_add(1, Ordering::SeqCst);
            }))
            .await;

        tx.send(()).unwrap();
        queue.drain(Duration::from_secs(5)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_slot_queue_runs_jobs_in_submission_order() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let mut queue = CallbackQueue::new(1);
        for i in 0..16 {
            let sink = Arc::clone(&seen);
            queue
                .submit(Box::new(move || sink.lock().unwrap().push(i)))
                .await;
        }
        queue.drain(Duration::from_secs(5)).await;
        assert_eq!(*seen.lock().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn panicking_job_is_contained() {
        let mut queue = CallbackQueue::new(1);
        queue.submit(Box::new(|| panic!("boom"))).await;
        queue.drain(Duration::from_secs(5)).await;
        assert_eq!(queue.in_flight(), 0);
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let queue = CallbackQueue::new(0);
        assert_eq!(queue.permits.available_permits(), 1);
    }
}
