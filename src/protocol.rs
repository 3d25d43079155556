//! Wire-level protocol types for the room chat protocol.
//!
//! Outbound traffic is a closed set of [`OutboundCommand`]s. Inbound traffic
//! is a stream of loosely typed [`MethodInvocation`]s whose arguments are
//! decoded on demand with checked, positional accessors. Several arguments are
//! themselves JSON documents embedded in strings; [`NotifyEvent`] and
//! [`RoomMessage`] decode those.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChatError, Result};

// ── Outbound ────────────────────────────────────────────────────────

/// Payload of the `connect` command, sent once the transport is open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectPayload {
    pub user: String,
    pub password: String,
    pub room: String,
    pub room_password: String,
}

/// Payload of the `joinRoom` command, sent after a successful auth response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinRoomPayload {
    pub room: String,
}

/// A command sent by the client.
///
/// Serializes to the inner layer of the wire envelope:
/// `{"method": "<name>", "data": {...}}`. See [`codec::encode`](crate::codec::encode)
/// for the outer layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", content = "data", rename_all = "camelCase")]
pub enum OutboundCommand {
    /// Authenticate against the chat host.
    Connect(ConnectPayload),
    /// Subscribe to a room's events.
    JoinRoom(JoinRoomPayload),
}

impl OutboundCommand {
    /// The wire method name of this command.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::JoinRoom(_) => "joinRoom",
        }
    }
}

// ── Inbound ─────────────────────────────────────────────────────────

/// A single server-side method call carried by a data frame.
///
/// Arguments are kept as untyped JSON values. Use the positional accessors to
/// extract them; each returns [`ChatError::MalformedPayload`] when the argument
/// is missing or has the wrong type.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MethodInvocation {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl MethodInvocation {
    /// Build an invocation from a method name and arguments.
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    /// Returns the argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Returns the argument at `index` as a string.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::MalformedPayload`] if the argument is missing or
    /// is not a JSON string.
    pub fn arg_str(&self, index: usize) -> Result<&str> {
        match self.arg(index) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(ChatError::MalformedPayload(format!(
                "{}: argument {index} is not a string: {other}",
                self.method
            ))),
            None => Err(ChatError::MalformedPayload(format!(
                "{}: missing argument {index}",
                self.method
            ))),
        }
    }
}

/// Result of the `onAuthResponse` method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthResult {
    #[default]
    Unknown,
    Ok,
}

impl AuthResult {
    /// Decode the first argument of `onAuthResponse`.
    ///
    /// The server sends the result as a string-encoded integer (`"1"` for
    /// success). A bare JSON number is tolerated. Anything else decodes to
    /// [`AuthResult::Unknown`]. The raw value is returned alongside for
    /// diagnostics.
    pub fn from_arg(arg: Option<&Value>) -> (Self, String) {
        let (code, raw) = match arg {
            Some(Value::String(s)) => (s.trim().parse::<i64>().ok(), s.clone()),
            Some(Value::Number(n)) => (n.as_i64(), n.to_string()),
            Some(other) => (None, other.to_string()),
            None => (None, "<missing>".to_string()),
        };
        let result = match code {
            Some(1) => Self::Ok,
            _ => Self::Unknown,
        };
        (result, raw)
    }
}

// ── Notify events ───────────────────────────────────────────────────

/// Notify types the server sends that carry nothing for callers.
pub const SILENT_NOTIFY_TYPES: &[&str] = &["purchase_notification", "refresh_panel"];

/// A server-pushed room event, decoded from the `onNotify` argument.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyEvent {
    /// A user entered the room.
    RoomEntry { username: String },
    /// A user left the room.
    RoomLeave { username: String },
    /// Application notice lines.
    Notice { messages: Vec<String> },
    /// A user tipped the broadcaster.
    TipAlert { from_username: String, amount: u64 },
    /// Any notify type this client does not surface.
    Unhandled { kind: String, raw: Value },
}

#[derive(Debug, Deserialize)]
struct NotifyFields {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    from_username: Option<String>,
    #[serde(default)]
    amount: Option<u64>,
    #[serde(default)]
    msg: Vec<String>,
}

impl NotifyEvent {
    /// Decode a notify event from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::MalformedPayload`] if the text is not a JSON
    /// object with a string `type`, or if a recognized type lacks the fields
    /// it needs.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ChatError::MalformedPayload(format!("onNotify: {e}")))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ChatError::MalformedPayload("onNotify: missing `type`".into()))?
            .to_string();

        if !matches!(
            kind.as_str(),
            "room_entry" | "room_leave" | "appnotice" | "tip_alert"
        ) {
            return Ok(Self::Unhandled { kind, raw: value });
        }

        let fields: NotifyFields = serde_json::from_value(value)
            .map_err(|e| ChatError::MalformedPayload(format!("onNotify {kind}: {e}")))?;
        let missing =
            |field: &str| ChatError::MalformedPayload(format!("onNotify {kind}: missing `{field}`"));

        match kind.as_str() {
            "room_entry" => Ok(Self::RoomEntry {
                username: fields.username.ok_or_else(|| missing("username"))?,
            }),
            "room_leave" => Ok(Self::RoomLeave {
                username: fields.username.ok_or_else(|| missing("username"))?,
            }),
            "appnotice" => Ok(Self::Notice {
                messages: fields.msg,
            }),
            _ => Ok(Self::TipAlert {
                from_username: fields.from_username.ok_or_else(|| missing("from_username"))?,
                amount: fields.amount.ok_or_else(|| missing("amount"))?,
            }),
        }
    }
}

// ── Room messages ───────────────────────────────────────────────────

/// A chat message posted in the room, decoded from `onRoomMsg`.
///
/// Only `author` and `message` are meaningful to this client; the remaining
/// flags are carried as the server sent them.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoomMessage {
    /// Taken from the first `onRoomMsg` argument, not the JSON body.
    #[serde(skip)]
    pub author: String,
    #[serde(rename = "m")]
    pub message: String,
    #[serde(rename = "c")]
    pub color: String,
    #[serde(rename = "f")]
    pub font: String,
    pub gender: String,
    pub is_mod: bool,
    pub in_fanclub: bool,
    pub has_tokens: bool,
    pub tipped_recently: bool,
    pub tipped_alot_recently: bool,
    pub tipped_tons_recently: bool,
    #[serde(rename = "X-Successful")]
    pub x_successful: bool,
}

impl RoomMessage {
    /// Decode a room message body and attach its author.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::MalformedPayload`] if the body is not a JSON object
    /// of the expected shape.
    pub fn from_json(author: impl Into<String>, text: &str) -> Result<Self> {
        let mut message: Self = serde_json::from_str(text)
            .map_err(|e| ChatError::MalformedPayload(format!("onRoomMsg: {e}")))?;
        message.author = author.into();
        Ok(message)
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
    use serde_json::json;

    #[test]
    fn connect_command_serializes_with_method_and_data() {
        let cmd = OutboundCommand::Connect(ConnectPayload {
            user: "__anonymous__abc".into(),
            password: "tok".into(),
            room: "alice".into(),
            room_password: "rp".into(),
        });
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            value,
            json!({
                "method": "connect",
                "data": {
                    "user": "__anonymous__abc",
                    "password": "tok",
                    "room": "alice",
                    "room_password": "rp"
                }
            })
        );
        assert_eq!(cmd.method(), "connect");
    }

    #[test]
    fn join_room_method_name_is_camel_case() {
        let cmd = OutboundCommand::JoinRoom(JoinRoomPayload {
            room: "alice".into(),
        });
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["method"], "joinRoom");
        assert_eq!(value["data"]["room"], "alice");
        assert_eq!(cmd.method(), "joinRoom");
    }

    #[test]
    fn arg_str_checks_type_and_presence() {
        let inv = MethodInvocation::new("onRoomMsg", vec![json!("bob"), json!(3)]);
        assert_eq!(inv.arg_str(0).unwrap(), "bob");
        assert!(matches!(inv.arg_str(1), Err(ChatError::MalformedPayload(_))));
        assert!(matches!(inv.arg_str(2), Err(ChatError::MalformedPayload(_))));
    }

    #[test]
    fn auth_result_decoding() {
        assert_eq!(AuthResult::from_arg(Some(&json!("1"))).0, AuthResult::Ok);
        assert_eq!(AuthResult::from_arg(Some(&json!(1))).0, AuthResult::Ok);

        let (result, raw) = AuthResult::from_arg(Some(&json!("0")));
        assert_eq!(result, AuthResult::Unknown);
        assert_eq!(raw, "0");

        let (result, raw) = AuthResult::from_arg(Some(&json!("nope")));
        assert_eq!(result, AuthResult::Unknown);
        assert_eq!(raw, "nope");

        let (result, raw) = AuthResult::from_arg(None);
        assert_eq!(result, AuthResult::Unknown);
        assert_eq!(raw, "<missing>");
    }

    #[test]
    fn notify_tip_alert() {
        let event =
            NotifyEvent::from_json(r#"{"type":"tip_alert","from_username":"bob","amount":50}"#)
                .unwrap();
        assert_eq!(
            event,
            NotifyEvent::TipAlert {
                from_username: "bob".into(),
                amount: 50
            }
        );
    }

    #[test]
    fn notify_negative_tip_is_malformed() {
        let err =
            NotifyEvent::from_json(r#"{"type":"tip_alert","from_username":"bob","amount":-5}"#)
                .unwrap_err();
        assert!(matches!(err, ChatError::MalformedPayload(_)));
    }

    #[test]
    fn notify_entry_leave_and_notice() {
        let entry = NotifyEvent::from_json(
            r#"{"type":"room_entry","username":"carol","is_mod":false,"in_fanclub":true}"#,
        )
        .unwrap();
        assert_eq!(
            entry,
            NotifyEvent::RoomEntry {
                username: "carol".into()
            }
        );

        let leave = NotifyEvent::from_json(r#"{"type":"room_leave","username":"carol"}"#).unwrap();
        assert!(matches!(leave, NotifyEvent::RoomLeave { username } if username == "carol"));

        let notice = NotifyEvent::from_json(
            r##"{"type":"appnotice","msg":["line one","line two"],"background":"#fff"}"##,
        )
        .unwrap();
        assert_eq!(
            notice,
            NotifyEvent::Notice {
                messages: vec!["line one".into(), "line two".into()]
            }
        );
    }

    #[test]
    fn notify_unknown_type_is_unhandled() {
        let event =
            NotifyEvent::from_json(r#"{"type":"hologram","amount":"not a number"}"#).unwrap();
        match event {
            NotifyEvent::Unhandled { kind, raw } => {
                assert_eq!(kind, "hologram");
                assert_eq!(raw["amount"], "not a number");
            }
            other => panic!("expected Unhandled, got {other:?}"),
        }
    }

    #[test]
    fn notify_without_type_is_malformed() {
        assert!(NotifyEvent::from_json(r#"{"username":"x"}"#).is_err());
        assert!(NotifyEvent::from_json("not json").is_err());
    }

    #[test]
    fn room_message_takes_author_from_argument() {
        let msg = RoomMessage::from_json(
            "dave",
            r##"{"user":"ignored","m":"hello there","c":"#494949","gender":"m","is_mod":true}"##,
        )
        .unwrap();
        assert_eq!(msg.author, "dave");
        assert_eq!(msg.message, "hello there");
        assert_eq!(msg.color, "#494949");
        assert!(msg.is_mod);
        assert!(!msg.in_fanclub);
    }
}
