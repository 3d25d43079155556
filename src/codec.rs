//! Frame codec for the socket.io/SockJS-style text transport.
//!
//! Every inbound message starts with a one-character frame type:
//!
//! | Prefix | Frame                                        |
//! |--------|----------------------------------------------|
//! | `o`    | transport open, begin the handshake          |
//! | `h`    | heartbeat, no payload                        |
//! | `a`    | data: a JSON array of JSON-encoded strings   |
//!
//! Data payloads are encoded twice. The outer layer is a JSON array of
//! strings; each string is itself a JSON object with `method` and `args`.
//! Outbound commands use the same two layers, without a prefix character.

use tracing::{debug, warn};

use crate::error::{ChatError, Result};
use crate::protocol::{MethodInvocation, OutboundCommand};

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The transport is ready; the client must send `connect`.
    Open,
    /// Keep-alive, nothing to do.
    Heartbeat,
    /// One or more method invocations.
    Data(Vec<MethodInvocation>),
    /// A frame type this client does not understand.
    Unknown(char),
}

/// Encode an outbound command into its wire text.
///
/// The command is serialized to `{"method":...,"data":...}`, and that string
/// is wrapped as the single element of a JSON array.
///
/// # Errors
///
/// Returns [`ChatError::Serialization`] if either layer fails to serialize.
pub fn encode(command: &OutboundCommand) -> Result<String> {
    let inner = serde_json::to_string(command)?;
    Ok(serde_json::to_string(&[inner])?)
}

/// Decode one inbound text message.
///
/// # Errors
///
/// - [`ChatError::EmptyMessage`] for zero-length input
/// - [`ChatError::MalformedEnvelope`] if a data frame's remainder is not a
///   non-empty JSON array of strings
/// - [`ChatError::MalformedPayload`] if no element of a data frame decodes
///   to a method invocation
pub fn decode(raw: &str) -> Result<Frame> {
    let mut chars = raw.chars();
    let Some(kind) = chars.next() else {
        return Err(ChatError::EmptyMessage);
    };

    match kind {
        'o' => Ok(Frame::Open),
        'h' => Ok(Frame::Heartbeat),
        'a' => decode_data(chars.as_str()).map(Frame::Data),
        other => Ok(Frame::Unknown(other)),
    }
}

fn decode_data(payload: &str) -> Result<Vec<MethodInvocation>> {
    let elements: Vec<String> = serde_json::from_str(payload)
        .map_err(|e| ChatError::MalformedEnvelope(e.to_string()))?;

    if elements.is_empty() {
        return Err(ChatError::MalformedEnvelope("no data".into()));
    }
    if elements.len() > 1 {
        debug!(count = elements.len(), "data frame carries multiple invocations");
    }

    let mut invocations = Vec::with_capacity(elements.len());
    let mut first_error = None;
    for element in &elements {
        match serde_json::from_str::<MethodInvocation>(element) {
            Ok(invocation) => invocations.push(invocation),
            Err(e) => {
                warn!("dropping undecodable invocation: {e}, raw: {element}");
                if first_error.is_none() {
                    first_error = Some(ChatError::MalformedPayload(e.to_string()));
                }
            }
        }
    }

    match (invocations.is_empty(), first_error) {
        (true, Some(err)) => Err(err),
        _ => Ok(invocations),
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
    use crate::protocol::{ConnectPayload, JoinRoomPayload};
    use serde_json::json;

    #[test]
    fn encode_wraps_command_in_string_array() {
        let cmd = OutboundCommand::JoinRoom(JoinRoomPayload {
            room: "alice".into(),
        });
        let wire = encode(&cmd).unwrap();
        assert_eq!(wire, r#"["{\"method\":\"joinRoom\",\"data\":{\"room\":\"alice\"}}"]"#);
    }

    #[test]
    fn encoded_connect_reparses_through_both_layers() {
        let cmd = OutboundCommand::Connect(ConnectPayload {
            user: "u".into(),
            password: "p".into(),
            room: "r".into(),
            room_password: "rp".into(),
        });
        let wire = encode(&cmd).unwrap();

        let outer: Vec<String> = serde_json::from_str(&wire).unwrap();
        assert_eq!(outer.len(), 1);
        let inner: serde_json::Value = serde_json::from_str(&outer[0]).unwrap();
        assert_eq!(inner["method"], "connect");
        assert_eq!(inner["data"]["room_password"], "rp");

        let back: OutboundCommand = serde_json::from_str(&outer[0]).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn empty_message_is_an_error() {
        assert!(matches!(decode(""), Err(ChatError::EmptyMessage)));
    }

    #[test]
    fn control_frames() {
        assert_eq!(decode("o").unwrap(), Frame::Open);
        assert_eq!(decode("h").unwrap(), Frame::Heartbeat);
    }

    #[test]
    fn unknown_frame_type_is_not_an_error() {
        assert_eq!(
            decode(r#"c[3000,"Go away!"]"#).unwrap(),
            Frame::Unknown('c')
        );
        assert_eq!(decode("é").unwrap(), Frame::Unknown('é'));
    }

    #[test]
    fn data_frame_decodes_invocation() {
        let frame = decode(r#"a["{\"method\":\"onAuthResponse\",\"args\":[\"1\"]}"]"#).unwrap();
        assert_eq!(
            frame,
            Frame::Data(vec![MethodInvocation::new("onAuthResponse", vec![json!("1")])])
        );
    }

    #[test]
    fn data_frame_tolerates_callback_field_and_missing_args() {
        let frame =
            decode(r#"a["{\"method\":\"onTitleChange\",\"callback\":null}"]"#).unwrap();
        let Frame::Data(invocations) = frame else {
            panic!("expected data frame");
        };
        assert_eq!(invocations[0].method, "onTitleChange");
        assert!(invocations[0].args.is_empty());
    }

    #[test]
    fn malformed_envelope() {
        assert!(matches!(decode("a{not json"), Err(ChatError::MalformedEnvelope(_))));
        assert!(matches!(decode("a[]"), Err(ChatError::MalformedEnvelope(_))));
        assert!(matches!(decode("a[1,2]"), Err(ChatError::MalformedEnvelope(_))));
        assert!(matches!(decode("a"), Err(ChatError::MalformedEnvelope(_))));
    }

    #[test]
    fn malformed_payload() {
        assert!(matches!(
            decode(r#"a["not an object"]"#),
            Err(ChatError::MalformedPayload(_))
        ));
        assert!(matches!(
            decode(r#"a["{\"args\":[]}"]"#),
            Err(ChatError::MalformedPayload(_))
        ));
    }

    #[test]
    fn multi_element_frame_keeps_decodable_elements() {
        let frame = decode(
            r#"a["{\"method\":\"onRoomCountUpdate\",\"args\":[\"12\"]}","garbage","{\"method\":\"onSilence\",\"args\":[]}"]"#,
        )
        .unwrap();
        let Frame::Data(invocations) = frame else {
            panic!("expected data frame");
        };
        let methods: Vec<_> = invocations.iter().map(|i| i.method.as_str()).collect();
        assert_eq!(methods, ["onRoomCountUpdate", "onSilence"]);
    }
}
