//! Error types for the chat client.

use thiserror::Error;

/// Errors that can occur when resolving, connecting to, or running a chat session.
///
/// Variants fall into five groups:
///
/// - **Resolution**: [`Fetch`](Self::Fetch), [`UpstreamStatus`](Self::UpstreamStatus),
///   [`Parse`](Self::Parse), [`RoomNotConnected`](Self::RoomNotConnected)
/// - **Frame decoding**: [`EmptyMessage`](Self::EmptyMessage),
///   [`MalformedEnvelope`](Self::MalformedEnvelope),
///   [`MalformedPayload`](Self::MalformedPayload). These never end a session.
/// - **Handshake**: [`AuthenticationFailed`](Self::AuthenticationFailed)
/// - **Transport**: [`TransportSend`](Self::TransportSend),
///   [`TransportReceive`](Self::TransportReceive), [`TransportClosed`](Self::TransportClosed),
///   [`Io`](Self::Io), [`Timeout`](Self::Timeout)
/// - **Usage**: [`NotImplemented`](Self::NotImplemented), [`NotConnected`](Self::NotConnected),
///   [`SessionClosed`](Self::SessionClosed)
#[derive(Debug, Error)]
pub enum ChatError {
    /// The room page could not be fetched.
    #[error("failed to load room page: {0}")]
    Fetch(String),

    /// The room page responded with a non-success status.
    #[error("failed to load room page, status code error: {status}")]
    UpstreamStatus {
        /// HTTP status code returned by the page host.
        status: u16,
    },

    /// A session field could not be located in the room page.
    #[error("room page is missing the `{field}` field")]
    Parse {
        /// Name of the embedded field that was not found.
        field: &'static str,
    },

    /// The room page has an empty chat host: the broadcaster is offline.
    #[error("room '{room}' is not connected")]
    RoomNotConnected {
        /// Room that was resolved.
        room: String,
    },

    /// An inbound message had zero length.
    #[error("message is empty")]
    EmptyMessage,

    /// The outer array of a data frame was not a non-empty JSON array of strings.
    #[error("malformed frame envelope: {0}")]
    MalformedEnvelope(String),

    /// A method invocation inside a data frame could not be decoded.
    #[error("malformed frame payload: {0}")]
    MalformedPayload(String),

    /// The server rejected the `connect` command.
    #[error("authentication failed, auth response result: {result}")]
    AuthenticationFailed {
        /// Raw result value sent by the server.
        result: String,
    },

    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize an outbound command.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation requires a running session.
    #[error("chat is not connected")]
    NotConnected,

    /// The session already ran; a new session is required to reconnect.
    #[error("chat session already started")]
    SessionClosed,

    /// The requested configuration is not supported.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Returns `true` for per-frame decode errors, which are logged and
    /// swallowed instead of ending the session.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyMessage | Self::MalformedEnvelope(_) | Self::MalformedPayload(_)
        )
    }
}

/// A specialized [`Result`] type for chat client operations.
pub type Result<T> = std::result::Result<T, ChatError>;
