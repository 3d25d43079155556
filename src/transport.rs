//! Transport abstraction for the chat protocol.
//!
//! The [`Transport`] trait is a duplex text-message channel between the
//! client and the chat server. Frame-level concerns (TLS, dialing, WebSocket
//! fragmentation) live in the implementation; the session only ever sees
//! whole text messages such as `o`, `h`, or `a[...]`.
//!
//! # Connection Setup
//!
//! Connection setup is NOT part of this trait. Construct a connected
//! transport externally and hand it to `ChatSession::run`, or let
//! `ChatSession::start` dial the built-in WebSocket transport.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use chaturbate_chat::error::ChatError;
//! use chaturbate_chat::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), ChatError> {
//!         // Write one text message
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, ChatError>> {
//!         // Read the next text message; None once the peer closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), ChatError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::ChatError;

/// A duplex text message channel to the chat server.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe: the session polls it
/// inside `tokio::select!` alongside its stop signal. Channel-based
/// implementations are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Write one text message.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::TransportSend`] or [`ChatError::TransportClosed`]
    /// if the message could not be written.
    async fn send(&mut self, message: String) -> Result<(), ChatError>;

    /// Read the next text message.
    ///
    /// Returns:
    /// - `Some(Ok(text))` for a complete message
    /// - `Some(Err(e))` for a read failure
    /// - `None` once the connection was closed cleanly
    async fn recv(&mut self) -> Option<Result<String, ChatError>>;

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources in that case.
    async fn close(&mut self) -> Result<(), ChatError>;
}
