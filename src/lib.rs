//! # Chaturbate Chat
//!
//! Async Rust client for the Chaturbate room chat protocol.
//!
//! The chat server speaks a SockJS-style protocol over a WebSocket: each text
//! frame starts with a type character (`o` open, `h` heartbeat, `a` data) and
//! data frames carry a JSON array of JSON-encoded method invocations. This
//! crate resolves anonymous session credentials from the public room page,
//! performs the connect/auth/join handshake and surfaces room events through
//! callbacks.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] for any duplex text channel
//! - **WebSocket built-in**: the default `transport-websocket` feature provides
//!   [`WebSocketTransport`] and [`ChatSession::start`]
//! - **Defensive decoding**: malformed or unknown frames are logged and
//!   dropped without ending the session
//! - **Non-blocking callbacks**: handlers run on a bounded task pool, never on
//!   the read loop
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> chaturbate_chat::Result<()> {
//! use chaturbate_chat::{AuthOption, ChatSession};
//!
//! let mut session = ChatSession::create("some_room", AuthOption::Anonymous).await?;
//! session.on_tip(|user, amount| println!("{user} tipped {amount}"));
//! session.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod transports;

pub use codec::Frame;
pub use credentials::{CredentialResolver, SessionCredentials};
pub use dispatch::ChatEvent;
pub use error::{ChatError, Result};
pub use handshake::HandshakeState;
pub use protocol::{AuthResult, MethodInvocation, NotifyEvent, OutboundCommand, RoomMessage};
pub use session::{AuthOption, ChatConfig, ChatSession, StopHandle};
pub use transport::Transport;

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
