//! Connect/auth/join handshake state machine.
//!
//! ```text
//! Idle ──start──▶ Connecting ──open──▶ AwaitingAuth ──auth ok──▶ Joining ──event──▶ Active
//!                                          │
//!                                          └──auth rejected──▶ Failed
//! any ──close/stop──▶ Closed
//! ```
//!
//! The state machine is transport-free: each transition returns the command
//! to send, if any, and the session writes it.

use std::fmt;

use tracing::{debug, info, warn};

use crate::credentials::SessionCredentials;
use crate::error::{ChatError, Result};
use crate::protocol::{AuthResult, JoinRoomPayload, OutboundCommand};

/// Handshake progress of a chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    Idle,
    /// Transport dialled, waiting for the open frame.
    Connecting,
    /// `connect` sent, waiting for `onAuthResponse`.
    AwaitingAuth,
    /// `joinRoom` sent, waiting for the first room event.
    Joining,
    /// Room events are flowing.
    Active,
    /// Terminal: the session ended.
    Closed,
    /// Terminal: the server rejected authentication.
    Failed,
}

impl HandshakeState {
    /// Returns `true` for `Closed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingAuth => "awaiting-auth",
            Self::Joining => "joining",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Drives the handshake for one room.
#[derive(Debug)]
pub struct Handshake {
    room: String,
    credentials: SessionCredentials,
    state: HandshakeState,
}

impl Handshake {
    pub fn new(room: impl Into<String>, credentials: SessionCredentials) -> Self {
        Self {
            room: room.into(),
            credentials,
            state: HandshakeState::Idle,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// `Idle → Connecting`.
    pub fn begin(&mut self) {
        if self.state == HandshakeState::Idle {
            self.transition(HandshakeState::Connecting);
        }
    }

    /// Handle the transport open frame.
    ///
    /// In `Connecting`, moves to `AwaitingAuth` and returns the `connect`
    /// command. A repeated open frame in any other state is ignored.
    pub fn on_open(&mut self) -> Option<OutboundCommand> {
        if self.state != HandshakeState::Connecting {
            warn!(state = %self.state, "ignoring open frame");
            return None;
        }
        self.transition(HandshakeState::AwaitingAuth);
        Some(self.credentials.connect_command(&self.room))
    }

    /// Handle `onAuthResponse`.
    ///
    /// Returns the `joinRoom` command on success. Responses outside
    /// `AwaitingAuth` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::AuthenticationFailed`] with the raw result, and
    /// moves to `Failed`, if the result is not [`AuthResult::Ok`].
    pub fn on_auth_response(
        &mut self,
        result: AuthResult,
        raw: &str,
    ) -> Result<Option<OutboundCommand>> {
        if self.state != HandshakeState::AwaitingAuth {
            warn!(state = %self.state, raw, "ignoring unexpected auth response");
            return Ok(None);
        }
        if result != AuthResult::Ok {
            self.transition(HandshakeState::Failed);
            return Err(ChatError::AuthenticationFailed {
                result: raw.to_string(),
            });
        }
        self.transition(HandshakeState::Joining);
        Ok(Some(OutboundCommand::JoinRoom(JoinRoomPayload {
            room: self.room.clone(),
        })))
    }

    /// Record a dispatched room event. The first one confirms the join.
    pub fn on_event(&mut self) {
        if self.state == HandshakeState::Joining {
            info!(room = %self.room, "joined room");
            self.transition(HandshakeState::Active);
        }
    }

    /// Any non-terminal state `→ Closed`.
    pub fn close(&mut self) {
        if !self.state.is_terminal() {
            self.transition(HandshakeState::Closed);
        }
    }

    fn transition(&mut self, next: HandshakeState) {
        debug!(from = %self.state, to = %next, "handshake transition");
        self.state = next;
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

    fn handshake() -> Handshake {
        Handshake::new(
            "alice",
            SessionCredentials {
                chat_host: "wss://h".into(),
                username: "u".into(),
                password: "p".into(),
                room_password: "rp".into(),
            },
        )
    }

    #[test]
    fn happy_path() {
        let mut hs = handshake();
        assert_eq!(hs.state(), HandshakeState::Idle);

        hs.begin();
        assert_eq!(hs.state(), HandshakeState::Connecting);

        let connect = hs.on_open().unwrap();
        assert_eq!(connect.method(), "connect");
        assert_eq!(hs.state(), HandshakeState::AwaitingAuth);

        let join = hs.on_auth_response(AuthResult::Ok, "1").unwrap().unwrap();
        assert_eq!(
            join,
            OutboundCommand::JoinRoom(JoinRoomPayload {
                room: "alice".into()
            })
        );
        assert_eq!(hs.state(), HandshakeState::Joining);

        hs.on_event();
        assert_eq!(hs.state(), HandshakeState::Active);

        hs.close();
        assert_eq!(hs.state(), HandshakeState::Closed);
    }

    #[test]
    fn rejected_auth_fails_without_join() {
        let mut hs = handshake();
        hs.begin();
        hs.on_open();
        let err = hs.on_auth_response(AuthResult::Unknown, "0").unwrap_err();
        assert!(matches!(err, ChatError::AuthenticationFailed { result } if result == "0"));
        assert_eq!(hs.state(), HandshakeState::Failed);

        // Failed is terminal.
        hs.close();
        assert_eq!(hs.state(), HandshakeState::Failed);
    }

    #[test]
    fn auth_before_connect_is_ignored() {
        let mut hs = handshake();
        hs.begin();
        assert!(hs.on_auth_response(AuthResult::Ok, "1").unwrap().is_none());
        assert_eq!(hs.state(), HandshakeState::Connecting);
    }

    #[test]
    fn repeated_open_is_ignored() {
        let mut hs = handshake();
        hs.begin();
        assert!(hs.on_open().is_some());
        assert!(hs.on_open().is_none());
        assert_eq!(hs.state(), HandshakeState::AwaitingAuth);
    }

    #[test]
    fn open_before_begin_is_ignored() {
        let mut hs = handshake();
        assert!(hs.on_open().is_none());
        assert_eq!(hs.state(), HandshakeState::Idle);
    }

    #[test]
    fn events_before_join_do_not_activate() {
        let mut hs = handshake();
        hs.begin();
        hs.on_open();
        hs.on_event();
        assert_eq!(hs.state(), HandshakeState::AwaitingAuth);
    }

    #[test]
    fn display_names() {
        assert_eq!(HandshakeState::AwaitingAuth.to_string(), "awaiting-auth");
        assert!(HandshakeState::Failed.is_terminal());
        assert!(!HandshakeState::Joining.is_terminal());
    }
}
