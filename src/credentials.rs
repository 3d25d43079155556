//! Session credential acquisition.
//!
//! Anonymous sessions are authorized by four values embedded in the public
//! room page as single-quoted assignments:
//!
//! ```text
//! wschat_host: 'https://chatw-12.stream.highwebmedia.com/ws',
//! username: '__anonymous__Ha2BqyOkDLxVB',
//! password: '{"t": 1601229023, ...}',
//! room_password: '7ab1a1a7d7cff79e45a0d8bc4a5d8d57',
//! ```
//!
//! [`CredentialResolver`] fetches the page and [`parse_credentials`] extracts
//! the values. An empty `wschat_host` means the broadcaster is offline.

use std::fmt;
use std::sync::LazyLock;

use rand::distr::Alphanumeric;
use rand::Rng;
use regex::Regex;
use tracing::debug;

use crate::error::{ChatError, Result};
use crate::protocol::{ConnectPayload, OutboundCommand};

static WSCHAT_HOST: LazyLock<Regex> = LazyLock::new(|| field_pattern("wschat_host"));
static USERNAME: LazyLock<Regex> = LazyLock::new(|| field_pattern("username"));
static PASSWORD: LazyLock<Regex> = LazyLock::new(|| field_pattern("password"));
static ROOM_PASSWORD: LazyLock<Regex> = LazyLock::new(|| field_pattern("room_password"));

/// Default host serving room pages.
pub const DEFAULT_BASE_URL: &str = "https://chaturbate.com";

/// Credentials for one chat session. Immutable once resolved.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    /// Chat server base URL, already in `wss://` form.
    pub chat_host: String,
    pub username: String,
    pub password: String,
    pub room_password: String,
}

impl SessionCredentials {
    /// Build the WebSocket endpoint for a new connection.
    ///
    /// The chat server expects a SockJS-style path with a random server
    /// number and session id: `<host>/<0..1000>/<8 chars>/websocket`.
    pub fn websocket_url(&self) -> String {
        let mut rng = rand::rng();
        let server: u16 = rng.random_range(0..1000);
        let session: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        format!(
            "{}/{server}/{session}/websocket",
            self.chat_host.trim_end_matches('/')
        )
    }

    /// The `connect` command that authenticates these credentials for `room`.
    pub fn connect_command(&self, room: &str) -> OutboundCommand {
        OutboundCommand::Connect(ConnectPayload {
            user: self.username.clone(),
            password: self.password.clone(),
            room: room.to_string(),
            room_password: self.room_password.clone(),
        })
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("chat_host", &self.chat_host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("room_password", &"<redacted>")
            .finish()
    }
}

/// Fetches room pages and extracts [`SessionCredentials`].
///
/// No retries are attempted; callers own their retry policy.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    client: reqwest::Client,
    base_url: String,
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl CredentialResolver {
    /// Create a resolver for room pages served from `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// The canonical page URL of `room`.
    pub fn room_url(&self, room: &str) -> String {
        format!("{}/{room}/", self.base_url.trim_end_matches('/'))
    }

    /// Fetch the room page and extract session credentials.
    ///
    /// # Errors
    ///
    /// - [`ChatError::Fetch`] on network failure or an unreadable body
    /// - [`ChatError::UpstreamStatus`] on a non-success status
    /// - [`ChatError::Parse`] if a field is missing from the page
    /// - [`ChatError::RoomNotConnected`] if the broadcaster is offline
    pub async fn resolve(&self, room: &str) -> Result<SessionCredentials> {
        let url = self.room_url(room);
        debug!(url = %url, "fetching room page");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChatError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::UpstreamStatus {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ChatError::Fetch(e.to_string()))?;

        let credentials = parse_credentials(room, &body)?;
        debug!(room, chat_host = %credentials.chat_host, "resolved session credentials");
        Ok(credentials)
    }
}

/// Extract session credentials from a room page body.
///
/// # Errors
///
/// Returns [`ChatError::Parse`] naming the first field that is missing, or
/// [`ChatError::RoomNotConnected`] if the chat host is empty.
pub fn parse_credentials(room: &str, body: &str) -> Result<SessionCredentials> {
    let chat_host = extract_field(body, &WSCHAT_HOST, "wschat_host")?;
    let username = extract_field(body, &USERNAME, "username")?;
    let password = extract_field(body, &PASSWORD, "password")?;
    let room_password = extract_field(body, &ROOM_PASSWORD, "room_password")?;

    if chat_host.is_empty() {
        return Err(ChatError::RoomNotConnected {
            room: room.to_string(),
        });
    }

    Ok(SessionCredentials {
        chat_host: websocket_scheme(chat_host),
        username: username.to_string(),
        password: password.to_string(),
        room_password: room_password.to_string(),
    })
}

/// Matches `<field>: '<value>'`.
///
/// The leading word boundary keeps `password` from matching inside
/// `room_password`.
#[allow(clippy::expect_used)]
fn field_pattern(field: &str) -> Regex {
    Regex::new(&format!(r"\b{}:\s*'([^']*)'", regex::escape(field)))
        .expect("credential field pattern is a valid regex")
}

fn extract_field<'a>(body: &'a str, pattern: &Regex, field: &'static str) -> Result<&'a str> {
    pattern
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or(ChatError::Parse { field })
}

fn websocket_scheme(host: &str) -> String {
    if let Some(rest) = host.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = host.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        host.to_string()
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

    fn page(host: &str) -> String {
        format!(
            r#"<script>
            window.initializeRoom({{
                wschat_host: '{host}',
                room_password: 'rp-123',
                username: '__anonymous__XyZ',
                password: '{{"t": 1601229023}}',
                is_age_verified: false,
            }});
            </script>"#
        )
    }

    #[test]
    fn parses_all_four_fields() {
        let creds = parse_credentials("alice", &page("https://chatw-12.example.com/ws")).unwrap();
        assert_eq!(creds.chat_host, "wss://chatw-12.example.com/ws");
        assert_eq!(creds.username, "__anonymous__XyZ");
        assert_eq!(creds.password, r#"{"t": 1601229023}"#);
        assert_eq!(creds.room_password, "rp-123");
    }

    #[test]
    fn empty_host_means_room_offline() {
        let err = parse_credentials("alice", &page("")).unwrap_err();
        assert!(matches!(err, ChatError::RoomNotConnected { room } if room == "alice"));
    }

    #[test]
    fn missing_field_is_parse_error() {
        let body = "wschat_host: 'https://h', username: 'u', room_password: 'rp',";
        let err = parse_credentials("alice", body).unwrap_err();
        assert!(matches!(err, ChatError::Parse { field: "password" }));

        let err = parse_credentials("alice", "<html></html>").unwrap_err();
        assert!(matches!(err, ChatError::Parse { field: "wschat_host" }));
    }

    #[test]
    fn prefixed_names_do_not_match_shorter_fields() {
        let body = "wschat_host: 'https://h', from_username: 'x', room_password: 'rp',";
        let err = parse_credentials("alice", body).unwrap_err();
        assert!(matches!(err, ChatError::Parse { field: "username" }));
    }

    #[test]
    fn field_patterns_capture_their_own_value() {
        let body = "room_password: 'rp', password: 'pw', username: 'u', wschat_host: 'h',";
        for (pattern, expected) in [
            (&*WSCHAT_HOST, "h"),
            (&*USERNAME, "u"),
            (&*PASSWORD, "pw"),
            (&*ROOM_PASSWORD, "rp"),
        ] {
            assert_eq!(extract_field(body, pattern, "field").unwrap(), expected);
        }
    }

    #[test]
    fn scheme_normalization() {
        assert_eq!(websocket_scheme("https://a/b"), "wss://a/b");
        assert_eq!(websocket_scheme("http://a"), "ws://a");
        assert_eq!(websocket_scheme("wss://a"), "wss://a");
    }

    #[test]
    fn websocket_url_has_sockjs_path() {
        let creds = parse_credentials("alice", &page("https://h.example.com/ws/")).unwrap();
        let url = creds.websocket_url();
        let rest = url.strip_prefix("wss://h.example.com/ws/").unwrap();
        let parts: Vec<&str> = rest.split('/').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].parse::<u16>().unwrap() < 1000);
        assert_eq!(parts[1].len(), 8);
        assert!(parts[1]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_eq!(parts[2], "websocket");
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds = parse_credentials("alice", &page("https://h")).unwrap();
        let debug = format!("{creds:?}");
        assert!(debug.contains("__anonymous__XyZ"));
        assert!(!debug.contains("rp-123"));
        assert!(!debug.contains("1601229023"));
    }

    #[test]
    fn room_url_joins_base_and_room() {
        let resolver = CredentialResolver::new("https://example.com/");
        assert_eq!(resolver.room_url("alice"), "https://example.com/alice/");
    }

    #[test]
    fn connect_command_carries_room_and_tokens() {
        let creds = parse_credentials("alice", &page("https://h")).unwrap();
        let OutboundCommand::Connect(payload) = creds.connect_command("alice") else {
            panic!("expected connect");
        };
        assert_eq!(payload.room, "alice");
        assert_eq!(payload.user, "__anonymous__XyZ");
        assert_eq!(payload.room_password, "rp-123");
    }
}
