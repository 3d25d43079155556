#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Credential resolution against a mocked room page server.

use chaturbate_chat::{AuthOption, ChatConfig, ChatError, ChatSession, CredentialResolver};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn room_page(host: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<body>
<script type="text/javascript">
    var initializer = {{
        room: 'somebody',
        wschat_host: '{host}',
        room_password: 'c0ffee',
        username: '__anonymous__Ha2BqyOkDLxVB',
        password: '{{"t": 1601229023, "sig": "abc"}}',
        chat_rules: 'be nice',
    }};
</script>
</body>
</html>"#
    )
}

async fn serve_room(server: &MockServer, room: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/{room}/")))
        .respond_with(response)
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn resolves_credentials_from_room_page() {
    let server = MockServer::start().await;
    serve_room(
        &server,
        "somebody",
        ResponseTemplate::new(200).set_body_string(room_page("https://chatw-7.example.com/ws")),
    )
    .await;

    let creds = CredentialResolver::new(server.uri())
        .resolve("somebody")
        .await
        .unwrap();

    assert_eq!(creds.chat_host, "wss://chatw-7.example.com/ws");
    assert_eq!(creds.username, "__anonymous__Ha2BqyOkDLxVB");
    assert_eq!(creds.password, r#"{"t": 1601229023, "sig": "abc"}"#);
    assert_eq!(creds.room_password, "c0ffee");
}

#[tokio::test]
async fn base_url_trailing_slash_is_tolerated() {
    let server = MockServer::start().await;
    serve_room(
        &server,
        "somebody",
        ResponseTemplate::new(200).set_body_string(room_page("http://plain.example.com/ws")),
    )
    .await;

    let creds = CredentialResolver::new(format!("{}/", server.uri()))
        .resolve("somebody")
        .await
        .unwrap();
    assert_eq!(creds.chat_host, "ws://plain.example.com/ws");
}

#[tokio::test]
async fn offline_room_is_room_not_connected() {
    let server = MockServer::start().await;
    serve_room(
        &server,
        "sleeping",
        ResponseTemplate::new(200).set_body_string(room_page("")),
    )
    .await;

    let err = CredentialResolver::new(server.uri())
        .resolve("sleeping")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::RoomNotConnected { ref room } if room == "sleeping"));
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let server = MockServer::start().await;
    serve_room(&server, "missing", ResponseTemplate::new(404)).await;

    let err = CredentialResolver::new(server.uri())
        .resolve("missing")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::UpstreamStatus { status: 404 }));
}

#[tokio::test]
async fn page_without_credentials_is_parse_error() {
    let server = MockServer::start().await;
    serve_room(
        &server,
        "banned",
        ResponseTemplate::new(200).set_body_string("<html><body>This room has been banned.</body></html>"),
    )
    .await;

    let err = CredentialResolver::new(server.uri())
        .resolve("banned")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ChatError::Parse {
            field: "wschat_host"
        }
    ));
}

#[tokio::test]
async fn unreachable_host_is_fetch_error() {
    let err = CredentialResolver::new("http://127.0.0.1:1")
        .resolve("anyone")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Fetch(_)));
}

#[tokio::test]
async fn create_with_config_resolves_through_base_url() {
    let server = MockServer::start().await;
    serve_room(
        &server,
        "somebody",
        ResponseTemplate::new(200).set_body_string(room_page("https://chatw-7.example.com/ws")),
    )
    .await;

    let session = ChatSession::create_with_config(
        "somebody",
        AuthOption::Anonymous,
        ChatConfig::new().with_base_url(server.uri()),
    )
    .await
    .unwrap();

    assert_eq!(session.room(), "somebody");
    assert_eq!(session.credentials().chat_host, "wss://chatw-7.example.com/ws");
    assert!(!session.is_connected());
}

#[tokio::test]
async fn create_fails_when_room_is_offline() {
    let server = MockServer::start().await;
    serve_room(
        &server,
        "sleeping",
        ResponseTemplate::new(200).set_body_string(room_page("")),
    )
    .await;

    let err = ChatSession::create_with_config(
        "sleeping",
        AuthOption::Anonymous,
        ChatConfig::new().with_base_url(server.uri()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ChatError::RoomNotConnected { .. }));
}
