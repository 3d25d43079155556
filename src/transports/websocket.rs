//! WebSocket transport using `tokio-tungstenite`.
//!
//! The chat server speaks SockJS over a plain WebSocket: every frame is a
//! text message. Both `ws://` and `wss://` are supported; TLS goes through
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream) with the webpki root
//! store.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), chaturbate_chat::ChatError> {
//! use chaturbate_chat::{Transport, WebSocketTransport};
//!
//! let mut ws = WebSocketTransport::connect("wss://chat.example.com/ws/123/abcdefgh/websocket").await?;
//! if let Some(Ok(frame)) = ws.recv().await {
//!     assert_eq!(frame, "o");
//! }
//! ws.close().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::transport::Transport;

/// The underlying WebSocket stream, exposed for [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] over a WebSocket connection.
///
/// Non-text frames are skipped: pings are answered by tungstenite, pongs
/// and binary frames are logged and dropped, and a close frame ends the
/// stream.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Dial `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Io`] if the URL is invalid or the connection
    /// cannot be established. An underlying I/O error keeps its
    /// [`ErrorKind`](std::io::ErrorKind); other failures map to
    /// [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, ChatError> {
        debug!(url = %url, "dialing chat server");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            ChatError::Io(std::io::Error::new(kind, e))
        })?;

        info!(url = %url, "chat server connection established");

        Ok(Self::from_stream(stream))
    }

    /// Dial `url`, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Timeout`] if the deadline elapses, or any error
    /// [`connect`](Self::connect) returns.
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Self, ChatError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| ChatError::Timeout)?
    }

    /// Wrap an already-established stream (custom TLS, proxies, headers).
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), ChatError> {
        if self.closed {
            return Err(ChatError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| ChatError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ChatError>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(ChatError::TransportReceive(e.to_string()))),
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                // tungstenite queues the pong itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                Message::Binary(data) => {
                    warn!(len = data.len(), "skipping binary WebSocket frame");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), ChatError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| ChatError::TransportSend(e.to_string()))
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
    use crate::codec::{self, Frame};
    use crate::protocol::{JoinRoomPayload, OutboundCommand};
    use tokio::net::TcpListener;

    /// Accept one WebSocket connection on a local port and hand it to `handler`.
    async fn serve_once<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}/0/abcdefgh/websocket")
    }

    #[tokio::test]
    async fn invalid_url_is_io_error() {
        let err = WebSocketTransport::connect("not-a-valid-url").await.unwrap_err();
        assert!(matches!(err, ChatError::Io(_)));
    }

    #[tokio::test]
    async fn refused_dial_is_io_error() {
        let err = WebSocketTransport::connect("ws://127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, ChatError::Io(_)));
    }

    #[tokio::test]
    async fn stalled_upgrade_hits_connect_timeout() {
        // Accepts TCP but never answers the WebSocket upgrade.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_tcp, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let err = WebSocketTransport::connect_with_timeout(
            &format!("ws://{addr}/0/abcdefgh/websocket"),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChatError::Timeout));
    }

    #[tokio::test]
    async fn recv_yields_sockjs_frames_in_order() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Text("o".into())).await.unwrap();
            ws.send(Message::Text("h".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "o");
        assert_eq!(transport.recv().await.unwrap().unwrap(), "h");
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn binary_frames_are_skipped() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("h".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "h");
    }

    #[tokio::test]
    async fn sent_command_arrives_as_one_text_frame() {
        let (tx, rx) = tokio::sync::oneshot::channel::<String>();
        let url = serve_once(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let _ = tx.send(text.to_string());
            }
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let cmd = OutboundCommand::JoinRoom(JoinRoomPayload {
            room: "alice".into(),
        });
        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.send(codec::encode(&cmd).unwrap()).await.unwrap();

        let received = rx.await.unwrap();
        let outer: Vec<String> = serde_json::from_str(&received).unwrap();
        let back: OutboundCommand = serde_json::from_str(&outer[0]).unwrap();
        assert_eq!(back, cmd);

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn data_frame_survives_transport() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Text(
                r#"a["{\"method\":\"onAuthResponse\",\"args\":[\"1\"]}"]"#.into(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let text = transport.recv().await.unwrap().unwrap();
        let Frame::Data(invocations) = codec::decode(&text).unwrap() else {
            panic!("expected data frame");
        };
        assert_eq!(invocations[0].method, "onAuthResponse");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_sends() {
        let url =
            serve_once(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        // Closing twice is fine.
        transport.close().await.unwrap();

        let err = transport.send("x".to_string()).await.unwrap_err();
        assert!(matches!(err, ChatError::TransportClosed));
    }
}
