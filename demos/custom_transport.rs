//! # Custom Transport Example
//!
//! Shows how to implement the [`Transport`] trait with an in-process
//! loopback channel, then drive a [`ChatSession`] over it with a scripted
//! "server". Useful for testing your callbacks without a live room, or for
//! adapting another I/O layer (a proxy, a recorded capture).
//!
//! ## Running
//!
//! ```sh
//! cargo run --example custom_transport
//! ```

use async_trait::async_trait;
use chaturbate_chat::{ChatConfig, ChatError, ChatSession, SessionCredentials, Transport};
use serde_json::json;
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: Define a channel-based "loopback" transport
// ─────────────────────────────────────────────────────────────────────

/// The client half: handed to [`ChatSession::run`].
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// The server half: read what the session sent, push frames to it.
pub struct LoopbackServer {
    pub rx: mpsc::UnboundedReceiver<String>,
    pub tx: mpsc::UnboundedSender<String>,
}

fn loopback_pair() -> (LoopbackTransport, LoopbackServer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();

    (
        LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        },
        LoopbackServer {
            rx: server_rx,
            tx: server_tx,
        },
    )
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Implement the Transport trait
// ─────────────────────────────────────────────────────────────────────

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), ChatError> {
        self.tx
            .send(message)
            .map_err(|e| ChatError::TransportSend(e.to_string()))
    }

    /// `None` once the server half is dropped.
    async fn recv(&mut self) -> Option<Result<String, ChatError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), ChatError> {
        self.rx.close();
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Script the server side
// ─────────────────────────────────────────────────────────────────────

/// Wrap one method invocation as a SockJS data frame.
fn data_frame(method: &str, args: serde_json::Value) -> String {
    let element = json!({ "method": method, "args": args }).to_string();
    format!("a{}", json!([element]))
}

/// Decode the method name of a command the session sent.
fn sent_method(wire: &str) -> Option<String> {
    let outer: Vec<String> = serde_json::from_str(wire).ok()?;
    let inner: serde_json::Value = serde_json::from_str(outer.first()?).ok()?;
    inner["method"].as_str().map(str::to_owned)
}

async fn fake_server(
    mut server: LoopbackServer,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    server.tx.send("o".into())?;

    // connect → auth OK
    if let Some(wire) = server.rx.recv().await {
        println!("[server] received {:?}", sent_method(&wire));
    }
    server.tx.send(data_frame("onAuthResponse", json!(["1"])))?;

    // joinRoom → some room traffic
    if let Some(wire) = server.rx.recv().await {
        println!("[server] received {:?}", sent_method(&wire));
    }
    let entry = json!({ "type": "room_entry", "username": "rustacean" }).to_string();
    let tip = json!({ "type": "tip_alert", "from_username": "rustacean", "amount": 25 }).to_string();
    let msg = json!({ "m": "hello from the loopback" }).to_string();
    server.tx.send("h".into())?;
    server.tx.send(data_frame("onNotify", json!([entry])))?;
    server.tx.send(data_frame("onRoomMsg", json!(["rustacean", msg])))?;
    server.tx.send(data_frame("onNotify", json!([tip])))?;

    // Dropping the server half closes the connection.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────
// Step 4: Run a session over it
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (transport, server) = loopback_pair();

    let credentials = SessionCredentials {
        chat_host: "wss://loopback.invalid/ws".into(),
        username: "__anonymous__demo".into(),
        password: "{}".into(),
        room_password: "demo".into(),
    };
    let mut session = ChatSession::with_credentials("demo_room", credentials, ChatConfig::new());
    session
        .on_user_entry(|user| println!("[client] {user} entered"))
        .on_message(|msg| println!("[client] {}: {}", msg.author, msg.message))
        .on_tip(|user, amount| println!("[client] {user} tipped {amount}"));

    let server_task = tokio::spawn(fake_server(server));
    session.run(transport).await?;

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => eprintln!("server script failed: {e}"),
        Err(e) => eprintln!("server task panicked: {e}"),
    }
    println!("[client] session ended in state {}", session.state());
    Ok(())
}
