//! # Read Messages Example
//!
//! Follows one room's chat and prints what happens:
//!
//! 1. Resolve anonymous credentials from the public room page
//! 2. Connect to the chat server and join the room
//! 3. Print chat messages, tips, notices, arrivals and departures
//! 4. Stop cleanly on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! cargo run --example read_messages -- <room>
//!
//! # With protocol-level logging:
//! RUST_LOG=chaturbate_chat=debug cargo run --example read_messages -- <room>
//! ```

use chaturbate_chat::{AuthOption, ChatSession};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let Some(room) = std::env::args().nth(1) else {
        eprintln!("usage: read_messages <room>");
        return Ok(());
    };

    // ── Session ─────────────────────────────────────────────────────
    let mut session = ChatSession::create(&room, AuthOption::Anonymous).await?;
    session
        .on_message(|msg| println!("[>] {}: {}", msg.author, msg.message))
        .on_tip(|user, amount| println!("[!] {user} tipped {amount}"))
        .on_notice(|lines| {
            for line in lines {
                println!("[*] {line}");
            }
        })
        .on_user_entry(|user| println!("[+] {user}"))
        .on_user_leave(|user| println!("[-] {user}"));

    // ── Ctrl+C ──────────────────────────────────────────────────────
    let stop = session.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, stopping");
            if let Err(e) = stop.stop() {
                tracing::warn!("stop failed: {e}");
            }
        }
    });

    tracing::info!("Joining {room}");
    session.start().await?;
    tracing::info!("Session ended");
    Ok(())
}
