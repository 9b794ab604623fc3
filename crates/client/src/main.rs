//! Kefu Console - operator console for the realtime client.
//!
//! Connects with settings from the environment, logs every client event, and
//! sends each stdin line as a `chat` frame. `/status` and `/who` report
//! session state; `/quit` closes cleanly.

use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kefu_client::{
    ClientConfig, ClientEvent, ConnectionTarget, EventKind, RealtimeClient, SendOutcome,
    TungsteniteConnector,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv_from_repo_root();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kefu_client=debug,kefu_console=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env().context("invalid client configuration")?;
    let target = ConnectionTarget::from_env().context("invalid connection target")?;
    tracing::info!(url = %target.base_url(), "Starting Kefu Console");

    let client = RealtimeClient::new(config, target, Arc::new(TungsteniteConnector::new()))?;
    client.on(EventKind::All, log_event);
    client.connect()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                match line {
                    "" => continue,
                    "/quit" => break,
                    "/status" => {
                        let snapshot = client.snapshot().await?;
                        println!(
                            "state={} attempts={} queued={} pending={} last_error={}",
                            snapshot.state,
                            snapshot.reconnect_attempts,
                            snapshot.queued_frames,
                            snapshot.pending_requests,
                            snapshot.last_error.as_deref().unwrap_or("-"),
                        );
                    }
                    "/who" => {
                        for user in client.presence().await? {
                            println!(
                                "{} {} {}",
                                user.user_id,
                                user.status,
                                user.name.as_deref().unwrap_or("")
                            );
                        }
                    }
                    content => match client.send("chat", json!({ "content": content })).await? {
                        SendOutcome::Sent => {}
                        outcome => tracing::warn!(?outcome, "Message not sent"),
                    },
                }
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}

fn log_event(event: &ClientEvent) {
    match event {
        ClientEvent::RawFrame(_) | ClientEvent::HeartbeatAck => {}
        ClientEvent::Chat(message) => {
            println!("[{}] {}", message.sender_id, message.content);
        }
        ClientEvent::System { message, .. } => println!("* {message}"),
        ClientEvent::UserUpdate(update) => {
            for user in &update.added {
                println!("+ {} ({})", user.user_id, user.status);
            }
            for user in &update.updated {
                println!("~ {} ({})", user.user_id, user.status);
            }
            for user in &update.removed {
                println!("- {}", user.user_id);
            }
        }
        other => tracing::debug!(event = ?other, "Client event"),
    }
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}
