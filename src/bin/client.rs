//! Demo realtime client for the Chautari backend.
//!
//! Connects to the realtime endpoint, prints chat messages and in-app
//! notifications as they arrive, and sends chat messages typed on stdin
//! to a game room. Reconnects automatically on disconnection (max 5
//! attempts with exponential backoff).
//!
//! Run with:
//! ```not_rust
//! cargo run --bin client -- --name Asha --game-id 42
//! cargo run --bin client -- -n Asha -g 42 -u ws://localhost:8080/ws -t <jwt>
//! ```

use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;

use chautari::common::logger::setup_logger;
use chautari::common::time::timestamp_to_rfc3339;
use chautari::config::RealtimeConfig;
use chautari::protocol::{ChatMessagePayload, EventKind};
use chautari::service::{EVENT_IN_APP_NOTIFICATION, RealtimeService};

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "Chautari realtime demo client", long_about = None)]
struct Args {
    /// Display name used for outgoing chat messages
    #[arg(short = 'n', long)]
    name: String,

    /// Game room to join
    #[arg(short = 'g', long)]
    game_id: String,

    /// WebSocket endpoint URL (overrides CHAUTARI_WS_URL)
    #[arg(short = 'u', long)]
    url: Option<String>,

    /// Bearer token sent as the first frame after connect
    #[arg(short = 't', long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    let mut config = RealtimeConfig::from_env();
    if let Some(url) = args.url {
        config.ws_url = url;
    }

    let service = RealtimeService::new(config);
    service.initialize();
    service.set_auth_token(args.token);

    // Print incoming chat messages and notification-store additions.
    service.dispatcher().subscribe(EventKind::ChatMessage, |payload| {
        if let Ok(msg) = serde_json::from_value::<ChatMessagePayload>(payload.clone()) {
            println!(
                "[{}] {}: {}",
                timestamp_to_rfc3339(msg.sent_at),
                msg.sender_name,
                msg.content
            );
        }
    });
    service.dispatcher().subscribe(
        EventKind::Other(EVENT_IN_APP_NOTIFICATION.to_string()),
        |payload| {
            println!(
                "* {} - {}",
                payload["title"].as_str().unwrap_or("?"),
                payload["message"].as_str().unwrap_or("")
            );
        },
    );

    if let Err(e) = service.connect().await {
        tracing::warn!("Initial connect failed, retrying in background: {}", e);
    }

    println!(
        "\nYou are '{}' in game {}. Type messages and press Enter to send. Press Ctrl+C to exit.\n",
        args.name, args.game_id
    );

    // Rustyline is synchronous; run it on a blocking thread feeding a channel.
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();
    let prompt_name = args.name.clone();
    let _readline_handle = std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Failed to initialize readline: {}", e);
                return;
            }
        };

        let prompt = format!("{}> ", prompt_name);

        loop {
            match rl.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        rl.add_history_entry(line).ok();
                        if input_tx.send(line.to_string()).is_err() {
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            line = input_rx.recv() => match line {
                Some(line) => service.send_chat_message(&args.game_id, &args.name, &line),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    service.shutdown().await;
}
