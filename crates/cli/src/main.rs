use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "askbar")]
#[command(about = "askbar CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the gateway (HTTP + WebSocket control plane for tab UIs).
    Gateway {
        /// Config file path (default: ASKBAR_CONFIG_PATH or ~/.askbar/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// WebSocket and HTTP port (default from config or 15252)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Ask one question through the gateway, acting as a tab UI.
    Ask {
        /// The question to send.
        question: String,

        /// Tab id to attach to.
        #[arg(long, default_value_t = 1)]
        tab: u64,

        /// Config file path (default: ASKBAR_CONFIG_PATH or ~/.askbar/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("askbar {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Ask { question, tab, config }) => {
            if let Err(e) = run_ask(config, tab, question).await {
                eprintln!("ask failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, _path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{}",
        config.gateway.bind,
        config.gateway.port
    );
    lib::gateway::run_gateway(config).await
}

/// Connect to the gateway as if we were a tab's on-page UI: read the
/// connect/auth frames, send the question, print answer parts until done.
async fn run_ask(
    config_path: Option<std::path::PathBuf>,
    tab: u64,
    question: String,
) -> Result<(), String> {
    let (config, _) = lib::config::load_config(config_path).map_err(|e| e.to_string())?;
    let ws_url = format!(
        "ws://{}:{}/ws?tab={}",
        config.gateway.bind.trim(),
        config.gateway.port,
        tab
    );

    let (mut ws, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .map_err(|e| format!("connecting to gateway at {}: {}", ws_url, e))?;

    let frame = serde_json::json!({ "question": question });
    ws.send(Message::Text(frame.to_string()))
        .await
        .map_err(|e| e.to_string())?;

    let mut answer = String::new();
    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| e.to_string())?;
        let Message::Text(text) = msg else { continue };
        let Ok(frame) = serde_json::from_str::<serde_json::Value>(&text) else {
            continue;
        };

        if let Some(error) = frame.get("error").and_then(|v| v.as_str()) {
            return Err(error.to_string());
        }
        if frame.get("type").and_then(|v| v.as_str()) == Some("meta")
            && frame.get("status").and_then(|v| v.as_str()) == Some("unauthorized")
        {
            return Err(
                "unauthorized: log in to the backend in your browser and retry".to_string(),
            );
        }
        if frame.get("type").and_then(|v| v.as_str()) == Some("status")
            && frame.get("status").and_then(|v| v.as_str()) == Some("done")
        {
            break;
        }
        // answer deltas carry the accumulated text; keep the latest
        if frame.get("type").is_none() {
            if let Some(part) = frame
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.get("parts"))
                .and_then(|p| p.get(0))
                .and_then(|v| v.as_str())
            {
                answer = part.to_string();
            }
        }
    }

    if answer.is_empty() {
        return Err("no answer received".to_string());
    }
    println!("{}", answer.trim());
    Ok(())
}
