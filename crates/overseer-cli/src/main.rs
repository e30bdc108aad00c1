//! # overseer
//!
//! Command-line consumer of the gateway client: lists sessions, tails
//! reconciled state changes and issues raw RPCs.

#![deny(unsafe_code)]

mod render;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use overseer_client::GatewayClient;
use overseer_settings::OverseerSettings;
use tokio::sync::broadcast::error::RecvError;

/// Watch agent sessions on a gateway.
#[derive(Parser, Debug)]
#[command(name = "overseer", about = "Watch agent sessions on a gateway", version)]
struct Cli {
    /// Gateway WebSocket URL (overrides settings).
    #[arg(long)]
    url: Option<String>,

    /// Gateway token (overrides settings).
    #[arg(long, env = "OVERSEER_GATEWAY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Settings file (default `~/.overseer/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter (overrides settings; `RUST_LOG` wins over both).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every known session.
    Sessions,
    /// Print one line per state change until Ctrl-C.
    Watch,
    /// Issue a raw RPC and pretty-print its payload.
    Call {
        /// Method name, e.g. `status`.
        method: String,
        /// Params as a JSON document.
        params: Option<String>,
    },
}

impl Cli {
    fn load_settings(&self) -> Result<OverseerSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(overseer_settings::settings_path);
        let mut settings = overseer_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(ref url) = self.url {
            settings.gateway.url.clone_from(url);
        }
        if self.token.is_some() {
            settings.gateway.token.clone_from(&self.token);
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    if args.json_logs {
        overseer_logging::init_json_subscriber(&settings.logging.level);
    } else {
        overseer_logging::init_subscriber(&settings.logging.level);
    }

    let client = GatewayClient::from_settings(&settings);
    let hello = client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", settings.gateway.url))?;
    tracing::info!(
        server = %hello.server.version,
        methods = hello.features.methods.len(),
        "connected"
    );

    let outcome = match args.command {
        Command::Sessions => sessions(&client).await,
        Command::Watch => watch(&client).await,
        Command::Call { method, params } => call(&client, &method, params.as_deref()).await,
    };
    client.disconnect();
    outcome
}

async fn sessions(client: &GatewayClient) -> Result<()> {
    let _ = client
        .refresh_sessions()
        .await
        .context("Failed to list sessions")?;
    for session in client.state().sessions() {
        println!("{}", render::session_line(&session));
    }
    Ok(())
}

async fn watch(client: &GatewayClient) -> Result<()> {
    let mut changes = client.state().subscribe();
    let _status = client.on_connection_change(|status| eprintln!("[connection] {status}"));
    let _ = client
        .refresh_sessions()
        .await
        .context("Failed to list sessions")?;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                break;
            }
            change = changes.recv() => match change {
                Ok(change) => {
                    if let Some(line) = render::change_line(client.state(), &change) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "change stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
    Ok(())
}

async fn call(client: &GatewayClient, method: &str, params: Option<&str>) -> Result<()> {
    let params = params
        .map(serde_json::from_str)
        .transpose()
        .context("params must be a JSON document")?;
    let payload = client
        .request(method, params)
        .await
        .with_context(|| format!("{method} failed"))?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
