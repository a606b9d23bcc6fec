//! Rocket.Chat connector CLI entry point.
//!
//! Provides `start`, `check`, and `config` subcommands for running the
//! connector, verifying credentials once, or printing the effective config.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use rocketchat_connector::config::{self, Config};
use rocketchat_connector::logging;
use rocketchat_connector::rocketchat::{ConnectorState, Delivery, RocketChatConnector};
use rocketchat_connector::types::Message;

/// Capacity of the channel between the poll loop and the event handler.
const EVENT_BUFFER: usize = 64;

/// Rocket.Chat connector: polls a room and relays messages.
#[derive(Parser)]
#[command(name = "rocketchat-connector", version, about)]
struct Cli {
    /// Config file (default: `$ROCKETCHAT_CONFIG_PATH` or `~/.rocketchat-connector/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Connect and relay messages until Ctrl-C.
    Start {
        /// Reply to every inbound message with its own text.
        #[arg(long)]
        echo: bool,
    },
    /// Log in once and print the account identity.
    Check,
    /// Print the effective configuration with secrets redacted.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let path = match cli.config {
        Some(path) => path,
        None => config::config_path_with(|key| std::env::var(key).ok())?,
    };
    let config = config::load_config(&path)?;

    match cli.command {
        Command::Start { echo } => handle_start(config, echo).await,
        Command::Check => handle_check(config).await,
        Command::Config => {
            println!("{config:#?}");
            Ok(())
        }
    }
}

/// Run the connector until Ctrl-C or until the poll loop dies.
async fn handle_start(config: Config, echo: bool) -> anyhow::Result<()> {
    let _logging_guard = match &config.logging.dir {
        Some(dir) => Some(logging::init_production(dir, &config.logging.level)?),
        None => {
            logging::init_cli(&config.logging.level);
            None
        }
    };

    let (event_tx, mut event_rx) = mpsc::channel::<Message>(EVENT_BUFFER);
    let connector = Arc::new(RocketChatConnector::new(
        &config.connector,
        Arc::new(event_tx),
    ));
    if connector.state() == ConnectorState::Inert {
        anyhow::bail!("Rocket.Chat connector unavailable: set token and user-id");
    }

    let identity = connector
        .connect()
        .await
        .context("failed to connect to Rocket.Chat")?;
    info!(username = %identity.username, "Rocket.Chat connector ready");

    let mut listener = {
        let connector = Arc::clone(&connector);
        tokio::spawn(async move { connector.listen().await })
    };

    let handler = {
        let connector = Arc::clone(&connector);
        let own_id = identity.user_id.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                info!(
                    user = %event.user,
                    target = %event.target,
                    text = %event.text,
                    "inbound message"
                );
                // Our own echoes come back through the poll loop.
                if !echo || event.user_id.as_deref() == Some(own_id.as_str()) {
                    continue;
                }
                let reply = event.reply(event.text.clone());
                if connector.respond(&reply).await != Delivery::Sent {
                    warn!(target = %event.target, "echo reply not delivered");
                }
            }
        })
    };

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("received shutdown signal, disconnecting");
            Ok(())
        }
        joined = &mut listener => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("Rocket.Chat poll loop stopped")),
            Err(e) => Err(anyhow::anyhow!("listener task failed: {e}")),
        },
    };

    connector.disconnect().await;
    handler.abort();
    if !listener.is_finished() {
        listener.abort();
    }
    outcome
}

/// Log in once and report who we are.
async fn handle_check(config: Config) -> anyhow::Result<()> {
    logging::init_cli(&config.logging.level);

    let (event_tx, _event_rx) = mpsc::channel::<Message>(1);
    let connector = RocketChatConnector::new(&config.connector, Arc::new(event_tx));
    let result = connector.connect().await;
    connector.disconnect().await;

    let identity = result.context("Rocket.Chat login failed")?;
    println!(
        "logged in to {} as {} ({})",
        connector
            .session()
            .map(|s| s.url(""))
            .unwrap_or_default()
            .trim_end_matches('/'),
        identity.username,
        identity.user_id
    );
    Ok(())
}
