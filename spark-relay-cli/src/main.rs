//! CLI entry point for spark-relay

mod client;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use futures::StreamExt;
use spark_relay_core::config::{Config, ConfigLoader};
use spark_relay_core::logging::init_logging;
use spark_relay_core::utils::mask_secret;
use spark_relay_core::{ChannelSink, ConversationTurn, RelayEvent, Role};
use spark_relay_manager::{run_server, AppState, StreamRelay};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use client::ApiClient;

#[derive(Parser)]
#[command(name = "spark-relay")]
#[command(about = "Relay a streaming chat model WebSocket to Server-Sent Events")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve {
        /// Address to bind (overrides gateway.host)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides gateway.port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Ask a question directly against the upstream model
    Ask {
        question: String,
    },
    /// Ask a question through a running gateway
    Chat {
        question: String,
        /// Gateway API base URL
        #[arg(long)]
        url: Option<String>,
    },
    /// Show the gateway's conversation history
    History {
        #[arg(long)]
        url: Option<String>,
    },
    /// Clear the gateway's conversation history
    ClearHistory {
        #[arg(long)]
        url: Option<String>,
    },
    /// Check that the upstream host is reachable
    Check,
    /// Show the effective configuration
    Config {
        /// Write a default config.json if none exists yet
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_loader = if let Some(dir) = cli.config_dir {
        ConfigLoader::with_dir(dir)
    } else {
        ConfigLoader::new()
    };

    match cli.command {
        Commands::Serve { host, port } => run_serve(&config_loader, host, port).await?,
        Commands::Ask { question } => {
            init_console_logging();
            run_ask(&config_loader, &question).await?;
        }
        Commands::Chat { question, url } => {
            init_console_logging();
            run_chat(url, &question).await?;
        }
        Commands::History { url } => {
            init_console_logging();
            let turns = ApiClient::new(url).history().await?;
            print_history(&turns);
        }
        Commands::ClearHistory { url } => {
            init_console_logging();
            ApiClient::new(url).clear_history().await?;
            println!("{}", style("History cleared").green());
        }
        Commands::Check => {
            init_console_logging();
            run_check(&config_loader).await?;
        }
        Commands::Config { init } => {
            init_console_logging();
            run_config(&config_loader, init)?;
        }
    }

    Ok(())
}

/// Warn-level logging to stderr, so stdout stays free for replies
fn init_console_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run_serve(loader: &ConfigLoader, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = loader.load()?;
    let _guard = init_logging(&config.logging);

    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }
    if let Err(e) = config.spark.require_credentials() {
        warn!("{}; every chatStream request will fail until this is fixed", e);
    }

    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port).parse()?;
    println!("{}", style("Starting spark-relay gateway...").bold().cyan());
    println!("Upstream: {}", config.spark.host_url);
    println!("Listening: http://{}/SparkAPI", addr);

    let state = AppState::from_config(config);
    run_server(state, addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Ctrl-C received");
    })
    .await
}

async fn run_ask(loader: &ConfigLoader, question: &str) -> Result<()> {
    let config = loader.load()?;
    config.spark.require_credentials()?;

    let idle_timeout = Duration::from_secs(config.gateway.sse_timeout_secs);
    let relay = StreamRelay::from_config(&config);
    let stream_id = uuid::Uuid::new_v4().to_string();
    let (sink, receiver) = ChannelSink::new(64);

    let _session = relay.start(question, &stream_id, Arc::new(sink)).await?;

    let mut events = Box::pin(receiver.into_stream(idle_timeout));
    while let Some(event) = events.next().await {
        if !print_event(&event)? {
            return Ok(());
        }
    }
    anyhow::bail!("no reply within {:?}", idle_timeout)
}

async fn run_chat(url: Option<String>, question: &str) -> Result<()> {
    let client = ApiClient::new(url);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let request = tokio::spawn({
        let question = question.to_string();
        async move { client.chat(&question, event_tx).await }
    });

    while let Some(event) = event_rx.recv().await {
        if !print_event(&event)? {
            break;
        }
    }
    request.await??;
    Ok(())
}

/// Print one event; returns whether more events are expected.
fn print_event(event: &RelayEvent) -> Result<bool> {
    match event {
        RelayEvent::Message { content } => {
            print!("{}", content);
            std::io::stdout().flush()?;
            Ok(true)
        }
        RelayEvent::Complete => {
            println!();
            Ok(false)
        }
        RelayEvent::Error { message } => {
            println!();
            anyhow::bail!("{}", message)
        }
    }
}

fn print_history(turns: &[ConversationTurn]) {
    if turns.is_empty() {
        println!("{}", style("No conversation history").dim());
        return;
    }
    for turn in turns {
        let label = match turn.role {
            Role::User => style(turn.role.as_str()).bold().cyan(),
            Role::Assistant => style(turn.role.as_str()).bold().green(),
        };
        println!("{}: {}", label, turn.content);
    }
}

async fn run_check(loader: &ConfigLoader) -> Result<()> {
    let config = loader.load()?;
    let timeout = Duration::from_secs(config.spark.connect_timeout_secs);

    println!("Checking {} ...", config.spark.host_url);
    if spark_relay_providers::test_connection(&config.spark.host_url, timeout).await {
        println!("{}", style("Upstream reachable").green());
        Ok(())
    } else {
        anyhow::bail!("upstream host {} is not reachable", config.spark.host_url)
    }
}

fn run_config(loader: &ConfigLoader, init: bool) -> Result<()> {
    let config_path = loader.config_dir().join("config.json");
    if init {
        if config_path.exists() {
            println!("Config already exists at {}", config_path.display());
        } else {
            loader.save(&Config::default())?;
            println!("{} {}", style("Wrote").green(), config_path.display());
        }
    }

    let config = loader.load()?;
    println!("{}", style("spark-relay configuration").bold().cyan());
    println!("  Config directory: {}", loader.config_dir().display());
    println!();
    println!("{}", serde_json::to_string_pretty(&masked(config))?);
    Ok(())
}

fn masked(mut config: Config) -> Config {
    config.spark.api_key = mask_secret(&config.spark.api_key);
    config.spark.api_secret = mask_secret(&config.spark.api_secret);
    config
}
