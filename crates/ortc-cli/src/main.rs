//! ORTC CLI - Command-line client for ORTC realtime messaging
//!
//! Listen on channels, publish over the socket or over REST, and resolve
//! cluster URLs from the command line.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use ortc_client::{ClientEvent, ClusterResolver, MessageClient, OrtcClient, RestMessage};
use ortc_core::{MAX_CHANNEL_SIZE, MAX_CONNECTION_METADATA_SIZE, MAX_MESSAGE_SIZE};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod settings;

use settings::{Overrides, Settings};

/// ORTC - realtime publish/subscribe messaging
#[derive(Parser)]
#[command(name = "ortc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file path (defaults to <config dir>/ortc/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Server URL
    #[arg(long, global = true, env = "ORTC_URL")]
    url: Option<String>,

    /// Balancer URL (cluster mode)
    #[arg(long, global = true, env = "ORTC_CLUSTER_URL")]
    cluster_url: Option<String>,

    /// Application key
    #[arg(long, global = true, env = "ORTC_APP_KEY")]
    app_key: Option<String>,

    /// Authentication token
    #[arg(long, global = true, env = "ORTC_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// Seconds to wait for the server to validate the session
    #[arg(long, global = true, default_value = "15")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to channels and print messages until Ctrl+C
    Listen {
        /// Channel to subscribe to (repeatable)
        #[arg(short, long, required = true)]
        channel: Vec<String>,

        /// Print each message as a JSON line
        #[arg(long)]
        json: bool,
    },

    /// Publish a message over the socket
    Send {
        #[arg(short, long)]
        channel: String,

        #[arg(short, long)]
        message: String,
    },

    /// Publish on behalf of another application key
    SendProxy {
        /// Application key to publish as
        #[arg(long)]
        target_app_key: String,

        /// Private key of the target application
        #[arg(long, env = "ORTC_PRIVATE_KEY", hide_env_values = true)]
        private_key: Option<String>,

        #[arg(short, long)]
        channel: String,

        #[arg(short, long)]
        message: String,
    },

    /// Print the server URL the balancer assigns
    Resolve,

    /// Publish a message through the REST endpoint
    Post {
        /// Private key of the application
        #[arg(long, env = "ORTC_PRIVATE_KEY", hide_env_values = true)]
        private_key: Option<String>,

        #[arg(short, long)]
        channel: String,

        #[arg(short, long)]
        message: String,
    },

    /// Show version and protocol limits
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli.log_level, cli.json_logs)?;

    let mut settings = Settings::load_or_default(cli.config.as_deref())?;
    let private_key = match &cli.command {
        Commands::SendProxy { private_key, .. } | Commands::Post { private_key, .. } => {
            private_key.clone()
        }
        _ => None,
    };
    settings.apply(Overrides {
        url: cli.url,
        cluster_url: cli.cluster_url,
        app_key: cli.app_key,
        auth_token: cli.auth_token,
        private_key,
    });
    let timeout = Duration::from_secs(cli.timeout);

    // Handle Ctrl+C
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                let _ = shutdown_tx.send(()).await;
            }
            Err(e) => warn!("Failed to listen for ctrl+c: {}", e),
        }
    });

    match cli.command {
        Commands::Listen { channel, json } => {
            listen(&settings, timeout, &channel, json, &mut shutdown_rx).await?;
        }

        Commands::Send { channel, message } => {
            let client = connect(&settings, timeout).await?;
            client.send(&channel, &message)?;
            println!("{} Sent to {}", "OK".green().bold(), channel.yellow());
            close(&client, timeout).await;
        }

        Commands::SendProxy {
            target_app_key,
            channel,
            message,
            ..
        } => {
            let client = connect(&settings, timeout).await?;
            client.send_proxy(&target_app_key, settings.private_key()?, &channel, &message)?;
            println!(
                "{} Sent to {} as {}",
                "OK".green().bold(),
                channel.yellow(),
                target_app_key
            );
            close(&client, timeout).await;
        }

        Commands::Resolve => {
            resolve(&settings).await?;
        }

        Commands::Post {
            channel, message, ..
        } => {
            post(&settings, &channel, &message).await?;
        }

        Commands::Info => {
            print_info();
        }
    }

    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}

/// Build a client from the settings, connect and wait for validation
async fn connect(settings: &Settings, timeout: Duration) -> Result<OrtcClient> {
    let app_key = settings.app_key()?;
    let auth_token = settings.auth_token()?;

    let client = OrtcClient::builder()
        .config(settings.client.clone())
        .build()
        .context("Failed to create client")?;

    client.on_event(|event| match event {
        ClientEvent::Exception(e) => warn!("{}", e),
        ClientEvent::Reconnecting => info!("Reconnecting"),
        ClientEvent::Reconnected => info!("Reconnected"),
        ClientEvent::Disconnected => info!("Disconnected"),
        _ => {}
    });

    println!(
        "{} Connecting to {}",
        "ORTC".cyan().bold(),
        settings.client.target_url()
    );
    client
        .connect_and_wait(app_key, auth_token, timeout)
        .await
        .context("Failed to connect")?;

    println!(
        "{} Connected to {}",
        "OK".green().bold(),
        client.url().unwrap_or_default()
    );
    Ok(client)
}

/// Disconnect once every queued frame has been written
async fn close(client: &OrtcClient, timeout: Duration) {
    if let Err(e) = client.disconnect_and_wait(timeout).await {
        warn!("Disconnect failed: {}", e);
    }
}

async fn listen(
    settings: &Settings,
    timeout: Duration,
    channels: &[String],
    json: bool,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> Result<()> {
    let client = connect(settings, timeout).await?;

    for channel in channels {
        client
            .subscribe(channel, move |channel, message| {
                if json {
                    println!(
                        "{}",
                        serde_json::json!({ "channel": channel, "message": message })
                    );
                } else {
                    println!("{} {}", format!("[{}]", channel).cyan(), message);
                }
            })
            .with_context(|| format!("Failed to subscribe to {}", channel))?;
    }

    println!(
        "{} Listening on {} - press Ctrl+C to exit",
        "OK".green().bold(),
        channels.join(", ").yellow()
    );

    shutdown_rx.recv().await;
    close(&client, timeout).await;
    Ok(())
}

async fn resolve(settings: &Settings) -> Result<()> {
    let config = &settings.client;
    if config.cluster_url.is_empty() {
        bail!("No cluster URL; pass --cluster-url or set ORTC_CLUSTER_URL");
    }

    let resolver = ClusterResolver::new(Arc::new(ortc_transport::ReqwestHttpClient::new()))
        .with_timeout(config.connection_timeout());
    let url = resolver
        .resolve_with_retry(
            &config.cluster_url,
            settings.app_key.as_deref().unwrap_or_default(),
            config.cluster_max_attempts,
            config.cluster_retry_delay(),
        )
        .await
        .context("Balancer lookup failed")?;

    println!("{}", url);
    Ok(())
}

async fn post(settings: &Settings, channel: &str, message: &str) -> Result<()> {
    let config = &settings.client;
    let client = MessageClient::with_default_http()
        .with_timeout(config.connection_timeout())
        .with_cluster_retry(config.cluster_max_attempts, config.cluster_retry_delay());

    let accepted = client
        .send_message(
            config.target_url(),
            config.is_cluster,
            &RestMessage {
                auth_token: settings.auth_token()?,
                app_key: settings.app_key()?,
                private_key: settings.private_key()?,
                channel,
                message,
            },
        )
        .await
        .context("REST publish failed")?;

    if accepted {
        println!("{} Posted to {}", "OK".green().bold(), channel.yellow());
        Ok(())
    } else {
        bail!("The server did not accept the message")
    }
}

fn print_info() {
    println!("{}", "ORTC - realtime publish/subscribe messaging".cyan().bold());
    println!();
    println!("Version:    {}", env!("CARGO_PKG_VERSION"));
    println!("Platform:   {}", std::env::consts::OS);
    println!("Arch:       {}", std::env::consts::ARCH);
    println!();
    println!("{}", "Protocol limits:".green());
    println!("  - Channel name:        {} bytes", MAX_CHANNEL_SIZE);
    println!("  - Message part:        {} bytes (channel included)", MAX_MESSAGE_SIZE);
    println!("  - Connection metadata: {} bytes", MAX_CONNECTION_METADATA_SIZE);
    println!();
    println!("{}", "Examples:".green());
    println!("  ortc listen -c chat:lobby                     # Print messages");
    println!("  ortc send -c chat:lobby -m hello              # Publish over the socket");
    println!("  ortc post -c chat:lobby -m hello              # Publish over REST");
    println!("  ortc resolve --cluster-url https://host/2.1   # Ask the balancer");
    println!();
    println!(
        "Settings file: {}",
        settings::default_settings_file().display()
    );
}
