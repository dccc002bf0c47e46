//! Tether CLI
//!
//! Line-based chat over a single point-to-point link: the peer listens for
//! inbound sessions while it can dial out, whichever wins carries the chat,
//! and any failure falls back to listening.

mod config;

use clap::{Parser, Subcommand};
use config::Config;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tether_core::{Link, LinkConfig, LinkEvent};
use tether_transport::{PeerAddr, TcpTransport};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Tether - one listening/dialing peer, one live session
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for an inbound session and chat over it
    Listen {
        /// Listen address (overrides the config file)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Dial a peer while still listening; chat over whichever wins
    Dial {
        /// Peer address to dial (host:port)
        #[arg(required = true)]
        peer: String,

        /// Listen address (overrides the config file)
        #[arg(short, long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose { "debug" } else { "info" })
        .init();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(PathBuf::from(path))?,
        None => Config::load_or_default()?,
    };

    match cli.command {
        Commands::Listen { bind } => run(&config, bind, None).await,
        Commands::Dial { peer, bind } => run(&config, bind, Some(PeerAddr::new(peer))).await,
    }
}

async fn run(config: &Config, bind: Option<String>, peer: Option<PeerAddr>) -> anyhow::Result<()> {
    let bind_addr: SocketAddr = bind
        .as_deref()
        .unwrap_or(&config.network.bind_addr)
        .parse()?;

    let link_config = LinkConfig {
        service: config.service_id()?,
        ..LinkConfig::default()
    };
    let transport = Arc::new(TcpTransport::new(bind_addr));
    let (link, mut events) = Link::new(transport, link_config);

    link.start().await;
    if let Some(addr) = link.listener_addr().await {
        println!("* listening on {addr}");
    } else {
        println!("* no inbound path (bind failed); dial-only");
    }

    if let Some(peer) = peer {
        println!("* dialing {peer}");
        link.connect(peer).await;
    }

    // Stdin lines become session payloads. Lines typed while disconnected
    // are dropped, matching the link's no-queuing contract.
    let writer = link.clone();
    let stdin_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            writer.write(line.as_bytes()).await;
        }
    });

    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Connected { peer } => println!("* connected to {peer}"),
            LinkEvent::Inbound(payload) => {
                println!("< {}", String::from_utf8_lossy(&payload));
            }
            LinkEvent::Written(payload) => {
                println!("> {}", String::from_utf8_lossy(&payload));
            }
            LinkEvent::Disconnected => println!("* disconnected, listening again"),
            LinkEvent::DialFailed { peer } => println!("* dial to {peer} failed, listening"),
            LinkEvent::StateChanged(state) => tracing::debug!(%state, "state changed"),
        }
    }

    stdin_task.abort();
    Ok(())
}
