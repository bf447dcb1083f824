//! Process bootstrap for the Ludo game server

use clap::Parser;
use log::info;
use ludo_server::network::{serve_health, Server};
use tokio::net::TcpListener;

// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// WebSocket port to listen on; defaults to $PORT, then 8080
    #[clap(short, long)]
    port: Option<u16>,

    /// Port for the plain-text liveness endpoint
    #[clap(long, default_value = "8081")]
    health_port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();

    // Print a message about setting RUST_LOG if not set
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let args = Args::parse();
    let port = args
        .port
        .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
        .unwrap_or(8080);

    let ws_addr = format!("{}:{}", args.host, port);
    let health_addr = format!("{}:{}", args.host, args.health_port);

    info!("Starting game server on WebSocket: {}, health: {}", ws_addr, health_addr);

    let health_listener = TcpListener::bind(&health_addr).await?;
    tokio::spawn(serve_health(health_listener));

    let server = Server::bind(&ws_addr).await?;
    server.run().await;

    Ok(())
}
