use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod server;
use server::ServerState;

use mobiwd_core::config::{logs_dir, DriverConfig};

#[derive(Parser)]
#[command(name = "mobiwd-server")]
#[command(about = "WebDriver server for iOS native apps and their web content")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1", env = "MOBIWD_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 4723, env = "MOBIWD_PORT")]
    port: u16,

    /// Local port forwarded to the native agent (overrides the config file)
    #[arg(long, env = "MOBIWD_PROXY_PORT")]
    proxy_port: Option<u16>,

    /// Log to stderr instead of ~/.mobiwd/logs/mobiwd-server.log
    #[arg(long)]
    log_stderr: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_stderr {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        let file_appender = tracing_appender::rolling::never(logs_dir(), "mobiwd-server.log");
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(file_appender)
            .with_ansi(false)
            .init();
    }

    let mut config = DriverConfig::load();
    if let Some(port) = args.proxy_port {
        config.proxy_port = port;
    }
    info!(host = %args.host, port = args.port, proxy_port = config.proxy_port, "Starting mobiwd-server");

    let state = Arc::new(ServerState::new(config));
    let app = server::router(state.clone());

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!(addr = %listener.local_addr()?, "Listening");

    let mut sigterm = signal(SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Cleaning up");
    state.stop_all().await;
    info!("Server stopped");

    Ok(())
}
