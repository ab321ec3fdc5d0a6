use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use prog_image::{
    config::Config, routes::create_router, storage::HostProvider, utils::init_logger, AppState,
    ImageService,
};

#[derive(Debug, Parser)]
#[command(name = "prog-image", version, about = "Image upload and delivery service")]
struct Cli {
    /// Address to listen on, overriding HOST and PORT
    #[arg(long, env = "BIND_ADDR")]
    bind: Option<SocketAddr>,

    /// Load environment variables from this file instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logger();

    // Load configuration
    let config = match &cli.env_file {
        Some(path) => Config::from_env_file(path)?,
        None => Config::from_env()?,
    };
    info!("Configuration loaded: {:?}", config.server);

    // Bring up the image host
    let host = HostProvider::setup(config.cloudinary.clone())
        .context("Failed to configure image host")?
        .start();

    let state = AppState {
        images: ImageService::new(host.client()),
        config: config.clone(),
    };
    let app = create_router(state);

    let addr = match cli.bind {
        Some(addr) => addr,
        None => format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .context("HOST and PORT do not form a valid socket address")?,
    };
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    host.stop();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
