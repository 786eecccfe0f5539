//! pipedoc API server.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use pipedoc_server::{config::Config, routes, AppState};

#[derive(Parser)]
#[command(name = "pipedoc-server")]
#[command(about = "Piping document analysis API server")]
struct Args {
    /// Listen port
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Data directory (uploads, outputs, database)
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pipedoc=info".parse().expect("static directive")),
        )
        .init();

    let args = Args::parse();
    let config = match args.data_dir {
        Some(dir) => Config::at(dir).context("failed to create data directories")?,
        None => Config::from_env().context("failed to create data directories")?,
    };
    info!(
        uploads = %config.upload_dir.display(),
        outputs = %config.output_dir.display(),
        db = %config.db_path.display(),
        "configuration loaded"
    );

    let state = AppState::new(config).context("failed to open store")?;
    let app = routes::router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], args.port));
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind")?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
