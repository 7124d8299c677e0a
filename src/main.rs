use anyhow::{Context, Result};
use clap::Parser;
use coupon_api::{bootstrap, config, db, http};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let pool = db::init_pool(&cfg.database_url(), cfg.database.max_connections).await?;
    bootstrap::initialize(&pool, &cfg.auth).await?;

    let bind_addr: SocketAddr = cfg
        .server
        .bind_addr
        .parse()
        .context("invalid server.bind_addr")?;
    let state = Arc::new(http::AppState::new(pool, &cfg.auth));

    info!("starting coupon api");
    http::serve(bind_addr, state).await?;
    Ok(())
}
