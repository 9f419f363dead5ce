//! Tile server binary.
//!
//! Serves the output of one or more process files. Without registered
//! functions, processes are opened read-only and serve what exists.

use anyhow::Result;
use clap::Parser;
use process::RunMode;
use std::collections::HashMap;
use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};
use storage::ObjectStorageConfig;
use tile_server::{router, AppState};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tile-server")]
#[command(about = "Serve process output as WMTS tiles")]
struct Args {
    /// Process files (YAML)
    #[arg(required = true)]
    process_files: Vec<PathBuf>,

    #[arg(short, long, env = "TILE_SERVER_LISTEN", default_value = "0.0.0.0:5000")]
    listen: String,

    /// continue, overwrite, readonly or memory
    #[arg(long, default_value = "readonly")]
    mode: String,

    /// Return failure details in 500 responses
    #[arg(long)]
    debug: bool,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long)]
    worker_threads: Option<usize>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();

    if let Some(threads) = args.worker_threads {
        runtime_builder.worker_threads(threads);
    } else if let Ok(threads_str) = env::var("TOKIO_WORKER_THREADS") {
        if let Ok(threads) = threads_str.parse::<usize>() {
            runtime_builder.worker_threads(threads);
        }
    }

    let runtime = runtime_builder.build()?;
    runtime.block_on(async_main(args))?;
    Ok(())
}

async fn async_main(args: Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    info!("Prometheus metrics exporter initialized");

    let mode: RunMode = args.mode.parse()?;
    let state = AppState::load(
        &args.process_files,
        mode,
        &HashMap::new(),
        ObjectStorageConfig::from_env(),
        args.debug,
    )
    .await?
    .with_prometheus(prometheus_handle);

    info!(processes = state.processes.len(), debug = args.debug, "Starting tile server");
    let app = router(Arc::new(state));

    let addr: SocketAddr = args.listen.parse()?;
    info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
