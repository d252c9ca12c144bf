mod binfile;
mod config;
mod engine;
mod error;
mod pipeline;
mod prover;
mod routes;
mod scratch;
mod types;
mod witness;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use crate::config::{Args, ProverConfig};
use crate::pipeline::ProofPipeline;
use crate::routes::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "groth16_prover_server=info,tower_http=info".into()),
        )
        .init();

    // Exits with usage when neither argv nor ZKEY / WITNESS_BINARIES supply the paths
    let args = Args::parse();
    tracing::info!("Initializing server...");

    let config = Arc::new(ProverConfig::from_args(&args));
    tracing::info!(
        zkey = %config.zkey.display(),
        witness_generator = %config.witness_generator.display(),
        scratch_dir = %config.scratch_dir.display(),
        policy = ?config.exit_status_policy,
        "Prover configuration"
    );

    // Loading the zkey can take a while; keep it off the runtime threads
    let pipeline = {
        let config = Arc::clone(&config);
        tokio::task::spawn_blocking(move || ProofPipeline::load(config))
            .await
            .context("prover initialization task failed")?
            .context("failed to initialize prover")?
    };

    let state = Arc::new(AppState {
        pipeline: Arc::new(pipeline),
    });
    let app = build_router(state, args.max_request_bytes);

    let workers = std::thread::available_parallelism().map_or(1, |n| n.get());
    tracing::info!("{} concurrent threads are supported", workers);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    tracing::info!("Server ready on {}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
