//! Bridge relayer.
//!
//! Watches for token-locking deposits on the source chain, builds the
//! exact field-element witness the deposit circuit expects, derives a
//! nullifier per deposit, and drives the withdrawal on the destination
//! chain through an indexed non-membership tracker so no deposit can be
//! withdrawn twice.
//!
//! API shape:
//! - `GET  /health`         -> simple liveness check
//! - `GET  /ready`          -> prover artifact + tracker preflight
//! - `POST /generate-proof` -> enqueue a deposit account for proving,
//!                             returns `job_id`
//! - `GET  /job/:id`        -> job status + progress log
//! - `GET  /metrics`        -> Prometheus metrics (admin token)

mod auth;
mod chain;
mod config;
mod constants;
mod error;
mod field;
mod handlers;
mod httpc;
mod metrics;
mod nullifier;
mod pipeline;
mod poseidon;
mod prover;
mod router;
mod state;
mod tracker;
mod types;
mod validation;
mod witness;

use crate::chain::{PhotonClient, SolanaSubmitter};
use crate::prover::{ProverArtifacts, SnarkjsProver};
use crate::state::AppState;
use crate::tracker::NullifierTracker;
use solana_client::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::signature::read_keypair_file;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,bridge_relayer=debug".into()),
        )
        .init();

    let cfg = config::load_config()?;
    info!(
        "starting bridge-relayer (bind={}, program_id={}, compression_url={})",
        cfg.api_bind, cfg.program_id, cfg.compression_url
    );

    let payer = Arc::new(
        read_keypair_file(&cfg.relayer_keypair)
            .map_err(|e| anyhow::anyhow!("failed to read RELAYER_KEYPAIR: {e}"))?,
    );
    let rpc = Arc::new(RpcClient::new_with_commitment(
        cfg.rpc_url.clone(),
        CommitmentConfig::confirmed(),
    ));
    let compression = Arc::new(
        PhotonClient::new(&cfg.compression_url, cfg.chain_timeout)
            .map_err(|e| anyhow::anyhow!("bad COMPRESSION_URL: {e}"))?,
    );
    let submitter = Arc::new(SolanaSubmitter::new(rpc, cfg.program_id, payer));
    let prover = Arc::new(SnarkjsProver {
        deposit: ProverArtifacts {
            wasm: cfg.deposit_wasm.clone(),
            zkey: cfg.deposit_zkey.clone(),
            witness_js: cfg.deposit_witness_js.clone(),
        },
        withdrawal: ProverArtifacts {
            wasm: cfg.withdrawal_wasm.clone(),
            zkey: cfg.withdrawal_zkey.clone(),
            witness_js: cfg.withdrawal_witness_js.clone(),
        },
        node_bin: cfg.node_bin.clone(),
        rapidsnark_bin: cfg.rapidsnark_bin.clone(),
        scratch_dir: prover::relayer_tmpdir(),
        timeout: cfg.proving_timeout,
    });

    let tracker = NullifierTracker::open(&cfg.tracker_path)
        .map_err(|e| anyhow::anyhow!("tracker load failed: {e}"))?;

    let (proof_tx, proof_rx) = mpsc::channel::<state::ProofRequest>(256);
    let max_jobs = cfg.max_concurrent_jobs;
    let api_bind = cfg.api_bind.clone();
    let state = Arc::new(AppState {
        cfg,
        compression,
        prover,
        submitter,
        tracker: Mutex::new(tracker),
        jobs: RwLock::new(HashMap::new()),
        job_seq: AtomicU64::new(1),
        job_semaphore: Semaphore::new(max_jobs),
        proof_tx,
    });

    pipeline::start(state.clone(), proof_rx);

    let app = router::build(state);
    let listener = tokio::net::TcpListener::bind(&api_bind).await?;
    info!("listening on {api_bind}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
