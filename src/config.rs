//! Environment-driven configuration.
//!
//! We keep this intentionally small and explicit:
//! - RPC + compression endpoints
//! - program id + relayer keypair
//! - prover artifact paths
//! - tracker snapshot path + timeout/retry knobs

use crate::constants::*;
use anyhow::Context;
use solana_sdk::pubkey::Pubkey;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Unified admin token (required). Gates admin-only HTTP endpoints via
    /// `Authorization: Bearer <token>` (or `x-admin-token`).
    pub admin_token: String,
    /// Axum bind address, host:port.
    pub api_bind: String,
    /// Solana validator RPC endpoint.
    pub rpc_url: String,
    /// Photon compression API endpoint (http://, same host/VPC).
    pub compression_url: String,
    /// Bridge program id on the destination chain.
    pub program_id: Pubkey,
    /// JSON keypair file for the relayer's submit authority.
    pub relayer_keypair: PathBuf,
    /// Nullifier tracker snapshot file.
    pub tracker_path: PathBuf,
    pub max_concurrent_jobs: usize,
    pub proving_timeout: Duration,
    pub confirm_timeout: Duration,
    pub chain_timeout: Duration,
    /// Bounded retry count for the withdrawal finalization sequence.
    pub finalize_max_retries: u32,

    // Prover artifacts (see `prover::ProverArtifacts`).
    pub deposit_wasm: PathBuf,
    pub deposit_zkey: PathBuf,
    pub deposit_witness_js: PathBuf,
    pub withdrawal_wasm: PathBuf,
    pub withdrawal_zkey: PathBuf,
    pub withdrawal_witness_js: PathBuf,
    pub rapidsnark_bin: String,
    pub node_bin: String,
}

fn env_required(key: &str) -> anyhow::Result<String> {
    env::var(key).with_context(|| format!("Missing env var: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn load_config() -> anyhow::Result<Config> {
    let admin_token = env::var("ADMIN_TOKEN")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| {
            env::var("RELAYER_ADMIN_TOKEN")
                .ok()
                .filter(|s| !s.trim().is_empty())
        })
        .ok_or_else(|| anyhow::anyhow!("Missing env var: ADMIN_TOKEN (or RELAYER_ADMIN_TOKEN)"))?
        .trim()
        .to_string();

    let program_id = Pubkey::from_str(&env_required("PROGRAM_ID")?.trim().to_string())
        .context("Invalid PROGRAM_ID")?;

    let relayer_keypair = PathBuf::from(env_required("RELAYER_KEYPAIR")?);
    if !relayer_keypair.is_file() {
        anyhow::bail!(
            "RELAYER_KEYPAIR does not point at a file: {}",
            relayer_keypair.display()
        );
    }

    let compression_url = env_or("COMPRESSION_URL", DEFAULT_COMPRESSION_URL);
    if !compression_url.starts_with("http://") {
        anyhow::bail!("COMPRESSION_URL must start with http:// (no TLS to the local indexer)");
    }

    Ok(Config {
        admin_token,
        api_bind: env_or("API_BIND", DEFAULT_API_BIND),
        rpc_url: env_or("RPC_URL", DEFAULT_RPC_URL),
        compression_url,
        program_id,
        relayer_keypair,
        tracker_path: PathBuf::from(env_or("TRACKER_PATH", DEFAULT_TRACKER_PATH)),
        max_concurrent_jobs: env_u64(
            "RELAYER_MAX_CONCURRENT_JOBS",
            DEFAULT_MAX_CONCURRENT_JOBS as u64,
        ) as usize,
        proving_timeout: Duration::from_secs(env_u64(
            "PROVING_TIMEOUT_SECS",
            DEFAULT_PROVING_TIMEOUT_SECS,
        )),
        confirm_timeout: Duration::from_secs(env_u64(
            "CONFIRM_TIMEOUT_SECS",
            DEFAULT_CONFIRM_TIMEOUT_SECS,
        )),
        chain_timeout: Duration::from_secs(env_u64(
            "CHAIN_TIMEOUT_SECS",
            DEFAULT_CHAIN_TIMEOUT_SECS,
        )),
        finalize_max_retries: env_u64(
            "FINALIZE_MAX_RETRIES",
            DEFAULT_FINALIZE_MAX_RETRIES as u64,
        ) as u32,

        deposit_wasm: PathBuf::from(env_or("DEPOSIT_WASM_PATH", DEFAULT_DEPOSIT_WASM_PATH)),
        deposit_zkey: PathBuf::from(env_or("DEPOSIT_ZKEY_PATH", DEFAULT_DEPOSIT_ZKEY_PATH)),
        deposit_witness_js: PathBuf::from(env_or(
            "DEPOSIT_WITNESS_JS",
            DEFAULT_DEPOSIT_WITNESS_JS,
        )),
        withdrawal_wasm: PathBuf::from(env_or(
            "WITHDRAWAL_WASM_PATH",
            DEFAULT_WITHDRAWAL_WASM_PATH,
        )),
        withdrawal_zkey: PathBuf::from(env_or(
            "WITHDRAWAL_ZKEY_PATH",
            DEFAULT_WITHDRAWAL_ZKEY_PATH,
        )),
        withdrawal_witness_js: PathBuf::from(env_or(
            "WITHDRAWAL_WITNESS_JS",
            DEFAULT_WITHDRAWAL_WITNESS_JS,
        )),
        rapidsnark_bin: env_or("RAPIDSNARK_PATH", DEFAULT_RAPIDSNARK_PATH),
        node_bin: env_or("NODE_BIN", DEFAULT_NODE_BIN),
    })
}
