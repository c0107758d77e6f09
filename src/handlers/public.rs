use crate::error::{AppError, AppResult};
use crate::prover::artifact_ok;
use crate::state::{new_job, new_job_id, AppState, ProofRequest};
use crate::types::{now_ms, GenerateProofRequest};
use axum::extract::State;
use axum::Json as AxumJson;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;

pub async fn health() -> AxumJson<serde_json::Value> {
    AxumJson(serde_json::json!({ "status": "ok", "ts_ms": now_ms() }))
}

pub async fn readiness(
    State(state): State<Arc<AppState>>,
) -> AppResult<AxumJson<serde_json::Value>> {
    let cfg = &state.cfg;
    let deposit_ok = artifact_ok(&cfg.deposit_wasm)
        && artifact_ok(&cfg.deposit_zkey)
        && artifact_ok(&cfg.deposit_witness_js);
    let withdrawal_ok = artifact_ok(&cfg.withdrawal_wasm)
        && artifact_ok(&cfg.withdrawal_zkey)
        && artifact_ok(&cfg.withdrawal_witness_js);
    let ready = deposit_ok && withdrawal_ok;
    crate::metrics::metrics().ready.set(if ready { 1 } else { 0 });

    let (tracker_len, tracker_root) = {
        let tracker = state.tracker.lock().await;
        (tracker.tree().len(), hex::encode(tracker.tree().root()))
    };

    Ok(AxumJson(serde_json::json!({
        "ready": ready,
        "tracker": {
            "path": cfg.tracker_path.display().to_string(),
            "spent_nullifiers": tracker_len,
            "root": tracker_root,
        },
        "artifacts": {
            "deposit_wasm": cfg.deposit_wasm.display().to_string(),
            "deposit_wasm_ok": artifact_ok(&cfg.deposit_wasm),
            "deposit_zkey_ok": artifact_ok(&cfg.deposit_zkey),
            "deposit_witness_js_ok": artifact_ok(&cfg.deposit_witness_js),
            "withdrawal_wasm": cfg.withdrawal_wasm.display().to_string(),
            "withdrawal_wasm_ok": artifact_ok(&cfg.withdrawal_wasm),
            "withdrawal_zkey_ok": artifact_ok(&cfg.withdrawal_zkey),
            "withdrawal_witness_js_ok": artifact_ok(&cfg.withdrawal_witness_js),
        },
    })))
}

/// Manual trigger: fetch the deposit record at `address`, build its proof
/// and hand it to the withdrawal pipeline. Returns a job id to poll.
pub async fn generate_proof(
    State(state): State<Arc<AppState>>,
    AxumJson(req): AxumJson<GenerateProofRequest>,
) -> AppResult<AxumJson<serde_json::Value>> {
    req.validate()?;
    let address = Pubkey::from_str(req.address.trim())
        .map_err(|_| AppError::BadRequest("address is not a valid pubkey".into()))?;

    let job_id = new_job_id(&state);
    state
        .jobs
        .write()
        .await
        .insert(job_id.clone(), new_job(&job_id));

    state
        .proof_tx
        .send(ProofRequest {
            job_id: job_id.clone(),
            address,
        })
        .await
        .map_err(|_| AppError::Unavailable("event pipeline is not running".into()))?;

    Ok(AxumJson(serde_json::json!({ "job_id": job_id })))
}
