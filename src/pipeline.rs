//! Deposit-event pipeline.
//!
//! Two stages, two channels:
//!
//! - Proof requests fan out to bounded concurrent deposit-side tasks
//!   (account fetch, deposit witness, deposit prove). These are the slow
//!   parts and are safe to run in parallel across events.
//! - Finalization jobs funnel into ONE consumer loop that owns every
//!   tracker mutation: non-membership query -> withdrawal witness ->
//!   prove -> submit -> confirm -> insert -> persist. Being the sole
//!   consumer serializes each query+insert pair, so a non-membership
//!   proof can never be invalidated by a concurrent insert landing first.
//!
//! The nullifier is inserted only after the withdrawal transaction is
//! confirmed on the destination chain. On the retry path, `AlreadyPresent`
//! from the insert after a confirmed withdrawal is idempotent success; an
//! inserted nullifier whose withdrawal never executed would lock funds
//! permanently, so that ordering is never reversed.

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::nullifier::{self, Nullifier};
use crate::prover::{CircuitKind, EvmCalldata, ProofBundle};
use crate::state::{AppState, ProofRequest};
use crate::types::{progress, DepositEvent, DepositRecord, ProgressTx, RelayProgressEvent};
use crate::witness;
use borsh::BorshDeserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task;
use tracing::{error, info, warn};

/// Deposit-side output, queued for the single finalization consumer.
pub struct FinalizeJob {
    pub job_id: String,
    pub event: DepositEvent,
    pub deposit_proof: ProofBundle,
    pub deposit_calldata: EvmCalldata,
    pub progress: Option<ProgressTx>,
}

/// Spawn the pipeline: a dispatcher fanning out deposit-side work and the
/// sole finalization consumer.
pub fn start(state: Arc<AppState>, proof_rx: mpsc::Receiver<ProofRequest>) {
    let (finalize_tx, finalize_rx) = mpsc::channel::<FinalizeJob>(64);
    tokio::spawn(dispatcher(state.clone(), proof_rx, finalize_tx));
    tokio::spawn(finalizer(state, finalize_rx));
}

async fn dispatcher(
    state: Arc<AppState>,
    mut proof_rx: mpsc::Receiver<ProofRequest>,
    finalize_tx: mpsc::Sender<FinalizeJob>,
) {
    while let Some(req) = proof_rx.recv().await {
        metrics::metrics().events_accepted_total.inc();
        let state = state.clone();
        let finalize_tx = finalize_tx.clone();
        tokio::spawn(async move {
            let permit = state.job_semaphore.acquire().await;
            if permit.is_err() {
                state
                    .finish_job(&req.job_id, Err("Failed to acquire concurrency permit".into()))
                    .await;
                return;
            }
            let _permit = permit.unwrap();

            state.set_job_running(&req.job_id).await;

            // Progress events collect onto the job so clients can poll
            // after a reconnect.
            let (tx, mut rx) = mpsc::channel::<RelayProgressEvent>(256);
            let state_events = state.clone();
            let job_id_events = req.job_id.clone();
            tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    state_events.push_job_event(&job_id_events, ev).await;
                }
            });
            let tx = Some(tx);

            match deposit_side(&state, &req, &tx).await {
                Ok(mut job) => {
                    job.progress = tx;
                    if finalize_tx.send(job).await.is_err() {
                        error!("finalization channel closed; dropping job {}", req.job_id);
                        state
                            .finish_job(&req.job_id, Err("finalization pipeline stopped".into()))
                            .await;
                    }
                }
                Err(e) => {
                    // One bad event must not halt the pipeline; surface it on
                    // the job and keep consuming.
                    metrics::metrics().bad_event_total.inc();
                    warn!(job_id = %req.job_id, address = %req.address, %e, "deposit-side handling failed");
                    state.finish_job(&req.job_id, Err(e.to_string())).await;
                }
            }
        });
    }
}

/// Fetch, decode, witness and prove the deposit side of one event.
async fn deposit_side(
    state: &Arc<AppState>,
    req: &ProofRequest,
    tx: &Option<ProgressTx>,
) -> AppResult<FinalizeJob> {
    let compression = state.compression.clone();
    let address = req.address;
    progress(tx, "account", "fetching compressed deposit account").await;
    let account = task::spawn_blocking(move || compression.fetch_compressed_account(&address))
        .await
        .map_err(|e| AppError::Internal(format!("account fetch task: {e}")))??;

    let record = DepositRecord::try_from_slice(&account.data).map_err(|e| {
        AppError::WitnessBuild(format!(
            "account {address} does not decode as a deposit record: {e}"
        ))
    })?;
    let deposit_id = record.deposit_id;
    info!(deposit_id, amount = record.amount, "deposit record decoded");

    let compression = state.compression.clone();
    let hash = account.hash;
    progress(tx, "merkle", "fetching inclusion proof").await;
    let proof = task::spawn_blocking(move || compression.fetch_account_proof(&hash))
        .await
        .map_err(|e| AppError::Internal(format!("proof fetch task: {e}")))??;

    let bundle = witness::build_deposit_witness(&record, &account, &proof)?;
    let inputs = serde_json::to_value(&bundle.inputs)
        .map_err(|e| AppError::Internal(format!("witness encode: {e}")))?;

    let prover = state.prover.clone();
    progress(tx, "prove", "generating deposit proof").await;
    let deposit_proof = task::spawn_blocking(move || prover.prove(CircuitKind::Deposit, &inputs))
        .await
        .map_err(|e| AppError::Internal(format!("prove task: {e}")))??;
    let deposit_calldata = deposit_proof.to_evm_calldata()?;
    info!(
        deposit_id,
        root_hi = %bundle.root_limbs.0,
        leaf_hi = %bundle.leaf_limbs.0,
        "deposit proof generated"
    );

    Ok(FinalizeJob {
        job_id: req.job_id.clone(),
        event: DepositEvent::from_record(&record),
        deposit_proof,
        deposit_calldata,
        progress: None,
    })
}

/// Per-job progress a retry must not repeat: a submitted transaction is
/// confirmed, not resubmitted; a confirmed withdrawal goes straight to the
/// nullifier insert.
#[derive(Default)]
struct FinalizeCtx {
    submitted_sig: Option<String>,
    confirmed: bool,
}

async fn finalizer(state: Arc<AppState>, mut rx: mpsc::Receiver<FinalizeJob>) {
    while let Some(job) = rx.recv().await {
        let deposit_id = job.event.deposit_id;
        match finalize_with_retries(&state, &job).await {
            Ok(v) => {
                info!(deposit_id, "withdrawal finalized");
                state.finish_job(&job.job_id, Ok(v)).await;
            }
            Err(e) => {
                if matches!(e, AppError::AlreadyPresent(_)) {
                    metrics::metrics().duplicate_nullifier_total.inc();
                    warn!(deposit_id, "deposit already withdrawn; rejecting");
                } else {
                    error!(deposit_id, %e, "withdrawal finalization failed");
                }
                state.finish_job(&job.job_id, Err(e.to_string())).await;
            }
        }
    }
}

async fn finalize_with_retries(state: &Arc<AppState>, job: &FinalizeJob) -> AppResult<serde_json::Value> {
    let mut ctx = FinalizeCtx::default();
    let mut attempt: u32 = 0;
    loop {
        match finalize_once(state, job, &mut ctx).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < state.cfg.finalize_max_retries => {
                attempt += 1;
                let backoff = Duration::from_millis(500u64.saturating_mul(1 << attempt.min(6)));
                warn!(
                    deposit_id = job.event.deposit_id,
                    attempt, %e, "retrying withdrawal finalization"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn finalize_once(
    state: &Arc<AppState>,
    job: &FinalizeJob,
    ctx: &mut FinalizeCtx,
) -> AppResult<serde_json::Value> {
    let event = &job.event;
    let tx = &job.progress;
    let nullifier = nullifier::derive(event)?;

    if !ctx.confirmed {
        let sig = match &ctx.submitted_sig {
            // Earlier attempt submitted but timed out waiting; confirm the
            // same signature instead of resubmitting.
            Some(sig) => sig.clone(),
            None => {
                let (non_membership, predicted_root) = {
                    // This loop is the only tracker mutator, so the query
                    // stays valid after the lock drops: no insert can land
                    // before ours.
                    let tracker = state.tracker.lock().await;
                    if tracker.contains(nullifier.as_bytes()) {
                        return Err(AppError::AlreadyPresent(nullifier.to_hex()));
                    }
                    let nm = tracker.non_membership_proof(nullifier.as_bytes())?;
                    let root = tracker.tree().predicted_root_after(nullifier.as_bytes())?;
                    (nm, root)
                };

                let inputs = witness::build_withdrawal_witness(event, &non_membership, &nullifier)?;
                let inputs = serde_json::to_value(&inputs)
                    .map_err(|e| AppError::Internal(format!("witness encode: {e}")))?;

                let prover = state.prover.clone();
                progress(tx, "prove", "generating withdrawal proof").await;
                let withdrawal_proof =
                    task::spawn_blocking(move || prover.prove(CircuitKind::Withdrawal, &inputs))
                        .await
                        .map_err(|e| AppError::Internal(format!("prove task: {e}")))??;

                let submitter = state.submitter.clone();
                let ev = event.clone();
                let nf = nullifier;
                let sig = task::spawn_blocking(move || {
                    submitter.submit_withdrawal(&ev, &nf, &predicted_root, &withdrawal_proof)
                })
                .await
                .map_err(|e| AppError::Internal(format!("submit task: {e}")))??;
                info!(deposit_id = event.deposit_id, signature = %sig, "withdrawal submitted");
                progress(tx, "submit", format!("withdrawal submitted: {sig}")).await;
                ctx.submitted_sig = Some(sig.clone());
                sig
            }
        };

        let submitter = state.submitter.clone();
        let timeout = state.cfg.confirm_timeout;
        let sig_wait = sig.clone();
        progress(tx, "confirm", "waiting for destination-chain confirmation").await;
        let t0 = Instant::now();
        task::spawn_blocking(move || submitter.confirm_withdrawal(&sig_wait, timeout))
            .await
            .map_err(|e| AppError::Internal(format!("confirm task: {e}")))??;
        metrics::metrics()
            .confirm_ms
            .observe(t0.elapsed().as_millis() as f64);
        metrics::metrics().withdrawals_confirmed_total.inc();
        ctx.confirmed = true;
    }

    progress(tx, "tracker", "recording spent nullifier").await;
    insert_spent(state, &nullifier).await?;

    Ok(serde_json::json!({
        "depositId": event.deposit_id.to_string(),
        "nullifier": nullifier.to_decimal(),
        "signature": ctx.submitted_sig,
        "depositProof": job.deposit_calldata,
    }))
}

/// Record the nullifier as spent, durably. Only called after the
/// withdrawal is confirmed, so an already-present value means an earlier
/// attempt (or another relayer) got there first: idempotent success.
async fn insert_spent(state: &Arc<AppState>, nullifier: &Nullifier) -> AppResult<()> {
    let mut tracker = state.tracker.lock().await;
    match tracker.insert_durable(nullifier.as_bytes()) {
        Ok(()) => Ok(()),
        Err(AppError::AlreadyPresent(_)) => {
            info!(
                nullifier = %nullifier.to_hex(),
                "nullifier already recorded for a confirmed withdrawal; idempotent success"
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{AccountProof, CompressedAccount, CompressionRpc, WithdrawalSubmitter};
    use crate::config::Config;
    use crate::prover::{Groth16Proof, ProvingService};
    use crate::state::AppState;
    use crate::tracker::NullifierTracker;
    use solana_sdk::pubkey::Pubkey;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{Mutex, RwLock, Semaphore};

    struct StubRpc;
    impl CompressionRpc for StubRpc {
        fn fetch_compressed_account(&self, _address: &Pubkey) -> AppResult<CompressedAccount> {
            unimplemented!("not used in finalizer tests")
        }
        fn fetch_account_proof(&self, _hash: &[u8; 32]) -> AppResult<AccountProof> {
            unimplemented!("not used in finalizer tests")
        }
    }

    struct StubProver;
    impl ProvingService for StubProver {
        fn prove(&self, _circuit: CircuitKind, _inputs: &serde_json::Value) -> AppResult<ProofBundle> {
            Ok(ProofBundle {
                proof: Groth16Proof {
                    pi_a: vec!["1".into(), "2".into(), "1".into()],
                    pi_b: vec![
                        vec!["3".into(), "4".into()],
                        vec!["5".into(), "6".into()],
                        vec!["1".into(), "0".into()],
                    ],
                    pi_c: vec!["7".into(), "8".into(), "1".into()],
                },
                public_signals: vec!["1".into()],
            })
        }
    }

    /// Scriptable submitter: counts submits, can fail confirmation N times.
    struct StubSubmitter {
        submits: AtomicUsize,
        confirms: AtomicUsize,
        confirm_timeouts_before_success: AtomicUsize,
    }

    impl StubSubmitter {
        fn new(confirm_timeouts: usize) -> Self {
            StubSubmitter {
                submits: AtomicUsize::new(0),
                confirms: AtomicUsize::new(0),
                confirm_timeouts_before_success: AtomicUsize::new(confirm_timeouts),
            }
        }
    }

    impl WithdrawalSubmitter for StubSubmitter {
        fn submit_withdrawal(
            &self,
            _event: &DepositEvent,
            _nullifier: &Nullifier,
            _new_root: &[u8; 32],
            _proof: &ProofBundle,
        ) -> AppResult<String> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            Ok("sig-1".to_string())
        }

        fn confirm_withdrawal(&self, _signature: &str, _timeout: Duration) -> AppResult<()> {
            self.confirms.fetch_add(1, Ordering::SeqCst);
            let remaining = self.confirm_timeouts_before_success.load(Ordering::SeqCst);
            if remaining > 0 {
                self.confirm_timeouts_before_success
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(AppError::ChainTimeout("confirm stub timeout".into()));
            }
            Ok(())
        }
    }

    fn test_config(dir: &std::path::Path, retries: u32) -> Config {
        Config {
            admin_token: "test-admin-token-test-admin-token".into(),
            api_bind: "127.0.0.1:0".into(),
            rpc_url: "http://127.0.0.1:8899".into(),
            compression_url: "http://127.0.0.1:8784".into(),
            program_id: Pubkey::new_unique(),
            relayer_keypair: PathBuf::from("/dev/null"),
            tracker_path: dir.join("tracker.json"),
            max_concurrent_jobs: 2,
            proving_timeout: Duration::from_secs(5),
            confirm_timeout: Duration::from_secs(1),
            chain_timeout: Duration::from_secs(1),
            finalize_max_retries: retries,
            deposit_wasm: PathBuf::new(),
            deposit_zkey: PathBuf::new(),
            deposit_witness_js: PathBuf::new(),
            withdrawal_wasm: PathBuf::new(),
            withdrawal_zkey: PathBuf::new(),
            withdrawal_witness_js: PathBuf::new(),
            rapidsnark_bin: String::new(),
            node_bin: String::new(),
        }
    }

    fn test_state(
        dir: &std::path::Path,
        submitter: Arc<StubSubmitter>,
        prover: Arc<dyn ProvingService>,
        retries: u32,
    ) -> Arc<AppState> {
        let cfg = test_config(dir, retries);
        let (tx, _rx) = mpsc::channel(8);
        Arc::new(AppState {
            tracker: Mutex::new(NullifierTracker::open(&cfg.tracker_path).unwrap()),
            cfg,
            compression: Arc::new(StubRpc),
            prover,
            submitter,
            jobs: RwLock::new(HashMap::new()),
            job_seq: AtomicU64::new(1),
            job_semaphore: Semaphore::new(2),
            proof_tx: tx,
        })
    }

    fn sample_event(deposit_id: u128) -> DepositEvent {
        DepositEvent {
            depositor: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".to_string(),
            source_chain_id: 1,
            dest_chain_id: 31337,
            dest_chain_addr: "0x322813Fd9A801c5507c9de605d63CEA4f2CE6c44".to_string(),
            dest_chain_mint_addr: "0x322813Fd9A801c5507c9de605d63CEA4f2CE6c44".to_string(),
            token_mint: "So11111111111111111111111111111111111111112".to_string(),
            amount: 100,
            timestamp: 1750519384,
            deposit_id,
        }
    }

    fn sample_job(deposit_id: u128) -> FinalizeJob {
        let bundle = StubProver.prove(CircuitKind::Withdrawal, &serde_json::json!({})).unwrap();
        FinalizeJob {
            job_id: "job-test-1".into(),
            event: sample_event(deposit_id),
            deposit_calldata: bundle.to_evm_calldata().unwrap(),
            deposit_proof: bundle,
            progress: None,
        }
    }

    #[tokio::test]
    async fn finalize_inserts_after_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let submitter = Arc::new(StubSubmitter::new(0));
        let state = test_state(dir.path(), submitter.clone(), Arc::new(StubProver), 3);
        let job = sample_job(1);

        let nf = nullifier::derive(&job.event).unwrap();
        assert!(!state.tracker.lock().await.contains(nf.as_bytes()));

        finalize_with_retries(&state, &job).await.unwrap();

        assert_eq!(submitter.submits.load(Ordering::SeqCst), 1);
        assert!(state.tracker.lock().await.contains(nf.as_bytes()));
    }

    #[tokio::test]
    async fn confirm_timeout_retries_without_resubmitting() {
        let dir = tempfile::tempdir().unwrap();
        let submitter = Arc::new(StubSubmitter::new(2));
        let state = test_state(dir.path(), submitter.clone(), Arc::new(StubProver), 3);
        let job = sample_job(2);

        finalize_with_retries(&state, &job).await.unwrap();

        // One submit, three confirm attempts (two timeouts + success).
        assert_eq!(submitter.submits.load(Ordering::SeqCst), 1);
        assert_eq!(submitter.confirms.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn proving_timeout_never_inserts() {
        struct TimeoutProver;
        impl ProvingService for TimeoutProver {
            fn prove(&self, _c: CircuitKind, _i: &serde_json::Value) -> AppResult<ProofBundle> {
                Err(AppError::ProvingTimeout("stub".into()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let submitter = Arc::new(StubSubmitter::new(0));
        let state = test_state(dir.path(), submitter.clone(), Arc::new(TimeoutProver), 0);
        let job = sample_job(3);

        let err = finalize_with_retries(&state, &job).await.unwrap_err();
        assert!(matches!(err, AppError::ProvingTimeout(_)));
        assert_eq!(submitter.submits.load(Ordering::SeqCst), 0);
        let nf = nullifier::derive(&job.event).unwrap();
        assert!(!state.tracker.lock().await.contains(nf.as_bytes()));
    }

    #[tokio::test]
    async fn second_withdrawal_of_same_deposit_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let submitter = Arc::new(StubSubmitter::new(0));
        let state = test_state(dir.path(), submitter.clone(), Arc::new(StubProver), 0);

        finalize_with_retries(&state, &sample_job(4)).await.unwrap();
        let err = finalize_with_retries(&state, &sample_job(4))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyPresent(_)));
        // The duplicate never reached the chain.
        assert_eq!(submitter.submits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn insert_after_confirm_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let submitter = Arc::new(StubSubmitter::new(0));
        let state = test_state(dir.path(), submitter.clone(), Arc::new(StubProver), 0);
        let job = sample_job(5);
        let nf = nullifier::derive(&job.event).unwrap();

        // Simulate another process having recorded the nullifier between
        // our confirmation and our insert.
        let mut ctx = FinalizeCtx {
            submitted_sig: Some("sig-1".into()),
            confirmed: true,
        };
        state
            .tracker
            .lock()
            .await
            .insert_durable(nf.as_bytes())
            .unwrap();

        // The retry path must report success, not a double-spend.
        finalize_once(&state, &job, &mut ctx).await.unwrap();
    }
}
