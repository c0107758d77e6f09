use crate::chain::{CompressionRpc, WithdrawalSubmitter};
use crate::config::Config;
use crate::prover::ProvingService;
use crate::tracker::NullifierTracker;
use crate::types::{now_ms, RelayProgressEvent};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};

/// Everything an event handler needs, passed explicitly instead of living
/// in globals so tests can swap in doubles for the collaborators.
pub struct AppState {
    pub cfg: Config,
    pub compression: Arc<dyn CompressionRpc>,
    pub prover: Arc<dyn ProvingService>,
    pub submitter: Arc<dyn WithdrawalSubmitter>,
    /// Sole authority on spent nullifiers. All query+insert sequences go
    /// through the pipeline's single consumer; the mutex covers the
    /// handler-side read paths (readiness, status).
    pub tracker: Mutex<NullifierTracker>,
    pub jobs: RwLock<HashMap<String, RelayJob>>,
    pub job_seq: AtomicU64,
    pub job_semaphore: Semaphore,
    /// Producer side of the deposit-event pipeline.
    pub proof_tx: mpsc::Sender<ProofRequest>,
}

/// One unit of pipeline work: a deposit to prove and withdraw.
#[derive(Debug, Clone)]
pub struct ProofRequest {
    pub job_id: String,
    /// Compressed-account address of the deposit record.
    pub address: solana_sdk::pubkey::Pubkey,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayJobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayJob {
    pub id: String,
    pub status: RelayJobStatus,
    pub created_ts_ms: u128,
    pub started_ts_ms: Option<u128>,
    pub finished_ts_ms: Option<u128>,
    // Bounded progress log snapshot (clients can poll after reconnect).
    pub events: Vec<RelayProgressEvent>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

pub fn new_job_id(state: &AppState) -> String {
    let seq = state.job_seq.fetch_add(1, Ordering::Relaxed);
    format!("job-{}-{}", now_ms(), seq)
}

pub fn new_job(id: &str) -> RelayJob {
    RelayJob {
        id: id.to_string(),
        status: RelayJobStatus::Queued,
        created_ts_ms: now_ms(),
        started_ts_ms: None,
        finished_ts_ms: None,
        events: vec![],
        result: None,
        error: None,
    }
}

impl AppState {
    pub async fn set_job_running(&self, job_id: &str) {
        let mut jobs = self.jobs.write().await;
        if let Some(j) = jobs.get_mut(job_id) {
            j.status = RelayJobStatus::Running;
            j.started_ts_ms = Some(now_ms());
        }
    }

    pub async fn finish_job(&self, job_id: &str, result: Result<Value, String>) {
        let mut jobs = self.jobs.write().await;
        if let Some(j) = jobs.get_mut(job_id) {
            j.finished_ts_ms = Some(now_ms());
            match result {
                Ok(v) => {
                    j.status = RelayJobStatus::Succeeded;
                    j.result = Some(v);
                }
                Err(e) => {
                    j.status = RelayJobStatus::Failed;
                    j.error = Some(e);
                }
            }
        }
    }

    pub async fn push_job_event(&self, job_id: &str, ev: RelayProgressEvent) {
        let mut jobs = self.jobs.write().await;
        if let Some(j) = jobs.get_mut(job_id) {
            j.events.push(ev);
            if j.events.len() > 500 {
                j.events.drain(0..100);
            }
        }
    }
}
