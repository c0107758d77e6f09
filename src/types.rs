use crate::error::AppError;
use crate::validation::ensure_pubkey_len;
use borsh::BorshDeserialize;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::mpsc;

/// Deposit record stored in a compressed account on the source chain.
///
/// Field order is the on-chain Borsh layout; do not reorder.
#[derive(Debug, Clone, BorshDeserialize)]
pub struct DepositRecord {
    pub owner: Pubkey,
    pub source_chain_id: u32,
    pub dest_chain_id: u32,
    /// Destination-chain address; EVM targets are 0x-prefixed hex,
    /// Solana targets are base58.
    pub dest_chain_addr: String,
    pub dest_chain_mint_addr: String,
    pub mint: Pubkey,
    pub amount: u64,
    pub timestamp: i64,
    pub deposit_id: u128,
}

/// Chain-agnostic view of a token-locking event.
///
/// The field order here is the nullifier preimage order (see
/// `nullifier::derive`); it is part of the cross-chain contract and must
/// never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub depositor: String,
    pub source_chain_id: u64,
    pub dest_chain_id: u64,
    pub dest_chain_addr: String,
    pub dest_chain_mint_addr: String,
    pub token_mint: String,
    pub amount: u64,
    pub timestamp: i64,
    pub deposit_id: u128,
}

impl DepositEvent {
    pub fn from_record(record: &DepositRecord) -> Self {
        DepositEvent {
            depositor: record.owner.to_string(),
            source_chain_id: record.source_chain_id as u64,
            dest_chain_id: record.dest_chain_id as u64,
            dest_chain_addr: record.dest_chain_addr.clone(),
            dest_chain_mint_addr: record.dest_chain_mint_addr.clone(),
            token_mint: record.mint.to_string(),
            amount: record.amount,
            timestamp: record.timestamp,
            deposit_id: record.deposit_id,
        }
    }
}

/// Request body for `POST /generate-proof`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateProofRequest {
    /// Compressed-account address of the deposit record (base58).
    pub address: String,
}

impl GenerateProofRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        let s = self.address.trim();
        if s.is_empty() {
            return Err(AppError::BadRequest("address is required".into()));
        }
        ensure_pubkey_len("address", s)?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct RelayProgressEvent {
    pub kind: &'static str,  // "progress" | "result" | "error"
    pub stage: &'static str, // stable stage identifier
    pub message: String,
    pub ts_ms: u128,
    pub data: Option<Value>,
}

pub type ProgressTx = mpsc::Sender<RelayProgressEvent>;

pub fn now_ms() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

pub async fn progress(tx: &Option<ProgressTx>, stage: &'static str, message: impl Into<String>) {
    if let Some(tx) = tx {
        let _ = tx
            .send(RelayProgressEvent {
                kind: "progress",
                stage,
                message: message.into(),
                ts_ms: now_ms(),
                data: None,
            })
            .await;
    }
}
