//! Chain collaborators.
//!
//! The relayer never re-implements chain state logic; it talks to two
//! narrow interfaces:
//! - [`CompressionRpc`]: fetch a compressed deposit account and its Merkle
//!   inclusion proof from the photon indexer.
//! - [`WithdrawalSubmitter`]: land the withdrawal proof on the destination
//!   chain and wait for confirmation.
//!
//! Both are traits so the pipeline can run against test doubles.

use crate::error::{AppError, AppResult};
use crate::prover::ProofBundle;
use crate::httpc;
use crate::nullifier::Nullifier;
use crate::types::DepositEvent;
use crate::validation::parse_b58_32;
use base64::engine::general_purpose;
use base64::Engine as _;
use borsh::BorshSerialize;
use serde::Deserialize;
use solana_client::rpc_client::RpcClient;
use solana_sdk::{
    hash::hash as solana_sha256,
    instruction::{AccountMeta, Instruction},
    message::Message,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Compressed deposit account as the relayer needs it.
#[derive(Debug, Clone)]
pub struct CompressedAccount {
    pub hash: [u8; 32],
    pub owner: Pubkey,
    pub leaf_index: u64,
    /// Raw Borsh-serialized record bytes.
    pub data: Vec<u8>,
    /// Content hash the indexer computed for `data`.
    pub data_hash: [u8; 32],
}

/// Merkle inclusion proof for a compressed account hash.
#[derive(Debug, Clone)]
pub struct AccountProof {
    pub hash: [u8; 32],
    pub root: [u8; 32],
    pub leaf_index: u64,
    /// Sibling hashes, leaf-to-root order.
    pub siblings: Vec<[u8; 32]>,
}

pub trait CompressionRpc: Send + Sync {
    fn fetch_compressed_account(&self, address: &Pubkey) -> AppResult<CompressedAccount>;
    fn fetch_account_proof(&self, hash: &[u8; 32]) -> AppResult<AccountProof>;
}

pub trait WithdrawalSubmitter: Send + Sync {
    /// Submit the withdrawal-proof transaction; returns the signature.
    fn submit_withdrawal(
        &self,
        event: &DepositEvent,
        nullifier: &Nullifier,
        new_root: &[u8; 32],
        proof: &ProofBundle,
    ) -> AppResult<String>;

    /// Block until the signature is confirmed or the timeout elapses.
    fn confirm_withdrawal(&self, signature: &str, timeout: Duration) -> AppResult<()>;
}

// ---------------------------------------------------------------------
// Photon JSON-RPC client
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ValueWrap<T> {
    value: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompressedAccountWire {
    hash: String,
    owner: String,
    leaf_index: u64,
    data: Option<AccountDataWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountDataWire {
    data: String,
    data_hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountProofWire {
    hash: String,
    root: String,
    leaf_index: u64,
    proof: Vec<String>,
}

/// Client for the photon compression API.
pub struct PhotonClient {
    host: String,
    port: u16,
    prefix: String,
    timeout: Duration,
}

impl PhotonClient {
    pub fn new(base: &str, timeout: Duration) -> AppResult<Self> {
        let (host, port, prefix) = httpc::parse_http_base(base)?;
        Ok(PhotonClient {
            host,
            port,
            prefix,
            timeout,
        })
    }

    fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> AppResult<T> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let path = if self.prefix.is_empty() {
            "/".to_string()
        } else {
            self.prefix.clone()
        };
        let (status, resp) = httpc::http_post_json(
            &self.host,
            self.port,
            &path,
            body.to_string().as_bytes(),
            self.timeout,
        )?;
        if status != 200 {
            return Err(AppError::BadGateway(format!(
                "compression rpc {method} returned {status}: {}",
                String::from_utf8_lossy(&resp[..resp.len().min(400)])
            )));
        }
        let envelope: RpcEnvelope<ValueWrap<T>> = serde_json::from_slice(&resp)
            .map_err(|e| AppError::BadGateway(format!("compression rpc {method} bad json: {e}")))?;
        if let Some(err) = envelope.error {
            return Err(AppError::BadGateway(format!(
                "compression rpc {method} error {}: {}",
                err.code, err.message
            )));
        }
        envelope
            .result
            .and_then(|w| w.value)
            .ok_or_else(|| AppError::BadGateway(format!("compression rpc {method} empty result")))
    }
}

impl CompressionRpc for PhotonClient {
    fn fetch_compressed_account(&self, address: &Pubkey) -> AppResult<CompressedAccount> {
        let wire: CompressedAccountWire = self.call(
            "getCompressedAccount",
            serde_json::json!({ "address": address.to_string() }),
        )?;
        let data = wire.data.ok_or_else(|| {
            AppError::WitnessBuild(format!(
                "compressed account {address} has no data"
            ))
        })?;
        Ok(CompressedAccount {
            hash: parse_b58_32("account.hash", &wire.hash)?,
            owner: Pubkey::from_str(&wire.owner)
                .map_err(|_| AppError::Encoding("account.owner is not a pubkey".into()))?,
            leaf_index: wire.leaf_index,
            data: general_purpose::STANDARD
                .decode(data.data.as_bytes())
                .map_err(|_| AppError::Encoding("account.data is not base64".into()))?,
            data_hash: parse_b58_32("account.dataHash", &data.data_hash)?,
        })
    }

    fn fetch_account_proof(&self, hash: &[u8; 32]) -> AppResult<AccountProof> {
        let wire: AccountProofWire = self.call(
            "getCompressedAccountProof",
            serde_json::json!({ "hash": bs58::encode(hash).into_string() }),
        )?;
        let mut siblings = Vec::with_capacity(wire.proof.len());
        for (i, s) in wire.proof.iter().enumerate() {
            siblings.push(parse_b58_32(&format!("proof[{i}]"), s)?);
        }
        Ok(AccountProof {
            hash: parse_b58_32("proof.hash", &wire.hash)?,
            root: parse_b58_32("proof.root", &wire.root)?,
            leaf_index: wire.leaf_index,
            siblings,
        })
    }
}

// ---------------------------------------------------------------------
// Solana withdrawal submitter
// ---------------------------------------------------------------------

/// Anchor instruction discriminator = first 8 bytes of sha256("global:<name>")
pub fn anchor_discriminator(name: &str) -> [u8; 8] {
    let preimage = format!("global:{name}");
    let h = solana_sha256(preimage.as_bytes()).to_bytes();
    let mut out = [0u8; 8];
    out.copy_from_slice(&h[..8]);
    out
}

/// Borsh args for `init_withdrawal_proof_account` (field order is the
/// on-chain layout).
#[derive(BorshSerialize)]
struct WithdrawalProofArgs {
    withdrawal_id: u128,
    proof_a: [u8; 64],
    proof_b: [u8; 128],
    proof_c: [u8; 64],
    nullifier: [u8; 32],
    new_root: [u8; 32],
}

/// Submits the withdrawal proof to the Solana bridge program.
pub struct SolanaSubmitter {
    rpc: Arc<RpcClient>,
    program_id: Pubkey,
    payer: Arc<Keypair>,
}

impl SolanaSubmitter {
    pub fn new(rpc: Arc<RpcClient>, program_id: Pubkey, payer: Arc<Keypair>) -> Self {
        SolanaSubmitter {
            rpc,
            program_id,
            payer,
        }
    }

    fn withdrawal_proof_pda(&self, withdrawal_id: u128) -> Pubkey {
        Pubkey::find_program_address(
            &[b"withdrawal_proof", withdrawal_id.to_le_bytes().as_ref()],
            &self.program_id,
        )
        .0
    }
}

impl WithdrawalSubmitter for SolanaSubmitter {
    fn submit_withdrawal(
        &self,
        event: &DepositEvent,
        nullifier: &Nullifier,
        new_root: &[u8; 32],
        proof: &ProofBundle,
    ) -> AppResult<String> {
        let (proof_a, proof_b, proof_c) = proof.proof.to_solana_bytes()?;
        let args = WithdrawalProofArgs {
            withdrawal_id: event.deposit_id,
            proof_a,
            proof_b,
            proof_c,
            nullifier: *nullifier.as_bytes(),
            new_root: *new_root,
        };
        let mut data = anchor_discriminator("init_withdrawal_proof_account").to_vec();
        args.serialize(&mut data)
            .map_err(|e| AppError::Internal(format!("borsh encode withdrawal args: {e}")))?;

        let ix = Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(self.payer.pubkey(), true),
                AccountMeta::new(self.withdrawal_proof_pda(event.deposit_id), false),
                AccountMeta::new_readonly(solana_sdk::system_program::id(), false),
            ],
            data,
        };

        let bh = self
            .rpc
            .get_latest_blockhash()
            .map_err(|e| AppError::BadGateway(format!("blockhash failed: {e}")))?;
        let mut tx = Transaction::new_unsigned(Message::new(&[ix], Some(&self.payer.pubkey())));
        tx.try_sign(&[self.payer.as_ref()], bh)
            .map_err(|e| AppError::BadGateway(format!("sign tx failed: {e}")))?;
        // Submit only; confirmation is a separate bounded wait so the caller
        // controls the timeout/retry policy around the nullifier insert.
        let sig = self
            .rpc
            .send_transaction(&tx)
            .map_err(|e| AppError::BadGateway(format!("send tx failed: {e}")))?;
        Ok(sig.to_string())
    }

    fn confirm_withdrawal(&self, signature: &str, timeout: Duration) -> AppResult<()> {
        let sig = Signature::from_str(signature)
            .map_err(|_| AppError::Internal(format!("invalid signature: {signature}")))?;
        let t0 = Instant::now();
        let mut backoff_ms: u64 = 250;
        loop {
            if t0.elapsed() > timeout {
                return Err(AppError::ChainTimeout(format!(
                    "tx confirmation timeout after {}s",
                    timeout.as_secs()
                )));
            }

            let st = self
                .rpc
                .get_signature_statuses(&[sig])
                .map_err(|e| AppError::BadGateway(format!("get_signature_statuses failed: {e}")))?;

            if let Some(s0) = st.value.first().and_then(|v| v.as_ref()) {
                if let Some(err) = &s0.err {
                    warn!(?err, "withdrawal tx failed while confirming");
                    return Err(AppError::BadGateway("withdrawal tx failed".into()));
                }
                use solana_transaction_status::TransactionConfirmationStatus;
                let ok = matches!(
                    s0.confirmation_status,
                    Some(
                        TransactionConfirmationStatus::Confirmed
                            | TransactionConfirmationStatus::Finalized
                    )
                ) || s0.confirmations.is_none();
                if ok {
                    return Ok(());
                }
            }

            std::thread::sleep(Duration::from_millis(backoff_ms));
            backoff_ms = (backoff_ms.saturating_mul(2)).min(2_000);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminator_is_stable() {
        // sha256("global:init_withdrawal_proof_account")[0..8] is a fixed
        // on-chain constant; any drift here breaks instruction dispatch.
        let d1 = anchor_discriminator("init_withdrawal_proof_account");
        let d2 = anchor_discriminator("init_withdrawal_proof_account");
        assert_eq!(d1, d2);
        assert_ne!(d1, anchor_discriminator("withdraw"));
    }

    #[test]
    fn compressed_account_wire_parses() {
        let owner = Pubkey::new_unique();
        let hash = bs58::encode([7u8; 32]).into_string();
        let data_hash = bs58::encode([9u8; 32]).into_string();
        let json = serde_json::json!({
            "hash": hash,
            "owner": owner.to_string(),
            "leafIndex": 12,
            "data": { "data": general_purpose::STANDARD.encode([1u8, 2, 3]), "dataHash": data_hash },
        });
        let wire: CompressedAccountWire = serde_json::from_value(json).unwrap();
        assert_eq!(wire.leaf_index, 12);
        assert_eq!(wire.data.as_ref().unwrap().data_hash, data_hash);
    }

    #[test]
    fn proof_wire_parses() {
        let json = serde_json::json!({
            "hash": bs58::encode([1u8; 32]).into_string(),
            "root": bs58::encode([2u8; 32]).into_string(),
            "leafIndex": 5,
            "proof": [bs58::encode([3u8; 32]).into_string()],
        });
        let wire: AccountProofWire = serde_json::from_value(json).unwrap();
        assert_eq!(wire.leaf_index, 5);
        assert_eq!(wire.proof.len(), 1);
    }
}
