//! Circuit witness builders.
//!
//! These assemble the exact JSON objects the proving service consumes. The
//! encodings here are load-bearing: a single byte-order or padding slip
//! produces an unsatisfiable circuit, not a type error, so every step
//! validates rather than coerces.

use crate::chain::{AccountProof, CompressedAccount};
use crate::constants::{NULLIFIER_TREE_HEIGHT, STATE_TREE_DEPTH};
use crate::error::{AppError, AppResult};
use crate::field::{self, FieldInput};
use crate::nullifier::Nullifier;
use crate::tracker::NonMembershipProof;
use crate::types::{DepositEvent, DepositRecord};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Witness for the deposit-inclusion circuit. Key names are the circuit's
/// input signal names; the public/private grouping is documentation only.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositCircuitInputs {
    // public
    pub state_root: String,
    pub amount: String,
    pub dest_chain_id: String,
    pub dest_chain_addr: String,

    // private
    pub account_hash: String,
    pub leaf_index: String,
    pub merkle_proof: Vec<String>,
    pub path_indices: Vec<String>,
    pub owner: String,
    pub source_chain_id: String,
    pub mint: String,
    pub timestamp: String,
    pub deposit_id: String,
    pub data_hash: String,
}

/// Witness for the withdrawal circuit: the deposit tuple plus the
/// nullifier non-membership data.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalCircuitInputs {
    pub depositor: String,
    pub source_chain_id: String,
    pub dest_chain_id: String,
    pub dest_chain_addr: String,
    pub dest_chain_mint_addr: String,
    pub token_mint: String,
    pub amount: String,
    pub timestamp: String,
    pub deposit_id: String,

    #[serde(rename = "pre_val")]
    pub pre_val: String,
    #[serde(rename = "pre_next")]
    pub pre_next: String,
    pub path: Vec<String>,
    pub dirs: Vec<String>,
    #[serde(rename = "old_root")]
    pub old_root: String,
    pub nullifier: String,
}

/// Deposit witness plus the limb-split commitments used for logging and
/// the pre-prove self-check.
#[derive(Debug, Clone)]
pub struct DepositWitnessBundle {
    pub inputs: DepositCircuitInputs,
    pub leaf_hash: [u8; 32],
    pub leaf_limbs: (String, String),
    pub root_limbs: (String, String),
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Leaf hash the source chain's state tree uses for deposit accounts:
/// `sha256(owner_be32 ++ 8-byte zero lamports field ++ content_hash)`.
///
/// This layout is an integration contract with the chain's own leaf
/// convention; it is mirrored here bit-for-bit, not derived.
pub fn deposit_leaf_hash(owner_be: &[u8; 32], content_hash: &[u8; 32]) -> [u8; 32] {
    let lamports = [0u8; 8];
    let mut buf = Vec::with_capacity(32 + 8 + 32);
    buf.extend_from_slice(owner_be);
    buf.extend_from_slice(&lamports);
    buf.extend_from_slice(content_hash);
    sha256(&buf)
}

/// Assemble the deposit-circuit witness from a decoded record, its
/// inclusion proof and the raw account bytes.
pub fn build_deposit_witness(
    record: &DepositRecord,
    account: &CompressedAccount,
    proof: &AccountProof,
) -> AppResult<DepositWitnessBundle> {
    let deposit_id = record.deposit_id;

    if account.data.is_empty() {
        return Err(AppError::WitnessBuild(format!(
            "deposit {deposit_id}: compressed account has no data"
        )));
    }
    if account.hash != proof.hash {
        return Err(AppError::WitnessBuild(format!(
            "deposit {deposit_id}: account hash does not match proof hash"
        )));
    }
    if record.timestamp < 0 {
        return Err(AppError::WitnessBuild(format!(
            "deposit {deposit_id}: negative timestamp {}",
            record.timestamp
        )));
    }

    let content_hash = sha256(&account.data);
    if content_hash != account.data_hash {
        // The indexer hashes account data in its own domain; the circuit
        // recomputes sha256 over the raw bytes. Both are kept, this is not
        // an error.
        debug!(
            deposit_id,
            "indexer data hash differs from sha256 content hash"
        );
    }
    let leaf_hash = deposit_leaf_hash(&account.owner.to_bytes(), &content_hash);
    let leaf_limbs = field::split_to_limbs(&leaf_hash)?;
    let root_limbs = field::split_to_limbs(&proof.root)?;
    // Limb round-trip guard: a split slip here would only surface later as
    // an unsatisfiable circuit.
    if field::combine_limbs(&root_limbs.0, &root_limbs.1)? != proof.root {
        return Err(AppError::Internal(format!(
            "deposit {deposit_id}: root limb split does not round-trip"
        )));
    }

    let merkle_proof = field::pad_field_array(
        proof
            .siblings
            .iter()
            .map(|s| field::bytes_to_field(s))
            .collect(),
        STATE_TREE_DEPTH,
    )
    .map_err(|e| match e {
        AppError::WitnessBuild(m) => AppError::WitnessBuild(format!("deposit {deposit_id}: {m}")),
        other => other,
    })?;

    let path_indices = field::path_indices(proof.leaf_index, STATE_TREE_DEPTH)
        .into_iter()
        .map(|b| b.to_string())
        .collect();

    let inputs = DepositCircuitInputs {
        state_root: field::encode_as_field(FieldInput::Bytes(&proof.root))?,
        amount: record.amount.to_string(),
        dest_chain_id: record.dest_chain_id.to_string(),
        dest_chain_addr: field::encode_as_field(FieldInput::Text(&record.dest_chain_addr))?,

        account_hash: field::encode_as_field(FieldInput::Bytes(&proof.hash))?,
        leaf_index: proof.leaf_index.to_string(),
        merkle_proof,
        path_indices,
        owner: field::encode_as_field(FieldInput::Base58(&account.owner.to_string()))?,
        source_chain_id: record.source_chain_id.to_string(),
        mint: field::encode_as_field(FieldInput::Base58(&record.mint.to_string()))?,
        timestamp: record.timestamp.to_string(),
        deposit_id: record.deposit_id.to_string(),
        data_hash: field::encode_as_field(FieldInput::Bytes(&content_hash))?,
    };

    // Whole-value signals must fit the scalar field outright; hashes are
    // covered by their limb splits above.
    for (label, v) in [
        ("amount", &inputs.amount),
        ("destChainId", &inputs.dest_chain_id),
        ("sourceChainId", &inputs.source_chain_id),
        ("timestamp", &inputs.timestamp),
        ("depositId", &inputs.deposit_id),
        ("leafIndex", &inputs.leaf_index),
    ] {
        field::ensure_field_range(label, v)
            .map_err(|e| AppError::WitnessBuild(format!("deposit {deposit_id}: {e}")))?;
    }

    Ok(DepositWitnessBundle {
        inputs,
        leaf_hash,
        leaf_limbs,
        root_limbs,
    })
}

/// Assemble the withdrawal-circuit witness from the deposit tuple, the
/// tracker's non-membership proof and the derived nullifier.
pub fn build_withdrawal_witness(
    event: &DepositEvent,
    non_membership: &NonMembershipProof,
    nullifier: &Nullifier,
) -> AppResult<WithdrawalCircuitInputs> {
    if event.timestamp < 0 {
        return Err(AppError::WitnessBuild(format!(
            "deposit {}: negative timestamp {}",
            event.deposit_id, event.timestamp
        )));
    }
    if non_membership.siblings.len() != NULLIFIER_TREE_HEIGHT
        || non_membership.dirs.len() != NULLIFIER_TREE_HEIGHT
    {
        return Err(AppError::WitnessBuild(format!(
            "deposit {}: non-membership path has {} siblings / {} dirs (expected {})",
            event.deposit_id,
            non_membership.siblings.len(),
            non_membership.dirs.len(),
            NULLIFIER_TREE_HEIGHT
        )));
    }
    // Make sure the root implied by (low leaf, siblings, dirs) matches the
    // tracker's root. If this fails, the circuit will also fail.
    if non_membership.recompute_root()? != non_membership.root {
        return Err(AppError::WitnessBuild(format!(
            "deposit {}: non-membership path does not reproduce the tracker root",
            event.deposit_id
        )));
    }

    Ok(WithdrawalCircuitInputs {
        depositor: field::address_to_field(&event.depositor)?,
        source_chain_id: event.source_chain_id.to_string(),
        dest_chain_id: event.dest_chain_id.to_string(),
        dest_chain_addr: field::address_to_field(&event.dest_chain_addr)?,
        dest_chain_mint_addr: field::address_to_field(&event.dest_chain_mint_addr)?,
        token_mint: field::address_to_field(&event.token_mint)?,
        amount: event.amount.to_string(),
        timestamp: event.timestamp.to_string(),
        deposit_id: event.deposit_id.to_string(),

        pre_val: non_membership.low_value_decimal(),
        pre_next: non_membership.low_next_value_decimal(),
        path: non_membership.siblings_decimal(),
        dirs: non_membership
            .dirs
            .iter()
            .map(|b| b.to_string())
            .collect(),
        old_root: non_membership.root_decimal(),
        nullifier: nullifier.to_decimal(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::IndexedTree;
    use solana_sdk::pubkey::Pubkey;

    fn sample_record(owner: Pubkey) -> DepositRecord {
        DepositRecord {
            owner,
            source_chain_id: 1,
            dest_chain_id: 31337,
            dest_chain_addr: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".to_string(),
            dest_chain_mint_addr: "0x322813Fd9A801c5507c9de605d63CEA4f2CE6c44".to_string(),
            mint: Pubkey::new_unique(),
            amount: 100,
            timestamp: 1750519384,
            deposit_id: 1,
        }
    }

    fn sample_account_and_proof(owner: Pubkey, siblings: usize) -> (CompressedAccount, AccountProof) {
        let data = vec![1u8, 2, 3, 4];
        let hash = [5u8; 32];
        let account = CompressedAccount {
            hash,
            owner,
            leaf_index: 3,
            data: data.clone(),
            data_hash: sha256(&data),
        };
        let proof = AccountProof {
            hash,
            root: [9u8; 32],
            leaf_index: 3,
            siblings: (0..siblings).map(|i| [i as u8 + 1; 32]).collect(),
        };
        (account, proof)
    }

    #[test]
    fn deposit_witness_pads_to_tree_depth() {
        let owner = Pubkey::new_unique();
        let (account, proof) = sample_account_and_proof(owner, 3);
        let bundle = build_deposit_witness(&sample_record(owner), &account, &proof).unwrap();

        let w = &bundle.inputs;
        assert_eq!(w.merkle_proof.len(), 26);
        assert!(w.merkle_proof[3..].iter().all(|x| x == "0"));
        assert_eq!(w.path_indices.len(), 26);
        // leaf_index 3 -> bits 1,1,0,0,...
        assert_eq!(w.path_indices[0], "1");
        assert_eq!(w.path_indices[1], "1");
        assert_eq!(w.path_indices[2], "0");
    }

    #[test]
    fn deposit_witness_uses_the_circuit_key_names() {
        let owner = Pubkey::new_unique();
        let (account, proof) = sample_account_and_proof(owner, 2);
        let bundle = build_deposit_witness(&sample_record(owner), &account, &proof).unwrap();

        let v = serde_json::to_value(&bundle.inputs).unwrap();
        let obj = v.as_object().unwrap();
        for key in [
            "stateRoot",
            "amount",
            "destChainId",
            "destChainAddr",
            "accountHash",
            "leafIndex",
            "merkleProof",
            "pathIndices",
            "owner",
            "sourceChainId",
            "mint",
            "timestamp",
            "depositId",
            "dataHash",
        ] {
            assert!(obj.contains_key(key), "missing witness key {key}");
        }
        assert_eq!(obj.len(), 14);
    }

    #[test]
    fn leaf_hash_layout_is_owner_lamports_content() {
        let owner = [0xabu8; 32];
        let content = sha256(b"payload");
        let mut expected_buf = Vec::new();
        expected_buf.extend_from_slice(&owner);
        expected_buf.extend_from_slice(&[0u8; 8]);
        expected_buf.extend_from_slice(&content);
        assert_eq!(deposit_leaf_hash(&owner, &content), sha256(&expected_buf));
    }

    #[test]
    fn oversized_proof_is_fatal() {
        let owner = Pubkey::new_unique();
        let (account, proof) = sample_account_and_proof(owner, 27);
        assert!(matches!(
            build_deposit_witness(&sample_record(owner), &account, &proof),
            Err(AppError::WitnessBuild(_))
        ));
    }

    #[test]
    fn missing_account_data_is_fatal() {
        let owner = Pubkey::new_unique();
        let (mut account, proof) = sample_account_and_proof(owner, 2);
        account.data.clear();
        let err = build_deposit_witness(&sample_record(owner), &account, &proof).unwrap_err();
        match err {
            AppError::WitnessBuild(m) => assert!(m.contains("deposit 1")),
            other => panic!("expected WitnessBuild, got {other:?}"),
        }
    }

    #[test]
    fn mismatched_proof_hash_is_fatal() {
        let owner = Pubkey::new_unique();
        let (account, mut proof) = sample_account_and_proof(owner, 2);
        proof.hash = [0xeeu8; 32];
        assert!(matches!(
            build_deposit_witness(&sample_record(owner), &account, &proof),
            Err(AppError::WitnessBuild(_))
        ));
    }

    #[test]
    fn withdrawal_witness_carries_the_non_membership_fields() {
        let mut tree = IndexedTree::new().unwrap();
        let mut spent = [0u8; 32];
        spent[31] = 10;
        tree.insert(&spent).unwrap();

        let mut candidate = [0u8; 32];
        candidate[31] = 42;
        let nm = tree.non_membership_proof(&candidate).unwrap();

        let event = DepositEvent {
            depositor: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".to_string(),
            source_chain_id: 31337,
            dest_chain_id: 1,
            dest_chain_addr: "7fD1uH15XByFTnGjDZr5tFQjxtaWBZUYpecXeesr1jom".to_string(),
            dest_chain_mint_addr: "7fD1uH15XByFTnGjDZr5tFQjxtaWBZUYpecXeesr1jom".to_string(),
            token_mint: "0x322813Fd9A801c5507c9de605d63CEA4f2CE6c44".to_string(),
            amount: 100,
            timestamp: 1750519384,
            deposit_id: 2,
        };
        let nf = crate::nullifier::derive(&event).unwrap();
        let w = build_withdrawal_witness(&event, &nm, &nf).unwrap();

        assert_eq!(w.pre_val, "10");
        assert_eq!(w.pre_next, "0"); // 42 is above the current maximum
        assert_eq!(w.path.len(), NULLIFIER_TREE_HEIGHT);
        assert_eq!(w.dirs.len(), NULLIFIER_TREE_HEIGHT);
        assert!(w.dirs.iter().all(|d| d == "0" || d == "1"));
        assert_eq!(w.nullifier, nf.to_decimal());

        let v = serde_json::to_value(&w).unwrap();
        let obj = v.as_object().unwrap();
        for key in [
            "depositor",
            "sourceChainId",
            "destChainId",
            "destChainAddr",
            "destChainMintAddr",
            "tokenMint",
            "amount",
            "timestamp",
            "depositId",
            "pre_val",
            "pre_next",
            "path",
            "dirs",
            "old_root",
            "nullifier",
        ] {
            assert!(obj.contains_key(key), "missing witness key {key}");
        }
    }
}
