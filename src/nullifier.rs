//! Nullifier derivation.
//!
//! A nullifier is the Poseidon hash of the full deposit tuple in a fixed
//! order. The same event always yields the same nullifier no matter which
//! chain observed it or which process computed it, which is what lets the
//! indexed tracker use it as the double-withdrawal guard.

use crate::error::AppResult;
use crate::field::{self, FieldInput};
use crate::poseidon;
use crate::types::DepositEvent;
use num_bigint::BigUint;

/// A derived nullifier: a single canonical field element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nullifier(pub [u8; 32]);

impl Nullifier {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Decimal field string, the form circuits and witness JSON consume.
    pub fn to_decimal(&self) -> String {
        BigUint::from_bytes_be(&self.0).to_str_radix(10)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Derive the nullifier for a deposit event.
///
/// Preimage order: (depositor, source_chain_id, dest_chain_id,
/// dest_chain_addr, dest_chain_mint_addr, token_mint, amount, timestamp,
/// deposit_id). Addresses auto-detect base58 vs hex; integers encode
/// directly. Each element is reduced into the scalar field before
/// hashing, matching what the circuit sees.
pub fn derive(event: &DepositEvent) -> AppResult<Nullifier> {
    let timestamp = u64::try_from(event.timestamp).map_err(|_| {
        crate::error::AppError::Encoding(format!(
            "deposit {}: negative timestamp {}",
            event.deposit_id, event.timestamp
        ))
    })?;
    let encoded: [String; 9] = [
        field::encode_as_field(FieldInput::Base58(&event.depositor))?,
        field::encode_as_field(FieldInput::Uint(event.source_chain_id as u128))?,
        field::encode_as_field(FieldInput::Uint(event.dest_chain_id as u128))?,
        field::encode_as_field(FieldInput::Base58(&event.dest_chain_addr))?,
        field::encode_as_field(FieldInput::Base58(&event.dest_chain_mint_addr))?,
        field::encode_as_field(FieldInput::Base58(&event.token_mint))?,
        field::encode_as_field(FieldInput::Uint(event.amount as u128))?,
        field::encode_as_field(FieldInput::Uint(timestamp as u128))?,
        field::encode_as_field(FieldInput::Uint(event.deposit_id))?,
    ];

    let mut elements = Vec::with_capacity(encoded.len());
    for dec in &encoded {
        elements.push(poseidon::reduced(dec)?);
    }
    let refs: Vec<&[u8; 32]> = elements.iter().collect();
    Ok(Nullifier(poseidon::hashv(&refs)?))
}
