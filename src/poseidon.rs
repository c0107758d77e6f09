//! Poseidon hashing over the BN254 scalar field.
//!
//! This is the hash the bridge circuits implement natively, so every value
//! that ends up inside a proof (nullifiers, indexed-tree leaves and nodes)
//! must be hashed with it, not with a general-purpose digest. Inputs and
//! outputs are 32-byte big-endian field elements.

use crate::error::{AppError, AppResult};
use crate::field;
use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonBytesHasher};
use num_bigint::BigUint;

/// Hash a fixed-arity tuple of field elements.
///
/// Every input must already be a canonical field element (strictly below
/// the modulus); use [`reduced`] first for values that may exceed it.
pub fn hashv(inputs: &[&[u8; 32]]) -> AppResult<[u8; 32]> {
    let mut hasher = Poseidon::<Fr>::new_circom(inputs.len())
        .map_err(|e| AppError::Internal(format!("poseidon init ({} inputs): {e}", inputs.len())))?;
    let refs: Vec<&[u8]> = inputs.iter().map(|b| b.as_slice()).collect();
    hasher
        .hash_bytes_be(&refs)
        .map_err(|e| AppError::Internal(format!("poseidon hash: {e}")))
}

/// Canonical 32-byte big-endian field element of a decimal string,
/// reduced modulo the scalar field.
///
/// Chain addresses are arbitrary 256-bit values and may exceed the
/// modulus; the circuit-side hash sees them reduced, so the off-chain
/// derivation must reduce identically.
pub fn reduced(dec: &str) -> AppResult<[u8; 32]> {
    let n = dec
        .parse::<BigUint>()
        .map_err(|_| AppError::Encoding(format!("not a decimal field value: {dec}")))?;
    let n = n % field::field_modulus();
    let mut out = [0u8; 32];
    let b = n.to_bytes_be();
    out[32 - b.len()..].copy_from_slice(&b);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduced_is_identity_below_modulus() {
        let x = reduced("255").unwrap();
        let mut expected = [0u8; 32];
        expected[31] = 255;
        assert_eq!(x, expected);
    }

    #[test]
    fn reduced_wraps_at_modulus() {
        let r = field::field_modulus().to_str_radix(10);
        assert_eq!(reduced(&r).unwrap(), [0u8; 32]);
    }

    #[test]
    fn hash_is_deterministic_and_input_sensitive() {
        let a = reduced("1").unwrap();
        let b = reduced("2").unwrap();
        let h1 = hashv(&[&a, &b]).unwrap();
        let h2 = hashv(&[&a, &b]).unwrap();
        let h3 = hashv(&[&b, &a]).unwrap();
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }
}
