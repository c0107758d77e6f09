//! Conversions between chain-native value representations and the decimal
//! field-element strings the circuits consume.
//!
//! Everything here is big-endian: a byte buffer encodes the unsigned
//! integer you get by reading it most-significant byte first. 256-bit
//! hashes do not fit the BN254 scalar field, so they are carried as two
//! 128-bit limbs (`split_to_limbs`).

use crate::constants::BN254_FR_MODULUS_DEC;
use crate::error::AppError;
use num_bigint::BigUint;
use std::sync::OnceLock;

/// A value destined for a circuit input, in whatever representation the
/// chain handed it to us.
#[derive(Debug, Clone)]
pub enum FieldInput<'a> {
    /// `0x`-prefixed (or raw) hex string.
    Hex(&'a str),
    /// Base58-encoded chain address (hex fallback if decoding fails).
    Base58(&'a str),
    /// Free-form string: `0x..` is hex, valid base58 is an address,
    /// anything else is taken as raw UTF-8 bytes.
    Text(&'a str),
    Bytes(&'a [u8]),
    Uint(u128),
}

/// BN254 scalar field modulus (the circuits' native field).
pub fn field_modulus() -> &'static BigUint {
    static MODULUS: OnceLock<BigUint> = OnceLock::new();
    MODULUS.get_or_init(|| {
        BigUint::parse_bytes(BN254_FR_MODULUS_DEC, 10).expect("bn254 fr modulus parse")
    })
}

/// Convert any supported representation into a decimal field string.
pub fn encode_as_field(input: FieldInput<'_>) -> Result<String, AppError> {
    match input {
        FieldInput::Hex(s) => hex_to_field(s),
        FieldInput::Base58(s) => address_to_field(s),
        FieldInput::Text(s) => string_to_field(s),
        FieldInput::Bytes(b) => Ok(bytes_to_field(b)),
        FieldInput::Uint(n) => Ok(n.to_string()),
    }
}

/// Decimal string of the big-endian integer a hex string encodes.
///
/// Accepts an optional `0x` prefix and odd-length digit strings
/// (`"0x0"` encodes to `"0"`).
pub fn hex_to_field(hex_str: &str) -> Result<String, AppError> {
    let clean = hex_str.trim().trim_start_matches("0x");
    if clean.is_empty() {
        return Ok("0".to_string());
    }
    let padded;
    let digits = if clean.len() % 2 == 1 {
        padded = format!("0{clean}");
        padded.as_str()
    } else {
        clean
    };
    let bytes = hex::decode(digits)
        .map_err(|_| AppError::Encoding(format!("invalid hex string: {hex_str}")))?;
    Ok(bytes_to_field(&bytes))
}

/// Chain address to field: `0x..` is hex, otherwise base58, otherwise a
/// last-chance raw-hex parse. Fails only when all three do.
pub fn address_to_field(addr: &str) -> Result<String, AppError> {
    let t = addr.trim();
    if t.starts_with("0x") {
        return encode_as_field(FieldInput::Hex(t));
    }
    if let Ok(bytes) = bs58::decode(t).into_vec() {
        return Ok(bytes_to_field(&bytes));
    }
    hex_to_field(t).map_err(|_| AppError::Encoding(format!("address is neither base58 nor hex: {addr}")))
}

/// Free-form string to field: `0x..` is hex, valid base58 is an address,
/// anything else is interpreted as raw UTF-8 bytes.
pub fn string_to_field(s: &str) -> Result<String, AppError> {
    let t = s.trim();
    if t.starts_with("0x") {
        return hex_to_field(t);
    }
    if !t.is_empty() {
        if let Ok(bytes) = bs58::decode(t).into_vec() {
            return Ok(bytes_to_field(&bytes));
        }
    }
    Ok(bytes_to_field(t.as_bytes()))
}

/// Big-endian unsigned integer of a byte buffer, base 10. Empty buffers
/// encode to `"0"`.
pub fn bytes_to_field(bytes: &[u8]) -> String {
    BigUint::from_bytes_be(bytes).to_str_radix(10)
}

/// Check that an already-encoded decimal value fits the scalar field.
///
/// Whole-value inputs (amounts, chain ids, timestamps, deposit ids) must
/// pass this; 256-bit hashes are expected to go through `split_to_limbs`
/// instead.
pub fn ensure_field_range(label: &str, dec: &str) -> Result<(), AppError> {
    let n = dec
        .parse::<BigUint>()
        .map_err(|_| AppError::Encoding(format!("{label} is not a decimal integer: {dec}")))?;
    if &n >= field_modulus() {
        return Err(AppError::Encoding(format!(
            "{label} exceeds the scalar field modulus: {dec}"
        )));
    }
    Ok(())
}

/// Split a 32-byte big-endian value into (hi, lo) 128-bit decimal limbs.
pub fn split_to_limbs(bytes: &[u8]) -> Result<(String, String), AppError> {
    if bytes.len() != 32 {
        return Err(AppError::Size(format!(
            "limb split expects 32 bytes, got {}",
            bytes.len()
        )));
    }
    let hi = BigUint::from_bytes_be(&bytes[0..16]).to_str_radix(10);
    let lo = BigUint::from_bytes_be(&bytes[16..32]).to_str_radix(10);
    Ok((hi, lo))
}

/// Inverse of `split_to_limbs`: `combine_limbs(split_to_limbs(x)) == x`.
pub fn combine_limbs(hi: &str, lo: &str) -> Result<[u8; 32], AppError> {
    let mut out = [0u8; 32];
    for (label, dec, range) in [("hi", hi, 0..16usize), ("lo", lo, 16..32usize)] {
        let n = dec
            .parse::<BigUint>()
            .map_err(|_| AppError::Encoding(format!("limb {label} is not decimal: {dec}")))?;
        let b = n.to_bytes_be();
        if b.len() > 16 {
            return Err(AppError::Size(format!(
                "limb {label} exceeds 128 bits: {dec}"
            )));
        }
        out[range.end - b.len()..range.end].copy_from_slice(&b);
    }
    Ok(out)
}

/// Direction bits for a leaf position, least-significant bit first
/// (level closest to the leaf). 0 = current node is the left child.
///
/// A `leaf_index >= 2^depth` still yields a valid bit array (higher bits
/// are simply zero); callers must keep indices within tree capacity for
/// the proof to mean anything.
pub fn path_indices(leaf_index: u64, depth: usize) -> Vec<u8> {
    let mut bits = Vec::with_capacity(depth);
    let mut index = leaf_index;
    for _ in 0..depth {
        bits.push((index % 2) as u8);
        index /= 2;
    }
    bits
}

/// Zero-pad a field array up to the circuit's fixed length. Over-length
/// arrays are a fatal input error, never silently truncated.
pub fn pad_field_array(mut fields: Vec<String>, target: usize) -> Result<Vec<String>, AppError> {
    if fields.len() > target {
        return Err(AppError::WitnessBuild(format!(
            "proof array has {} elements, circuit accepts at most {target}",
            fields.len()
        )));
    }
    while fields.len() < target {
        fields.push("0".to_string());
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_zero_encodes_to_zero() {
        assert_eq!(hex_to_field("0x0").unwrap(), "0");
        assert_eq!(hex_to_field("0x").unwrap(), "0");
        assert_eq!(hex_to_field("0x00").unwrap(), "0");
    }

    #[test]
    fn hex_rejects_non_hex_digits() {
        assert!(matches!(
            hex_to_field("0xzz"),
            Err(AppError::Encoding(_))
        ));
    }

    #[test]
    fn hex_handles_odd_length_and_case() {
        assert_eq!(hex_to_field("0xff").unwrap(), "255");
        assert_eq!(hex_to_field("0xF").unwrap(), "15");
        assert_eq!(hex_to_field("0x100").unwrap(), "256");
    }

    #[test]
    fn empty_bytes_encode_to_zero() {
        assert_eq!(bytes_to_field(&[]), "0");
        assert_eq!(
            encode_as_field(FieldInput::Bytes(&[])).unwrap(),
            "0"
        );
    }

    #[test]
    fn base58_address_matches_manual_decode() {
        // WSOL mint: a well-known 32-byte base58 pubkey.
        let b58 = "So11111111111111111111111111111111111111112";
        let bytes = bs58::decode(b58).into_vec().unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(address_to_field(b58).unwrap(), bytes_to_field(&bytes));
    }

    #[test]
    fn evm_address_goes_through_hex() {
        let addr = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
        let expected = bytes_to_field(&hex::decode(&addr[2..]).unwrap());
        assert_eq!(address_to_field(addr).unwrap(), expected);
        // the auto-detecting string path agrees
        assert_eq!(string_to_field(addr).unwrap(), expected);
    }

    #[test]
    fn free_text_falls_back_to_utf8_bytes() {
        // '!' is not in the base58 alphabet, so this cannot be an address.
        let s = "hello!";
        assert_eq!(string_to_field(s).unwrap(), bytes_to_field(s.as_bytes()));
    }

    #[test]
    fn limb_split_of_max_hi_half() {
        // 2^128 - 1 followed by 16 zero bytes.
        let mut x = [0u8; 32];
        x[..16].copy_from_slice(&[0xff; 16]);
        let (hi, lo) = split_to_limbs(&x).unwrap();
        assert_eq!(hi, "340282366920938463463374607431768211455");
        assert_eq!(lo, "0");
    }

    #[test]
    fn limb_split_rejects_wrong_size() {
        assert!(matches!(
            split_to_limbs(&[0u8; 31]),
            Err(AppError::Size(_))
        ));
        assert!(matches!(split_to_limbs(&[0u8; 33]), Err(AppError::Size(_))));
    }

    #[test]
    fn limb_round_trip() {
        for x in [
            [0u8; 32],
            [0xff; 32],
            {
                let mut b = [0u8; 32];
                b[0] = 1;
                b[31] = 7;
                b[15] = 0xaa;
                b[16] = 0xbb;
                b
            },
        ] {
            let (hi, lo) = split_to_limbs(&x).unwrap();
            assert_eq!(combine_limbs(&hi, &lo).unwrap(), x);
        }
    }

    #[test]
    fn path_indices_are_lsb_first_bits() {
        // 5 = 0b101 -> leaf-to-root bits [1, 0, 1, 0]
        assert_eq!(path_indices(5, 4), vec![1, 0, 1, 0]);
        let bits = path_indices(u64::MAX, 26);
        assert_eq!(bits.len(), 26);
        assert!(bits.iter().all(|b| *b == 1));
        // indices past tree capacity produce zero high bits
        assert_eq!(path_indices(3, 5), vec![1, 1, 0, 0, 0]);
    }

    #[test]
    fn pad_field_array_pads_but_never_truncates() {
        let padded = pad_field_array(vec!["1".into(), "2".into()], 4).unwrap();
        assert_eq!(padded, vec!["1", "2", "0", "0"]);
        assert!(matches!(
            pad_field_array(vec!["1".into(); 5], 4),
            Err(AppError::WitnessBuild(_))
        ));
    }

    #[test]
    fn field_range_check() {
        assert!(ensure_field_range("amount", "100").is_ok());
        // r - 1 is fine, r is not
        let r = field_modulus().to_str_radix(10);
        let r_minus_1 = (field_modulus() - 1u8).to_str_radix(10);
        assert!(ensure_field_range("x", &r_minus_1).is_ok());
        assert!(matches!(
            ensure_field_range("x", &r),
            Err(AppError::Encoding(_))
        ));
    }
}
