use crate::constants::MAX_PUBKEY_B58_LEN;
use crate::error::AppError;

pub fn ensure_len_le(field: &str, s: &str, max: usize) -> Result<(), AppError> {
    if s.len() > max {
        return Err(AppError::BadRequest(format!(
            "{field} too long: {} chars (max {max})",
            s.len()
        )));
    }
    Ok(())
}

pub fn ensure_pubkey_len(field: &str, s: &str) -> Result<(), AppError> {
    let t = s.trim();
    if t.is_empty() {
        return Err(AppError::BadRequest(format!("{field} is required")));
    }
    ensure_len_le(field, t, MAX_PUBKEY_B58_LEN)
}

/// Parse a base58 string into `[u8; 32]` (pubkeys, photon hashes).
pub fn parse_b58_32(field: &str, s: &str) -> Result<[u8; 32], AppError> {
    let v = bs58::decode(s.trim())
        .into_vec()
        .map_err(|_| AppError::Encoding(format!("{field}: invalid base58")))?;
    if v.len() != 32 {
        return Err(AppError::Size(format!(
            "{field}: expected 32 bytes, got {}",
            v.len()
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&v);
    Ok(out)
}
