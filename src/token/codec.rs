//! Wire format: `base64url(claims_json) "." base64url(hmac_sha256(segment0))`.
//!
//! The MAC covers the encoded claims segment exactly as transmitted, so any
//! change to that string invalidates the token before the claims are parsed.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{InvalidReason, TokenPayload};
use crate::keys::SigningKey;

type HmacSha256 = Hmac<Sha256>;

const SEPARATOR: char = '.';

/// Tokens larger than this are rejected without decoding.
pub const MAX_TOKEN_LEN: usize = 16 * 1024;

fn hmac_sha256(key: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(msg);
    mac.finalize().into_bytes().to_vec()
}

/// Serialize and sign a payload into an opaque token string.
pub fn encode(payload: &TokenPayload, key: &SigningKey) -> Result<String, serde_json::Error> {
    let claims = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload)?);
    let signature = URL_SAFE_NO_PAD.encode(hmac_sha256(key.as_bytes(), claims.as_bytes()));
    Ok(format!("{claims}{SEPARATOR}{signature}"))
}

/// Verify a token's signature and decode its claims.
///
/// Does not look at expiry or permissions; that is the validator's job.
pub fn decode(token: &str, key: &SigningKey) -> Result<TokenPayload, InvalidReason> {
    if token.is_empty() || token.len() > MAX_TOKEN_LEN {
        return Err(InvalidReason::Malformed);
    }

    let (claims, signature) = token
        .split_once(SEPARATOR)
        .ok_or(InvalidReason::Malformed)?;
    if claims.is_empty() || signature.is_empty() || signature.contains(SEPARATOR) {
        return Err(InvalidReason::Malformed);
    }

    let provided = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| InvalidReason::Encoding)?;
    let expected = hmac_sha256(key.as_bytes(), claims.as_bytes());
    if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
        return Err(InvalidReason::SignatureMismatch);
    }

    let json = URL_SAFE_NO_PAD
        .decode(claims)
        .map_err(|_| InvalidReason::Encoding)?;
    serde_json::from_slice(&json).map_err(|_| InvalidReason::Claims)
}
