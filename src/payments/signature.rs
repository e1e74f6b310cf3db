//! Canonical strings and HMAC-SHA256 signatures shared by every gateway.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use crate::{EcommerceError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Joins `key=value` pairs with `&` in exactly the order given. Values are not escaped.
pub fn canonical_string<'a>(fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    fields.into_iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&")
}

/// Lowercase hex HMAC-SHA256 of `canonical` under `secret`.
pub fn sign(secret: &str, canonical: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| EcommerceError::PaymentConfig(e.to_string()))?;
    mac.update(canonical.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison of the expected signature with the supplied one.
/// Hex case is ignored.
pub fn verify(secret: &str, canonical: &str, provided: &str) -> Result<bool> {
    let expected = sign(secret, canonical)?;
    let provided = provided.trim().to_ascii_lowercase();
    Ok(expected.as_bytes().ct_eq(provided.as_bytes()).into())
}
