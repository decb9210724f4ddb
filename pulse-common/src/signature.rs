//! Webhook signature verification
//!
//! The provider signs each delivery with HMAC-SHA256 over the raw request
//! body, keyed with the shared secret, and sends the hex digest in the
//! `X-Signature` header (optionally prefixed with `sha256=`).
//!
//! When no secret is configured, verification is skipped (open mode).
//!
//! # Pure Functions
//!
//! No HTTP framework dependencies here; the service wraps these in its
//! handler.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the delivery signature
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Signature verification error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// Secret configured but the request carried no signature
    MissingSignature,

    /// Signature header is not a hex digest
    InvalidFormat(String),

    /// Digest does not match the body
    Mismatch,
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureError::MissingSignature => write!(f, "Missing signature header"),
            SignatureError::InvalidFormat(reason) => {
                write!(f, "Invalid signature format: {}", reason)
            }
            SignatureError::Mismatch => write!(f, "Invalid signature"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// Outcome of a successful verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// No secret configured, request accepted unchecked
    Skipped,
    /// Signature matched
    Verified,
}

/// Returns the secret only if it is set and non-blank
///
/// The secret is returned as given; surrounding whitespace is part of the key.
pub fn effective_secret(secret: Option<&str>) -> Option<&str> {
    secret.filter(|s| !s.trim().is_empty())
}

fn keyed_mac(secret: &str) -> Result<HmacSha256, SignatureError> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SignatureError::InvalidFormat(format!("unusable secret: {}", e)))
}

/// Calculate the hex HMAC-SHA256 signature of `body`
///
/// # Examples
///
/// ```
/// use pulse_common::signature::compute_signature;
///
/// let sig = compute_signature(b"{}", "secret").unwrap();
/// assert_eq!(sig.len(), 64);
/// ```
pub fn compute_signature(body: &[u8], secret: &str) -> Result<String, SignatureError> {
    let mut mac = keyed_mac(secret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Strip an optional `sha256=` scheme prefix
fn digest_part(provided: &str) -> &str {
    match provided.split_once('=') {
        Some((scheme, digest)) if scheme.eq_ignore_ascii_case("sha256") => digest,
        _ => provided,
    }
}

/// Verify a delivery signature
///
/// # Rules
///
/// - Secret absent or blank: `Ok(Verification::Skipped)`
/// - Secret present, header absent or blank: `MissingSignature`
/// - Header not hex: `InvalidFormat`
/// - Digest mismatch: `Mismatch` (constant-time comparison)
pub fn verify_signature(
    body: &[u8],
    provided: Option<&str>,
    secret: Option<&str>,
) -> Result<Verification, SignatureError> {
    let Some(secret) = effective_secret(secret) else {
        return Ok(Verification::Skipped);
    };

    let provided = provided
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::MissingSignature)?;

    let expected = hex::decode(digest_part(provided))
        .map_err(|e| SignatureError::InvalidFormat(e.to_string()))?;

    let mut mac = keyed_mac(secret)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)?;

    Ok(Verification::Verified)
}
