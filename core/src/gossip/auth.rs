//! # Gossip Authentication
//!
//! Symmetric HMAC-SHA256 over the raw message body, base64-encoded into the
//! `X-Gossip-Sig` header. Every node in a cluster shares one secret; an
//! empty secret disables both signing and verification (open mode).
//!
//! Signing covers the exact bytes on the wire, so any re-serialization
//! between sign and send would break verification — the protocol signs the
//! same buffer it hands to the transport.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs `body` with the cluster secret. Returns `None` in open mode
/// (empty secret).
pub fn sign_body(secret: &str, body: &[u8]) -> Option<String> {
    if secret.is_empty() {
        return None;
    }
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    Some(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Verifies `signature` against `body`. Open mode accepts everything; with a
/// secret set, a missing, malformed, or mismatched signature is rejected.
/// Comparison is constant-time via the `Mac` verifier.
pub fn verify_body(secret: &str, body: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return true;
    }
    if signature.is_empty() {
        return false;
    }
    let Ok(raw) = STANDARD.decode(signature.as_bytes()) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    mac.verify_slice(&raw).is_ok()
}
