//! Webhook signature verification (HMAC-SHA256).
//!
//! GitHub signs each delivery body with the shared secret and sends the
//! result in `X-Hub-Signature-256` as `sha256=<hex>`. Verification happens
//! before any parsing, against the raw body bytes exactly as received: a
//! body that was re-serialized will not verify.
//!
//! A delivery that fails verification is answered with 401 and never
//! reaches the tracker.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Decodes a `sha256=<hex>` header into the raw digest bytes.
///
/// Returns `None` for anything malformed: a missing or different algorithm
/// prefix, non-hex characters, or an odd number of digits. Upper-case hex is
/// accepted.
///
/// # Examples
///
/// ```
/// use issue_mirror::server::signature::parse_signature_header;
///
/// assert_eq!(parse_signature_header("sha256=00ff"), Some(vec![0x00, 0xff]));
/// assert!(parse_signature_header("sha1=00ff").is_none());
/// assert!(parse_signature_header("sha256=zz").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    hex::decode(header.strip_prefix("sha256=")?).ok()
}

/// Checks `signature_header` against the HMAC-SHA256 of `payload` under
/// `secret`.
///
/// The digest comparison is constant-time (`Mac::verify_slice`). A malformed
/// header is simply a failed verification.
///
/// # Examples
///
/// The sample delivery from GitHub's webhook validation guide:
///
/// ```
/// use issue_mirror::server::signature::verify_signature;
///
/// let header = "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17";
/// assert!(verify_signature(b"Hello, World!", header, b"It's a Secret to Everybody"));
/// assert!(!verify_signature(b"Hello, World?", header, b"It's a Secret to Everybody"));
/// ```
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let Some(expected) = parse_signature_header(signature_header) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Signs `payload` the way GitHub does, returning the header value.
#[cfg(test)]
pub fn sign(payload: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
