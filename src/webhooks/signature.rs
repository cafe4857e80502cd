//! HMAC-SHA256 payload signing.
//!
//! The signature covers the exact request body bytes. Receivers verify by
//! recomputing the HMAC over the raw body they received.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of the `X-Flux-Signature` header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Hex-encoded HMAC-SHA256 of `body` keyed by `secret`.
pub fn generate_signature(body: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Full header value: `sha256=<hex>`.
pub fn signature_header(body: &[u8], secret: &str) -> Option<String> {
    generate_signature(body, secret).map(|sig| format!("{}{}", SIGNATURE_PREFIX, sig))
}

/// Check a received `X-Flux-Signature` header against `body`.
///
/// The comparison runs in constant time over the decoded MAC.
pub fn verify_signature(body: &[u8], secret: &str, header: &str) -> bool {
    let Some(hex_sig) = header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Constant-time equality for secrets such as bearer tokens.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = concat!(
        r#"{"event":"task.created","timestamp":"2024-01-01T00:00:00.000Z","#,
        r#""webhook_id":"d-1","data":{}}"#,
    )
    .as_bytes();

    #[test]
    fn test_signature_is_deterministic() {
        let a = generate_signature(BODY, "s3cr3t").unwrap();
        let b = generate_signature(BODY, "s3cr3t").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_independent_recompute() {
        let header = signature_header(BODY, "s3cr3t").unwrap();

        let mut mac = Hmac::<Sha256>::new_from_slice(b"s3cr3t").unwrap();
        mac.update(BODY);
        let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        assert_eq!(header, expected);
        assert!(verify_signature(BODY, "s3cr3t", &header));
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            generate_signature(b"what do ya want for nothing?", "Jefe").as_deref(),
            Some("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
        );
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let header = signature_header(BODY, "s3cr3t").unwrap();
        assert!(!verify_signature(b"{}", "s3cr3t", &header));
        assert!(!verify_signature(BODY, "other", &header));
        assert!(!verify_signature(BODY, "s3cr3t", header.trim_start_matches("sha256=")));
        assert!(!verify_signature(BODY, "s3cr3t", "sha256=zz"));
    }

    #[test]
    fn test_empty_secret_still_signs() {
        let header = signature_header(BODY, "").unwrap();
        assert!(verify_signature(BODY, "", &header));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"token", b"token"));
        assert!(!constant_time_eq(b"token", b"tokem"));
        assert!(!constant_time_eq(b"token", b"token2"));
    }
}
