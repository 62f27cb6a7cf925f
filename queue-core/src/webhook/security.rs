//! Webhook signing and destination validation (C3).
//!
//! Grounded on `webhooks/security.py`: HMAC-SHA256 over the raw request
//! body, hex-encoded, verified in constant time; and a `validate_webhook_url`
//! that layers a hostname blocklist and port allowlist on top of the same
//! private-range checks [`crate::dns`] already applies to outbound fetches.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::FetchError;

type HmacSha256 = Hmac<Sha256>;

const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "metadata.google.internal",
    "169.254.169.254",
];

const ALLOWED_PORTS: &[u16] = &[80, 443, 8080, 8443];

pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `sha256=<hex>` HMAC-SHA256 signature of `payload` keyed by `secret`, in
/// the literal header-value format webhook receivers expect.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison of an incoming `X-Webhook-Signature` against the
/// signature we'd compute for `payload` with `secret`. Callers must not
/// short-circuit on the `Ok`/`Err`-shaped result of hex-decoding `signature`
/// in a way that leaks timing, so both the decode failure and the mismatch
/// path return `false` uniformly.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let expected = sign_payload(secret, payload);
    let expected_bytes = expected.as_bytes();
    let actual_bytes = signature.as_bytes();
    if expected_bytes.len() != actual_bytes.len() {
        return false;
    }
    let diff = expected_bytes
        .iter()
        .zip(actual_bytes)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    diff == 0
}

/// Validate a webhook subscription's target URL (§4.3 rule 1): scheme,
/// hostname blocklist, and port allowlist. DNS/private-IP validation of the
/// resolved address happens at delivery time via [`crate::dns::SafeResolver`],
/// the same as for audit-time fetches.
pub fn validate_webhook_url(url: &str) -> Result<(), FetchError> {
    let parsed =
        url::Url::parse(url).map_err(|e| FetchError::SsrfBlocked(format!("unparseable URL: {e}")))?;

    if parsed.scheme() != "https" && parsed.scheme() != "http" {
        return Err(FetchError::SsrfBlocked(format!(
            "unsupported scheme: {}",
            parsed.scheme()
        )));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| FetchError::SsrfBlocked("URL has no host".to_string()))?;
    let host_lower = host.to_lowercase();

    if BLOCKED_HOSTNAMES.iter().any(|blocked| host_lower == *blocked)
        || host_lower.contains("metadata")
        || host_lower.contains("internal")
    {
        return Err(FetchError::SsrfBlocked(format!(
            "hostname {host} is blocked"
        )));
    }

    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        if crate::dns::is_blocked(ip) {
            return Err(FetchError::SsrfBlocked(format!(
                "literal IP {ip} is in a blocked range"
            )));
        }
    }

    if let Some(port) = parsed.port() {
        if !ALLOWED_PORTS.contains(&port) {
            return Err(FetchError::SsrfBlocked(format!(
                "port {port} is not allowed for webhook destinations"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trips() {
        let secret = generate_secret();
        let payload = br#"{"event":"audit.completed"}"#;
        let sig = sign_payload(&secret, payload);
        assert!(verify_signature(&secret, payload, &sig));
    }

    #[test]
    fn signature_rejects_tampered_payload() {
        let secret = generate_secret();
        let sig = sign_payload(&secret, b"original");
        assert!(!verify_signature(&secret, b"tampered", &sig));
    }

    #[test]
    fn signature_rejects_wrong_secret() {
        let sig = sign_payload("secret-a", b"payload");
        assert!(!verify_signature("secret-b", b"payload", &sig));
    }

    #[test]
    fn rejects_localhost() {
        assert!(validate_webhook_url("http://localhost:8080/hook").is_err());
    }

    #[test]
    fn rejects_metadata_hostname() {
        assert!(validate_webhook_url("http://metadata.google.internal/").is_err());
    }

    #[test]
    fn rejects_disallowed_port() {
        assert!(validate_webhook_url("https://example.com:9999/hook").is_err());
    }

    #[test]
    fn accepts_ordinary_https_url() {
        assert!(validate_webhook_url("https://example.com/hooks/seo").is_ok());
    }
}
