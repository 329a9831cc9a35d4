//! HMAC-SHA256 signing for inbound and outbound webhooks

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed Stripe payload
pub const STRIPE_TOLERANCE_SECS: i64 = 300;

/// Hex-encoded HMAC-SHA256 of `payload`
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature
pub fn verify(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Verify a GitHub `X-Hub-Signature-256: sha256=<hex>` header
pub fn verify_github(secret: &str, payload: &[u8], header: &str) -> bool {
    header
        .strip_prefix("sha256=")
        .map(|sig| verify(secret, payload, sig))
        .unwrap_or(false)
}

/// Constant-time equality for shared-secret tokens such as `X-Gitlab-Token`
///
/// Both values are MACed under the expected token so the comparison runs
/// over fixed-length digests.
pub fn tokens_match(expected: &str, provided: &str) -> bool {
    let mut mac =
        HmacSha256::new_from_slice(expected.as_bytes()).expect("HMAC can take key of any size");
    mac.update(provided.as_bytes());
    let provided_tag = mac.finalize().into_bytes();

    let mut mac =
        HmacSha256::new_from_slice(expected.as_bytes()).expect("HMAC can take key of any size");
    mac.update(expected.as_bytes());
    mac.verify_slice(&provided_tag).is_ok()
}

/// Verify a `Stripe-Signature: t=<ts>,v1=<hex>` header
///
/// The signed content is `<ts>.<payload>`. Any `v1` entry may match.
pub fn verify_stripe(secret: &str, payload: &[u8], header: &str, now: i64) -> bool {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => timestamp = ts.parse::<i64>().ok(),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let Some(ts) = timestamp else {
        return false;
    };
    if (now - ts).abs() > STRIPE_TOLERANCE_SECS {
        return false;
    }

    let mut signed = format!("{ts}.").into_bytes();
    signed.extend_from_slice(payload);
    signatures.iter().any(|sig| verify(secret, &signed, sig))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match("gl-token", "gl-token"));
        assert!(!tokens_match("gl-token", "gl-tokeN"));
        assert!(!tokens_match("gl-token", "gl-token-longer"));
        assert!(!tokens_match("gl-token", ""));
    }

    #[test]
    fn test_sign_and_verify() {
        let sig = sign("s3cret", b"{\"a\":1}");
        assert_eq!(sig.len(), 64);
        assert!(verify("s3cret", b"{\"a\":1}", &sig));
        assert!(!verify("other", b"{\"a\":1}", &sig));
        assert!(!verify("s3cret", b"{\"a\":2}", &sig));
        assert!(!verify("s3cret", b"{\"a\":1}", "not-hex"));
    }

    #[test]
    fn test_github_header() {
        let body = br#"{"zen":"Keep it logically awesome."}"#;
        let header = format!("sha256={}", sign("gh", body));
        assert!(verify_github("gh", body, &header));
        assert!(!verify_github("gh", body, &sign("gh", body)));
    }

    #[test]
    fn test_stripe_header() {
        let body = br#"{"type":"customer.subscription.deleted"}"#;
        let now = 1_700_000_000;
        let mut signed = format!("{now}.").into_bytes();
        signed.extend_from_slice(body);
        let header = format!("t={now},v1={}", sign("whsec", &signed));

        assert!(verify_stripe("whsec", body, &header, now + 10));
        assert!(!verify_stripe("whsec", body, &header, now + STRIPE_TOLERANCE_SECS + 1));
        assert!(!verify_stripe("other", body, &header, now));
        assert!(!verify_stripe("whsec", body, "v1=abc", now));
    }
}
