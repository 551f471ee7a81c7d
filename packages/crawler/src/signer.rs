//! HMAC request signer (C4): signs and verifies the canonical string
//! `METHOD\nURL\nTIMESTAMP\nNONCE\nBODY` with HMAC-SHA256, for the signed
//! revalidation bridge between this crate's workers and the read API's
//! intake endpoint.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CrawlerError;

type HmacSha256 = Hmac<Sha256>;

/// How far a request timestamp may drift from "now" before it is rejected,
/// regardless of signature validity. Bounds replay of an otherwise-valid
/// signed request. `timestamp`/`now` are milliseconds since the epoch
/// end to end (signer and verifier agree on the unit; this module itself
/// is otherwise unit-agnostic).
pub const MAX_CLOCK_SKEW_MS: i64 = 300_000;

pub struct Signer {
    secret: Vec<u8>,
}

impl Signer {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    fn canonical_string(method: &str, url: &str, timestamp: i64, nonce: &str, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(method.len() + url.len() + nonce.len() + body.len() + 16);
        out.extend_from_slice(method.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(url.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(timestamp.to_string().as_bytes());
        out.push(b'\n');
        out.extend_from_slice(nonce.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(body);
        out
    }

    /// Produce a lowercase-hex signature over the canonical string.
    pub fn sign(
        &self,
        method: &str,
        url: &str,
        timestamp: i64,
        nonce: &str,
        body: &[u8],
    ) -> Result<String, CrawlerError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| CrawlerError::Fatal(format!("invalid HMAC key: {e}")))?;
        mac.update(&Self::canonical_string(method, url, timestamp, nonce, body));
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Verify a signature in constant time, and reject requests whose
    /// timestamp has drifted more than `max_skew_ms` from `now`.
    /// `timestamp`/`now` are milliseconds since the epoch, matching the
    /// `X-Timestamp` header's documented unit.
    pub fn verify(
        &self,
        method: &str,
        url: &str,
        timestamp: i64,
        nonce: &str,
        body: &[u8],
        signature_hex: &str,
        now: i64,
        max_skew_ms: i64,
    ) -> Result<(), CrawlerError> {
        if (now - timestamp).abs() > max_skew_ms {
            return Err(CrawlerError::Validation("request timestamp outside allowed skew".into()));
        }

        let signature = hex::decode(signature_hex)
            .map_err(|_| CrawlerError::Validation("signature is not valid hex".into()))?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| CrawlerError::Fatal(format!("invalid HMAC key: {e}")))?;
        mac.update(&Self::canonical_string(method, url, timestamp, nonce, body));
        mac.verify_slice(&signature)
            .map_err(|_| CrawlerError::Validation("signature verification failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_valid_signature() {
        let signer = Signer::new(b"top-secret".to_vec());
        let sig = signer
            .sign("POST", "/internal/revalidate", 1_000, "nonce-1", b"{}")
            .unwrap();
        signer
            .verify(
                "POST",
                "/internal/revalidate",
                1_000,
                "nonce-1",
                b"{}",
                &sig,
                1_010,
                MAX_CLOCK_SKEW_MS,
            )
            .unwrap();
    }

    #[test]
    fn rejects_tampered_body() {
        let signer = Signer::new(b"top-secret".to_vec());
        let sig = signer
            .sign("POST", "/internal/revalidate", 1_000, "nonce-1", b"{}")
            .unwrap();
        let result = signer.verify(
            "POST",
            "/internal/revalidate",
            1_000,
            "nonce-1",
            b"{\"evil\":true}",
            &sig,
            1_010,
            MAX_CLOCK_SKEW_MS,
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_clock_skew_beyond_threshold() {
        let signer = Signer::new(b"top-secret".to_vec());
        let sig = signer.sign("GET", "/x", 1_000, "nonce-2", b"").unwrap();
        let result = signer.verify(
            "GET",
            "/x",
            1_000,
            "nonce-2",
            b"",
            &sig,
            1_000 + MAX_CLOCK_SKEW_MS + 1,
            MAX_CLOCK_SKEW_MS,
        );
        assert!(result.is_err());
    }
}
