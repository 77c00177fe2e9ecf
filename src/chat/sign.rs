//! Keyed-hash request signing for the platform's HTTP API.
//!
//! Every API call carries a content digest, a set of `x-bili-*` metadata
//! headers, and an `Authorization` header holding an HMAC-SHA256 signature
//! over the canonical header string. The canonical string is the metadata
//! headers sorted by name, joined as `name:value` lines.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs platform API requests with an access key pair.
#[derive(Debug, Clone)]
pub struct Signer {
    access_key: String,
    access_secret: String,
}

impl Signer {
    /// Create a signer from an access key and its secret.
    pub fn new(access_key: impl Into<String>, access_secret: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            access_secret: access_secret.into(),
        }
    }

    /// Build the full signed header set for a request body, using the
    /// current wall clock and a fresh nonce.
    pub fn signed_headers(&self, body: &str) -> BTreeMap<String, String> {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let nonce = rand::thread_rng().gen_range(1..=100_000u64) + ts;
        self.signed_headers_at(body, ts, nonce)
    }

    /// Deterministic variant taking an explicit timestamp and nonce.
    pub fn signed_headers_at(&self, body: &str, ts: u64, nonce: u64) -> BTreeMap<String, String> {
        let digest = format!("{:x}", md5::compute(body.as_bytes()));

        let mut headers = BTreeMap::new();
        headers.insert("x-bili-timestamp".to_string(), ts.to_string());
        headers.insert(
            "x-bili-signature-method".to_string(),
            "HMAC-SHA256".to_string(),
        );
        headers.insert("x-bili-signature-nonce".to_string(), nonce.to_string());
        headers.insert("x-bili-accesskeyid".to_string(), self.access_key.clone());
        headers.insert("x-bili-signature-version".to_string(), "1.0".to_string());
        headers.insert("x-bili-content-md5".to_string(), digest);

        let signature = self.sign_canonical(&canonical_string(&headers));
        headers.insert("Authorization".to_string(), signature);
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers
    }

    /// HMAC-SHA256 over the canonical string, lowercase hex.
    fn sign_canonical(&self, canonical: &str) -> String {
        // HMAC accepts keys of any length; new_from_slice cannot fail.
        let mut mac = HmacSha256::new_from_slice(self.access_secret.as_bytes())
            .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Join the metadata headers, already sorted by `BTreeMap` order, into the
/// canonical `name:value` line form (no trailing newline).
fn canonical_string(headers: &BTreeMap<String, String>) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}"))
        .collect::<Vec<_>>()
        .join("\n")
}
