use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::ProxyError;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a login `state` before the callback rejects it.
pub const STATE_MAX_AGE_SECS: i64 = 10 * 60;

const MIN_KEY_LEN: usize = 32;

/// Helper to create an HMAC instance, resolving trait ambiguity.
fn new_hmac(key: &[u8]) -> Result<HmacSha256, ProxyError> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| ProxyError::Internal(format!("HMAC init failed: {e}")))
}

/// Issues and checks HMAC-signed `state` values for the login redirect.
///
/// A state is `base64url(hmac || payload)` where the payload is
/// `<random nonce>:<unix timestamp>`. Nothing is kept server-side.
pub struct StateSigner {
    key: Vec<u8>,
}

impl StateSigner {
    /// Create a signer from a base64-encoded key of at least 32 bytes.
    pub fn new(secret_b64: &str) -> Result<Self, ProxyError> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(secret_b64.trim())
            .map_err(|e| ProxyError::Internal(format!("Invalid STATE_SECRET base64: {e}")))?;

        if key.len() < MIN_KEY_LEN {
            return Err(ProxyError::Internal(format!(
                "STATE_SECRET must be at least {MIN_KEY_LEN} bytes, got {}",
                key.len()
            )));
        }

        Ok(Self { key })
    }

    /// Generate a fresh signed state.
    pub fn issue(&self) -> Result<String, ProxyError> {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce_hex: String = nonce.iter().map(|b| format!("{:02x}", b)).collect();
        self.sign(&format!("{}:{}", nonce_hex, Utc::now().timestamp()))
    }

    /// Check signature and age of a state returned by the provider.
    pub fn verify(&self, signed: &str) -> Result<(), ProxyError> {
        let payload = self.open(signed)?;

        let timestamp: i64 = payload
            .rsplit(':')
            .next()
            .and_then(|ts| ts.parse().ok())
            .ok_or(ProxyError::InvalidState)?;

        let age = Utc::now().timestamp() - timestamp;
        if !(0..=STATE_MAX_AGE_SECS).contains(&age) {
            return Err(ProxyError::InvalidState);
        }

        Ok(())
    }

    fn sign(&self, payload: &str) -> Result<String, ProxyError> {
        let mut mac = new_hmac(&self.key)?;
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        let mut combined = signature.to_vec();
        combined.extend_from_slice(payload.as_bytes());

        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&combined))
    }

    fn open(&self, signed: &str) -> Result<String, ProxyError> {
        let combined = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signed)
            .map_err(|_| ProxyError::InvalidState)?;

        if combined.len() < 32 {
            return Err(ProxyError::InvalidState);
        }

        let (signature, payload_bytes) = combined.split_at(32);

        let mut mac = new_hmac(&self.key)?;
        mac.update(payload_bytes);
        mac.verify_slice(signature)
            .map_err(|_| ProxyError::InvalidState)?;

        String::from_utf8(payload_bytes.to_vec()).map_err(|_| ProxyError::InvalidState)
    }
}
