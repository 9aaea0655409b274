//! Identity token handling. Extracts the user id (`sub`) from an OpenID
//! Connect id_token.
//!
//! Tokens are verified against the provider's published signing keys
//! (RS256 signature, `exp`, `aud`, `iss`). Decode-only mode skips all of
//! that and is only used when explicitly configured.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::Engine as _;
use chrono::Utc;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ProxyError;

/// How long fetched signing keys are trusted before the JWKS is read again.
const KEYS_TTL: Duration = Duration::from_secs(3600);

#[derive(Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    n: String,
    #[serde(default)]
    e: String,
}

struct KeySet {
    by_kid: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: Value,
    exp: Option<i64>,
}

pub struct IdTokenVerifier {
    /// `None` in decode-only mode.
    jwks_url: Option<String>,
    keys: RwLock<Option<KeySet>>,
    audience: String,
    issuer: Option<String>,
    http: reqwest::Client,
}

impl IdTokenVerifier {
    /// Verifier that checks signatures against the given JWKS endpoint.
    pub fn new(jwks_url: &str, audience: &str, issuer: Option<&str>) -> Self {
        Self {
            jwks_url: Some(jwks_url.to_string()),
            keys: RwLock::new(None),
            audience: audience.to_string(),
            issuer: issuer.map(str::to_string),
            http: reqwest::Client::new(),
        }
    }

    /// Verifier that only decodes the payload.
    pub fn decode_only(audience: &str) -> Self {
        Self {
            jwks_url: None,
            keys: RwLock::new(None),
            audience: audience.to_string(),
            issuer: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        if config.oauth_insecure_decode_only {
            warn!("OAUTH_INSECURE_DECODE_ONLY is set: id_token signatures will NOT be verified");
            return Self::decode_only(&config.oauth_client_id);
        }
        Self::new(
            &config.oauth_jwks_url,
            &config.oauth_client_id,
            Some(config.oauth_issuer.as_str()),
        )
    }

    pub fn verifies_signatures(&self) -> bool {
        self.jwks_url.is_some()
    }

    /// Fetch the signing keys ahead of the first login. No-op in decode-only mode.
    pub async fn prefetch_keys(&self) -> Result<(), ProxyError> {
        match &self.jwks_url {
            Some(url) => self.fetch_keys(url).await,
            None => Ok(()),
        }
    }

    /// Return the subject claim of `id_token` as the user id.
    pub async fn extract_user_id(&self, id_token: &str) -> Result<String, ProxyError> {
        let parts: Vec<&str> = id_token.split('.').collect();
        if parts.len() != 3 {
            return Err(ProxyError::InvalidToken("invalid JWT format".into()));
        }

        let claims = match &self.jwks_url {
            Some(url) => self.verify(id_token, url).await?,
            None => {
                warn!("Accepting unverified id_token (decode-only mode)");
                decode_payload(parts[1])?
            }
        };

        subject(&claims.sub)
    }

    async fn verify(&self, id_token: &str, jwks_url: &str) -> Result<IdTokenClaims, ProxyError> {
        let header = decode_header(id_token)
            .map_err(|e| ProxyError::InvalidToken(format!("invalid JWT header: {e}")))?;

        if header.alg != Algorithm::RS256 {
            return Err(ProxyError::InvalidToken(format!(
                "unsupported JWT algorithm: {:?} (expected RS256)",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| ProxyError::InvalidToken("JWT header missing 'kid'".into()))?;

        let key = match self.cached_key(&kid, true).await {
            Some(key) => key,
            None => {
                // expired, never fetched, or the provider rotated its keys
                self.fetch_keys(jwks_url).await?;
                self.cached_key(&kid, false).await.ok_or_else(|| {
                    ProxyError::InvalidToken(format!("no signing key for kid '{kid}'"))
                })?
            }
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.audience]);
        if let Some(ref iss) = self.issuer {
            validation.set_issuer(&[iss]);
        }

        decode::<IdTokenClaims>(id_token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| ProxyError::InvalidToken(format!("id_token verification failed: {e}")))
    }

    async fn cached_key(&self, kid: &str, fresh_only: bool) -> Option<DecodingKey> {
        let keys = self.keys.read().await;
        let set = keys.as_ref()?;
        if fresh_only && set.fetched_at.elapsed() >= KEYS_TTL {
            return None;
        }
        set.by_kid.get(kid).cloned()
    }

    async fn fetch_keys(&self, jwks_url: &str) -> Result<(), ProxyError> {
        let resp = self
            .http
            .get(jwks_url)
            .send()
            .await
            .map_err(|e| ProxyError::Internal(format!("JWKS fetch failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(ProxyError::Internal(format!(
                "JWKS fetch failed with status {}",
                resp.status()
            )));
        }

        let jwks: Jwks = resp
            .json()
            .await
            .map_err(|e| ProxyError::Internal(format!("JWKS parse failed: {e}")))?;

        let by_kid: HashMap<String, DecodingKey> = jwks
            .keys
            .into_iter()
            .filter(|jwk| jwk.kty == "RSA")
            .filter_map(|jwk| {
                let kid = jwk.kid?;
                match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                    Ok(key) => Some((kid, key)),
                    Err(e) => {
                        warn!("Skipping signing key '{kid}': {e}");
                        None
                    }
                }
            })
            .collect();

        info!("Cached {} signing keys from {jwks_url}", by_kid.len());
        *self.keys.write().await = Some(KeySet {
            by_kid,
            fetched_at: Instant::now(),
        });

        Ok(())
    }
}

fn decode_payload(segment: &str) -> Result<IdTokenClaims, ProxyError> {
    let payload_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|_| ProxyError::InvalidToken("invalid base64 in JWT".into()))?;

    let claims: IdTokenClaims = serde_json::from_slice(&payload_bytes)
        .map_err(|e| ProxyError::InvalidToken(format!("invalid JWT payload: {e}")))?;

    if let Some(exp) = claims.exp {
        if exp < Utc::now().timestamp() {
            return Err(ProxyError::InvalidToken("id_token expired".into()));
        }
    }

    Ok(claims)
}

/// Providers emit `sub` as either a string or a number.
fn subject(sub: &Value) -> Result<String, ProxyError> {
    let id = match sub {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(ProxyError::InvalidToken("missing subject claim".into())),
    };

    if id.is_empty() {
        return Err(ProxyError::InvalidToken("empty subject claim".into()));
    }
    Ok(id)
}
