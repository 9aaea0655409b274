use anyhow::{bail, Context, Result};

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,
    pub base_url: String,
    /// Frontend URL for post-login redirects
    pub app_url: String,
    pub cors_origins: Vec<String>,

    // ── OAuth ───────────────────────────────────────────────────────────
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub oauth_redirect_uri: String,
    pub oauth_scope: String,
    pub oauth_authorize_url: String,
    pub oauth_token_url: String,
    /// Signing keys used to verify identity tokens.
    pub oauth_jwks_url: String,
    /// Expected `iss` of identity tokens.
    pub oauth_issuer: String,
    /// Trust identity tokens without verifying them. Local development only.
    pub oauth_insecure_decode_only: bool,
    /// Base64-encoded HMAC key for state parameter signing.
    pub state_secret: String,

    // ── kDrive ──────────────────────────────────────────────────────────
    pub kdrive_api_url: String,
    pub kdrive_id: String,
    pub folder_path: String,
    pub folder_cache_ttl_secs: u64,

    // ── Storage ─────────────────────────────────────────────────────────
    /// PostgreSQL connection string; tokens stay in memory when unset.
    pub database_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".into());

        let config = Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".into())
                .parse()
                .context("Invalid PORT")?,
            app_url: std::env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".into()),
            cors_origins: parse_list(
                &std::env::var("CORS_ORIGINS")
                    .unwrap_or_else(|_| "https://traveldoctor.ch,http://localhost:3000".into()),
            ),

            oauth_client_id: required("OAUTH_CLIENT_ID")?,
            oauth_client_secret: required("OAUTH_CLIENT_SECRET")?,
            oauth_redirect_uri: std::env::var("OAUTH_REDIRECT_URI")
                .unwrap_or_else(|_| format!("{base_url}/auth/callback")),
            oauth_scope: std::env::var("OAUTH_SCOPE")
                .unwrap_or_else(|_| "openid user_info drive".into()),
            oauth_authorize_url: std::env::var("OAUTH_AUTHORIZE_URL")
                .unwrap_or_else(|_| "https://login.infomaniak.com/authorize".into()),
            oauth_token_url: std::env::var("OAUTH_TOKEN_URL")
                .unwrap_or_else(|_| "https://login.infomaniak.com/token".into()),
            oauth_jwks_url: optional("OAUTH_JWKS_URL")
                .unwrap_or_else(|| "https://login.infomaniak.com/oauth2/jwks".into()),
            oauth_issuer: optional("OAUTH_ISSUER")
                .unwrap_or_else(|| "https://login.infomaniak.com".into()),
            oauth_insecure_decode_only: flag("OAUTH_INSECURE_DECODE_ONLY")?,
            state_secret: required("STATE_SECRET")?,

            kdrive_api_url: std::env::var("KDRIVE_API_URL")
                .unwrap_or_else(|_| "https://api.infomaniak.com/3/drive".into()),
            kdrive_id: required("KDRIVE_ID")?,
            folder_path: required("FOLDER_PATH")?,
            folder_cache_ttl_secs: std::env::var("FOLDER_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "300".into())
                .parse()
                .context("Invalid FOLDER_CACHE_TTL_SECS")?,

            database_url: optional("DATABASE_URL"),
            base_url,
        };

        Ok(config)
    }
}

fn required(name: &str) -> Result<String> {
    let value = std::env::var(name).with_context(|| format!("{name} is required"))?;
    if value.trim().is_empty() {
        bail!("{name} must not be empty");
    }
    Ok(value)
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn flag(name: &str) -> Result<bool> {
    match optional(name) {
        None => Ok(false),
        Some(raw) => parse_flag(&raw).with_context(|| format!("Invalid {name}: {raw}")),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
