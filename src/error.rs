use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for the kdrive-proxy service.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    // ── Auth Errors ─────────────────────────────────────────────────────
    /// Token endpoint failure. `status` is 0 when no response was received.
    #[error("OAuth provider request failed ({status}): {body}")]
    UpstreamAuth { status: u16, body: String },

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid state parameter")]
    InvalidState,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    // ── Drive Errors ────────────────────────────────────────────────────
    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    #[error("Drive API error ({status}): {body}")]
    UpstreamDrive { status: u16, body: String },

    // ── Request Errors ──────────────────────────────────────────────────
    #[error("Bad request: {0}")]
    BadRequest(String),

    // ── Internal ────────────────────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Short machine-readable code, also used in callback redirects.
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::UpstreamAuth { .. } => "upstream_auth_error",
            ProxyError::NotAuthenticated => "not_authenticated",
            ProxyError::InvalidState => "invalid_state",
            ProxyError::InvalidToken(_) => "invalid_token",
            ProxyError::FolderNotFound(_) => "folder_not_found",
            ProxyError::UpstreamDrive { .. } => "upstream_drive_error",
            ProxyError::BadRequest(_) => "bad_request",
            ProxyError::Http(_) => "http_error",
            ProxyError::Database(_) => "database_error",
            ProxyError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamAuth { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            ProxyError::InvalidState => StatusCode::BAD_REQUEST,
            ProxyError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            ProxyError::FolderNotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::UpstreamDrive { status: 404, .. } => StatusCode::NOT_FOUND,
            ProxyError::UpstreamDrive { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Http(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Build a drive error from a non-2xx response, consuming its body.
    pub(crate) async fn from_drive_response(resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        ProxyError::UpstreamDrive { status, body }
    }

    /// Build an auth error from a non-2xx token endpoint response.
    pub(crate) async fn from_auth_response(resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        ProxyError::UpstreamAuth { status, body }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        ProxyError::Http(e.to_string())
    }
}

impl From<sqlx::Error> for ProxyError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {e}");
        ProxyError::Database(e.to_string())
    }
}

impl From<anyhow::Error> for ProxyError {
    fn from(e: anyhow::Error) -> Self {
        ProxyError::Internal(e.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });

        (self.status(), axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_not_found_maps_to_404() {
        let err = ProxyError::UpstreamDrive {
            status: 404,
            body: "{}".into(),
        };
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = ProxyError::UpstreamDrive {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn upstream_auth_message_carries_status_and_body() {
        let err = ProxyError::UpstreamAuth {
            status: 400,
            body: "invalid_grant".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("400"));
        assert!(msg.contains("invalid_grant"));
        assert_eq!(err.code(), "upstream_auth_error");
    }
}
