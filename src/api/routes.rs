//! API route handlers.
//!
//! File routes identify the caller by the `userId` query parameter and use
//! the access token the server holds for that user.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::ProxyError;
use crate::SharedState;

pub fn routes(state: SharedState) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/status", get(status))
        // ── Auth ─────────────────────────────────────────────────────────
        .route("/auth/login", get(auth_login))
        .route("/auth/callback", get(auth_callback))
        .route("/auth/status", get(auth_status))
        // ── Files ────────────────────────────────────────────────────────
        .route("/files", get(files_list))
        .route(
            "/files/{id}",
            get(file_read).put(file_write).delete(file_delete),
        )
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

async fn status() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "kdrive-proxy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// Auth Endpoints
// =============================================================================

/// GET /auth/login: Redirect to the provider with a fresh signed state.
async fn auth_login(State(state): State<SharedState>) -> Result<Redirect, ProxyError> {
    let signed_state = state.states.issue()?;
    let url = state.tokens.build_authorization_url(&signed_state);
    Ok(Redirect::temporary(&url))
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    /// Set by the provider when the user denied access.
    error: Option<String>,
}

/// GET /auth/callback: Exchange the code and send the user back to the app.
///
/// Always answers with a redirect: `?userId=` on success, `?error=` otherwise.
async fn auth_callback(
    State(state): State<SharedState>,
    Query(q): Query<CallbackQuery>,
) -> Redirect {
    if let Some(provider_error) = q.error.as_deref() {
        warn!("Provider returned error on callback: {provider_error}");
        return Redirect::temporary(&app_redirect(
            &state.config.app_url,
            "error",
            provider_error,
        ));
    }

    match complete_callback(&state, &q).await {
        Ok(user_id) => {
            info!("User {user_id} logged in");
            Redirect::temporary(&app_redirect(&state.config.app_url, "userId", &user_id))
        }
        Err(e) => {
            warn!("OAuth callback failed: {e}");
            Redirect::temporary(&app_redirect(&state.config.app_url, "error", e.code()))
        }
    }
}

async fn complete_callback(state: &SharedState, q: &CallbackQuery) -> Result<String, ProxyError> {
    let signed_state = q.state.as_deref().ok_or(ProxyError::InvalidState)?;
    state.states.verify(signed_state)?;

    let code = q
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ProxyError::BadRequest("missing code".into()))?;

    state.tokens.complete_login(code).await
}

#[derive(Deserialize)]
struct UserQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

impl UserQuery {
    fn require(&self) -> Result<&str, ProxyError> {
        self.user_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ProxyError::BadRequest("userId is required".into()))
    }
}

/// GET /auth/status: Whether tokens are held for the user.
async fn auth_status(
    State(state): State<SharedState>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Value>, ProxyError> {
    let user_id = q.require()?;
    let authenticated = state.tokens.is_authenticated(user_id).await?;
    Ok(Json(json!({ "authenticated": authenticated })))
}

// =============================================================================
// File Endpoints
// =============================================================================

async fn access_token(state: &SharedState, user_id: &str) -> Result<String, ProxyError> {
    state
        .tokens
        .get_valid_access_token(user_id)
        .await?
        .ok_or(ProxyError::NotAuthenticated)
}

fn parse_file_id(raw: &str) -> Result<i64, ProxyError> {
    raw.parse()
        .map_err(|_| ProxyError::BadRequest(format!("invalid file id '{raw}'")))
}

/// GET /files: JSON files in the configured folder.
async fn files_list(
    State(state): State<SharedState>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Value>, ProxyError> {
    let user_id = q.require()?;
    let token = access_token(&state, user_id).await?;

    let files = state.drive.list_files(user_id, &token).await?;
    Ok(Json(json!({ "success": true, "files": files })))
}

/// GET /files/{id}: File content.
async fn file_read(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Value>, ProxyError> {
    let user_id = q.require()?;
    let file_id = parse_file_id(&id)?;
    let token = access_token(&state, user_id).await?;

    let content = state.drive.read_file(&token, file_id).await?;
    Ok(Json(json!({ "success": true, "content": content })))
}

#[derive(Deserialize)]
struct WriteFileBody {
    #[serde(rename = "fileName", default)]
    file_name: String,
    #[serde(default)]
    content: Value,
}

/// PUT /files/{id}: Overwrite a file, or create one when id is `new`.
async fn file_write(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(q): Query<UserQuery>,
    Json(body): Json<WriteFileBody>,
) -> Result<Json<Value>, ProxyError> {
    let user_id = q.require()?;
    let file_id = if id == "new" {
        None
    } else {
        Some(parse_file_id(&id)?)
    };
    let token = access_token(&state, user_id).await?;

    let result = state
        .drive
        .write_file(user_id, &token, file_id, &body.file_name, &body.content)
        .await?;
    Ok(Json(json!({ "success": true, "result": result })))
}

/// DELETE /files/{id}
async fn file_delete(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Value>, ProxyError> {
    let user_id = q.require()?;
    let file_id = parse_file_id(&id)?;
    let token = access_token(&state, user_id).await?;

    state.drive.delete_file(&token, file_id).await?;
    Ok(Json(json!({ "success": true })))
}

/// Append `key=value` to the app URL.
fn app_redirect(app_url: &str, key: &str, value: &str) -> String {
    match url::Url::parse(app_url) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair(key, value);
            url.to_string()
        }
        Err(_) => format!(
            "{app_url}?{key}={}",
            url::form_urlencoded::byte_serialize(value.as_bytes()).collect::<String>()
        ),
    }
}
