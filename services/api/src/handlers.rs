//! HTTP route handlers and the shared API error type.

use crate::auth::{AuthError, Authenticator, Identity};
use crate::db::StudentSync;
use crate::state::AppState;
use aula_core::session::SessionState;
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::InternalServerError(e) => {
                error!("Internal server error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        ApiError::InternalServerError(err.into())
    }
}

pub async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
pub struct GoogleAuthRequest {
    pub credential: String,
}

/// Exchanges a Google ID token for an internal session token.
pub async fn google_auth(
    State(state): State<AppState>,
    Json(payload): Json<GoogleAuthRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let identity: Identity = state
        .google
        .verify_credential(&payload.credential)
        .await
        .map_err(|e| {
            warn!(error = %e, "google credential rejected");
            ApiError::Unauthorized("invalid credential".to_string())
        })?;

    let token = state
        .authenticator
        .issue(&identity)
        .map_err(|e| ApiError::InternalServerError(e.into()))?;

    // Row creation happens off the request path.
    let sync = StudentSync {
        id: identity.sub.clone(),
        email: identity.email.clone().unwrap_or_default(),
        name: identity.name.clone().unwrap_or_default(),
    };
    if let Err(e) = state.sync_tx.send(sync).await {
        error!(error = %e, "student sync queue unavailable");
    }

    info!(student_id = %identity.sub, "login succeeded");
    Ok(Json(json!({
        "status": "OK",
        "token": token,
        "name": identity.name,
        "email": identity.email,
    })))
}

/// Resolves the identity behind a `Authorization: Bearer ...` header.
fn bearer_identity(
    headers: &HeaderMap,
    authenticator: &dyn Authenticator,
) -> Result<Identity, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AuthError::MissingToken)
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
    authenticator.verify(token).map_err(|e| {
        warn!(error = %e, "bearer token rejected");
        ApiError::Unauthorized("invalid token".to_string())
    })
}

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    /// Base64-encoded pre-recorded audio clip.
    pub audio: Option<String>,
    /// Typed message, used when no clip is sent.
    pub text: Option<String>,
}

/// One non-realtime tutoring turn: a pre-recorded clip or a typed
/// message in, transcript plus synthesized reply audio out.
pub async fn tutor_turn(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<TurnRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let identity = bearer_identity(&headers, state.authenticator.as_ref())?;

    let audio = payload
        .audio
        .map(|encoded| BASE64.decode(encoded.as_bytes()))
        .transpose()
        .map_err(|_| ApiError::BadRequest("audio is not valid base64".to_string()))?;
    if audio.is_none() && payload.text.is_none() {
        return Err(ApiError::BadRequest("audio or text is required".to_string()));
    }

    let mut session = SessionState::new(
        identity.sub,
        identity.name.unwrap_or_default(),
        identity.email.unwrap_or_default(),
    );
    let turn = state.pipeline.respond(audio, payload.text, &mut session).await;
    Ok(Json(json!({
        "transcript": turn.transcript,
        "agent": turn.agent,
        "audio": BASE64.encode(turn.audio),
    })))
}
