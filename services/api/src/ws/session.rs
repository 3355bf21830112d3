//! WebSocket handshake and socket lifecycle.
//!
//! Authenticates the connection, connects the upstream realtime session,
//! and hands both sides to the relay.

use super::protocol::{CLOSE_INVALID_TOKEN, CLOSE_MISSING_TOKEN, ClientFrame, ServerMessage};
use super::relay::{ClientOutbound, RelaySession};
use super::upstream::{ConnectError, RealtimeUpstream};
use crate::auth::Identity;
use crate::state::AppState;
use crate::ws::events::SessionConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aula_core::instructions::build_instructions;
use aula_core::repository::Repository;
use aula_core::session::SessionState;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Session token issued by the login route. Browsers cannot set
    /// headers on WebSocket upgrades, so it travels as a query parameter.
    pub token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params.token, state))
}

#[instrument(skip_all)]
async fn handle_socket(socket: WebSocket, token: Option<String>, app: AppState) {
    let Some(token) = token else {
        reject(socket, CLOSE_MISSING_TOKEN, "missing token").await;
        return;
    };
    let identity = match app.authenticator.verify(&token) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "websocket token rejected");
            reject(socket, CLOSE_INVALID_TOKEN, "invalid token").await;
            return;
        }
    };
    info!(student_id = %identity.sub, "websocket session accepted");

    // Everything between authentication and the relay starting (the
    // student-row lookup included) shares one bounded handshake window.
    let setup = async {
        let session_state = prepare_session(app.repo.as_ref(), identity).await;
        let config = SessionConfig::new(
            build_instructions(&session_state),
            app.config.tts_voice.clone(),
            app.tools.specs(),
        );
        let upstream = RealtimeUpstream::connect(&app.config, config).await?;
        Ok::<_, ConnectError>((session_state, upstream))
    };
    let (session_state, upstream) =
        match tokio::time::timeout(app.config.handshake_timeout, setup).await {
            Ok(Ok((session_state, upstream))) => (session_state, Arc::new(upstream)),
            Ok(Err(e)) => {
                error!(error = %e, "upstream connection failed");
                fail(socket, "could not reach the voice service").await;
                return;
            }
            Err(_) => {
                error!("handshake timed out");
                fail(socket, "could not reach the voice service").await;
                return;
            }
        };

    let (sink, stream) = socket.split();
    let client = Arc::new(WsClient {
        sink: Mutex::new(sink),
    });
    let frames = stream
        .take_while(|message| std::future::ready(message.is_ok()))
        .filter_map(|message| {
            std::future::ready(match message {
                Ok(Message::Binary(data)) => Some(ClientFrame::AudioChunk(data)),
                Ok(Message::Text(text)) => Some(ClientFrame::TextMessage(text.to_string())),
                _ => None,
            })
        });

    RelaySession::new(
        session_state,
        upstream,
        client,
        app.tools.clone(),
        app.pipeline.clone(),
    )
    .run(frames)
    .await;
}

/// Builds the session context for a verified identity. A missing or
/// unreadable student row just means a blank context.
async fn prepare_session(repo: &dyn Repository, identity: Identity) -> SessionState {
    let mut session_state = SessionState::new(
        identity.sub,
        identity.name.unwrap_or_default(),
        identity.email.unwrap_or_default(),
    );
    match repo.get_student(&session_state.student_id).await {
        Ok(Some(student)) => {
            session_state.current_lesson = student.current_lesson;
            if let serde_json::Value::Object(profile) = student.profile {
                session_state.profile = profile;
            }
        }
        Ok(None) => {}
        Err(e) => warn!(error = ?e, "could not load student row for session"),
    }
    session_state
}

/// Closes a not-yet-accepted socket with an application close code.
async fn reject(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

/// Surfaces a fatal setup error to the client, then closes.
async fn fail(mut socket: WebSocket, error: &str) {
    let payload = ServerMessage::Error {
        error: error.to_string(),
    }
    .payload();
    let _ = socket.send(Message::Text(payload.to_string().into())).await;
    let _ = socket.send(Message::Close(None)).await;
}

/// [`ClientOutbound`] over the axum socket's send half.
struct WsClient {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait]
impl ClientOutbound for WsClient {
    async fn send_control(&self, message: ServerMessage) -> Result<()> {
        let text = message.payload().to_string();
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .context("failed to send control frame")
    }

    async fn send_audio(&self, audio: Bytes) -> Result<()> {
        self.sink
            .lock()
            .await
            .send(Message::Binary(audio))
            .await
            .context("failed to send audio frame")
    }

    async fn close(&self) {
        let _ = self.sink.lock().await.send(Message::Close(None)).await;
    }
}
