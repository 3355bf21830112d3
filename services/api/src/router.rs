use crate::handlers::{google_auth, health, tutor_turn};
use crate::state::AppState;
use crate::ws::ws_handler;
use axum::{
    Router,
    routing::{get, post},
};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/auth/google", post(google_auth))
        .route("/turn", post(tutor_turn))
        .route("/ws", get(ws_handler))
        .with_state(state)
}
