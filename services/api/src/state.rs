//! Shared application state for the HTTP and WebSocket handlers.

use crate::auth::{Authenticator, GoogleVerifier};
use crate::config::Config;
use crate::db::StudentSync;
use aula_core::pipeline::TutorPipeline;
use aula_core::repository::Repository;
use aula_core::tools::ToolRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<dyn Authenticator>,
    pub google: Arc<GoogleVerifier>,
    pub repo: Arc<dyn Repository>,
    pub pipeline: Arc<TutorPipeline>,
    pub tools: Arc<ToolRegistry>,
    pub sync_tx: mpsc::Sender<StudentSync>,
    pub config: Arc<Config>,
}
