//! Main Entrypoint for the Aula API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the database connection pool and running migrations.
//! 3. Initializing shared services (speech model, tools, authentication).
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use aula_api::{
    auth::{Authenticator, GoogleVerifier, JwtAuthenticator},
    config::Config,
    db::{Db, spawn_student_sync_worker},
    router::create_router,
    state::AppState,
};
use aula_core::{
    pipeline::TutorPipeline,
    repository::Repository,
    speech::OpenAISpeechModel,
    tools::{CurrentLessonTool, ToolRegistry},
};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Database ---
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let db = Db::new(pool);
    db.run_migrations().await?;
    info!("Database connection established and migrations are up-to-date.");
    let repo: Arc<dyn Repository> = Arc::new(db);

    // --- 4. Initialize Shared Services ---
    let speech = Arc::new(OpenAISpeechModel::new(
        &config.openai_api_key,
        &config.openai_base_url,
        config.chat_model.clone(),
        config.stt_model.clone(),
        config.tts_model.clone(),
        config.tts_voice.clone(),
    ));
    let pipeline = Arc::new(TutorPipeline::new(speech));

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(CurrentLessonTool::new(repo.clone())));
    let tools = Arc::new(tools);

    let authenticator: Arc<dyn Authenticator> = Arc::new(JwtAuthenticator::new(
        config.jwt_secret.clone(),
        config.jwt_exp_hours,
    ));
    let google = Arc::new(GoogleVerifier::new(config.google_client_id.clone()));
    let sync_tx = spawn_student_sync_worker(repo.clone());

    let app_state = AppState {
        authenticator,
        google,
        repo,
        pipeline,
        tools,
        sync_tx,
        config: Arc::new(config.clone()),
    };

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        realtime_model = %config.realtime_model,
        chat_model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
