//! Student Roster Backend
//!
//! A production-grade REST backend with SQLite persistence and a versioned
//! edit history for every record.

mod api;
mod config;
mod db;
mod engine;
mod errors;
mod identity;
mod models;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;
use engine::UpdateEngine;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub engine: Arc<UpdateEngine>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Student Roster Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);
    tracing::info!("Id mode: {}", config.id_mode.as_str());

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Repository::new(pool);
    let engine = UpdateEngine::new(repo.clone(), config.id_mode);

    // Create application state
    let state = AppState {
        repo: Arc::new(repo),
        engine: Arc::new(engine),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Students
        .route("/students", post(api::create_student))
        .route("/students/{id}", get(api::get_student))
        .route("/students/{id}", put(api::update_student))
        .route("/students/{id}/history", get(api::get_student_history))
        // Submissions
        .route("/submissions", post(api::create_submission))
        .route("/submissions", get(api::list_submissions))
        .route("/submissions/{id}", get(api::get_submission))
        // Health check
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
