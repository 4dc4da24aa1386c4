//! Tena - Symptom triage and self-care guidance service.
//!
//! # API Endpoints
//!
//! - `POST /conversations` - Start a guided symptom conversation
//! - `GET /conversations/:id` - Conversation state
//! - `POST /conversations/:id/answers` - Answer the current question
//! - `GET /conversations/:id/report` - Final health report
//! - `POST /triage` - Classify symptom urgency
//! - `POST /topics/map` - Map free text to a guidance topic
//! - `GET /topics` - Approved topics for a language
//! - `GET /guidance/:topic_key` - Self-care guidance card
//! - `GET /health` - Health check

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use tena::api::{AppState, router};
use tena::config::Config;
use tena::content::ContentLibrary;
use tena::reaper::spawn_expiry_reaper;
use tena::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default level is INFO; symptom text is only ever logged by length
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("tena=info".parse()?))
        .init();

    let config = Config::from_env()?;
    info!(
        port = config.port,
        db_url = %config.database_url,
        provider = ?config.provider,
        model = %config.model,
        "Starting Tena server"
    );

    let content = Arc::new(ContentLibrary::load_dir(&config.content_dir)?);
    info!(
        rules = content.rule_count(),
        topics = content.topic_count(),
        "Content library loaded"
    );

    let storage = Storage::new(&config.database_url).await?;
    info!("Database initialized");

    let gateway = config.build_gateway()?;
    let state = AppState::new(
        gateway,
        content,
        Arc::new(storage),
        config.validate_symptoms,
    );

    let _reaper = spawn_expiry_reaper(
        state.engine.clone(),
        config.conversation_max_age,
        config.reaper_interval,
    );

    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Tena is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
