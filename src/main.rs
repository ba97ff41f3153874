mod anthropic;
mod artifact;
mod completion;
mod config;
mod events;
mod models;
mod openai;
mod pipeline;
mod quality;
mod routes;
mod store;
mod workflow;

use anyhow::Context;
use axum::{Router, routing::{post, get}};
use routes::{create_book, generate_book, generate_content, get_book, get_book_status, list_books, root, stream_events, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::{CorsLayer, Any}, trace::TraceLayer};
use tracing_subscriber::{fmt, EnvFilter};

use crate::{
    anthropic::AnthropicClient,
    config::AppConfig,
    events::ProgressBroadcaster,
    openai::OpenAiClient,
    pipeline::GenerationPipeline,
    store::{BookStore, InMemoryBookStore},
    workflow::GenerationWorkflow,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/books", post(create_book).get(list_books))
        .route("/books/:id", get(get_book))
        .route("/books/:id/status", get(get_book_status))
        .route("/books/:id/generate", post(generate_book))
        .route("/events/:id", get(stream_events))
        .route("/generate", post(generate_content))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

fn build_state(config: &AppConfig) -> anyhow::Result<AppState> {
    let structural = Arc::new(OpenAiClient::new(config.structural.clone()).context("building structural client")?);
    let narrative = Arc::new(AnthropicClient::new(config.narrative.clone()).context("building narrative client")?);
    let pipeline = Arc::new(GenerationPipeline::new(structural, narrative, config.generation));

    let store: Arc<dyn BookStore> = Arc::new(InMemoryBookStore::new());
    let events = Arc::new(ProgressBroadcaster::new(config.event_buffer));
    let workflow = Arc::new(GenerationWorkflow::new(store.clone(), events.clone(), pipeline.clone()));

    Ok(AppState { store, events, pipeline, workflow })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => { sig.recv().await; }
            Err(e) => tracing::error!("Failed to listen for SIGTERM: {}", e),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("🛑 Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env().context("loading configuration")?;
    for (role, provider) in [("structural", &config.structural), ("narrative", &config.narrative)] {
        if provider.is_demo() {
            tracing::warn!("No API key for {} model {}, running in demo mode", role, provider.model);
        } else {
            let key_prefix: String = provider.api_key.chars().take(6).collect();
            tracing::info!("Using {} model {} (key {}...)", role, provider.model, key_prefix);
        }
    }
    tracing::info!(
        "Quality threshold {:.2}, creativity {:.2}",
        config.generation.quality_threshold,
        config.generation.creativity_level
    );

    let app = router(build_state(&config)?);

    let addr = SocketAddr::from(([0,0,0,0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}
