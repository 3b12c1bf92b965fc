use axum::{response::Json, routing::get, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{info, warn};

mod api;
mod config;
mod db;
mod embeddings;
mod llm;
mod pipeline;

use config::DaemonConfig;
use engine::InferenceGate;
use pipeline::Pipeline;

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
    text_engine: bool,
    embedder: bool,
}

fn build_pipeline(config: &DaemonConfig, db: Arc<db::Database>, gate: InferenceGate) -> Pipeline {
    let mut pipeline = Pipeline::new(db, config.engine.clone(), config.manifest_dir.clone())
        .with_gate(gate);

    if let Some(url) = &config.text_engine_url {
        match llm::ChatTextEngine::new(url, &config.text_model, config.request_timeout) {
            Ok(engine) => {
                info!("[LLM] text engine at {} (model {})", url, config.text_model);
                pipeline = pipeline.with_text_engine(Arc::new(engine));
            }
            Err(e) => warn!("[LLM] text engine disabled: {}", e),
        }
    } else {
        info!("[LLM] no text engine configured; anchors will be heuristic");
    }

    if let Some(url) = &config.embedding_url {
        match embeddings::HttpEmbedder::new(url, config.request_timeout) {
            Ok(embedder) => {
                info!("[EMBEDDING] embedding service at {}", url);
                pipeline = pipeline.with_embedder(Arc::new(embedder));
            }
            Err(e) => warn!("[EMBEDDING] embedder disabled: {}", e),
        }
    }

    pipeline
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DaemonConfig::from_env();

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&config.manifest_dir)?;
    let db = Arc::new(db::Database::new(&config.db_path)?);
    info!("Database initialized at {:?}", config.db_path);

    let text_engine = config.text_engine_url.is_some();
    let embedder = config.embedding_url.is_some();
    let gate = InferenceGate::exclusive();
    let pipeline = Arc::new(build_pipeline(&config, db, gate));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_credentials(false);

    let app = Router::new()
        .route(
            "/health",
            get(move || async move {
                Json(HealthResponse {
                    ok: true,
                    version: env!("CARGO_PKG_VERSION"),
                    text_engine,
                    embedder,
                })
            }),
        )
        .nest("/api", api::router(pipeline))
        .nest_service("/manifests", ServeDir::new(&config.manifest_dir))
        .layer(cors);

    info!("Starting daemon server on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
