use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;

use engine::extract::AnchorReport;
use engine::TrailerManifest;

use super::error::{ApiError, ApiResult};
use crate::db::{Run, Stage};
use crate::pipeline::{Pipeline, RunInput, RunOutcome};

#[derive(Serialize)]
pub struct RunResponse {
    id: String,
    status: &'static str,
    fingerprint: String,
    manifest_path: Option<String>,
    error: Option<String>,
    checkpoints: Vec<String>,
    created_at: String,
    updated_at: String,
}

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/", post(create_run))
        .route("/:id", get(get_run))
        .route("/:id/resume", post(resume_run))
        .route("/:id/anchors", get(get_anchors))
        .route("/:id/manifest", get(get_manifest))
        .with_state(pipeline)
}

fn find_run(pipeline: &Pipeline, id: &str) -> ApiResult<Run> {
    pipeline
        .db()
        .get_run(id)?
        .ok_or_else(|| ApiError::not_found(format!("run {}", id)))
}

async fn create_run(
    State(pipeline): State<Arc<Pipeline>>,
    Json(input): Json<RunInput>,
) -> ApiResult<(StatusCode, Json<RunOutcome>)> {
    let outcome = pipeline.submit(input).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn get_run(
    State(pipeline): State<Arc<Pipeline>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RunResponse>> {
    let run = find_run(&pipeline, &id)?;
    let checkpoints = pipeline.db().checkpointed_stages(&id)?;

    Ok(Json(RunResponse {
        id: run.id,
        status: run.status.as_str(),
        fingerprint: run.fingerprint,
        manifest_path: run.manifest_path,
        error: run.error,
        checkpoints,
        created_at: run.created_at.to_rfc3339(),
        updated_at: run.updated_at.to_rfc3339(),
    }))
}

async fn resume_run(
    State(pipeline): State<Arc<Pipeline>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RunOutcome>> {
    Ok(Json(pipeline.resume(&id).await?))
}

async fn get_anchors(
    State(pipeline): State<Arc<Pipeline>>,
    Path(id): Path<String>,
) -> ApiResult<Json<AnchorReport>> {
    let run = find_run(&pipeline, &id)?;
    let payload = pipeline
        .db()
        .load_checkpoint(&id, Stage::Anchors, &run.fingerprint)?
        .ok_or_else(|| ApiError::not_found(format!("anchors for run {}", id)))?;
    let report = serde_json::from_str(&payload).map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(report))
}

async fn get_manifest(
    State(pipeline): State<Arc<Pipeline>>,
    Path(id): Path<String>,
) -> ApiResult<Json<TrailerManifest>> {
    let run = find_run(&pipeline, &id)?;
    let path = run
        .manifest_path
        .map(std::path::PathBuf::from)
        .filter(|p| p.exists())
        .ok_or_else(|| ApiError::not_found(format!("manifest for run {}", id)))?;
    Ok(Json(TrailerManifest::load(&path)?))
}
