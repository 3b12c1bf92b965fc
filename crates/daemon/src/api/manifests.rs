use axum::{response::Json, routing::post, Router};
use serde::Serialize;

use engine::TrailerManifest;

use super::error::ApiResult;

#[derive(Serialize)]
pub struct ValidationResponse {
    valid: bool,
    schema_version: String,
    clips: usize,
    degraded: bool,
}

pub fn router() -> Router {
    Router::new().route("/validate", post(validate_manifest))
}

/// Checks a manifest produced elsewhere before a downstream stage consumes it.
async fn validate_manifest(body: String) -> ApiResult<Json<ValidationResponse>> {
    let manifest = TrailerManifest::from_json(&body)?;
    Ok(Json(ValidationResponse {
        valid: true,
        schema_version: manifest.schema_version.clone(),
        clips: manifest.clips.len(),
        degraded: manifest.is_degraded(),
    }))
}
