use axum::Router;
use std::sync::Arc;

use crate::pipeline::Pipeline;

pub mod error;
pub mod manifests;
pub mod runs;

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .nest("/runs", runs::router(pipeline))
        .nest("/manifests", manifests::router())
}
