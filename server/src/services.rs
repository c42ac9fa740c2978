mod jobs;
mod logs;
mod runs;

use crate::interceptors;
use axum::{
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use joblib::RunController;
use std::fmt::Display;

/// Shared by every handler. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub controller: RunController,
    pub page_size: usize,
}

/// Routes:
/// - `GET|POST /run/<job>`: run a job, streaming its transcript
/// - `GET /jobs`: names of the runnable jobs
/// - `GET /logs`: one run's transcript (`id`) or a page of runs (`job`, `page`)
pub fn router(state: AppState) -> Router {
    Router::new()
        // everything after `/run/` is the job name, slashes included
        .route("/run/*job", get(runs::run_job).post(runs::run_job))
        .route("/jobs", get(jobs::list_jobs))
        .route("/logs", get(logs::get_logs))
        // `/run/` itself, which the wildcard does not match
        .fallback(runs::run_unnamed)
        .layer(middleware::from_fn(interceptors::extract_user))
        .layer(middleware::from_fn(interceptors::log_request))
        .with_state(state)
}

/// Failures are reported in the JSON body with a 200, never as an HTTP error.
fn in_band_error(err: impl Display) -> Response {
    Json(serde_json::json!({ "error": err.to_string() })).into_response()
}
