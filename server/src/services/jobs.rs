use super::{in_band_error, AppState};
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

pub async fn list_jobs(State(state): State<AppState>) -> Response {
    match state.controller.catalog().list() {
        Ok(names) => Json(names).into_response(),
        Err(err) => {
            error!(error = %err, "failed to list jobs");
            in_band_error(err)
        }
    }
}
