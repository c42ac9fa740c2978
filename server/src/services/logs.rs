use super::{in_band_error, AppState};
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use joblib::store::blocking;
use joblib::{LogStore, StoreError};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Deserialize, Debug, Default)]
pub struct LogsQuery {
    id: Option<String>,
    /// Older clients look runs up by `name`.
    name: Option<String>,
    job: Option<String>,
    page: Option<String>,
}

impl LogsQuery {
    fn run_id(&self) -> Option<&str> {
        [&self.id, &self.name]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|id| !id.is_empty())
    }

    /// Anything that is not a page number means the first page.
    fn page(&self) -> usize {
        self.page
            .as_deref()
            .and_then(|page| page.trim().parse().ok())
            .unwrap_or(0)
    }
}

pub async fn get_logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Response {
    let store = state.controller.store().clone();
    match query.run_id() {
        Some(id) => get_one(store, id.to_string()).await,
        None => {
            let job = query.job.clone();
            let (page, page_size) = (query.page(), state.page_size);
            let listing =
                blocking(move || store.list(job.as_deref(), page, page_size)).await;
            match listing {
                Ok(page) => Json(page).into_response(),
                Err(err) => {
                    warn!(error = %err, "failed to list runs");
                    in_band_error(err)
                }
            }
        }
    }
}

async fn get_one(store: Arc<dyn LogStore>, id: String) -> Response {
    match blocking(move || store.get(&id)).await {
        Ok(record) => Json(serde_json::json!({
            "body": String::from_utf8_lossy(&record.body),
            "entry": record.summary,
        }))
        .into_response(),
        Err(err) => {
            if !matches!(err, StoreError::NotFound(_)) {
                warn!(error = %err, "failed to read run");
            }
            in_band_error(err)
        }
    }
}
