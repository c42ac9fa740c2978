use super::AppState;
use crate::interceptors::UserExtension;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Extension,
};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

const OPEN: &[u8] = b"<pre>";
const CLOSE: &[u8] = b"</pre>\n";

/// Run `job` and stream its transcript as it is produced. Always a 200; how
/// the job went is part of the transcript.
pub async fn run_job(
    State(state): State<AppState>,
    Path(job): Path<String>,
    Extension(user): Extension<UserExtension>,
) -> Response {
    stream_run(&state, &job, &user)
}

/// `/run/` with no job name still gets a recorded, in-band failure.
pub async fn run_unnamed(
    State(state): State<AppState>,
    uri: Uri,
    Extension(user): Extension<UserExtension>,
) -> Response {
    match uri.path() {
        "/run/" => stream_run(&state, "", &user),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

fn stream_run(state: &AppState, job: &str, user: &UserExtension) -> Response {
    info!(%job, user = %user.user_id, "run requested");
    let (output, _outcome) = state.controller.start(job, &user.user_id).into_parts();

    let transcript = stream::once(async { Bytes::from_static(OPEN) })
        .chain(ReceiverStream::new(output))
        .chain(stream::once(async { Bytes::from_static(CLOSE) }))
        .map(Ok::<_, Infallible>);

    (
        [
            (header::CONTENT_TYPE, "text/html; charset=UTF-8"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "close"),
            (header::VARY, "User-Agent"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        Body::from_stream(transcript),
    )
        .into_response()
}
