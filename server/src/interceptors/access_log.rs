use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use tracing::{debug, info};

/// Middleware function. Logs `remote method uri` for every request.
pub async fn log_request(
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    info!("{} {} {}", remote, req.method(), req.uri());
    let response = next.run(req).await;
    debug!(%remote, status = response.status().as_u16(), "response headers sent");
    response
}
