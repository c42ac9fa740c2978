use axum::{extract::Request, middleware::Next, response::Response};
use joblib::types::{User, ANONYMOUS};

const USER_HEADER: &str = "x-remote-user";

/// Middleware function. Labels the request with the unverified `X-Remote-User`.
pub async fn extract_user(mut req: Request, next: Next) -> Response {
    let user_id = req
        .headers()
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string();
    req.extensions_mut().insert(UserExtension { user_id });
    next.run(req).await
}

#[derive(Clone, Debug)]
pub struct UserExtension {
    pub user_id: User,
}
