mod access_log;
mod user;

pub use access_log::log_request;
pub use user::{extract_user, UserExtension};
