//! The text framing a run's output.
//!
//! Every line here is produced once and sent to both the log store and the
//! client, so the two always hold the same bytes. Nothing is escaped;
//! transports that embed the transcript in markup add their own wrapping.

use super::RunStatus;
use crate::types::OutputBlob;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt::Display;

pub const SEPARATOR: &str = "==========================";

/// `Started at <RFC 2822 time> by <user>` followed by a separator line.
pub fn header(start: DateTime<Utc>, user: &str) -> OutputBlob {
    Bytes::from(format!(
        "Started at {} by {}\n{}\n\n",
        start.to_rfc2822(),
        user,
        SEPARATOR
    ))
}

pub fn error(err: &dyn Display) -> OutputBlob {
    Bytes::from(format!("ERROR: {}\n", err))
}

pub fn warning(message: &str) -> OutputBlob {
    Bytes::from(format!("WARNING: {}\n", message))
}

/// A separator line, then `Finished in <secs>s with <status>`.
pub fn footer(duration_secs: f64, status: &RunStatus) -> OutputBlob {
    Bytes::from(format!(
        "\n{}\nFinished in {:.3}s with {}\n",
        SEPARATOR, duration_secs, status
    ))
}
