pub type JobName = String;
pub type User = String;
pub type RunId = String;
pub type OutputBlob = bytes::Bytes;

/// Identity recorded for runs started without an operator header.
pub const ANONYMOUS: &str = "Anonymous";

/// Exit status recorded for runs whose process never started or could not be waited on.
pub const FAILED_TO_START: i32 = -1;
