use crate::store::StoreError;
use std::{io, path::PathBuf, result};
use thiserror;

#[derive(thiserror::Error, Debug)]
pub enum JobError {
    #[error("Command not found: {0}")]
    NotFound(String),
    #[error("failed to start {}: {source}", path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid exclusion pattern: {0}")]
    Pattern(#[from] globset::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = result::Result<T, JobError>;
