//! Configuration shared by the catalog, the log store and the run controller.
//!
//! These are built once at startup (see the server's config loader) and handed
//! to constructors by reference. Nothing in request handling reads ambient
//! global state.

use serde::Deserialize;
use std::path::PathBuf;

/// Where runnable jobs live and which directory entries are hidden.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CatalogConfig {
    pub commands_dir: PathBuf,
    /// Shell-style glob patterns, e.g. `["*.pyc", "a.out"]`.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl CatalogConfig {
    pub fn new(commands_dir: impl Into<PathBuf>) -> Self {
        Self {
            commands_dir: commands_dir.into(),
            exclude: Vec::new(),
        }
    }

    /// Parse a comma separated pattern list such as `"*.pyc,a.out"`.
    pub fn with_exclude_list(mut self, patterns: &str) -> Self {
        self.exclude = split_patterns(patterns);
        self
    }
}

pub fn split_patterns(patterns: &str) -> Vec<String> {
    patterns
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Log store backend selection.
///
/// ```toml
/// [store]
/// backend = "sqlite"
/// path = "/tmp/db.sqlite3"
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    Sqlite { path: PathBuf },
    Files { dir: PathBuf },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Sqlite {
            path: PathBuf::from("/tmp/db.sqlite3"),
        }
    }
}

/// What happens to a running job when the client streaming its output goes away.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectPolicy {
    /// Keep draining the process and record its full transcript.
    Continue,
    /// Kill the process; the run is still finalized with the signal status.
    Kill,
}

impl Default for DisconnectPolicy {
    fn default() -> Self {
        DisconnectPolicy::Continue
    }
}

impl std::str::FromStr for DisconnectPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "continue" => Ok(DisconnectPolicy::Continue),
            "kill" => Ok(DisconnectPolicy::Kill),
            other => Err(format!(
                "invalid disconnect policy: {other} (expected \"continue\" or \"kill\")"
            )),
        }
    }
}
