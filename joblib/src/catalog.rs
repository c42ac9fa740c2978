use crate::config::CatalogConfig;
use crate::error::{JobError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};

/// Entries of the commands directory not hidden by an exclusion pattern.
/// Re-read on every call.
#[derive(Debug, Clone)]
pub struct JobCatalog {
    commands_dir: PathBuf,
    exclude: GlobSet,
}

impl JobCatalog {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in config.exclude.iter().filter(|p| !p.is_empty()) {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            commands_dir: config.commands_dir.clone(),
            exclude: builder.build()?,
        })
    }

    pub fn commands_dir(&self) -> &Path {
        &self.commands_dir
    }

    /// Names of all runnable jobs, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.commands_dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if !self.exclude.is_match(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Resolve a job name to its executable path. Only exact listed names match.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        if self.list()?.iter().any(|job| job == name) {
            Ok(self.commands_dir.join(name))
        } else {
            Err(JobError::NotFound(name.to_string()))
        }
    }
}
