//! Server configuration: an optional TOML file, overridden by command-line
//! flags, resolved once at startup.
//!
//! ```toml
//! listen = "0.0.0.0:8000"
//! commands_dir = "./cmds"
//! exclude = ["*.pyc", "a.out"]
//! page_size = 50
//! on_disconnect = "continue"
//!
//! [store]
//! backend = "files"
//! dir = "/var/log/jobrunner"
//! ```

use clap::{ArgEnum, Parser};
use joblib::config::split_patterns;
use joblib::{CatalogConfig, DisconnectPolicy, StoreConfig};
use serde::Deserialize;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[clap(name = "jobrunner-server", version, about = "Run allowlisted scripts over HTTP")]
pub struct Args {
    /// TOML configuration file
    #[clap(long, env = "JOBRUNNER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the runnable jobs
    #[clap(long)]
    pub dir: Option<PathBuf>,

    /// Comma separated glob patterns hidden from the job list, e.g. "*.pyc,a.out"
    #[clap(long)]
    pub exclude: Option<String>,

    /// Keep run logs in this SQLite database
    #[clap(long)]
    pub db: Option<PathBuf>,

    /// Keep run logs as files in this directory
    #[clap(long)]
    pub logs_dir: Option<PathBuf>,

    /// Address to listen on
    #[clap(long, env = "JOBRUNNER_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// What to do with a running job when its client disconnects: continue or kill
    #[clap(long)]
    pub on_disconnect: Option<DisconnectPolicy>,

    #[clap(long, arg_enum)]
    pub log_level: Option<LogLevel>,
}

#[derive(ArgEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("page_size must be at least 1")]
    PageSize,
    #[error("--db and --logs-dir are mutually exclusive")]
    StoreConflict,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub commands_dir: PathBuf,
    pub exclude: Vec<String>,
    pub page_size: usize,
    pub on_disconnect: DisconnectPolicy,
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
            commands_dir: PathBuf::from("./cmds"),
            exclude: Vec::new(),
            page_size: 50,
            on_disconnect: DisconnectPolicy::default(),
            store: StoreConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read the config file named in `args`, if any, then apply flag overrides.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
            None => ServerConfig::default(),
        };
        config.apply(args)?;
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, args: &Args) -> Result<(), ConfigError> {
        if let Some(dir) = &args.dir {
            self.commands_dir = dir.clone();
        }
        if let Some(exclude) = &args.exclude {
            self.exclude = split_patterns(exclude);
        }
        self.store = match (&args.db, &args.logs_dir) {
            (Some(_), Some(_)) => return Err(ConfigError::StoreConflict),
            (Some(path), None) => StoreConfig::Sqlite { path: path.clone() },
            (None, Some(dir)) => StoreConfig::Files { dir: dir.clone() },
            (None, None) => self.store.clone(),
        };
        if let Some(listen) = args.listen {
            self.listen = listen;
        }
        if let Some(policy) = args.on_disconnect {
            self.on_disconnect = policy;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::PageSize);
        }
        Ok(())
    }

    pub fn catalog(&self) -> CatalogConfig {
        CatalogConfig {
            commands_dir: self.commands_dir.clone(),
            exclude: self.exclude.clone(),
        }
    }
}
