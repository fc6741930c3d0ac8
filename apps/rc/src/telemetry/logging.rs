//! Process-wide `tracing` setup for the `rc` binary.
//!
//! Crate targets follow `--log-level`; dependencies stay at `info` or quieter
//! so a trace run shows the stream state machine instead of TLS and HTTP
//! framing. `RC_LOG_FILTER` replaces the computed directives entirely.

use clap::ValueEnum;
use std::fs::{self, File, OpenOptions};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;

pub const LOG_FILTER_ENV: &str = "RC_LOG_FILTER";
pub const TRACE_DEPS_ENV: &str = "RC_TRACE_DEPS";

/// Targets that belong to this workspace and follow the requested level.
const CRATE_TARGETS: &[&str] = &["rc", "rc_client_core", "rc_proto"];

/// Chatty at trace level; capped at `info` unless `RC_TRACE_DEPS` is set.
const NOISY_DEPENDENCIES: &[&str] = &[
    "hyper",
    "hyper_util",
    "h2",
    "reqwest",
    "rustls",
    "tokio_tungstenite",
    "tungstenite",
    "mio",
];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Appended to instead of stderr; parent directories are created.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to configure logger: {0}")]
    Configure(String),
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. Later calls are no-ops.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }
    let directives = match std::env::var(LOG_FILTER_ENV) {
        Ok(custom) if !custom.trim().is_empty() => Directives {
            filter: custom,
            capped: false,
        },
        _ => Directives::for_level(
            config.level,
            super::env_truthy(TRACE_DEPS_ENV).unwrap_or(false),
        ),
    };

    let (writer, guard, ansi) = match &config.file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(open_log_file(path)?);
            (writer, guard, false)
        }
        None => stderr_writer(),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&directives.filter))
        .with_target(config.level >= LogLevel::Debug)
        .with_thread_ids(config.level == LogLevel::Trace)
        .with_ansi(ansi)
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::Configure(err.to_string()))?;
    let _ = GUARD.set(guard);

    tracing::debug!(
        target: "rc::config",
        filter = %directives.filter,
        capped = directives.capped,
        "logging initialised"
    );
    Ok(())
}

fn stderr_writer() -> (NonBlocking, WorkerGuard, bool) {
    let ansi = io::stderr().is_terminal();
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());
    (writer, guard, ansi)
}

fn open_log_file(path: &Path) -> Result<File, InitError> {
    let io_error = |source: io::Error| InitError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_error)
}

#[derive(Debug, PartialEq, Eq)]
struct Directives {
    filter: String,
    /// Whether dependency targets were held below the requested level.
    capped: bool,
}

impl Directives {
    fn for_level(level: LogLevel, allow_dependency_traces: bool) -> Self {
        let own = level.directive();
        if level <= LogLevel::Info {
            return Self {
                filter: own.to_string(),
                capped: false,
            };
        }
        let mut parts = vec!["info".to_string()];
        parts.extend(CRATE_TARGETS.iter().map(|target| format!("{target}={own}")));
        let capped = level == LogLevel::Trace && !allow_dependency_traces;
        if capped {
            parts.extend(NOISY_DEPENDENCIES.iter().map(|dep| format!("{dep}=info")));
        }
        Self {
            filter: parts.join(","),
            capped,
        }
    }
}
