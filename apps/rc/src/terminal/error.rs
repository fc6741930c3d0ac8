use crate::api::ApiError;
use crate::config::ConfigError;
use crate::cursor::CursorError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Api(#[from] ApiError),
    #[error("cursor store: {0}")]
    Cursor(#[from] CursorError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("logging initialization failed: {0}")]
    Logging(String),
    #[error("no session with id '{0}'")]
    SessionNotFound(String),
    #[error("server is not healthy")]
    Unhealthy,
    #[error("terminal runtime error: {0}")]
    Runtime(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 2,
            CliError::Api(err) if err.is_unauthorized() => 3,
            _ => 1,
        }
    }
}
