use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("NotRunning")]
    NotRunning,
    #[error("TimeExpired")]
    TimeExpired,
    #[error("failed to signal process group: {0}")]
    Signal(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("user lookup failed: {0}")]
    Lookup(#[source] io::Error),
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("user name contains a NUL byte")]
    InvalidName,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
