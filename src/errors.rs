//! Error types shared across the supervisor.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// No usable worker interpreter could be located or verified.
    EnvironmentResolution(String),
    /// Entry script or config file missing, or the OS refused to spawn.
    Spawn(String),
    /// Post-launch handshake with the spawned worker failed.
    Handshake(String),
    /// Process survived even the forced-kill step of the shutdown protocol.
    TerminationTimeout(u32),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::EnvironmentResolution(msg) => write!(f, "environment resolution: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake: {msg}"),
            Self::TerminationTimeout(pid) => {
                write!(f, "termination timeout: pid {pid} survived forced kill")
            }
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
