//! Crate-wide error taxonomy.
//!
//! Only configuration/startup failures are meant to terminate the process;
//! every other variant here is something a caller is expected to handle or
//! degrade against (see `main.rs` for the one place that turns `Error` into
//! a process exit code).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("discovery backend '{backend}' unavailable: {reason}")]
    DiscoveryBackendUnavailable { backend: String, reason: String },

    #[error("vm pool exhausted after waiting {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("script error: {0}")]
    Script(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("lua error: {0}")]
    Lua(#[from] mlua::Error),
}
