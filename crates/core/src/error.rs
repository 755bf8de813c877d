use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Prerequisite missing or the automation server failed to spawn/stay
    /// alive. Fatal for the current session; never auto-retried.
    #[error("Server start error: {0}")]
    Start(String),

    /// The automation server returned a JSON-RPC error object. The payload
    /// is carried verbatim.
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Framing/parse failure or read-attempt exhaustion on the wire.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// Every candidate selector (including vision recovery, if attempted)
    /// failed for one action.
    #[error("Resolution exhausted: {0}")]
    Resolution(String),

    /// Browser automation is switched off in configuration.
    #[error("Browser automation is disabled")]
    Disabled,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Vision error: {0}")]
    Vision(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
