use crate::client::{ClientError, ResourceKind};
use crate::store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that abort a whole orchestrator operation.
///
/// Per-resource failures never surface here; they are folded into the
/// stage reports instead.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(
        "Resource limit exceeded while handling {kind} '{name}': {message}. \
         Request a quota increase before retrying"
    )]
    Capacity {
        kind: ResourceKind,
        name: String,
        message: String,
    },

    #[error("Naming collision: {identifiers:?} all map to username '{username}'")]
    NameCollision {
        username: String,
        identifiers: Vec<String>,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Control plane error: {0}")]
    Client(#[from] ClientError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] studio_config::ConfigError),
}

impl OrchestratorError {
    /// Whether retrying the same operation later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestratorError::Client(e) => e.is_transient(),
            OrchestratorError::Store(StoreError::Unavailable(_)) => true,
            _ => false,
        }
    }
}
