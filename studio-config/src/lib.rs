//! Configuration for the studio provisioning tools.
//!
//! The configuration is a small JSON document written by `studio configure`
//! and read by every other command. It is loaded once, validated, and passed
//! by reference into the orchestrator.

pub mod config;
pub mod error;
pub mod paths;

pub use config::{
    is_configured, BackoffSettings, StudioConfig, DEFAULT_CONCURRENCY, DEFAULT_REGION,
    DOMAIN_ID_PREFIX, MAX_BACKOFF_FACTOR, MAX_BACKOFF_SECS,
};
pub use error::{ConfigError, Result};
pub use paths::{config_path, CONFIG_PATH_ENV};
