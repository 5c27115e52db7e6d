use crate::error::{ConfigError, Result};
use crate::paths::config_path;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, instrument};

pub const DEFAULT_REGION: &str = "eu-west-1";

/// Prefix every scope (domain) identifier carries on the control plane.
pub const DOMAIN_ID_PREFIX: &str = "d-";

/// Maximum number of reconciliations in flight per stage.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Upper bound for any single backoff duration, in seconds.
pub const MAX_BACKOFF_SECS: f64 = 3600.0;

/// Upper bound for the backoff growth factor.
pub const MAX_BACKOFF_FACTOR: f64 = 10.0;

static TABLE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+$").expect("Table name regex should compile - static pattern")
});

/// Retry timing for remote reconciliation, expressed in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffSettings {
    #[serde(default = "default_floor_secs")]
    pub floor_secs: f64,

    #[serde(default = "default_factor")]
    pub factor: f64,

    #[serde(default = "default_ceiling_secs")]
    pub ceiling_secs: f64,

    #[serde(default = "default_throttle_pause_secs")]
    pub throttle_pause_secs: f64,

    #[serde(default = "default_max_throttle_retries")]
    pub max_throttle_retries: u32,
}

fn default_floor_secs() -> f64 {
    2.0
}

fn default_factor() -> f64 {
    1.5
}

fn default_ceiling_secs() -> f64 {
    11.0
}

fn default_throttle_pause_secs() -> f64 {
    5.0
}

fn default_max_throttle_retries() -> u32 {
    20
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            floor_secs: default_floor_secs(),
            factor: default_factor(),
            ceiling_secs: default_ceiling_secs(),
            throttle_pause_secs: default_throttle_pause_secs(),
            max_throttle_retries: default_max_throttle_retries(),
        }
    }
}

impl BackoffSettings {
    pub fn validate(&self) -> Result<()> {
        let finite = [
            self.floor_secs,
            self.factor,
            self.ceiling_secs,
            self.throttle_pause_secs,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite {
            return Err(ConfigError::Invalid(
                "backoff values must be finite numbers".to_string(),
            ));
        }
        if self.floor_secs <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff.floor_secs must be positive, got {}",
                self.floor_secs
            )));
        }
        if self.factor <= 1.0 || self.factor > MAX_BACKOFF_FACTOR {
            return Err(ConfigError::Invalid(format!(
                "backoff.factor must be greater than 1 and at most {MAX_BACKOFF_FACTOR}, got {}",
                self.factor
            )));
        }
        if self.ceiling_secs < self.floor_secs {
            return Err(ConfigError::Invalid(format!(
                "backoff.ceiling_secs ({}) must not be below floor_secs ({})",
                self.ceiling_secs, self.floor_secs
            )));
        }
        if self.ceiling_secs > MAX_BACKOFF_SECS {
            return Err(ConfigError::Invalid(format!(
                "backoff.ceiling_secs must be at most {MAX_BACKOFF_SECS}, got {}",
                self.ceiling_secs
            )));
        }
        if !(0.0..=MAX_BACKOFF_SECS).contains(&self.throttle_pause_secs) {
            return Err(ConfigError::Invalid(format!(
                "backoff.throttle_pause_secs must be between 0 and {MAX_BACKOFF_SECS}, got {}",
                self.throttle_pause_secs
            )));
        }
        Ok(())
    }
}

/// Immutable settings shared by every studio command.
///
/// Built once at startup, validated, then handed to the orchestrator.
/// Unknown keys in the file are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudioConfig {
    pub region: String,

    /// Scope all profiles and workspaces belong to.
    pub domain_id: String,

    /// Table tracking participant membership.
    pub table_name: String,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub backoff: BackoffSettings,
}

impl StudioConfig {
    pub fn new(
        region: impl Into<String>,
        domain_id: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Result<Self> {
        let config = Self {
            region: region.into(),
            domain_id: domain_id.into(),
            table_name: table_name.into(),
            verbose: false,
            concurrency: DEFAULT_CONCURRENCY,
            backoff: BackoffSettings::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::Invalid("Missing required field: region".to_string()));
        }

        if !self.domain_id.starts_with(DOMAIN_ID_PREFIX) || self.domain_id.len() == DOMAIN_ID_PREFIX.len()
        {
            return Err(ConfigError::Invalid(format!(
                "domain_id '{}' is not a domain id (expected '{}...')",
                self.domain_id, DOMAIN_ID_PREFIX
            )));
        }

        if !TABLE_NAME_REGEX.is_match(&self.table_name) {
            return Err(ConfigError::Invalid(format!(
                "table_name '{}' must contain only letters, digits, '.', '_' and '-'",
                self.table_name
            )));
        }

        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be at least 1".to_string(),
            ));
        }

        self.backoff.validate()
    }

    /// Load and validate the configuration at `path`.
    #[instrument(fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let config: StudioConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;

        debug!(domain_id = %config.domain_id, table = %config.table_name, "Configuration loaded");
        Ok(config)
    }

    /// Load from the default location (see [`config_path`]).
    pub fn load_default() -> Result<Self> {
        Self::load(&config_path()?)
    }

    /// Persist as pretty JSON, creating the parent directory when missing.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Whether a readable, valid configuration exists at the default location.
pub fn is_configured() -> bool {
    StudioConfig::load_default().is_ok()
}
