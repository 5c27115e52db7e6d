//! Durable membership store collaborator interface.
//!
//! Used only as a flat key/value table: page through everything, look up one
//! key, write or delete in batches.

use crate::roster::Team;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid table name '{0}'")]
    InvalidTableName(String),

    #[error(
        "Found {} tables matching the studio prefix ({}); configure table_name explicitly",
        .0.len(),
        .0.join(", ")
    )]
    AmbiguousTable(Vec<String>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One membership row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntry {
    pub participant: String,
    pub team: Team,
    pub scope_id: String,
}

/// One page of a scan. `last_key` is set when more entries may follow.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanPage {
    pub entries: Vec<StoreEntry>,
    pub last_key: Option<String>,
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Entries whose key sorts after `start_after` (from the beginning when `None`).
    async fn scan_page(&self, start_after: Option<String>) -> StoreResult<ScanPage>;

    async fn get(&self, participant: &str) -> StoreResult<Option<StoreEntry>>;

    async fn batch_put(&self, entries: &[StoreEntry]) -> StoreResult<()>;

    async fn batch_delete(&self, participants: &[String]) -> StoreResult<()>;
}

/// Read the whole table, following continuation keys.
pub async fn scan_all(store: &dyn DurableStore) -> StoreResult<Vec<StoreEntry>> {
    let mut entries = Vec::new();
    let mut start_after = None;
    let mut seen = HashSet::new();
    let mut pages = 0usize;

    loop {
        let page = store.scan_page(start_after).await?;
        pages += 1;
        entries.extend(page.entries);

        match page.last_key {
            Some(key) => {
                if !seen.insert(key.clone()) {
                    return Err(StoreError::Unavailable(format!(
                        "scan returned continuation key '{key}' twice"
                    )));
                }
                start_after = Some(key);
            }
            None => break,
        }
    }

    debug!(pages, count = entries.len(), "Scanned membership store");
    Ok(entries)
}
