//! SQLite-backed membership store.
//!
//! Each studio setup gets its own table named `studio-cli-<unix time>`. A
//! fresh setup discovers the existing table by prefix or creates one; later
//! commands name the table explicitly through the configuration.

use crate::roster::Team;
use crate::store::{DurableStore, ScanPage, StoreEntry, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{debug, info, instrument};

pub const TABLE_PREFIX: &str = "studio-cli-";

/// Rows returned per scan page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

static TABLE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+$").expect("Table name regex should compile - static pattern")
});

/// Initialize database connection pool
#[instrument(fields(db_path = %db_path.display()))]
pub async fn create_pool(db_path: &Path) -> StoreResult<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = SqlitePool::connect_with(options).await?;

    Ok(pool)
}

/// Name for a table created at `now`.
pub fn table_name_for(now: DateTime<Utc>) -> String {
    format!("{TABLE_PREFIX}{}", now.timestamp())
}

fn validate_table_name(name: &str) -> StoreResult<()> {
    if TABLE_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidTableName(name.to_string()))
    }
}

async fn ensure_table(pool: &SqlitePool, table: &str) -> StoreResult<()> {
    validate_table_name(table)?;
    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS \"{table}\" (
            pk TEXT PRIMARY KEY NOT NULL,
            team TEXT NOT NULL,
            domain_id TEXT NOT NULL
        )"
    );
    sqlx::query(&ddl).execute(pool).await?;
    Ok(())
}

/// Find the single table carrying [`TABLE_PREFIX`], creating one if none exists.
///
/// More than one match is an error; pick one with [`TableSelector::Explicit`].
#[instrument(skip(pool))]
pub async fn discover_or_create_table(pool: &SqlitePool) -> StoreResult<String> {
    let names: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(pool)
            .await?;

    let matches: Vec<String> = names
        .into_iter()
        .filter(|name| name.starts_with(TABLE_PREFIX))
        .collect();

    match matches.as_slice() {
        [] => {
            let table = table_name_for(Utc::now());
            ensure_table(pool, &table).await?;
            info!(%table, "Created membership table");
            Ok(table)
        }
        [table] => {
            debug!(%table, "Using existing membership table");
            Ok(table.clone())
        }
        _ => Err(StoreError::AmbiguousTable(matches)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSelector {
    Explicit(String),
    Discover,
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    table: String,
    page_size: usize,
}

impl SqliteStore {
    pub async fn open(pool: SqlitePool, selector: TableSelector) -> StoreResult<Self> {
        let table = match selector {
            TableSelector::Explicit(table) => {
                ensure_table(&pool, &table).await?;
                table
            }
            TableSelector::Discover => discover_or_create_table(&pool).await?,
        };

        Ok(Self {
            pool,
            table,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn entry_from_row(row: &SqliteRow) -> StoreResult<StoreEntry> {
        let team: String = row.try_get("team")?;
        let team: Team = serde_json::from_str(&team)?;
        Ok(StoreEntry {
            participant: row.try_get("pk")?,
            team: team.normalized(),
            scope_id: row.try_get("domain_id")?,
        })
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn scan_page(&self, start_after: Option<String>) -> StoreResult<ScanPage> {
        let sql = format!(
            "SELECT pk, team, domain_id FROM \"{}\"
             WHERE (?1 IS NULL OR pk > ?1)
             ORDER BY pk
             LIMIT ?2",
            self.table
        );

        let rows = sqlx::query(&sql)
            .bind(start_after)
            .bind(self.page_size as i64)
            .fetch_all(&self.pool)
            .await?;

        let entries = rows
            .iter()
            .map(Self::entry_from_row)
            .collect::<StoreResult<Vec<_>>>()?;

        let last_key = if entries.len() == self.page_size {
            entries.last().map(|entry| entry.participant.clone())
        } else {
            None
        };

        Ok(ScanPage { entries, last_key })
    }

    async fn get(&self, participant: &str) -> StoreResult<Option<StoreEntry>> {
        let sql = format!(
            "SELECT pk, team, domain_id FROM \"{}\" WHERE pk = ?",
            self.table
        );

        let row = sqlx::query(&sql)
            .bind(participant)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::entry_from_row).transpose()
    }

    #[instrument(skip(self, entries), fields(table = %self.table, count = entries.len()))]
    async fn batch_put(&self, entries: &[StoreEntry]) -> StoreResult<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO \"{}\" (pk, team, domain_id) VALUES (?, ?, ?)",
            self.table
        );

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(&sql)
                .bind(&entry.participant)
                .bind(serde_json::to_string(&entry.team)?)
                .bind(&entry.scope_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    #[instrument(skip(self, participants), fields(table = %self.table, count = participants.len()))]
    async fn batch_delete(&self, participants: &[String]) -> StoreResult<()> {
        let sql = format!("DELETE FROM \"{}\" WHERE pk = ?", self.table);

        let mut tx = self.pool.begin().await?;
        for participant in participants {
            sqlx::query(&sql)
                .bind(participant)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }
}
