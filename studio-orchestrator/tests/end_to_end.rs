//! Full setup and teardown wired the way the command-line entry point does it:
//! configuration file, logging, file-backed store and orchestrator.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use studio_config::{BackoffSettings, StudioConfig};
use studio_logging::{init_with, LogOutput, LogSettings};
use studio_orchestrator::test_utils::FakeControlPlane;
use studio_orchestrator::{
    create_pool, ResourceKind, Roster, SqliteStore, StudioOrchestrator, TableSelector, Team,
};
use tempfile::TempDir;

#[tokio::test]
async fn test_setup_then_teardown() -> anyhow::Result<()> {
    let dir = TempDir::new()?;

    let mut config = StudioConfig::new("eu-west-1", "d-workshop", "studio-cli-1712345678")?
        .with_verbose(true);
    config.backoff = BackoffSettings {
        floor_secs: 0.002,
        ceiling_secs: 0.011,
        throttle_pause_secs: 0.005,
        ..BackoffSettings::default()
    };
    let config_file = dir.path().join("config");
    config.save(&config_file)?;
    let config = StudioConfig::load(&config_file)?;

    let settings = LogSettings {
        output: LogOutput::File,
        file_path: dir.path().join("studio.log"),
        ..LogSettings::default()
    }
    .verbose(config.verbose);
    let _guard = init_with(&settings)?;

    let pool = create_pool(&dir.path().join("studio.db")).await?;
    let store = Arc::new(
        SqliteStore::open(pool, TableSelector::Explicit(config.table_name.clone())).await?,
    );
    let client = Arc::new(FakeControlPlane::new());
    let orchestrator = StudioOrchestrator::new(&config, client.clone(), store.clone());

    let roster: Roster = [
        ("ada@example.com", Team::Number(1)),
        ("grace.hopper@example.com", Team::Number(1)),
        ("linus@example.org", Team::Number(2)),
    ]
    .into_iter()
    .collect();
    roster.validate_emails()?;

    let provisioned = orchestrator.provision(&roster).await?;
    anyhow::ensure!(provisioned.all_succeeded(), "provision failed: {provisioned:?}");
    assert_eq!(client.live(ResourceKind::Workspace).len(), 6);

    let urls = orchestrator.presigned_urls(&roster).await?;
    assert_eq!(urls.len(), 3);

    let owner = orchestrator
        .describe_owner("grace.hopper@example.com")
        .await?
        .context("owner should be recorded")?;
    assert_eq!(owner.username, "gracehopper");

    let purged = tokio::time::timeout(Duration::from_secs(30), orchestrator.purge()).await??;
    anyhow::ensure!(purged.is_clean(), "purge stalled: {purged:?}");
    assert!(client.live(ResourceKind::Profile).is_empty());
    assert!(orchestrator.list_roster().await?.is_empty());

    Ok(())
}
