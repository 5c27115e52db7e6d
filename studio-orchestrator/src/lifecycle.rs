//! Studio-wide operations built from per-resource reconciliation.
//!
//! Provisioning creates profiles and then their workspaces before recording
//! the roster. Purging tears down sessions, workspaces and profiles in that
//! order, and each stage waits for the previous one to finish cleanly.

use crate::backoff::BackoffPolicy;
use crate::cancel::CancelSignal;
use crate::client::{
    list_by_scope, ClientError, ClientResult, PresignRequest, RemoteResourceClient, ResourceKind,
    ResourceRef,
};
use crate::error::Result;
use crate::executor::run_stage;
use crate::naming::{profile_ref, username_of, workspace_refs};
use crate::reconciler::Reconciler;
use crate::report::{ProvisionReport, PurgeReport, Stage, StageOutcome};
use crate::roster::{Participant, Roster, Team};
use crate::store::{scan_all, DurableStore, StoreEntry};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use studio_config::StudioConfig;
use tracing::{info, instrument, warn};

/// Lifetime of the login session a presigned URL opens.
pub const SESSION_EXPIRATION: Duration = Duration::from_secs(43_200);

/// How long a presigned URL stays valid before it is used.
pub const URL_EXPIRATION: Duration = Duration::from_secs(300);

/// Store view of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerInfo {
    pub username: String,
    pub team: Team,
    pub scope_id: String,
}

/// Provisions and tears down every participant's environment in one scope.
#[derive(Clone)]
pub struct StudioOrchestrator {
    scope_id: String,
    client: Arc<dyn RemoteResourceClient>,
    store: Arc<dyn DurableStore>,
    policy: BackoffPolicy,
    concurrency: usize,
}

impl StudioOrchestrator {
    pub fn new(
        config: &StudioConfig,
        client: Arc<dyn RemoteResourceClient>,
        store: Arc<dyn DurableStore>,
    ) -> Self {
        Self {
            scope_id: config.domain_id.clone(),
            client,
            store,
            policy: BackoffPolicy::from(&config.backoff),
            concurrency: config.concurrency.max(1),
        }
    }

    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    fn reconciler(&self, cancel: &CancelSignal) -> Reconciler {
        Reconciler::new(self.client.clone(), self.policy, cancel.clone())
    }

    /// Create profiles, then workspaces, for every roster member and record
    /// the roster in the store.
    ///
    /// The roster is validated before any remote call. Workspaces are
    /// attempted for every participant even when some profiles failed; those
    /// workspaces then fail individually.
    #[instrument(skip(self, roster), fields(scope_id = %self.scope_id, participants = roster.len()))]
    pub async fn provision(&self, roster: &Roster) -> Result<ProvisionReport> {
        let participants = roster.participants()?;
        let cancel = CancelSignal::new();
        let reconciler = &self.reconciler(&cancel);

        let profiles: Vec<ResourceRef> = participants
            .iter()
            .map(|p| profile_ref(&p.username, &self.scope_id))
            .collect();
        let profiles = run_stage(
            Stage::CreateProfiles,
            profiles,
            self.concurrency,
            &cancel,
            move |profile| async move { reconciler.ensure_present(&profile).await },
        )
        .await?;

        if !profiles.all_succeeded() {
            warn!(
                failed = profiles.failures.len(),
                "Some profiles are not in service; continuing with workspaces"
            );
        }

        let workspaces: Vec<ResourceRef> = participants
            .iter()
            .flat_map(|p| workspace_refs(&p.username, &self.scope_id))
            .collect();
        let workspaces = run_stage(
            Stage::CreateWorkspaces,
            workspaces,
            self.concurrency,
            &cancel,
            move |workspace| async move { reconciler.ensure_present(&workspace).await },
        )
        .await?;

        let persisted = self.persist(&participants).await?;

        info!(
            profiles = profiles.succeeded,
            workspaces = workspaces.succeeded,
            persisted,
            "Provisioning finished"
        );

        Ok(ProvisionReport {
            profiles,
            workspaces,
            persisted,
        })
    }

    /// Replace the store contents with `participants`.
    async fn persist(&self, participants: &[Participant]) -> Result<usize> {
        let wanted: BTreeSet<&str> = participants.iter().map(|p| p.id.as_str()).collect();

        let stale: Vec<String> = scan_all(self.store.as_ref())
            .await?
            .into_iter()
            .map(|entry| entry.participant)
            .filter(|id| !wanted.contains(id.as_str()))
            .collect();
        if !stale.is_empty() {
            info!(count = stale.len(), "Removing stale store entries");
            self.store.batch_delete(&stale).await?;
        }

        let entries: Vec<StoreEntry> = participants
            .iter()
            .map(|p| StoreEntry {
                participant: p.id.clone(),
                team: p.team.clone(),
                scope_id: self.scope_id.clone(),
            })
            .collect();
        self.store.batch_put(&entries).await?;

        Ok(entries.len())
    }

    /// Delete sessions, then workspaces, then profiles, then clear the store.
    ///
    /// A stage runs only when the previous one fully succeeded. A stalled
    /// purge is not an error: re-running it later picks up where it stopped.
    #[instrument(skip(self), fields(scope_id = %self.scope_id))]
    pub async fn purge(&self) -> Result<PurgeReport> {
        let cancel = CancelSignal::new();
        let reconciler = self.reconciler(&cancel);

        let sessions = self
            .delete_all(Stage::DeleteSessions, ResourceKind::Session, &reconciler, &cancel)
            .await?;

        let workspaces = if sessions.is_clean() {
            self.delete_all(Stage::DeleteWorkspaces, ResourceKind::Workspace, &reconciler, &cancel)
                .await?
        } else {
            StageOutcome::Skipped
        };

        let profiles = if workspaces.is_clean() {
            self.delete_all(Stage::DeleteProfiles, ResourceKind::Profile, &reconciler, &cancel)
                .await?
        } else {
            StageOutcome::Skipped
        };

        let store_cleared = if profiles.is_clean() {
            self.clear_store().await?;
            true
        } else {
            false
        };

        let report = PurgeReport {
            sessions,
            workspaces,
            profiles,
            store_cleared,
        };

        match report.stalled_at() {
            Some(stage) => warn!(
                %stage,
                "Purge stopped because some resources are still shutting down; re-run it later"
            ),
            None => info!("Purge finished"),
        }

        Ok(report)
    }

    async fn delete_all(
        &self,
        stage: Stage,
        kind: ResourceKind,
        reconciler: &Reconciler,
        cancel: &CancelSignal,
    ) -> Result<StageOutcome> {
        let resources: Vec<ResourceRef> = list_by_scope(self.client.as_ref(), kind, &self.scope_id)
            .await?
            .into_iter()
            .filter(|record| !record.status.is_gone())
            .map(|record| record.resource)
            .collect();

        let report = run_stage(
            stage,
            resources,
            self.concurrency,
            cancel,
            move |resource| async move { reconciler.ensure_absent(&resource).await },
        )
        .await?;

        Ok(StageOutcome::Completed(report))
    }

    async fn clear_store(&self) -> Result<()> {
        let keys: Vec<String> = scan_all(self.store.as_ref())
            .await?
            .into_iter()
            .map(|entry| entry.participant)
            .collect();

        if !keys.is_empty() {
            self.store.batch_delete(&keys).await?;
        }
        info!(count = keys.len(), "Cleared membership store");
        Ok(())
    }

    /// Roster as currently recorded in the store.
    #[instrument(skip(self))]
    pub async fn list_roster(&self) -> Result<Roster> {
        let entries = scan_all(self.store.as_ref()).await?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.participant, entry.team))
            .collect())
    }

    pub async fn describe_owner(&self, participant: &str) -> Result<Option<OwnerInfo>> {
        let entry = self.store.get(participant).await?;
        Ok(entry.map(|entry| OwnerInfo {
            username: username_of(&entry.participant),
            team: entry.team.normalized(),
            scope_id: entry.scope_id,
        }))
    }

    /// Login URL per participant, keyed by participant identifier.
    ///
    /// Participants without a profile are skipped with a warning.
    #[instrument(skip(self, roster), fields(participants = roster.len()))]
    pub async fn presigned_urls(&self, roster: &Roster) -> Result<BTreeMap<String, String>> {
        let participants = roster.participants()?;

        let results: Vec<(String, ClientResult<String>)> =
            stream::iter(participants)
                .map(|participant| async move {
                    let request = PresignRequest {
                        profile: participant.username,
                        scope_id: self.scope_id.clone(),
                        session_expiration: SESSION_EXPIRATION,
                        expires_in: URL_EXPIRATION,
                        space: None,
                    };
                    let url = self.client.create_presigned_url(&request).await;
                    (participant.id, url)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut urls = BTreeMap::new();
        for (participant, result) in results {
            match result {
                Ok(url) => {
                    urls.insert(participant, url);
                }
                Err(ClientError::NotFound(_)) => {
                    warn!(%participant, "No profile found, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(urls)
    }
}
