//! Studio environment orchestration
//!
//! Provisions and tears down per-participant environments (a profile plus a
//! JupyterLab and a Code Editor workspace) on a managed-notebook control
//! plane, and records the roster in a small durable store. The control plane
//! and the store are collaborators supplied by the caller; this crate owns
//! naming, ordering, bounded concurrency and retry.

pub mod backoff;
pub mod cancel;
pub mod client;
pub mod db;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod naming;
pub mod reconciler;
pub mod report;
pub mod roster;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use backoff::{BackoffPolicy, BackoffState};
pub use cancel::CancelSignal;
pub use client::{
    list_by_scope, AppType, ClientError, ClientResult, Page, PresignRequest, RemoteResourceClient,
    ResourceKind, ResourceRecord, ResourceRef, ResourceStatus,
};
pub use db::{create_pool, discover_or_create_table, SqliteStore, TableSelector, TABLE_PREFIX};
pub use error::{OrchestratorError, Result};
pub use executor::run_stage;
pub use lifecycle::{OwnerInfo, StudioOrchestrator, SESSION_EXPIRATION, URL_EXPIRATION};
pub use naming::{username_of, workspace_names, WorkspaceNames};
pub use reconciler::{Intent, Outcome, Reconciler};
pub use report::{
    ProvisionReport, PurgeReport, ResourceFailure, Stage, StageOutcome, StageReport,
};
pub use roster::{Participant, Roster, Team};
pub use store::{scan_all, DurableStore, ScanPage, StoreEntry, StoreError, StoreResult};
