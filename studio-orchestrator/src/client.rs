//! Control-plane collaborator interface.
//!
//! The orchestrator never talks to the managed-notebook service directly; the
//! calling environment supplies an implementation of [`RemoteResourceClient`]
//! that maps these calls onto the real API (and its error codes onto
//! [`ClientError`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Profile,
    Workspace,
    Session,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Profile => "profile",
            ResourceKind::Workspace => "workspace",
            ResourceKind::Session => "session",
        };
        f.write_str(name)
    }
}

/// Lifecycle status as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceStatus {
    Pending,
    InService,
    Updating,
    Deleting,
    DeleteFailed,
    UpdateFailed,
    Failed,
    Deleted,
    NotFound,
}

impl ResourceStatus {
    /// A request is already being processed remotely.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            ResourceStatus::Pending | ResourceStatus::Updating | ResourceStatus::Deleting
        )
    }

    /// The control plane reports a failure display state.
    pub fn is_anomalous(self) -> bool {
        matches!(
            self,
            ResourceStatus::Failed | ResourceStatus::DeleteFailed | ResourceStatus::UpdateFailed
        )
    }

    pub fn is_gone(self) -> bool {
        matches!(self, ResourceStatus::Deleted | ResourceStatus::NotFound)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Application a workspace (and its sessions) runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppType {
    JupyterLab,
    CodeEditor,
}

/// Address of one remote resource.
///
/// `parent` is the owning profile for a workspace and the hosting workspace
/// for a session; profiles have none.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
    pub scope_id: String,
    pub parent: Option<String>,
    pub app_type: Option<AppType>,
}

impl ResourceRef {
    pub fn profile(name: impl Into<String>, scope_id: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Profile,
            name: name.into(),
            scope_id: scope_id.into(),
            parent: None,
            app_type: None,
        }
    }

    pub fn workspace(
        name: impl Into<String>,
        scope_id: impl Into<String>,
        owner: impl Into<String>,
        app_type: AppType,
    ) -> Self {
        Self {
            kind: ResourceKind::Workspace,
            name: name.into(),
            scope_id: scope_id.into(),
            parent: Some(owner.into()),
            app_type: Some(app_type),
        }
    }

    pub fn session(
        name: impl Into<String>,
        scope_id: impl Into<String>,
        workspace: impl Into<String>,
        app_type: AppType,
    ) -> Self {
        Self {
            kind: ResourceKind::Session,
            name: name.into(),
            scope_id: scope_id.into(),
            parent: Some(workspace.into()),
            app_type: Some(app_type),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.parent) {
            (ResourceKind::Session, Some(workspace)) => {
                write!(f, "{} '{}' in '{}'", self.kind, self.name, workspace)
            }
            _ => write!(f, "{} '{}'", self.kind, self.name),
        }
    }
}

/// A described resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource: ResourceRef,
    pub status: ResourceStatus,
}

/// One page of a scoped listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }
}

/// Request for a short-lived login URL for one profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignRequest {
    pub profile: String,
    pub scope_id: String,
    pub session_expiration: Duration,
    pub expires_in: Duration,
    pub space: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Resource limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Resource in use: {0}")]
    InUse(String),

    #[error("Request throttled by the control plane")]
    Throttled,

    #[error("{0}")]
    Other(String),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Throttled | ClientError::InUse(_))
    }
}

/// The managed-notebook control plane.
#[async_trait]
pub trait RemoteResourceClient: Send + Sync {
    /// Fetch one page of resources of `kind` in `scope_id`.
    async fn list_page(
        &self,
        kind: ResourceKind,
        scope_id: &str,
        next_token: Option<String>,
    ) -> ClientResult<Page<ResourceRecord>>;

    /// Describe a single resource; absent resources yield `ClientError::NotFound`.
    async fn describe(&self, resource: &ResourceRef) -> ClientResult<ResourceRecord>;

    /// Request creation. Completion is asynchronous and observed via `describe`.
    async fn create(&self, resource: &ResourceRef) -> ClientResult<()>;

    /// Request deletion. Completion is asynchronous and observed via `describe`.
    async fn delete(&self, resource: &ResourceRef) -> ClientResult<()>;

    async fn create_presigned_url(&self, request: &PresignRequest) -> ClientResult<String>;
}

/// List every resource of `kind` in `scope_id`, following continuation tokens.
pub async fn list_by_scope(
    client: &dyn RemoteResourceClient,
    kind: ResourceKind,
    scope_id: &str,
) -> ClientResult<Vec<ResourceRecord>> {
    let mut records = Vec::new();
    let mut next_token = None;
    let mut seen = HashSet::new();
    let mut pages = 0usize;

    loop {
        let page = client.list_page(kind, scope_id, next_token).await?;
        pages += 1;
        records.extend(page.items);

        match page.next_token {
            Some(token) if !token.is_empty() => {
                if !seen.insert(token.clone()) {
                    return Err(ClientError::Other(format!(
                        "continuation token '{token}' repeated while listing {kind}s in {scope_id}"
                    )));
                }
                next_token = Some(token);
            }
            _ => break,
        }
    }

    debug!(%kind, scope_id, pages, count = records.len(), "Listed resources");
    Ok(records)
}
