//! Per-resource convergence against the control plane.
//!
//! The control plane accepts create and delete requests before they complete
//! and exposes interim states while it works. The reconciler repeatedly
//! describes a resource and decides whether to wait, issue a request, or stop,
//! turning that eventual consistency into a single outcome per resource. Each
//! retry re-enters from describe; waits escalate per [`BackoffPolicy`] and are
//! bounded, so one stuck resource cannot stall a stage indefinitely.

use crate::backoff::{BackoffPolicy, BackoffState};
use crate::cancel::CancelSignal;
use crate::client::{ClientError, RemoteResourceClient, ResourceRef, ResourceStatus};
use crate::error::{OrchestratorError, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Create,
    Delete,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Create => f.write_str("create"),
            Intent::Delete => f.write_str("delete"),
        }
    }
}

/// Final state of one resource's reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum Outcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }

    fn failed(reason: impl Into<String>) -> Self {
        Outcome::Failed(reason.into())
    }
}

/// What the loop does after inspecting the remote state.
enum Step {
    Done(Outcome),
    Wait(String),
    Throttled,
}

#[derive(Clone)]
pub struct Reconciler {
    client: Arc<dyn RemoteResourceClient>,
    policy: BackoffPolicy,
    cancel: CancelSignal,
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn RemoteResourceClient>,
        policy: BackoffPolicy,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            client,
            policy,
            cancel,
        }
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Make sure `resource` exists and is in service.
    pub async fn ensure_present(&self, resource: &ResourceRef) -> Result<Outcome> {
        self.reconcile(resource, Intent::Create).await
    }

    /// Make sure `resource` no longer exists.
    pub async fn ensure_absent(&self, resource: &ResourceRef) -> Result<Outcome> {
        self.reconcile(resource, Intent::Delete).await
    }

    /// Drive `resource` toward `intent`.
    ///
    /// Returns `Err` only for conditions fatal to the whole operation
    /// (capacity limits); everything else becomes an [`Outcome`].
    #[instrument(skip(self, resource, intent), fields(kind = %resource.kind, name = %resource.name, %intent))]
    pub async fn reconcile(&self, resource: &ResourceRef, intent: Intent) -> Result<Outcome> {
        let mut backoff = BackoffState::new(&self.policy);

        loop {
            if self.cancel.is_cancelled() {
                debug!("Cancelled before describe");
                return Ok(Outcome::Cancelled);
            }

            let step = match self.client.describe(resource).await {
                Ok(record) => self.on_status(resource, intent, record.status).await?,
                Err(ClientError::NotFound(_)) => self.on_absent(resource, intent).await?,
                Err(ClientError::Throttled) => Step::Throttled,
                Err(ClientError::LimitExceeded(message)) => {
                    return Err(capacity(resource, message));
                }
                Err(e) => {
                    warn!(error = %e, "Describe failed");
                    Step::Done(Outcome::failed(format!("describe failed: {e}")))
                }
            };

            let wait = match step {
                Step::Done(outcome) => {
                    match &outcome {
                        Outcome::Succeeded => debug!(attempts = backoff.attempt(), "Reconciled"),
                        Outcome::Failed(reason) => warn!(%reason, "Giving up on resource"),
                        Outcome::Cancelled => debug!("Cancelled"),
                    }
                    return Ok(outcome);
                }
                Step::Wait(reason) => match backoff.escalate(&self.policy) {
                    Some(wait) => {
                        debug!(
                            %reason,
                            attempt = backoff.attempt(),
                            delay_secs = wait.as_secs_f64(),
                            "Waiting before redescribe"
                        );
                        wait
                    }
                    None => {
                        let outcome = Outcome::failed(format!(
                            "still {reason} after {} retries; try again in a few minutes",
                            backoff.attempt()
                        ));
                        warn!(%resource, "Retry budget exhausted");
                        return Ok(outcome);
                    }
                },
                Step::Throttled => match backoff.throttle(&self.policy) {
                    Some(pause) => {
                        warn!(
                            pause_secs = pause.as_secs_f64(),
                            "Throttled by the control plane, calming down"
                        );
                        pause
                    }
                    None => {
                        return Ok(Outcome::failed("throttled too many times"));
                    }
                },
            };

            if !self.cancel.sleep(wait).await {
                debug!("Cancelled while waiting");
                return Ok(Outcome::Cancelled);
            }
        }
    }

    async fn on_status(
        &self,
        resource: &ResourceRef,
        intent: Intent,
        status: ResourceStatus,
    ) -> Result<Step> {
        match status {
            status if status.is_gone() => self.on_absent(resource, intent).await,
            status if status.is_anomalous() => {
                // Failed display states can clear on their own.
                warn!(%status, "Resource reports a failed state");
                Ok(Step::Wait(format!("in {status} state")))
            }
            status if status.is_in_flight() => {
                debug!(%status, "Operation already in flight");
                Ok(Step::Wait(format!("{status}")))
            }
            _ => match intent {
                Intent::Create => Ok(Step::Done(Outcome::Succeeded)),
                Intent::Delete => self.request_delete(resource).await,
            },
        }
    }

    async fn on_absent(&self, resource: &ResourceRef, intent: Intent) -> Result<Step> {
        match intent {
            Intent::Create => self.request_create(resource).await,
            Intent::Delete => Ok(Step::Done(Outcome::Succeeded)),
        }
    }

    async fn request_create(&self, resource: &ResourceRef) -> Result<Step> {
        match self.client.create(resource).await {
            Ok(()) => {
                info!(%resource, "Creation requested");
                Ok(Step::Wait("being created".to_string()))
            }
            Err(ClientError::AlreadyExists(_)) => Ok(Step::Wait("being created".to_string())),
            Err(ClientError::Throttled) => Ok(Step::Throttled),
            Err(ClientError::LimitExceeded(message)) => Err(capacity(resource, message)),
            Err(e) => Ok(Step::Done(Outcome::failed(format!(
                "could not be created: {e}"
            )))),
        }
    }

    async fn request_delete(&self, resource: &ResourceRef) -> Result<Step> {
        match self.client.delete(resource).await {
            Ok(()) => {
                info!(%resource, "Deletion requested");
                Ok(Step::Wait("being deleted".to_string()))
            }
            Err(ClientError::NotFound(_)) => Ok(Step::Done(Outcome::Succeeded)),
            Err(ClientError::InUse(_)) => Ok(Step::Wait("in use".to_string())),
            Err(ClientError::Throttled) => Ok(Step::Throttled),
            Err(ClientError::LimitExceeded(message)) => Err(capacity(resource, message)),
            Err(e) => Ok(Step::Done(Outcome::failed(format!(
                "unhandled error while deleting: {e}"
            )))),
        }
    }
}

fn capacity(resource: &ResourceRef, message: String) -> OrchestratorError {
    OrchestratorError::Capacity {
        kind: resource.kind,
        name: resource.name.clone(),
        message,
    }
}
