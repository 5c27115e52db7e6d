//! Bounded fan-out of reconciliations within one stage.

use crate::cancel::CancelSignal;
use crate::error::{OrchestratorError, Result};
use crate::reconciler::Outcome;
use crate::report::{Stage, StageReport};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::future::Future;
use tracing::{info, warn};

/// Run `f` over every item with at most `concurrency` in flight.
///
/// Per-item failures are recorded and never stop siblings. The first fatal
/// error cancels `cancel`, so running reconciliations stop at their next wait
/// and items not yet started are skipped; it is returned once the stage has
/// drained.
pub async fn run_stage<T, F, Fut>(
    stage: Stage,
    items: Vec<T>,
    concurrency: usize,
    cancel: &CancelSignal,
    f: F,
) -> Result<StageReport>
where
    T: fmt::Display,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<Outcome>>,
{
    let total = items.len();
    info!(%stage, total, concurrency, "Starting stage");

    let f = &f;
    let results: Vec<(String, Result<Outcome>)> = stream::iter(items)
        .map(|item| async move {
            let label = item.to_string();
            if cancel.is_cancelled() {
                return (label, Ok(Outcome::Cancelled));
            }
            let result = f(item).await;
            if result.is_err() {
                cancel.cancel();
            }
            (label, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = StageReport::new(stage);
    let mut fatal: Option<OrchestratorError> = None;

    for (label, result) in results {
        match result {
            Ok(Outcome::Succeeded) => report.record_success(),
            Ok(Outcome::Failed(reason)) => report.record_failure(label, reason),
            Ok(Outcome::Cancelled) => report.record_failure(label, "cancelled"),
            Err(e) => {
                report.record_failure(label, e.to_string());
                fatal.get_or_insert(e);
            }
        }
    }

    for failure in &report.failures {
        warn!(%stage, resource = %failure.resource, reason = %failure.reason, "Resource did not converge");
    }
    info!(
        %stage,
        attempted = report.attempted,
        succeeded = report.succeeded,
        failed = report.failures.len(),
        "Stage finished"
    );

    match fatal {
        Some(e) => Err(e),
        None => Ok(report),
    }
}
