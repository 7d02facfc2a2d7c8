use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ReassignPolicy;
use crate::engine::reconcile::{self, DeliveryOutcome};
use crate::error::AppError;
use crate::models::ledger::{AuditEntry, RetryTask};
use crate::models::rider::{Rider, RiderAction, RiderStatus};
use crate::models::task::{TaskAssignment, TaskDecision, TaskKind, TaskStatus};
use crate::state::AppState;

/// Bounded retries for compare-and-swap loops. A loop that exhausts
/// these is racing an unusually hot row; the caller gets a conflict.
const CAS_ATTEMPTS: usize = 3;

/// Offers a task to a rider. Preconditions: the rider exists, is
/// active, and holds no non-terminal assignment. Redelivery of the same
/// `(rider, tracking_no)` pair inside the dedup window returns the
/// existing assignment instead of failing.
pub async fn assign_task(
    state: &AppState,
    rider_id: &str,
    kind: TaskKind,
    tracking_no: String,
    destination: String,
    estimated_minutes: u32,
    assigned_by: String,
) -> Result<TaskAssignment, AppError> {
    let dedup_window = Duration::seconds(state.config.dedup_window_secs as i64);

    for _ in 0..CAS_ATTEMPTS {
        let rider = state
            .dispatch
            .get_rider(rider_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("rider {rider_id} not found")))?;

        if !rider.active {
            return Err(AppError::InvalidState(format!(
                "rider {rider_id} is deactivated"
            )));
        }

        // The rider row is the busy signal, not the tasks table: a
        // concurrent assign claims `current_task` before its task row
        // becomes visible, so a set reference means busy even when the
        // task cannot be read yet.
        if let Some(active_id) = rider.current_task {
            if let Some(active) = state.dispatch.get_task(active_id).await? {
                if !active.status.is_terminal()
                    && active.tracking_no == tracking_no
                    && Utc::now() - active.assigned_at <= dedup_window
                {
                    // Retried delivery of the same request.
                    info!(rider_id, tracking_no, task_id = %active.id, "assign dedup hit");
                    return Ok(active);
                }
            }
            state
                .metrics
                .tasks_total
                .with_label_values(&["rider_busy"])
                .inc();
            return Err(AppError::RiderBusy(format!(
                "rider {rider_id} already holds task {active_id}"
            )));
        }

        let task = TaskAssignment::new(
            rider_id.to_string(),
            kind,
            tracking_no.clone(),
            destination.clone(),
            estimated_minutes,
            assigned_by.clone(),
        );

        // Claim the rider first; the task row only lands once the
        // rider row is won, so the one-active-task invariant holds.
        let mut claimed = rider;
        claimed.status = RiderStatus::Busy;
        claimed.current_task = Some(task.id);
        match state.dispatch.cas_rider(claimed).await {
            Ok(_) => {
                let task = state.dispatch.insert_task(task).await?;
                state
                    .metrics
                    .tasks_total
                    .with_label_values(&["assigned"])
                    .inc();
                record_audit(
                    state,
                    AuditEntry::new(
                        assigned_by.clone(),
                        "task_assigned",
                        json!({
                            "task_id": task.id,
                            "rider_id": rider_id,
                            "tracking_no": task.tracking_no,
                            "kind": task.kind,
                        }),
                    ),
                )
                .await;
                info!(rider_id, tracking_no = %task.tracking_no, task_id = %task.id, "task assigned");
                return Ok(task);
            }
            Err(AppError::VersionConflict(_)) => continue,
            Err(err) => return Err(err),
        }
    }

    Err(AppError::RiderBusy(format!(
        "rider {rider_id} is being assigned concurrently"
    )))
}

/// Rider accepts or rejects a pending offer. Only the assigned rider
/// may respond; a losing concurrent responder gets `InvalidState`.
pub async fn respond_to_task(
    state: &AppState,
    task_id: Uuid,
    rider_id: &str,
    decision: TaskDecision,
) -> Result<TaskAssignment, AppError> {
    let task = state
        .dispatch
        .get_task(task_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("task {task_id} not found")))?;

    if task.rider_id != rider_id {
        return Err(AppError::Forbidden(format!(
            "task {task_id} is not assigned to rider {rider_id}"
        )));
    }

    if task.status != TaskStatus::Pending {
        return Err(AppError::InvalidState(format!(
            "task {task_id} is {:?}, expected pending",
            task.status
        )));
    }

    let mut updated = task.clone();
    updated.status = match decision {
        TaskDecision::Accept => TaskStatus::Accepted,
        TaskDecision::Reject => TaskStatus::Rejected,
    };
    let updated = state.dispatch.cas_task(updated).await.map_err(|err| match err {
        AppError::VersionConflict(_) => AppError::InvalidState(format!(
            "task {task_id} was resolved by a concurrent request"
        )),
        other => other,
    })?;

    state
        .metrics
        .task_transitions_total
        .with_label_values(&[match decision {
            TaskDecision::Accept => "accepted",
            TaskDecision::Reject => "rejected",
        }])
        .inc();

    match decision {
        TaskDecision::Accept => {
            info!(rider_id, task_id = %task_id, "task accepted");
        }
        TaskDecision::Reject => {
            release_rider(state, rider_id, task_id, None).await?;
            info!(rider_id, task_id = %task_id, "task rejected, rider released");

            if state.config.reassign_policy == ReassignPolicy::Auto {
                reassign_elsewhere(state, &updated).await;
            }
        }
    }

    record_audit(
        state,
        AuditEntry::new(
            rider_id,
            "task_responded",
            json!({ "task_id": task_id, "decision": decision }),
        ),
    )
    .await;

    Ok(updated)
}

#[derive(Debug, Serialize)]
pub struct CompletionResult {
    pub assignment: TaskAssignment,
    pub ledger: Option<DeliveryOutcome>,
    /// True on an idempotent retry of an already-completed task.
    pub already_completed: bool,
    /// True when the ledger side effect failed and was queued for the
    /// reconciliation sweep instead.
    pub queued_for_reconciliation: bool,
}

/// Completes an accepted task. The rider-facing transition always
/// succeeds once the task row is won; a failing ledger update is queued
/// for reconciliation, never surfaced to the rider.
pub async fn complete_task(
    state: &AppState,
    task_id: Uuid,
    rider_id: &str,
) -> Result<CompletionResult, AppError> {
    let task = state
        .dispatch
        .get_task(task_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("task {task_id} not found")))?;

    if task.rider_id != rider_id {
        return Err(AppError::Forbidden(format!(
            "task {task_id} is not assigned to rider {rider_id}"
        )));
    }

    if task.status == TaskStatus::Completed {
        // Client retry of a lost response: re-apply the idempotent
        // ledger side effect, leave rider counters alone.
        let (ledger, queued) = apply_completion_side_effect(state, &task).await;
        return Ok(CompletionResult {
            assignment: task,
            ledger,
            already_completed: true,
            queued_for_reconciliation: queued,
        });
    }

    if task.status != TaskStatus::Accepted {
        return Err(AppError::InvalidState(format!(
            "task {task_id} is {:?}, expected accepted",
            task.status
        )));
    }

    let mut updated = task.clone();
    updated.status = TaskStatus::Completed;
    let task = match state.dispatch.cas_task(updated).await {
        Ok(task) => task,
        Err(AppError::VersionConflict(_)) => {
            // Re-read: a concurrent completion is an idempotent
            // success, anything else is a real state violation.
            let current = state
                .dispatch
                .get_task(task_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("task {task_id} not found")))?;
            if current.status == TaskStatus::Completed {
                let (ledger, queued) = apply_completion_side_effect(state, &current).await;
                return Ok(CompletionResult {
                    assignment: current,
                    ledger,
                    already_completed: true,
                    queued_for_reconciliation: queued,
                });
            }
            return Err(AppError::InvalidState(format!(
                "task {task_id} was resolved by a concurrent request"
            )));
        }
        Err(err) => return Err(err),
    };

    let earnings = match state.ledger.get_package(&task.tracking_no).await {
        Ok(Some(package)) => package.fee,
        Ok(None) => Decimal::ZERO,
        Err(err) => {
            warn!(error = %err, tracking_no = %task.tracking_no, "fee lookup failed");
            Decimal::ZERO
        }
    };
    release_rider(state, rider_id, task_id, Some(earnings)).await?;

    state
        .metrics
        .task_transitions_total
        .with_label_values(&["completed"])
        .inc();

    let (ledger, queued_for_reconciliation) = apply_completion_side_effect(state, &task).await;

    record_audit(
        state,
        AuditEntry::new(
            rider_id,
            "task_completed",
            json!({
                "task_id": task_id,
                "tracking_no": task.tracking_no,
                "queued_for_reconciliation": queued_for_reconciliation,
            }),
        ),
    )
    .await;

    info!(rider_id, task_id = %task_id, queued_for_reconciliation, "task completed");

    Ok(CompletionResult {
        assignment: task,
        ledger,
        already_completed: false,
        queued_for_reconciliation,
    })
}

/// Administrative overrides that bypass the task-linked transitions.
/// Forcing a rider off a task retires the dangling assignment.
pub async fn force_rider_state(
    state: &AppState,
    rider_id: &str,
    action: RiderAction,
    actor: &str,
) -> Result<Rider, AppError> {
    for _ in 0..CAS_ATTEMPTS {
        let rider = state
            .dispatch
            .get_rider(rider_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("rider {rider_id} not found")))?;

        let dangling = rider.current_task;
        let mut updated = rider;
        match action {
            RiderAction::ForceOnline => {
                updated.status = RiderStatus::Online;
            }
            RiderAction::ForceOffline => {
                updated.status = RiderStatus::Offline;
                updated.current_task = None;
            }
            RiderAction::SetBreak => {
                updated.status = RiderStatus::Break;
                updated.current_task = None;
            }
            RiderAction::ClearTask => {
                updated.status = RiderStatus::Online;
                updated.current_task = None;
            }
        }

        match state.dispatch.cas_rider(updated).await {
            Ok(saved) => {
                if saved.current_task.is_none() {
                    if let Some(task_id) = dangling {
                        retire_dangling_task(state, task_id).await;
                    }
                }
                record_audit(
                    state,
                    AuditEntry::new(
                        actor,
                        "rider_forced",
                        json!({ "rider_id": rider_id, "action": action }),
                    ),
                )
                .await;
                info!(rider_id, ?action, actor, "rider state forced");
                return Ok(saved);
            }
            Err(AppError::VersionConflict(_)) => continue,
            Err(err) => return Err(err),
        }
    }

    Err(AppError::VersionConflict(format!(
        "rider {rider_id} is being updated concurrently"
    )))
}

/// Returns the rider to `online` and clears the task reference.
/// `earnings`, when present, also bumps the daily counters exactly once.
async fn release_rider(
    state: &AppState,
    rider_id: &str,
    task_id: Uuid,
    earnings: Option<Decimal>,
) -> Result<(), AppError> {
    for _ in 0..CAS_ATTEMPTS {
        let Some(rider) = state.dispatch.get_rider(rider_id).await? else {
            warn!(rider_id, "rider missing while releasing task");
            return Ok(());
        };

        let mut updated = rider;
        if updated.current_task == Some(task_id) {
            updated.current_task = None;
        }
        updated.status = RiderStatus::Online;
        if let Some(fee) = earnings {
            updated.today_orders += 1;
            updated.today_earnings += fee;
        }

        match state.dispatch.cas_rider(updated).await {
            Ok(_) => return Ok(()),
            Err(AppError::VersionConflict(_)) => continue,
            Err(err) => return Err(err),
        }
    }

    Err(AppError::VersionConflict(format!(
        "rider {rider_id} is being updated concurrently"
    )))
}

/// Runs the package/finance transition under a bounded timeout. On any
/// failure the completion is queued for the reconciliation sweep; the
/// rider is never blocked by a ledger-side fault.
async fn apply_completion_side_effect(
    state: &AppState,
    task: &TaskAssignment,
) -> (Option<DeliveryOutcome>, bool) {
    let budget = std::time::Duration::from_millis(state.config.store_timeout_ms);
    let result = timeout(
        budget,
        reconcile::complete_delivery(state, &task.tracking_no, &task.rider_id),
    )
    .await;

    let err = match result {
        Ok(Ok(outcome)) => return (Some(outcome), false),
        Ok(Err(err)) => err,
        Err(_) => AppError::DownstreamTimeout(format!(
            "ledger update for {} exceeded {}ms",
            task.tracking_no, state.config.store_timeout_ms
        )),
    };

    warn!(
        tracking_no = %task.tracking_no,
        error = %err,
        "ledger update failed; queueing for reconciliation"
    );
    let retry = RetryTask {
        tracking_no: task.tracking_no.clone(),
        rider_id: task.rider_id.clone(),
        attempts: 0,
        queued_at: Utc::now(),
    };
    if let Err(err) = state.ledger.push_retry(retry).await {
        warn!(error = %err, "failed to queue completion retry");
    }
    if let Ok(depth) = state.ledger.retry_depth().await {
        state.metrics.retry_queue_depth.set(depth as i64);
    }

    (None, true)
}

/// Auto re-assignment after a rejection: offer the task to the first
/// free online rider. Finding nobody is not an error; the task stays
/// rejected and the operator re-routes it.
async fn reassign_elsewhere(state: &AppState, rejected: &TaskAssignment) {
    let riders = match state.dispatch.list_riders().await {
        Ok(riders) => riders,
        Err(err) => {
            warn!(error = %err, "auto-reassign: rider listing failed");
            return;
        }
    };

    for candidate in riders {
        if !candidate.active
            || candidate.status != RiderStatus::Online
            || candidate.id == rejected.rider_id
            || candidate.current_task.is_some()
        {
            continue;
        }
        match assign_task(
            state,
            &candidate.id,
            rejected.kind,
            rejected.tracking_no.clone(),
            rejected.destination.clone(),
            rejected.estimated_minutes,
            "auto-reassign".to_string(),
        )
        .await
        {
            Ok(task) => {
                info!(
                    rider_id = %candidate.id,
                    task_id = %task.id,
                    tracking_no = %task.tracking_no,
                    "task auto-reassigned"
                );
                return;
            }
            Err(err) => {
                warn!(rider_id = %candidate.id, error = %err, "auto-reassign candidate failed");
            }
        }
    }

    info!(tracking_no = %rejected.tracking_no, "auto-reassign found no candidate");
}

async fn retire_dangling_task(state: &AppState, task_id: Uuid) {
    let task = match state.dispatch.get_task(task_id).await {
        Ok(Some(task)) if !task.status.is_terminal() => task,
        Ok(_) => return,
        Err(err) => {
            warn!(task_id = %task_id, error = %err, "dangling task lookup failed");
            return;
        }
    };

    let mut retired = task;
    retired.status = TaskStatus::Rejected;
    if let Err(err) = state.dispatch.cas_task(retired).await {
        warn!(task_id = %task_id, error = %err, "failed to retire dangling task");
    }
}

async fn record_audit(state: &AppState, entry: AuditEntry) {
    if let Err(err) = state.ledger.append_audit(entry).await {
        warn!(error = %err, "failed to append audit entry");
    }
}
