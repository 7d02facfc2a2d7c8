use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::ledger::{
    AuditEntry, FinanceKind, FinanceRecord, FinanceStatus, Package, PackageStatus, RetryTask,
    CANCELLED_PICKUP_CATEGORY, DELIVERY_FEE_CATEGORY,
};
use crate::state::AppState;

/// Ledger-side result of a completed delivery.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub tracking_no: String,
    pub package_status: PackageStatus,
    pub finance_status: FinanceStatus,
    /// Set when no finance row existed and one was created from the
    /// package fee.
    pub synthesized_finance: bool,
}

/// Flips the package and its finance rows to their delivered state.
/// Safe to re-apply: a second invocation for an already-delivered
/// package is a no-op.
pub async fn complete_delivery(
    state: &AppState,
    tracking_no: &str,
    rider_id: &str,
) -> Result<DeliveryOutcome, AppError> {
    let package = state
        .ledger
        .get_package(tracking_no)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("package {tracking_no} not found")))?;

    if package.status != PackageStatus::Delivered {
        state
            .ledger
            .set_package_status(tracking_no, PackageStatus::Delivered)
            .await?;
    }

    let rows = state.ledger.finances_for_tracking(tracking_no).await?;
    let synthesized_finance = if rows.is_empty() {
        state
            .ledger
            .insert_finance(income_row(&package, FinanceStatus::Posted, DELIVERY_FEE_CATEGORY))
            .await?;
        state
            .metrics
            .reconciliation_repairs_total
            .with_label_values(&["synthesize_income"])
            .inc();
        true
    } else {
        for row in rows {
            if row.status != FinanceStatus::Posted {
                state
                    .ledger
                    .set_finance_status(row.id, FinanceStatus::Posted)
                    .await?;
            }
        }
        false
    };

    record_audit(
        state,
        AuditEntry::new(
            rider_id,
            "delivery_completed",
            json!({ "tracking_no": tracking_no, "status": "delivered" }),
        ),
    )
    .await;

    info!(tracking_no, rider_id, synthesized_finance, "delivery posted to ledger");

    Ok(DeliveryOutcome {
        tracking_no: tracking_no.to_string(),
        package_status: PackageStatus::Delivered,
        finance_status: FinanceStatus::Posted,
        synthesized_finance,
    })
}

/// Read-only drift report: package set vs finance rows vs manifest
/// links. Pure function of ledger state, safe to run concurrently.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub missing_finance: Vec<String>,
    pub extra_finance: Vec<String>,
    pub missing_manifest: Vec<String>,
    pub packages: usize,
    pub finances: usize,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.missing_finance.is_empty()
            && self.extra_finance.is_empty()
            && self.missing_manifest.is_empty()
    }
}

pub async fn audit(state: &AppState) -> Result<AuditReport, AppError> {
    let packages = state.ledger.list_packages().await?;
    let finances = state.ledger.list_finances().await?;
    let links = state.ledger.list_manifest_links().await?;

    let package_keys: HashSet<&str> = packages.iter().map(|p| p.tracking_no.as_str()).collect();
    let finance_keys: HashSet<String> =
        finances.iter().filter_map(|f| f.tracking_key()).collect();
    let linked: HashSet<&str> = links.iter().map(|l| l.tracking_no.as_str()).collect();

    let mut missing_finance: Vec<String> = package_keys
        .iter()
        .filter(|t| !finance_keys.contains(**t))
        .map(|t| t.to_string())
        .collect();
    let mut extra_finance: Vec<String> = finance_keys
        .iter()
        .filter(|t| !package_keys.contains(t.as_str()))
        .cloned()
        .collect();
    let mut missing_manifest: Vec<String> = packages
        .iter()
        .filter(|p| p.status == PackageStatus::InTransit && !linked.contains(p.tracking_no.as_str()))
        .map(|p| p.tracking_no.clone())
        .collect();

    missing_finance.sort();
    extra_finance.sort();
    missing_manifest.sort();

    for (kind, count) in [
        ("missing_finance", missing_finance.len()),
        ("extra_finance", extra_finance.len()),
        ("missing_manifest", missing_manifest.len()),
    ] {
        if count > 0 {
            state
                .metrics
                .drift_detected_total
                .with_label_values(&[kind])
                .inc_by(count as u64);
        }
    }

    Ok(AuditReport {
        missing_finance,
        extra_finance,
        missing_manifest,
        packages: packages.len(),
        finances: finances.len(),
    })
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct HealOptions {
    /// Delete orphaned finance rows referencing no existing package.
    pub keep_only_packages: bool,
    /// Align finance status to `in_transit` for packages in transit.
    pub mark_transit: bool,
    /// Align finance amounts to the package fee.
    pub fix_amounts: bool,
    /// Delete voided rows and rows of cancelled packages (pickup fees
    /// excepted, which stay posted).
    pub delete_voided: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealReport {
    pub inserted_missing: usize,
    pub purged_orphans: usize,
    pub marked_transit: usize,
    pub amounts_aligned: usize,
    pub deleted_voided: usize,
    /// Income rows of cancelled packages reclassified as retained
    /// pickup fees instead of being deleted.
    pub retained_pickup_fees: usize,
    /// Corrective passes that failed; the others were still applied.
    pub errors: Vec<String>,
}

/// Applies corrective writes guided by `audit()`. Each pass is
/// independently idempotent; one failing does not block the rest.
pub async fn heal(state: &AppState, opts: HealOptions, actor: &str) -> Result<HealReport, AppError> {
    let report = audit(state).await?;
    let packages = state.ledger.list_packages().await?;
    let by_tracking: HashMap<&str, &Package> =
        packages.iter().map(|p| (p.tracking_no.as_str(), p)).collect();

    let mut out = HealReport::default();

    match insert_missing_income(state, &report.missing_finance, &by_tracking).await {
        Ok(n) => out.inserted_missing = n,
        Err(err) => fail(&mut out, "insert_missing", err),
    }

    if opts.keep_only_packages {
        match purge_orphans(state, &report.extra_finance).await {
            Ok(n) => out.purged_orphans = n,
            Err(err) => fail(&mut out, "purge_orphans", err),
        }
    }

    if opts.mark_transit {
        match mark_transit(state, &packages).await {
            Ok(n) => out.marked_transit = n,
            Err(err) => fail(&mut out, "mark_transit", err),
        }
    }

    if opts.fix_amounts {
        match fix_amounts(state, &packages).await {
            Ok(n) => out.amounts_aligned = n,
            Err(err) => fail(&mut out, "fix_amounts", err),
        }
    }

    if opts.delete_voided {
        match delete_voided(state, &by_tracking).await {
            Ok((deleted, retained)) => {
                out.deleted_voided = deleted;
                out.retained_pickup_fees = retained;
            }
            Err(err) => fail(&mut out, "delete_voided", err),
        }
    }

    record_audit(
        state,
        AuditEntry::new(
            actor,
            "ledger_healed",
            json!({
                "inserted_missing": out.inserted_missing,
                "purged_orphans": out.purged_orphans,
                "marked_transit": out.marked_transit,
                "amounts_aligned": out.amounts_aligned,
                "deleted_voided": out.deleted_voided,
                "retained_pickup_fees": out.retained_pickup_fees,
            }),
        ),
    )
    .await;

    info!(
        actor,
        inserted = out.inserted_missing,
        purged = out.purged_orphans,
        transit = out.marked_transit,
        amounts = out.amounts_aligned,
        voided = out.deleted_voided,
        retained = out.retained_pickup_fees,
        "heal pass applied"
    );

    Ok(out)
}

fn fail(report: &mut HealReport, action: &str, err: AppError) {
    warn!(action, error = %err, "heal action failed");
    report.errors.push(action.to_string());
}

/// Missing income rows are rebuilt from the package fee. A cancelled
/// package keeps its pickup fee on the books as posted income under a
/// distinct category; delivery never happened but pickup work did.
async fn insert_missing_income(
    state: &AppState,
    missing: &[String],
    by_tracking: &HashMap<&str, &Package>,
) -> Result<usize, AppError> {
    let mut inserted = 0;
    for tracking_no in missing {
        let Some(package) = by_tracking.get(tracking_no.as_str()) else {
            continue;
        };
        if package.fee <= Decimal::ZERO {
            continue;
        }
        let (status, category) = if package.status == PackageStatus::Cancelled {
            (FinanceStatus::Posted, CANCELLED_PICKUP_CATEGORY)
        } else {
            (FinanceStatus::for_package(package.status), DELIVERY_FEE_CATEGORY)
        };
        state
            .ledger
            .insert_finance(income_row(package, status, category))
            .await?;
        inserted += 1;
        state
            .metrics
            .reconciliation_repairs_total
            .with_label_values(&["insert_missing"])
            .inc();
    }
    Ok(inserted)
}

async fn purge_orphans(state: &AppState, extra: &[String]) -> Result<usize, AppError> {
    let mut purged = 0;
    let extra: HashSet<&str> = extra.iter().map(String::as_str).collect();
    for row in state.ledger.list_finances().await? {
        let Some(key) = row.tracking_key() else {
            continue;
        };
        if extra.contains(key.as_str()) && state.ledger.delete_finance(row.id).await? {
            purged += 1;
            state
                .metrics
                .reconciliation_repairs_total
                .with_label_values(&["purge_orphan"])
                .inc();
        }
    }
    Ok(purged)
}

async fn mark_transit(state: &AppState, packages: &[Package]) -> Result<usize, AppError> {
    let mut marked = 0;
    for package in packages
        .iter()
        .filter(|p| p.status == PackageStatus::InTransit)
    {
        for row in state
            .ledger
            .finances_for_tracking(&package.tracking_no)
            .await?
        {
            if row.status != FinanceStatus::InTransit {
                state
                    .ledger
                    .set_finance_status(row.id, FinanceStatus::InTransit)
                    .await?;
                marked += 1;
                state
                    .metrics
                    .reconciliation_repairs_total
                    .with_label_values(&["mark_transit"])
                    .inc();
            }
        }
    }
    Ok(marked)
}

async fn fix_amounts(state: &AppState, packages: &[Package]) -> Result<usize, AppError> {
    let mut aligned = 0;
    for package in packages {
        for row in state
            .ledger
            .finances_for_tracking(&package.tracking_no)
            .await?
        {
            if row.amount != package.fee {
                state.ledger.set_finance_amount(row.id, package.fee).await?;
                aligned += 1;
                state
                    .metrics
                    .reconciliation_repairs_total
                    .with_label_values(&["fix_amount"])
                    .inc();
            }
        }
    }
    Ok(aligned)
}

async fn delete_voided(
    state: &AppState,
    by_tracking: &HashMap<&str, &Package>,
) -> Result<(usize, usize), AppError> {
    let mut deleted = 0;
    let mut retained = 0;
    for row in state.ledger.list_finances().await? {
        let cancelled_package = row
            .tracking_key()
            .and_then(|t| by_tracking.get(t.as_str()).copied())
            .is_some_and(|p| p.status == PackageStatus::Cancelled);

        if row.category == CANCELLED_PICKUP_CATEGORY {
            // Earned before the cancellation; keep it posted.
            if row.status != FinanceStatus::Posted {
                state
                    .ledger
                    .set_finance_status(row.id, FinanceStatus::Posted)
                    .await?;
            }
            continue;
        }

        if cancelled_package && row.kind == FinanceKind::Income {
            // The pickup work behind this income happened; reclassify
            // the row in place instead of routing it through a delete
            // and a later re-insert.
            state
                .ledger
                .set_finance_category(row.id, CANCELLED_PICKUP_CATEGORY)
                .await?;
            if row.status != FinanceStatus::Posted {
                state
                    .ledger
                    .set_finance_status(row.id, FinanceStatus::Posted)
                    .await?;
            }
            retained += 1;
            state
                .metrics
                .reconciliation_repairs_total
                .with_label_values(&["retain_pickup_fee"])
                .inc();
            continue;
        }

        if (row.status == FinanceStatus::Void || cancelled_package)
            && state.ledger.delete_finance(row.id).await?
        {
            deleted += 1;
            state
                .metrics
                .reconciliation_repairs_total
                .with_label_values(&["delete_voided"])
                .inc();
        }
    }
    Ok((deleted, retained))
}

fn income_row(package: &Package, status: FinanceStatus, category: &str) -> FinanceRecord {
    FinanceRecord {
        id: Uuid::new_v4(),
        kind: FinanceKind::Income,
        category: category.to_string(),
        amount: package.fee,
        date: package.created_at,
        tracking_no: Some(package.tracking_no.clone()),
        note: package.note.clone(),
        status,
    }
}

async fn record_audit(state: &AppState, entry: AuditEntry) {
    if let Err(err) = state.ledger.append_audit(entry).await {
        warn!(error = %err, "failed to append audit entry");
    }
}

/// Scheduled sweep: retries queued delivery completions, then audits
/// the full ledger and reports drift. Runs until the process exits.
pub async fn run_reconciliation_sweep(state: Arc<AppState>) {
    info!(
        interval_secs = state.config.sweep_interval_secs,
        "reconciliation sweep started"
    );
    let mut tick = interval(Duration::from_secs(state.config.sweep_interval_secs));
    // The first tick fires immediately; skip it so startup stays quiet.
    tick.tick().await;

    loop {
        tick.tick().await;
        drain_retry_queue(&state).await;

        match audit(&state).await {
            Ok(report) if report.is_clean() => {
                info!(packages = report.packages, "ledger audit clean");
            }
            Ok(report) => {
                warn!(
                    missing_finance = report.missing_finance.len(),
                    extra_finance = report.extra_finance.len(),
                    missing_manifest = report.missing_manifest.len(),
                    "ledger drift detected"
                );
            }
            Err(err) => error!(error = %err, "ledger audit failed"),
        }
    }
}

pub async fn drain_retry_queue(state: &AppState) {
    let queued = match state.ledger.drain_retries().await {
        Ok(queued) => queued,
        Err(err) => {
            error!(error = %err, "failed to drain retry queue");
            return;
        }
    };

    for retry in queued {
        match complete_delivery(state, &retry.tracking_no, &retry.rider_id).await {
            Ok(_) => {
                info!(tracking_no = %retry.tracking_no, "queued completion reconciled");
            }
            Err(err) if retry.attempts + 1 >= state.config.max_retry_attempts => {
                error!(
                    tracking_no = %retry.tracking_no,
                    attempts = retry.attempts + 1,
                    error = %err,
                    "giving up on queued completion"
                );
            }
            Err(err) => {
                warn!(tracking_no = %retry.tracking_no, error = %err, "completion retry failed");
                let requeue = RetryTask {
                    attempts: retry.attempts + 1,
                    queued_at: Utc::now(),
                    ..retry
                };
                if let Err(err) = state.ledger.push_retry(requeue).await {
                    error!(error = %err, "failed to re-queue completion retry");
                }
            }
        }
    }

    if let Ok(depth) = state.ledger.retry_depth().await {
        state.metrics.retry_queue_depth.set(depth as i64);
    }
}
