use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Note prefix used by legacy finance rows that predate the
/// `tracking_no` column; the tracking number follows the prefix.
pub const LEGACY_NOTE_PREFIX: &str = "package intake - ";

/// Category for pickup fees retained when a package is cancelled.
/// Pickup work happened even though delivery did not, so these rows
/// stay posted instead of being voided.
pub const CANCELLED_PICKUP_CATEGORY: &str = "pickup fee (cancelled)";

pub const DELIVERY_FEE_CATEGORY: &str = "delivery fee";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    PendingPrepay,
    Ordered,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessLine {
    City,
    CrossBorder,
}

impl BusinessLine {
    /// Fallback classifier for rows without a structured `biz` column.
    /// The structured column is always primary; this heuristic only
    /// keeps legacy data usable for reporting.
    pub fn infer_from_category(category: &str) -> Option<Self> {
        let lower = category.to_lowercase();
        if lower.contains("cross") || lower.contains("international") {
            Some(BusinessLine::CrossBorder)
        } else if lower.contains("city") || lower.contains("local") {
            Some(BusinessLine::City)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub tracking_no: String,
    pub status: PackageStatus,
    pub fee: Decimal,
    pub destination: String,
    pub receiver: String,
    pub biz: Option<BusinessLine>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinanceKind {
    Income,
    Expense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinanceStatus {
    AwaitingSignature,
    InTransit,
    Posted,
    Void,
}

impl FinanceStatus {
    /// Finance status mirroring a package's lifecycle status.
    pub fn for_package(status: PackageStatus) -> Self {
        match status {
            PackageStatus::Delivered => FinanceStatus::Posted,
            PackageStatus::InTransit => FinanceStatus::InTransit,
            // Cancelled packages keep their pickup fee on the books.
            PackageStatus::Cancelled => FinanceStatus::Posted,
            PackageStatus::PendingPrepay | PackageStatus::Ordered | PackageStatus::PickedUp => {
                FinanceStatus::AwaitingSignature
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinanceRecord {
    pub id: Uuid,
    pub kind: FinanceKind,
    pub category: String,
    pub amount: Decimal,
    pub date: DateTime<Utc>,
    pub tracking_no: Option<String>,
    pub note: Option<String>,
    pub status: FinanceStatus,
}

impl FinanceRecord {
    /// Tracking number this row is linked to, recovering it from the
    /// structured legacy note when the column is absent.
    pub fn tracking_key(&self) -> Option<String> {
        if let Some(t) = &self.tracking_no {
            return Some(t.clone());
        }
        self.note
            .as_deref()
            .and_then(parse_legacy_note)
            .map(str::to_string)
    }
}

/// Extracts the tracking number from a legacy intake note.
pub fn parse_legacy_note(note: &str) -> Option<&str> {
    let rest = note.strip_prefix(LEGACY_NOTE_PREFIX)?.trim();
    if rest.is_empty() { None } else { Some(rest) }
}

/// Association between a package and the shipment it travels in.
/// Absence while the package is in transit is a detectable
/// inconsistency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestLink {
    pub tracking_no: String,
    pub shipment_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub detail: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(actor: impl Into<String>, action: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
            detail,
            at: Utc::now(),
        }
    }
}

/// A delivery completion whose ledger side effect failed and is
/// waiting for the reconciliation sweep to retry it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryTask {
    pub tracking_no: String,
    pub rider_id: String,
    pub attempts: u32,
    pub queued_at: DateTime<Utc>,
}
