pub mod memory;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::ledger::{
    AuditEntry, FinanceRecord, FinanceStatus, ManifestLink, Package, PackageStatus, RetryTask,
};
use crate::models::location::{LocationRecord, TrackingEvent};
use crate::models::rider::Rider;
use crate::models::task::TaskAssignment;

/// All mutable rider/task/location/ledger state lives behind these
/// traits. Handlers are stateless; nothing outside the store survives
/// across two requests. `MemStore` is the in-process implementation; a
/// relational backend plugs in behind the same seam.
///
/// Compare-and-swap convention: `cas_*` takes an updated row whose
/// `version` is the version it was read at. The store persists and
/// bumps the version if it still matches, or fails with
/// `VersionConflict` when a concurrent writer won.
#[async_trait]
pub trait DispatchStore: Send + Sync {
    async fn insert_rider(&self, rider: Rider) -> Result<Rider, AppError>;
    async fn get_rider(&self, rider_id: &str) -> Result<Option<Rider>, AppError>;
    async fn list_riders(&self) -> Result<Vec<Rider>, AppError>;
    async fn cas_rider(&self, rider: Rider) -> Result<Rider, AppError>;

    async fn insert_task(&self, task: TaskAssignment) -> Result<TaskAssignment, AppError>;
    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskAssignment>, AppError>;
    /// All assignments for a rider, newest first.
    async fn tasks_for_rider(&self, rider_id: &str) -> Result<Vec<TaskAssignment>, AppError>;
    /// The rider's non-terminal assignment, if any.
    async fn active_task_for_rider(
        &self,
        rider_id: &str,
    ) -> Result<Option<TaskAssignment>, AppError>;
    async fn cas_task(&self, task: TaskAssignment) -> Result<TaskAssignment, AppError>;
    async fn task_count(&self) -> Result<usize, AppError>;
}

#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Last-write-wins by `recorded_at`: an older-stamped record does
    /// not displace a newer stored row; it is returned flagged
    /// `out_of_order` instead.
    async fn upsert_location(&self, record: LocationRecord) -> Result<LocationRecord, AppError>;
    async fn get_location(&self, rider_id: &str) -> Result<Option<LocationRecord>, AppError>;
    async fn list_locations(&self) -> Result<Vec<LocationRecord>, AppError>;
    async fn append_tracking_event(&self, event: TrackingEvent) -> Result<(), AppError>;
    async fn tracking_events(&self, rider_id: &str) -> Result<Vec<TrackingEvent>, AppError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_package(&self, package: Package) -> Result<(), AppError>;
    async fn get_package(&self, tracking_no: &str) -> Result<Option<Package>, AppError>;
    async fn list_packages(&self) -> Result<Vec<Package>, AppError>;
    async fn set_package_status(
        &self,
        tracking_no: &str,
        status: PackageStatus,
    ) -> Result<Package, AppError>;

    async fn insert_finance(&self, record: FinanceRecord) -> Result<(), AppError>;
    async fn list_finances(&self) -> Result<Vec<FinanceRecord>, AppError>;
    /// Rows linked to a tracking number, by column or legacy note.
    async fn finances_for_tracking(
        &self,
        tracking_no: &str,
    ) -> Result<Vec<FinanceRecord>, AppError>;
    async fn set_finance_status(&self, id: Uuid, status: FinanceStatus) -> Result<(), AppError>;
    async fn set_finance_amount(&self, id: Uuid, amount: Decimal) -> Result<(), AppError>;
    async fn set_finance_category(&self, id: Uuid, category: &str) -> Result<(), AppError>;
    async fn delete_finance(&self, id: Uuid) -> Result<bool, AppError>;

    async fn insert_manifest_link(&self, link: ManifestLink) -> Result<(), AppError>;
    async fn list_manifest_links(&self) -> Result<Vec<ManifestLink>, AppError>;

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), AppError>;
    async fn audit_entries(&self) -> Result<Vec<AuditEntry>, AppError>;

    async fn push_retry(&self, task: RetryTask) -> Result<(), AppError>;
    async fn drain_retries(&self) -> Result<Vec<RetryTask>, AppError>;
    async fn retry_depth(&self) -> Result<usize, AppError>;
}
