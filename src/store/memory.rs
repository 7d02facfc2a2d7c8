use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::ledger::{
    AuditEntry, FinanceRecord, FinanceStatus, ManifestLink, Package, PackageStatus, RetryTask,
};
use crate::models::location::{LocationRecord, TrackingEvent};
use crate::models::rider::Rider;
use crate::models::task::{TaskAssignment, TaskStatus};
use crate::store::{DispatchStore, LedgerStore, LocationStore};

/// In-process store. Every row carries a version and all rider/task
/// mutations go through compare-and-swap, so engine code exercises the
/// same discipline a relational backend would enforce.
#[derive(Default)]
pub struct MemStore {
    riders: DashMap<String, Rider>,
    tasks: DashMap<Uuid, TaskAssignment>,
    locations: DashMap<String, LocationRecord>,
    tracking_events: DashMap<String, Vec<TrackingEvent>>,
    packages: DashMap<String, Package>,
    finances: DashMap<Uuid, FinanceRecord>,
    manifest_links: DashMap<String, ManifestLink>,
    audit_log: Mutex<Vec<AuditEntry>>,
    retry_queue: Mutex<Vec<RetryTask>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DispatchStore for MemStore {
    async fn insert_rider(&self, rider: Rider) -> Result<Rider, AppError> {
        match self.riders.entry(rider.id.clone()) {
            Entry::Occupied(_) => Err(AppError::BadRequest(format!(
                "rider {} already exists",
                rider.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(rider.clone());
                Ok(rider)
            }
        }
    }

    async fn get_rider(&self, rider_id: &str) -> Result<Option<Rider>, AppError> {
        Ok(self.riders.get(rider_id).map(|r| r.clone()))
    }

    async fn list_riders(&self) -> Result<Vec<Rider>, AppError> {
        let mut riders: Vec<Rider> = self.riders.iter().map(|r| r.clone()).collect();
        riders.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(riders)
    }

    async fn cas_rider(&self, mut rider: Rider) -> Result<Rider, AppError> {
        match self.riders.entry(rider.id.clone()) {
            Entry::Occupied(mut slot) => {
                if slot.get().version != rider.version {
                    return Err(AppError::VersionConflict(format!(
                        "rider {} was modified concurrently",
                        rider.id
                    )));
                }
                rider.version += 1;
                slot.insert(rider.clone());
                Ok(rider)
            }
            Entry::Vacant(_) => {
                Err(AppError::NotFound(format!("rider {} not found", rider.id)))
            }
        }
    }

    async fn insert_task(&self, task: TaskAssignment) -> Result<TaskAssignment, AppError> {
        self.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskAssignment>, AppError> {
        Ok(self.tasks.get(&task_id).map(|t| t.clone()))
    }

    async fn tasks_for_rider(&self, rider_id: &str) -> Result<Vec<TaskAssignment>, AppError> {
        let mut tasks: Vec<TaskAssignment> = self
            .tasks
            .iter()
            .filter(|t| t.rider_id == rider_id)
            .map(|t| t.clone())
            .collect();
        tasks.sort_by(|a, b| b.assigned_at.cmp(&a.assigned_at));
        Ok(tasks)
    }

    async fn active_task_for_rider(
        &self,
        rider_id: &str,
    ) -> Result<Option<TaskAssignment>, AppError> {
        Ok(self
            .tasks
            .iter()
            .find(|t| t.rider_id == rider_id && !t.status.is_terminal())
            .map(|t| t.clone()))
    }

    async fn cas_task(&self, mut task: TaskAssignment) -> Result<TaskAssignment, AppError> {
        match self.tasks.entry(task.id) {
            Entry::Occupied(mut slot) => {
                if slot.get().version != task.version {
                    return Err(AppError::VersionConflict(format!(
                        "task {} was modified concurrently",
                        task.id
                    )));
                }
                task.version += 1;
                slot.insert(task.clone());
                Ok(task)
            }
            Entry::Vacant(_) => {
                Err(AppError::NotFound(format!("task {} not found", task.id)))
            }
        }
    }

    async fn task_count(&self) -> Result<usize, AppError> {
        Ok(self.tasks.len())
    }
}

#[async_trait]
impl LocationStore for MemStore {
    async fn upsert_location(&self, mut record: LocationRecord) -> Result<LocationRecord, AppError> {
        match self.locations.entry(record.rider_id.clone()) {
            Entry::Occupied(mut slot) => {
                if slot.get().recorded_at > record.recorded_at {
                    // Newer row stays; the sample is acknowledged but
                    // flagged for the caller.
                    record.out_of_order = true;
                } else {
                    slot.insert(record.clone());
                }
                Ok(record)
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn get_location(&self, rider_id: &str) -> Result<Option<LocationRecord>, AppError> {
        Ok(self.locations.get(rider_id).map(|l| l.clone()))
    }

    async fn list_locations(&self) -> Result<Vec<LocationRecord>, AppError> {
        Ok(self.locations.iter().map(|l| l.clone()).collect())
    }

    async fn append_tracking_event(&self, event: TrackingEvent) -> Result<(), AppError> {
        self.tracking_events
            .entry(event.rider_id.clone())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn tracking_events(&self, rider_id: &str) -> Result<Vec<TrackingEvent>, AppError> {
        Ok(self
            .tracking_events
            .get(rider_id)
            .map(|e| e.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl LedgerStore for MemStore {
    async fn insert_package(&self, package: Package) -> Result<(), AppError> {
        self.packages.insert(package.tracking_no.clone(), package);
        Ok(())
    }

    async fn get_package(&self, tracking_no: &str) -> Result<Option<Package>, AppError> {
        Ok(self.packages.get(tracking_no).map(|p| p.clone()))
    }

    async fn list_packages(&self) -> Result<Vec<Package>, AppError> {
        Ok(self.packages.iter().map(|p| p.clone()).collect())
    }

    async fn set_package_status(
        &self,
        tracking_no: &str,
        status: PackageStatus,
    ) -> Result<Package, AppError> {
        let mut package = self
            .packages
            .get_mut(tracking_no)
            .ok_or_else(|| AppError::NotFound(format!("package {tracking_no} not found")))?;
        package.status = status;
        Ok(package.clone())
    }

    async fn insert_finance(&self, record: FinanceRecord) -> Result<(), AppError> {
        self.finances.insert(record.id, record);
        Ok(())
    }

    async fn list_finances(&self) -> Result<Vec<FinanceRecord>, AppError> {
        Ok(self.finances.iter().map(|f| f.clone()).collect())
    }

    async fn finances_for_tracking(
        &self,
        tracking_no: &str,
    ) -> Result<Vec<FinanceRecord>, AppError> {
        Ok(self
            .finances
            .iter()
            .filter(|f| f.tracking_key().as_deref() == Some(tracking_no))
            .map(|f| f.clone())
            .collect())
    }

    async fn set_finance_status(&self, id: Uuid, status: FinanceStatus) -> Result<(), AppError> {
        let mut record = self
            .finances
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("finance record {id} not found")))?;
        record.status = status;
        Ok(())
    }

    async fn set_finance_amount(&self, id: Uuid, amount: Decimal) -> Result<(), AppError> {
        let mut record = self
            .finances
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("finance record {id} not found")))?;
        record.amount = amount;
        Ok(())
    }

    async fn set_finance_category(&self, id: Uuid, category: &str) -> Result<(), AppError> {
        let mut record = self
            .finances
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("finance record {id} not found")))?;
        record.category = category.to_string();
        Ok(())
    }

    async fn delete_finance(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.finances.remove(&id).is_some())
    }

    async fn insert_manifest_link(&self, link: ManifestLink) -> Result<(), AppError> {
        self.manifest_links.insert(link.tracking_no.clone(), link);
        Ok(())
    }

    async fn list_manifest_links(&self) -> Result<Vec<ManifestLink>, AppError> {
        Ok(self.manifest_links.iter().map(|l| l.clone()).collect())
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), AppError> {
        self.audit_log
            .lock()
            .map_err(|_| AppError::Internal("audit log poisoned".to_string()))?
            .push(entry);
        Ok(())
    }

    async fn audit_entries(&self) -> Result<Vec<AuditEntry>, AppError> {
        Ok(self
            .audit_log
            .lock()
            .map_err(|_| AppError::Internal("audit log poisoned".to_string()))?
            .clone())
    }

    async fn push_retry(&self, task: RetryTask) -> Result<(), AppError> {
        self.retry_queue
            .lock()
            .map_err(|_| AppError::Internal("retry queue poisoned".to_string()))?
            .push(task);
        Ok(())
    }

    async fn drain_retries(&self) -> Result<Vec<RetryTask>, AppError> {
        Ok(std::mem::take(
            &mut *self
                .retry_queue
                .lock()
                .map_err(|_| AppError::Internal("retry queue poisoned".to_string()))?,
        ))
    }

    async fn retry_depth(&self) -> Result<usize, AppError> {
        Ok(self
            .retry_queue
            .lock()
            .map_err(|_| AppError::Internal("retry queue poisoned".to_string()))?
            .len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::location::LocationSource;

    fn sample_location(rider: &str, at: chrono::DateTime<Utc>) -> LocationRecord {
        LocationRecord {
            rider_id: rider.to_string(),
            lat: 16.86,
            lng: 96.19,
            accuracy: None,
            speed: None,
            heading: None,
            battery: Some(80),
            recorded_at: at,
            source: LocationSource::Reported,
            out_of_order: false,
        }
    }

    #[tokio::test]
    async fn cas_rider_rejects_stale_version() {
        let store = MemStore::new();
        let rider = Rider::new("R1".into(), "Aye".into(), "09111".into());
        store.insert_rider(rider.clone()).await.unwrap();

        let first = store.cas_rider(rider.clone()).await.unwrap();
        assert_eq!(first.version, 1);

        // Re-using the version-0 snapshot must lose.
        let err = store.cas_rider(rider).await.unwrap_err();
        assert!(matches!(err, AppError::VersionConflict(_)));
    }

    #[tokio::test]
    async fn older_location_write_does_not_displace_newer_row() {
        let store = MemStore::new();
        let now = Utc::now();
        store
            .upsert_location(sample_location("R1", now))
            .await
            .unwrap();

        let late = store
            .upsert_location(sample_location("R1", now - Duration::seconds(30)))
            .await
            .unwrap();
        assert!(late.out_of_order);

        let stored = store.get_location("R1").await.unwrap().unwrap();
        assert_eq!(stored.recorded_at, now);
        assert!(!stored.out_of_order);
    }

    #[tokio::test]
    async fn finances_match_by_column_or_legacy_note() {
        use crate::models::ledger::{FinanceKind, LEGACY_NOTE_PREFIX};

        let store = MemStore::new();
        let legacy = FinanceRecord {
            id: Uuid::new_v4(),
            kind: FinanceKind::Income,
            category: "freight".to_string(),
            amount: Decimal::from(900),
            date: Utc::now(),
            tracking_no: None,
            note: Some(format!("{LEGACY_NOTE_PREFIX}T-77")),
            status: FinanceStatus::AwaitingSignature,
        };
        store.insert_finance(legacy).await.unwrap();

        let hits = store.finances_for_tracking("T-77").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(store.finances_for_tracking("T-78").await.unwrap().is_empty());
    }
}
