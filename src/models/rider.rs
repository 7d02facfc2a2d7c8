use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiderStatus {
    Online,
    Busy,
    Offline,
    Break,
}

/// Administrative overrides that bypass the task-linked transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiderAction {
    ForceOnline,
    ForceOffline,
    SetBreak,
    ClearTask,
}

/// A courier account. `id` is the operator-issued work id, not a UUID.
/// Mutated only by the dispatch engine; deactivated rather than deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rider {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub status: RiderStatus,
    pub current_task: Option<Uuid>,
    pub today_orders: u32,
    pub today_earnings: Decimal,
    pub rating: f64,
    pub joined_at: DateTime<Utc>,
    pub active: bool,
    /// Row version for compare-and-swap writes.
    pub version: u64,
}

impl Rider {
    pub fn new(id: String, name: String, phone: String) -> Self {
        Self {
            id,
            name,
            phone,
            status: RiderStatus::Offline,
            current_task: None,
            today_orders: 0,
            today_earnings: Decimal::ZERO,
            rating: 5.0,
            joined_at: Utc::now(),
            active: true,
            version: 0,
        }
    }
}
