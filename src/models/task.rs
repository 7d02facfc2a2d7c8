use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Pickup,
    Delivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Accepted,
    Rejected,
    Completed,
}

impl TaskStatus {
    /// Terminal tasks are archived, never mutated again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Rejected | TaskStatus::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskDecision {
    Accept,
    Reject,
}

/// The offer of a pickup/delivery to a specific rider and its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub id: Uuid,
    pub rider_id: String,
    pub kind: TaskKind,
    pub tracking_no: String,
    pub destination: String,
    pub estimated_minutes: u32,
    pub status: TaskStatus,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
    pub version: u64,
}

impl TaskAssignment {
    pub fn new(
        rider_id: String,
        kind: TaskKind,
        tracking_no: String,
        destination: String,
        estimated_minutes: u32,
        assigned_by: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            rider_id,
            kind,
            tracking_no,
            destination,
            estimated_minutes,
            status: TaskStatus::Pending,
            assigned_by,
            assigned_at: Utc::now(),
            version: 0,
        }
    }
}
