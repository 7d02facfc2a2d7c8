use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    /// Pushed by the rider's device.
    Reported,
    /// Read-time placeholder for a known rider with no report; never
    /// persisted and never usable as ground truth.
    Synthesized,
}

/// Latest known position for one rider. One row per rider,
/// last-write-wins by `recorded_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationRecord {
    pub rider_id: String,
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub battery: Option<u8>,
    pub recorded_at: DateTime<Utc>,
    pub source: LocationSource,
    /// Set when this sample carried an older timestamp than the row it
    /// met in the store. Device clocks skew; the sample is kept in the
    /// tracking log but does not displace the newer row.
    pub out_of_order: bool,
}

impl LocationRecord {
    pub fn view(&self, now: DateTime<Utc>, stale_after: Duration) -> LocationView {
        LocationView {
            record: self.clone(),
            stale: now - self.recorded_at > stale_after,
        }
    }
}

/// What observers see: the record plus read-time freshness.
#[derive(Debug, Clone, Serialize)]
pub struct LocationView {
    #[serde(flatten)]
    pub record: LocationRecord,
    pub stale: bool,
}

/// Fanned out to websocket subscribers on every accepted write.
#[derive(Debug, Clone, Serialize)]
pub struct LocationDelta {
    pub rider_id: String,
    pub lat: f64,
    pub lng: f64,
    pub recorded_at: DateTime<Utc>,
    pub out_of_order: bool,
}

impl From<&LocationRecord> for LocationDelta {
    fn from(rec: &LocationRecord) -> Self {
        Self {
            rider_id: rec.rider_id.clone(),
            lat: rec.lat,
            lng: rec.lng,
            recorded_at: rec.recorded_at,
            out_of_order: rec.out_of_order,
        }
    }
}

/// Append-only location history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub rider_id: String,
    pub lat: f64,
    pub lng: f64,
    pub recorded_at: DateTime<Utc>,
    pub out_of_order: bool,
}
