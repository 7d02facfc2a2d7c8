use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::AppError;
use crate::models::location::{
    LocationDelta, LocationRecord, LocationSource, LocationView, TrackingEvent,
};
use crate::state::AppState;

/// A position sample pushed by a rider's device. The timestamp is the
/// device clock when present; skew across devices is expected.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationReport {
    pub rider_id: String,
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub battery: Option<u8>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Validates and stores a sample, appends it to the tracking log, and
/// fans a delta out to subscribers. Out-of-order samples are accepted
/// and flagged, never rejected.
pub async fn report_location(
    state: &AppState,
    report: LocationReport,
) -> Result<LocationRecord, AppError> {
    if report.rider_id.trim().is_empty() {
        return Err(AppError::BadRequest("rider_id cannot be empty".to_string()));
    }
    if !(-90.0..=90.0).contains(&report.lat) {
        return Err(AppError::InvalidCoordinate(format!(
            "latitude {} out of range [-90, 90]",
            report.lat
        )));
    }
    if !(-180.0..=180.0).contains(&report.lng) {
        return Err(AppError::InvalidCoordinate(format!(
            "longitude {} out of range [-180, 180]",
            report.lng
        )));
    }

    let record = LocationRecord {
        rider_id: report.rider_id,
        lat: report.lat,
        lng: report.lng,
        accuracy: report.accuracy,
        speed: report.speed,
        heading: report.heading,
        battery: report.battery.map(|b| b.min(100)),
        recorded_at: report.timestamp.unwrap_or_else(Utc::now),
        source: LocationSource::Reported,
        out_of_order: false,
    };

    let stored = state.locations.upsert_location(record).await?;

    state
        .locations
        .append_tracking_event(TrackingEvent {
            rider_id: stored.rider_id.clone(),
            lat: stored.lat,
            lng: stored.lng,
            recorded_at: stored.recorded_at,
            out_of_order: stored.out_of_order,
        })
        .await?;

    let _ = state.location_events_tx.send(LocationDelta::from(&stored));

    state
        .metrics
        .location_reports_total
        .with_label_values(&[if stored.out_of_order { "out_of_order" } else { "ok" }])
        .inc();

    debug!(
        rider_id = %stored.rider_id,
        lat = stored.lat,
        lng = stored.lng,
        out_of_order = stored.out_of_order,
        "location stored"
    );

    Ok(stored)
}

/// Current per-rider snapshot with read-time staleness. Known active
/// riders without a report get a synthesized placeholder so downstream
/// maps degrade gracefully instead of showing gaps; placeholders are
/// never persisted.
pub async fn get_locations(
    state: &AppState,
    rider_ids: Option<Vec<String>>,
) -> Result<Vec<LocationView>, AppError> {
    let now = Utc::now();
    let stale_after = Duration::seconds(state.config.stale_after_secs as i64);

    let ids = match rider_ids {
        Some(ids) => ids,
        None => {
            let mut ids: Vec<String> = state
                .dispatch
                .list_riders()
                .await?
                .into_iter()
                .filter(|r| r.active)
                .map(|r| r.id)
                .collect();
            // Reports can arrive before provisioning syncs; show them too.
            for record in state.locations.list_locations().await? {
                if !ids.contains(&record.rider_id) {
                    ids.push(record.rider_id);
                }
            }
            ids
        }
    };

    let mut views = Vec::with_capacity(ids.len());
    for rider_id in ids {
        if let Some(record) = state.locations.get_location(&rider_id).await? {
            views.push(record.view(now, stale_after));
        } else if known_active_rider(state, &rider_id).await? {
            views.push(LocationView {
                record: synthesize_placeholder(state, rider_id, now),
                stale: false,
            });
        }
    }

    Ok(views)
}

async fn known_active_rider(state: &AppState, rider_id: &str) -> Result<bool, AppError> {
    Ok(state
        .dispatch
        .get_rider(rider_id)
        .await?
        .is_some_and(|r| r.active))
}

fn synthesize_placeholder(
    state: &AppState,
    rider_id: String,
    now: DateTime<Utc>,
) -> LocationRecord {
    LocationRecord {
        rider_id,
        lat: state.config.default_lat,
        lng: state.config.default_lng,
        accuracy: None,
        speed: None,
        heading: None,
        battery: None,
        recorded_at: now,
        source: LocationSource::Synthesized,
        out_of_order: false,
    }
}
