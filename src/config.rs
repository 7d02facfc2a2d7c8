use std::env;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassignPolicy {
    /// Rejected tasks wait for an operator to re-route them.
    Manual,
    /// Rejected tasks are immediately offered to the first free rider.
    Auto,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    /// Location records older than this are surfaced with `stale = true`.
    pub stale_after_secs: u64,
    /// Redelivered assign requests inside this window return the
    /// existing assignment instead of failing with RiderBusy.
    pub dedup_window_secs: u64,
    pub sweep_interval_secs: u64,
    /// Bound on ledger-side work done inline during task completion.
    pub store_timeout_ms: u64,
    pub max_retry_attempts: u32,
    pub reassign_policy: ReassignPolicy,
    /// City-center coordinates used for synthesized placeholders.
    pub default_lat: f64,
    pub default_lng: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let reassign_policy = match env::var("REASSIGN_POLICY").as_deref() {
            Ok("auto") => ReassignPolicy::Auto,
            Ok("manual") | Err(_) => ReassignPolicy::Manual,
            Ok(other) => {
                return Err(AppError::Internal(format!(
                    "invalid REASSIGN_POLICY: {other} (expected manual or auto)"
                )));
            }
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            stale_after_secs: parse_or_default("STALE_AFTER_SECS", 180)?,
            dedup_window_secs: parse_or_default("DEDUP_WINDOW_SECS", 60)?,
            sweep_interval_secs: parse_or_default("SWEEP_INTERVAL_SECS", 300)?,
            store_timeout_ms: parse_or_default("STORE_TIMEOUT_MS", 2000)?,
            max_retry_attempts: parse_or_default("MAX_RETRY_ATTEMPTS", 5)?,
            reassign_policy,
            default_lat: parse_or_default("DEFAULT_LAT", 16.8661)?,
            default_lng: parse_or_default("DEFAULT_LNG", 96.1951)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            event_buffer_size: 1024,
            stale_after_secs: 180,
            dedup_window_secs: 60,
            sweep_interval_secs: 300,
            store_timeout_ms: 2000,
            max_retry_attempts: 5,
            reassign_policy: ReassignPolicy::Manual,
            default_lat: 16.8661,
            default_lng: 96.1951,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
