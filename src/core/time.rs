//! Injected clocks and shared timestamp/envelope helpers.
//!
//! Every timestamp the board journals comes from a [`Clock`], so tests can drive
//! claim expiration with a [`ManualClock`] instead of sleeping.

use crate::core::error::BoardError;
use chrono::{DateTime, SecondsFormat, SubsecRound, TimeDelta, Utc};
use serde_json::Value as JsonValue;
use std::sync::Mutex;
use std::time::Duration;
use ulid::Ulid;

pub trait Clock: Send + Sync {
    /// Current time. Boards keep millisecond precision and drop the rest.
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(3)
    }
}

/// Simulated clock. Only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start.trunc_subsecs(3)),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(delta) = TimeDelta::from_std(by) {
            let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
            *now += delta;
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = at.trunc_subsecs(3);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::from_timestamp(1_760_000_000, 0).unwrap_or_default())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Fixed-width UTC form (`2026-10-19T08:00:00.000Z`); lexical order equals time order.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, BoardError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BoardError::ValidationError(format!("invalid timestamp '{}': {}", raw, e)))
}

/// Converts a claim TTL into whole seconds and a chrono delta. Zero is rejected.
pub fn ttl_delta(ttl: Duration) -> Result<(u64, TimeDelta), BoardError> {
    let secs = ttl.as_secs();
    if secs == 0 {
        return Err(BoardError::ValidationError(
            "claim ttl must be at least one second".to_string(),
        ));
    }
    let delta = i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| BoardError::ValidationError(format!("claim ttl {}s is too large", secs)))?;
    Ok((secs, delta))
}

/// Latest instant `format_ts` renders in its fixed four-digit-year form.
pub fn max_timestamp() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(253_402_300_799, 999_000_000).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `now + ttl`, refused when the deadline would not survive a store round trip.
pub fn expiry_after(now: DateTime<Utc>, ttl_secs: u64, delta: TimeDelta) -> Result<DateTime<Utc>, BoardError> {
    now.checked_add_signed(delta)
        .filter(|at| *at <= max_timestamp())
        .ok_or_else(|| {
            BoardError::ValidationError(format!(
                "claim ttl {}s puts the deadline past {}",
                ttl_secs,
                format_ts(&max_timestamp())
            ))
        })
}

pub fn new_chain_id() -> String {
    Ulid::new().to_string()
}

/// Standard command response envelope shape used by the CLI.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut base = serde_json::json!({
        "envelope_version": "1.0.0",
        "ts": format_ts(&SystemClock.now()),
        "event_id": Ulid::new().to_string(),
        "cmd": cmd,
        "status": status
    });
    if let (Some(base_obj), Some(extra_obj)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}
