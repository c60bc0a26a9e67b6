//! Domain types shared by the clients, the reconciliation engine and the store.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Shown in place of a healthy remark when the telemetry platform could not be read.
pub const FAILED_RETRIEVAL: &str =
    "Likely a server issue. Refresh the unit's logs data page on platform.";

/// A monitored device as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedUnit {
    /// Gateway identifier on the telemetry platform.
    pub key: String,
    /// Human name; join key against the connectivity layer.
    pub display_name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub base_remark: String,
}

/// Reachability reported by the connectivity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityState::Online => "online",
            ConnectivityState::Offline => "offline",
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device name to reachability, as fetched from the connectivity layer in one run.
pub type ConnectivityMap = BTreeMap<String, ConnectivityState>;

/// Reconciled health of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformState {
    Online,
    Partial,
    Offline,
    Error,
}

impl PlatformState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformState::Online => "online",
            PlatformState::Partial => "partial",
            PlatformState::Offline => "offline",
            PlatformState::Error => "error",
        }
    }
}

impl fmt::Display for PlatformState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last persisted state per unit, keyed by display name.
pub type StatusSnapshot = BTreeMap<String, PlatformState>;

/// Result of querying one unit's recent logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryOutcome {
    /// Newest entry (epoch millis) is inside the online window.
    Fresh(i64),
    /// Newest entry (epoch millis) is older than the online window.
    Stale(i64),
    /// Query succeeded but nothing was logged inside the lookback window.
    Empty,
    /// Query did not succeed. Carries the HTTP status when one was received.
    TransportError(Option<u16>),
}

impl fmt::Display for TelemetryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = |ms: i64| {
            DateTime::from_timestamp_millis(ms)
                .map(|d| d.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| ms.to_string())
        };
        match self {
            TelemetryOutcome::Fresh(ms) => write!(f, "fresh, newest log {}", at(*ms)),
            TelemetryOutcome::Stale(ms) => write!(f, "stale, newest log {}", at(*ms)),
            TelemetryOutcome::Empty => f.write_str("no logs in window"),
            TelemetryOutcome::TransportError(Some(code)) => {
                write!(f, "retrieval failed, HTTP {}", code)
            }
            TelemetryOutcome::TransportError(None) => f.write_str("retrieval failed"),
        }
    }
}

/// Rejected freshness windows.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThresholdError {
    #[error("within_hours and within_days must be positive")]
    Zero,
    #[error("online window of {hours} hours exceeds lookback window of {days} days")]
    Inverted { hours: u32, days: u32 },
}

/// Freshness windows used to classify telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Logs newer than this many hours count as online.
    pub within_hours: u32,
    /// Logs older than this many days are never retrieved.
    pub within_days: u32,
}

impl Thresholds {
    const HOUR_MS: i64 = 60 * 60 * 1000;
    const DAY_MS: i64 = 24 * Self::HOUR_MS;

    /// Earliest timestamp (epoch millis) that still counts as fresh.
    pub fn online_from(&self, now_ms: i64) -> i64 {
        now_ms - self.within_hours as i64 * Self::HOUR_MS
    }

    /// Start of the telemetry lookback window (epoch millis).
    pub fn lookback_from(&self, now_ms: i64) -> i64 {
        now_ms - self.within_days as i64 * Self::DAY_MS
    }

    pub fn validate(&self) -> Result<(), ThresholdError> {
        if self.within_hours == 0 || self.within_days == 0 {
            return Err(ThresholdError::Zero);
        }
        if self.within_hours as u64 > self.within_days as u64 * 24 {
            return Err(ThresholdError::Inverted {
                hours: self.within_hours,
                days: self.within_days,
            });
        }
        Ok(())
    }
}

/// The reconciled record for one matched unit in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitStatus {
    pub display_name: String,
    pub platform_state: PlatformState,
    pub connectivity_state: ConnectivityState,
    pub location: String,
    pub remark: String,
}

/// Collapse a run's records into the snapshot that gets persisted.
pub fn snapshot_of(statuses: &[UnitStatus]) -> StatusSnapshot {
    statuses
        .iter()
        .map(|s| (s.display_name.clone(), s.platform_state))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serialization_is_lowercase() {
        let json = serde_json::to_string(&PlatformState::Partial).unwrap();
        assert_eq!(json, "\"partial\"");

        let parsed: PlatformState = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(parsed, PlatformState::Error);
        assert_eq!(ConnectivityState::Offline.to_string(), "offline");
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            TelemetryOutcome::Fresh(1_700_000_000_000).to_string(),
            "fresh, newest log 2023-11-14 22:13:20 UTC"
        );
        assert_eq!(
            TelemetryOutcome::TransportError(Some(500)).to_string(),
            "retrieval failed, HTTP 500"
        );
    }

    #[test]
    fn test_threshold_windows() {
        let th = Thresholds { within_hours: 2, within_days: 3 };
        let now = 1_700_000_000_000;
        assert_eq!(th.online_from(now), now - 2 * 3_600_000);
        assert_eq!(th.lookback_from(now), now - 3 * 86_400_000);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(Thresholds { within_hours: 24, within_days: 1 }.validate().is_ok());
        assert_eq!(
            Thresholds { within_hours: 25, within_days: 1 }.validate(),
            Err(ThresholdError::Inverted { hours: 25, days: 1 })
        );
        assert_eq!(
            Thresholds { within_hours: 0, within_days: 1 }.validate(),
            Err(ThresholdError::Zero)
        );
    }
}
