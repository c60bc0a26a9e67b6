//! Reconciliation of connectivity and telemetry signals into one state per unit.

use crate::client::{QueryWindow, TelemetrySource};
use crate::models::{
    ConnectivityMap, ConnectivityState, PlatformState, TelemetryOutcome, Thresholds, TrackedUnit,
    UnitStatus, FAILED_RETRIEVAL,
};
use crate::store::DataDump;

use serde::Deserialize;

const DISCONNECTED: &str = "Device disconnected from connectivity layer";
const DATA_LAG: &str = "Device experiencing data lag";
const DISCONNECTED_AND_LAGGING: &str = "Device disconnected and experiencing data lag";

#[derive(Debug, Deserialize)]
struct DataDumpIndex {
    data_dumps: Vec<DataDumpEntry>,
    #[serde(default)]
    total_entries: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DataDumpEntry {
    data: DumpData,
}

#[derive(Debug, Deserialize)]
struct DumpData {
    /// Epoch seconds.
    timestamp: f64,
}

/// Classify a successful log query body.
///
/// Fresh when the newest entry is at or after the online boundary, stale
/// when older, empty when the window holds no entries.
pub fn parse_outcome(
    body: &str,
    now_ms: i64,
    thresholds: &Thresholds,
) -> Result<TelemetryOutcome, serde_json::Error> {
    let index: DataDumpIndex = serde_json::from_str(body)?;

    let latest_ms = index
        .data_dumps
        .iter()
        .map(|d| (d.data.timestamp * 1000.0) as i64)
        .max();

    tracing::debug!(
        "{} entries on page, {:?} in window",
        index.data_dumps.len(),
        index.total_entries
    );

    Ok(match latest_ms {
        None => TelemetryOutcome::Empty,
        Some(ts) if ts >= thresholds.online_from(now_ms) => TelemetryOutcome::Fresh(ts),
        Some(ts) => TelemetryOutcome::Stale(ts),
    })
}

fn with_warning(base: &str, warning: &str) -> String {
    if base.trim().is_empty() {
        warning.to_string()
    } else {
        format!("{}\n{}", base, warning)
    }
}

/// Combine one unit's connectivity state and telemetry outcome.
pub fn combine(
    unit: &TrackedUnit,
    connectivity: ConnectivityState,
    outcome: &TelemetryOutcome,
    thresholds: &Thresholds,
) -> UnitStatus {
    use ConnectivityState as C;
    use TelemetryOutcome as T;

    let base = unit.base_remark.as_str();
    let (platform_state, remark) = match (connectivity, outcome) {
        (C::Online, T::Fresh(_)) => (PlatformState::Online, String::new()),
        (C::Offline, T::Fresh(_)) => (PlatformState::Online, with_warning(base, DISCONNECTED)),
        (C::Online, T::Stale(_)) => (PlatformState::Partial, with_warning(base, DATA_LAG)),
        (C::Offline, T::Stale(_)) => (
            PlatformState::Partial,
            with_warning(base, DISCONNECTED_AND_LAGGING),
        ),
        (C::Online, T::Empty) => (
            PlatformState::Offline,
            format!(
                "No logs data in the last {} days; telemetry disconnection",
                thresholds.within_days
            ),
        ),
        (C::Offline, T::Empty) => (PlatformState::Offline, base.to_string()),
        (_, T::TransportError(_)) => (PlatformState::Error, with_warning(base, FAILED_RETRIEVAL)),
    };

    UnitStatus {
        display_name: unit.display_name.clone(),
        platform_state,
        connectivity_state: connectivity,
        location: unit.location.clone(),
        remark,
    }
}

/// Runs the per-unit reconciliation against a telemetry source.
pub struct Reconciler<'a, S> {
    source: &'a S,
    thresholds: Thresholds,
    dump: Option<&'a DataDump>,
}

impl<'a, S: TelemetrySource> Reconciler<'a, S> {
    pub fn new(source: &'a S, thresholds: Thresholds) -> Self {
        Self {
            source,
            thresholds,
            dump: None,
        }
    }

    /// Keep every successful raw payload in `dump`.
    pub fn with_dump(mut self, dump: &'a DataDump) -> Self {
        self.dump = Some(dump);
        self
    }

    /// Reconcile one unit. `None` when the connectivity layer does not know it.
    pub async fn reconcile(
        &self,
        unit: &TrackedUnit,
        connectivity: &ConnectivityMap,
        now_ms: i64,
    ) -> Option<UnitStatus> {
        let Some(&state) = connectivity.get(&unit.display_name) else {
            tracing::warn!(
                "No matching name on connectivity layer for {}, skipping",
                unit.display_name
            );
            return None;
        };

        let outcome = self.query(unit, now_ms).await;
        let status = combine(unit, state, &outcome, &self.thresholds);

        tracing::info!(
            "{}: {} (connectivity {}, telemetry {})",
            status.display_name,
            status.platform_state,
            status.connectivity_state,
            outcome
        );
        Some(status)
    }

    /// Reconcile every unit in order, one query at a time.
    pub async fn reconcile_all(
        &self,
        units: &[TrackedUnit],
        connectivity: &ConnectivityMap,
        now_ms: i64,
    ) -> Vec<UnitStatus> {
        let mut statuses = Vec::with_capacity(units.len());
        for unit in units {
            if let Some(status) = self.reconcile(unit, connectivity, now_ms).await {
                statuses.push(status);
            }
        }
        statuses
    }

    async fn query(&self, unit: &TrackedUnit, now_ms: i64) -> TelemetryOutcome {
        let window = QueryWindow {
            from_ms: self.thresholds.lookback_from(now_ms),
            to_ms: now_ms,
        };

        let body = match self.source.data_dump_index(unit, window).await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Error fetching {} logs: {}", unit.display_name, e);
                return TelemetryOutcome::TransportError(e.status());
            }
        };

        if let Some(dump) = self.dump {
            if let Err(e) = dump.write(&body) {
                tracing::warn!("Failed to dump payload of {}: {}", unit.display_name, e);
            }
        }

        match parse_outcome(&body, now_ms, &self.thresholds) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    "Malformed log payload for {} ({}), check its gateway key {}",
                    unit.display_name,
                    e,
                    unit.key
                );
                TelemetryOutcome::Empty
            }
        }
    }
}
