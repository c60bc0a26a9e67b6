//! Configuration module for FleetWatch.
//!
//! The whole run configuration is read once from a JSON document into an
//! immutable [`RunConfig`] that is handed to every component by reference.

use crate::models::{Thresholds, TrackedUnit};
use crate::scheduler::TriggerKind;

use chrono::NaiveTime;
use serde::{Deserialize, Deserializer};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Credentials and endpoint of the connectivity tracker.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
    pub base_url: String,
    pub email: String,
    pub password: String,
    /// Name of the connectivity layer in reports.
    #[serde(default = "default_connectivity_label")]
    pub label: String,
}

/// Credentials and endpoint of the telemetry platform.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    pub base_url: String,
    pub email: String,
    pub password: String,
    pub org_id: u64,
    pub project_id: u64,
    /// Exchange the login token for an organisation-scoped one.
    #[serde(default)]
    pub org_sign_in: bool,
    /// Name of the platform in reports and mail.
    pub label: String,
}

/// Freshness thresholds plus the paging of the log query.
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    pub within_hours: u32,
    pub within_days: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_page_number")]
    pub page_number: u32,
}

impl DataConfig {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            within_hours: self.within_hours,
            within_days: self.within_days,
        }
    }
}

/// SMTP relay and recipient groups.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub sender: String,
    pub password: String,
    /// Operations-only group, receives alerts and validation reports.
    #[serde(deserialize_with = "comma_separated")]
    pub operations: Vec<String>,
    /// Everyone, receives the daily report.
    #[serde(deserialize_with = "comma_separated")]
    pub everyone: Vec<String>,
    #[serde(default = "default_signature")]
    pub signature: String,
}

/// Which units a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitScope {
    Full,
    Hourly,
}

/// Wall-clock triggers.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Fire on every HH:00.
    #[serde(default = "default_true")]
    pub hourly: bool,
    /// "HH:MM" of the daily validation report.
    #[serde(default)]
    pub validation_time: Option<String>,
    /// "HH:MM" of the daily report to everyone.
    #[serde(default)]
    pub daily_time: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// How late a slot may still be fired after its boundary.
    #[serde(default = "default_grace_minutes")]
    pub grace_minutes: u32,
    #[serde(default = "default_hourly_scope")]
    pub hourly_scope: UnitScope,
    #[serde(default = "default_full_scope")]
    pub validation_scope: UnitScope,
    #[serde(default = "default_full_scope")]
    pub daily_scope: UnitScope,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            hourly: true,
            validation_time: None,
            daily_time: None,
            poll_interval_secs: default_poll_interval(),
            grace_minutes: default_grace_minutes(),
            hourly_scope: UnitScope::Hourly,
            validation_scope: UnitScope::Full,
            daily_scope: UnitScope::Full,
        }
    }
}

impl ScheduleConfig {
    pub fn scope_for(&self, kind: TriggerKind) -> UnitScope {
        match kind {
            TriggerKind::Hourly => self.hourly_scope,
            TriggerKind::Validation => self.validation_scope,
            TriggerKind::Daily => self.daily_scope,
        }
    }

    pub fn validation_at(&self) -> Result<Option<NaiveTime>, ConfigError> {
        parse_slot_time(self.validation_time.as_deref())
    }

    pub fn daily_at(&self) -> Result<Option<NaiveTime>, ConfigError> {
        parse_slot_time(self.daily_time.as_deref())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Retry and timeout behaviour of the HTTP clients.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_secs: default_delay_secs(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Immutable configuration shared by every run.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub connectivity: ConnectivityConfig,
    pub telemetry: TelemetryConfig,
    pub data: DataConfig,
    pub email: EmailConfig,
    pub units: Vec<TrackedUnit>,
    /// Display names covered by the hourly scope. Absent means all units.
    #[serde(default)]
    pub hourly_units: Option<Vec<String>>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_report_path")]
    pub report_path: PathBuf,
}

impl RunConfig {
    /// Load configuration from the file named by `FLEETWATCH_CONFIG`.
    ///
    /// Environment variables:
    /// - `FLEETWATCH_CONFIG`: config file path (default: "fleetwatch.json")
    /// - `FLEETWATCH_STATE_DIR`: overrides `state_dir`
    /// - `FLEETWATCH_REPORT_PATH`: overrides `report_path`
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("FLEETWATCH_CONFIG").unwrap_or_else(|_| "fleetwatch.json".to_string());
        let mut cfg = Self::from_file(&path)?;

        if let Ok(dir) = env::var("FLEETWATCH_STATE_DIR") {
            cfg.state_dir = PathBuf::from(dir);
        }
        if let Ok(report) = env::var("FLEETWATCH_REPORT_PATH") {
            cfg.report_path = PathBuf::from(report);
        }

        Ok(cfg)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.data
            .thresholds()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.email.operations.is_empty() {
            return Err(ConfigError::Invalid("no operations recipients".to_string()));
        }
        if self.email.everyone.is_empty() {
            return Err(ConfigError::Invalid("no daily recipients".to_string()));
        }

        self.schedule.validation_at()?;
        self.schedule.daily_at()?;

        if let Some(names) = &self.hourly_units {
            for name in names {
                if !self.units.iter().any(|u| &u.display_name == name) {
                    return Err(ConfigError::Invalid(format!(
                        "hourly unit {} is not a configured unit",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Units covered by the given scope, in configuration order.
    pub fn units_for(&self, scope: UnitScope) -> Vec<TrackedUnit> {
        match (scope, &self.hourly_units) {
            (UnitScope::Hourly, Some(names)) => self
                .units
                .iter()
                .filter(|u| names.contains(&u.display_name))
                .cloned()
                .collect(),
            _ => self.units.clone(),
        }
    }

    /// Path of the persisted status snapshot.
    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join("status.json")
    }
}

/// Split a comma-separated address list, dropping blanks.
pub fn parse_recipients(field: &str) -> Vec<String> {
    field
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn comma_separated<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let field = String::deserialize(deserializer)?;
    Ok(parse_recipients(&field))
}

fn parse_slot_time(value: Option<&str>) -> Result<Option<NaiveTime>, ConfigError> {
    match value {
        None => Ok(None),
        Some(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Some)
            .map_err(|e| ConfigError::Invalid(format!("bad schedule time {:?}: {}", s, e))),
    }
}

fn default_connectivity_label() -> String {
    "Dataplicity".to_string()
}

fn default_page_size() -> u32 {
    10
}

fn default_page_number() -> u32 {
    1
}

fn default_smtp_port() -> u16 {
    465
}

fn default_signature() -> String {
    "FleetWatch".to_string()
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    30
}

fn default_grace_minutes() -> u32 {
    10
}

fn default_hourly_scope() -> UnitScope {
    UnitScope::Hourly
}

fn default_full_scope() -> UnitScope {
    UnitScope::Full
}

fn default_max_retries() -> u32 {
    5
}

fn default_delay_secs() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("data_dump")
}

fn default_report_path() -> PathBuf {
    PathBuf::from("unit_status.html")
}
