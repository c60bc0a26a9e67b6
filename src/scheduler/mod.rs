//! Scheduler module for firing status runs at wall-clock slots.

use crate::config::{ConfigError, ScheduleConfig};

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Kind of scheduled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Hourly,
    Validation,
    Daily,
}

impl TriggerKind {
    /// Tie-break between slots falling on the same instant.
    fn priority(&self) -> u8 {
        match self {
            TriggerKind::Hourly => 0,
            TriggerKind::Validation => 1,
            TriggerKind::Daily => 2,
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerKind::Hourly => f.write_str("hourly"),
            TriggerKind::Validation => f.write_str("validation"),
            TriggerKind::Daily => f.write_str("daily"),
        }
    }
}

/// When a trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotTime {
    /// Every HH:00.
    EveryHour,
    /// Once a day at the given time.
    Daily(NaiveTime),
}

impl SlotTime {
    /// Latest slot boundary at or before `now`.
    pub fn latest_at_or_before(&self, now: NaiveDateTime) -> NaiveDateTime {
        match self {
            SlotTime::EveryHour => truncate_to_hour(now),
            SlotTime::Daily(at) => {
                let today = now.date().and_time(*at);
                if today <= now {
                    today
                } else {
                    today - ChronoDuration::days(1)
                }
            }
        }
    }
}

/// Truncate a wall-clock time to the start of its hour.
pub fn truncate_to_hour(dt: NaiveDateTime) -> NaiveDateTime {
    let ts = dt.and_utc().timestamp();
    let truncated = ts - ts.rem_euclid(3600);
    DateTime::from_timestamp(truncated, 0)
        .map(|d| d.naive_utc())
        .unwrap_or(dt)
}

/// A slot that is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub at: NaiveDateTime,
    pub kind: TriggerKind,
}

/// The configured triggers.
#[derive(Debug, Clone)]
pub struct Schedule {
    entries: Vec<(SlotTime, TriggerKind)>,
    grace: ChronoDuration,
}

impl Schedule {
    pub fn new(entries: Vec<(SlotTime, TriggerKind)>, grace: ChronoDuration) -> Self {
        Self { entries, grace }
    }

    pub fn from_config(cfg: &ScheduleConfig) -> Result<Self, ConfigError> {
        let mut entries = Vec::new();
        if cfg.hourly {
            entries.push((SlotTime::EveryHour, TriggerKind::Hourly));
        }
        if let Some(at) = cfg.validation_at()? {
            entries.push((SlotTime::Daily(at), TriggerKind::Validation));
        }
        if let Some(at) = cfg.daily_at()? {
            entries.push((SlotTime::Daily(at), TriggerKind::Daily));
        }
        if entries.is_empty() {
            return Err(ConfigError::Invalid("schedule has no triggers".to_string()));
        }

        Ok(Self::new(
            entries,
            ChronoDuration::minutes(cfg.grace_minutes as i64),
        ))
    }

    /// The newest slot not yet fired and not older than the grace period.
    pub fn due(&self, now: NaiveDateTime, last_fired: Option<NaiveDateTime>) -> Option<Slot> {
        self.entries
            .iter()
            .filter_map(|(time, kind)| {
                let at = time.latest_at_or_before(now);
                if now - at > self.grace {
                    return None;
                }
                if last_fired.is_some_and(|last| at <= last) {
                    return None;
                }
                Some(Slot { at, kind: *kind })
            })
            .max_by_key(|slot| (slot.at, slot.kind.priority()))
    }
}

/// Polls the wall clock and fires each slot at most once.
pub struct Scheduler {
    schedule: Schedule,
    poll_interval: Duration,
    last_fired: Option<NaiveDateTime>,
}

impl Scheduler {
    /// Slots at or before `started_at` are treated as already handled.
    pub fn new(schedule: Schedule, poll_interval: Duration, started_at: NaiveDateTime) -> Self {
        Self {
            schedule,
            poll_interval,
            last_fired: Some(started_at),
        }
    }

    /// Check the clock once; marks the returned slot as fired.
    pub fn poll(&mut self, now: NaiveDateTime) -> Option<Slot> {
        let slot = self.schedule.due(now, self.last_fired)?;
        self.last_fired = Some(slot.at);
        Some(slot)
    }

    /// Run forever, awaiting `job` for every due slot before polling again.
    pub async fn run<F, Fut>(&mut self, mut job: F)
    where
        F: FnMut(TriggerKind) -> Fut,
        Fut: Future<Output = ()>,
    {
        tracing::info!(
            "Scheduler: polling every {:?} with {} trigger(s)",
            self.poll_interval,
            self.schedule.entries.len()
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            let now = Local::now().naive_local();
            if let Some(slot) = self.poll(now) {
                tracing::info!(
                    "Scheduler: starting {} check for slot {}",
                    slot.kind,
                    slot.at.format("%Y-%m-%d %H:%M")
                );
                job(slot.kind).await;
                tracing::info!("Scheduler: {} check finished", slot.kind);
            }
        }
    }
}
