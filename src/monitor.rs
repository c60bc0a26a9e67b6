//! One status run: fetch, reconcile, report, diff, notify, persist.

use crate::client::{build_http_client, ClientError, ConnectivityClient, RetryPolicy, TelemetryClient};
use crate::config::{RunConfig, UnitScope};
use crate::engine::{detect_changes, Reconciler, StatusChanges};
use crate::models::{snapshot_of, StatusSnapshot, UnitStatus};
use crate::notify::{decide_notifications, MailSender, NotificationContext};
use crate::report::{Report, ReportError, ReportRenderer};
use crate::scheduler::TriggerKind;
use crate::store::{DataDump, StatusStore};

use chrono::{DateTime, Local};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failures that abort a whole run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("connectivity layer unavailable: {0}")]
    Connectivity(ClientError),
    #[error("telemetry platform unavailable: {0}")]
    Telemetry(ClientError),
    #[error("report failed: {0}")]
    Report(#[from] ReportError),
    #[error("client setup failed: {0}")]
    Setup(#[from] ClientError),
}

/// Why a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTrigger {
    /// Seeds the snapshot at process start; sends no mail.
    Startup,
    Scheduled(TriggerKind),
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub statuses: Vec<UnitStatus>,
    pub changes: StatusChanges,
    pub mails_sent: usize,
    pub mails_failed: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} units, {} newly offline, {} newly online, {} mail(s) sent, {} failed",
            self.statuses.len(),
            self.changes.newly_offline.len(),
            self.changes.newly_online.len(),
            self.mails_sent,
            self.mails_failed
        )
    }
}

/// Owns the clients and state files for the lifetime of the process.
pub struct Monitor<M> {
    config: RunConfig,
    connectivity: ConnectivityClient,
    telemetry: TelemetryClient,
    store: StatusStore,
    dump: DataDump,
    renderer: ReportRenderer,
    mailer: M,
}

impl<M: MailSender> Monitor<M> {
    pub fn new(config: RunConfig, mailer: M) -> Result<Self, RunError> {
        let http = build_http_client(Duration::from_secs(config.retry.request_timeout_secs))?;

        let connectivity = ConnectivityClient::new(http.clone(), config.connectivity.clone());
        let telemetry = TelemetryClient::new(
            http,
            config.telemetry.clone(),
            &config.data,
            RetryPolicy::from(&config.retry),
        );

        let store = StatusStore::new(config.snapshot_path());
        let dump = DataDump::new(&config.state_dir, "status.json");
        let renderer = ReportRenderer::new(
            &config.report_path,
            &config.telemetry.label,
            &config.connectivity.label,
        );

        Ok(Self {
            config,
            connectivity,
            telemetry,
            store,
            dump,
            renderer,
            mailer,
        })
    }

    /// Execute one run to completion.
    pub async fn run(&self, trigger: RunTrigger) -> Result<RunSummary, RunError> {
        let scope = match trigger {
            RunTrigger::Startup => UnitScope::Full,
            RunTrigger::Scheduled(kind) => self.config.schedule.scope_for(kind),
        };
        let units = self.config.units_for(scope);

        let connectivity = self
            .connectivity
            .fetch_states()
            .await
            .map_err(RunError::Connectivity)?;
        let session = self.telemetry.sign_in().await.map_err(RunError::Telemetry)?;

        let now = Local::now();
        let statuses = Reconciler::new(&session, self.config.data.thresholds())
            .with_dump(&self.dump)
            .reconcile_all(&units, &connectivity, now.timestamp_millis())
            .await;

        self.conclude(trigger, statuses, now).await
    }

    /// Everything after reconciliation. The snapshot is read before it is
    /// overwritten, and overwritten regardless of mail delivery.
    pub async fn conclude(
        &self,
        trigger: RunTrigger,
        statuses: Vec<UnitStatus>,
        now: DateTime<Local>,
    ) -> Result<RunSummary, RunError> {
        let removed = self.dump.clear();
        tracing::debug!("Removed {} data dump entries", removed);

        let report = self.renderer.render(&statuses, now)?;

        let current = snapshot_of(&statuses);
        let previous = match self.store.load() {
            Ok(Some(previous)) => Some(previous),
            Ok(None) => {
                tracing::info!("No previous status snapshot, nothing to compare");
                None
            }
            Err(e) => {
                tracing::error!("Skipping change detection: {}", e);
                None
            }
        };

        let changes = match &previous {
            Some(previous) => {
                let changes = detect_changes(previous, &current);
                if changes.is_empty() {
                    tracing::info!("No units went offline or came back online");
                }
                changes
            }
            None => StatusChanges::default(),
        };

        let (mails_sent, mails_failed) = match trigger {
            RunTrigger::Startup => {
                tracing::info!("Startup run, notifications suppressed");
                (0, 0)
            }
            RunTrigger::Scheduled(kind) => self.notify(kind, &changes, &report, now).await,
        };

        let persisted = self.carry_over(previous, current);
        if let Err(e) = self.store.save(&persisted) {
            tracing::error!(
                "Failed to store status snapshot {}: {}",
                self.store.path().display(),
                e
            );
        }

        Ok(RunSummary {
            statuses,
            changes,
            mails_sent,
            mails_failed,
        })
    }

    /// Configured units outside this run keep their last known state;
    /// units dropped from the configuration are forgotten.
    fn carry_over(&self, previous: Option<StatusSnapshot>, current: StatusSnapshot) -> StatusSnapshot {
        let mut merged: StatusSnapshot = previous
            .unwrap_or_default()
            .into_iter()
            .filter(|(name, _)| self.config.units.iter().any(|u| &u.display_name == name))
            .collect();
        merged.extend(current);
        merged
    }

    async fn notify(
        &self,
        kind: TriggerKind,
        changes: &StatusChanges,
        report: &Report,
        now: DateTime<Local>,
    ) -> (usize, usize) {
        let ctx = NotificationContext {
            platform_label: &self.config.telemetry.label,
            signature: &self.config.email.signature,
            operations: &self.config.email.operations,
            everyone: &self.config.email.everyone,
            now,
            report,
        };

        let jobs = match decide_notifications(kind, changes, &ctx) {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!("Failed to compose {} mail: {}", kind, e);
                return (0, 1);
            }
        };

        let mut sent = 0;
        let mut failed = 0;
        for job in &jobs {
            match self.mailer.send(job).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::error!("Failed to send \"{}\": {}", job.subject, e);
                    failed += 1;
                }
            }
        }
        (sent, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;
    use crate::models::{ConnectivityState, PlatformState};
    use crate::notify::{EmailJob, MailError, DAILY_SUBJECT, HOURLY_SUBJECT};
    use chrono::TimeZone;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingMailer {
        fail: bool,
        sent: Mutex<Vec<EmailJob>>,
    }

    impl MailSender for RecordingMailer {
        async fn send(&self, job: &EmailJob) -> Result<(), MailError> {
            self.sent.lock().unwrap().push(job.clone());
            if self.fail {
                Err(MailError::Build("relay down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn monitor(tmp: &TempDir, mailer: RecordingMailer) -> Monitor<RecordingMailer> {
        let mut cfg = RunConfig::from_json(SAMPLE).unwrap();
        cfg.state_dir = tmp.path().join("data_dump");
        cfg.report_path = tmp.path().join("unit_status.html");
        Monitor::new(cfg, mailer).unwrap()
    }

    fn status(name: &str, state: PlatformState) -> UnitStatus {
        UnitStatus {
            display_name: name.to_string(),
            platform_state: state,
            connectivity_state: ConnectivityState::Online,
            location: String::new(),
            remark: String::new(),
        }
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap()
    }

    fn seed(m: &Monitor<RecordingMailer>, entries: &[(&str, PlatformState)]) {
        let snapshot: StatusSnapshot = entries.iter().map(|(n, s)| (n.to_string(), *s)).collect();
        m.store.save(&snapshot).unwrap();
    }

    #[tokio::test]
    async fn test_startup_run_seeds_snapshot_silently() {
        let tmp = TempDir::new().unwrap();
        let m = monitor(&tmp, RecordingMailer::default());

        let summary = m
            .conclude(RunTrigger::Startup, vec![status("Unit A", PlatformState::Online)], now())
            .await
            .unwrap();

        assert_eq!(summary.mails_sent, 0);
        assert!(m.mailer.sent.lock().unwrap().is_empty());
        assert_eq!(
            m.store.load().unwrap().unwrap()["Unit A"],
            PlatformState::Online
        );
        assert!(tmp.path().join("unit_status.html").exists());
    }

    #[tokio::test]
    async fn test_hourly_run_alerts_transitions_and_overwrites_snapshot() {
        let tmp = TempDir::new().unwrap();
        let m = monitor(&tmp, RecordingMailer::default());
        seed(&m, &[("Unit A", PlatformState::Online), ("Unit B", PlatformState::Offline)]);

        let summary = m
            .conclude(
                RunTrigger::Scheduled(TriggerKind::Hourly),
                vec![
                    status("Unit A", PlatformState::Offline),
                    status("Unit B", PlatformState::Online),
                ],
                now(),
            )
            .await
            .unwrap();

        assert!(summary.changes.newly_offline.contains("Unit A"));
        assert!(summary.changes.newly_online.contains("Unit B"));

        let sent = m.mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, HOURLY_SUBJECT);
        assert!(sent[0].body.contains("Unit A"));

        let stored = m.store.load().unwrap().unwrap();
        assert_eq!(stored["Unit A"], PlatformState::Offline);
        assert_eq!(stored["Unit B"], PlatformState::Online);
    }

    #[tokio::test]
    async fn test_snapshot_saved_when_mail_fails() {
        let tmp = TempDir::new().unwrap();
        let mailer = RecordingMailer {
            fail: true,
            ..Default::default()
        };
        let m = monitor(&tmp, mailer);
        seed(&m, &[("Unit A", PlatformState::Online)]);

        let summary = m
            .conclude(
                RunTrigger::Scheduled(TriggerKind::Daily),
                vec![status("Unit A", PlatformState::Offline)],
                now(),
            )
            .await
            .unwrap();

        assert_eq!(summary.mails_sent, 0);
        assert_eq!(summary.mails_failed, 2);
        assert_eq!(m.mailer.sent.lock().unwrap()[0].subject, DAILY_SUBJECT);
        assert_eq!(
            m.store.load().unwrap().unwrap()["Unit A"],
            PlatformState::Offline
        );
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_only_skips_detection() {
        let tmp = TempDir::new().unwrap();
        let m = monitor(&tmp, RecordingMailer::default());
        fs::create_dir_all(tmp.path().join("data_dump")).unwrap();
        fs::write(m.store.path(), "{ not json").unwrap();

        let summary = m
            .conclude(
                RunTrigger::Scheduled(TriggerKind::Hourly),
                vec![status("Unit A", PlatformState::Offline)],
                now(),
            )
            .await
            .unwrap();

        assert!(summary.changes.is_empty());
        assert_eq!(summary.mails_sent, 1);
        assert!(m.store.load().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_conclude_clears_data_dump() {
        let tmp = TempDir::new().unwrap();
        let m = monitor(&tmp, RecordingMailer::default());
        m.dump.write("{\"data_dumps\": []}").unwrap();

        m.conclude(RunTrigger::Startup, vec![status("Unit A", PlatformState::Error)], now())
            .await
            .unwrap();

        let left: Vec<_> = fs::read_dir(tmp.path().join("data_dump"))
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(left, vec!["status.json"]);
    }

    #[tokio::test]
    async fn test_hourly_subset_keeps_other_units_in_snapshot() {
        let tmp = TempDir::new().unwrap();
        let m = monitor(&tmp, RecordingMailer::default());
        let daily = RunTrigger::Scheduled(TriggerKind::Daily);
        let hourly = RunTrigger::Scheduled(TriggerKind::Hourly);

        m.conclude(
            daily,
            vec![
                status("Unit A", PlatformState::Online),
                status("Unit B", PlatformState::Online),
                status("Unit C", PlatformState::Online),
            ],
            now(),
        )
        .await
        .unwrap();

        let scoped: Vec<_> = m
            .config
            .units_for(m.config.schedule.scope_for(TriggerKind::Hourly))
            .iter()
            .map(|u| status(&u.display_name, PlatformState::Online))
            .collect();
        assert_eq!(scoped.len(), 2);
        m.conclude(hourly, scoped, now()).await.unwrap();
        assert_eq!(
            m.store.load().unwrap().unwrap()["Unit B"],
            PlatformState::Online
        );

        let summary = m
            .conclude(
                daily,
                vec![
                    status("Unit A", PlatformState::Online),
                    status("Unit B", PlatformState::Offline),
                    status("Unit C", PlatformState::Online),
                ],
                now(),
            )
            .await
            .unwrap();

        assert!(summary.changes.newly_offline.contains("Unit B"));
        let sent = m.mailer.sent.lock().unwrap();
        assert!(sent.last().unwrap().body.contains("Unit B"));
    }

    #[tokio::test]
    async fn test_unconfigured_units_leave_snapshot() {
        let tmp = TempDir::new().unwrap();
        let m = monitor(&tmp, RecordingMailer::default());
        seed(&m, &[("Unit A", PlatformState::Online), ("Retired", PlatformState::Offline)]);

        m.conclude(
            RunTrigger::Scheduled(TriggerKind::Hourly),
            vec![status("Unit C", PlatformState::Partial)],
            now(),
        )
        .await
        .unwrap();

        let stored = m.store.load().unwrap().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored["Unit A"], PlatformState::Online);
        assert_eq!(stored["Unit C"], PlatformState::Partial);
        assert!(!stored.contains_key("Retired"));
    }
}
