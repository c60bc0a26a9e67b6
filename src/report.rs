//! Status report document.

use crate::models::{ConnectivityState, PlatformState, UnitStatus};

use askama::Template;
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Report error types.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("template error: {0}")]
    Render(#[from] askama::Error),
    #[error("failed to write report {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Cell background of a platform state.
pub fn platform_color(state: PlatformState) -> &'static str {
    match state {
        PlatformState::Online => "CEEDD0",
        PlatformState::Offline => "F6CACF",
        PlatformState::Partial => "FBEBA6",
        PlatformState::Error => "FF0000",
    }
}

/// Cell background of a connectivity state.
pub fn connectivity_color(state: ConnectivityState) -> &'static str {
    match state {
        ConnectivityState::Online => "CEEDD0",
        ConnectivityState::Offline => "F6CACF",
    }
}

struct ReportRow<'a> {
    name: &'a str,
    platform_state: &'static str,
    platform_color: &'static str,
    connectivity_state: &'static str,
    connectivity_color: &'static str,
    location: &'a str,
    remark_lines: Vec<&'a str>,
}

#[derive(Template)]
#[template(path = "report.html")]
struct ReportTemplate<'a> {
    platform_label: &'a str,
    connectivity_label: &'a str,
    generated_at: String,
    rows: Vec<ReportRow<'a>>,
}

/// A rendered report, ready to be attached to mail.
#[derive(Debug, Clone)]
pub struct Report {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Renders the per-unit records into an HTML table.
#[derive(Debug, Clone)]
pub struct ReportRenderer {
    path: PathBuf,
    platform_label: String,
    connectivity_label: String,
}

impl ReportRenderer {
    pub fn new<P: AsRef<Path>>(path: P, platform_label: &str, connectivity_label: &str) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            platform_label: platform_label.to_string(),
            connectivity_label: connectivity_label.to_string(),
        }
    }

    pub fn render_html(
        &self,
        statuses: &[UnitStatus],
        generated_at: DateTime<Local>,
    ) -> Result<String, ReportError> {
        let rows = statuses
            .iter()
            .map(|s| ReportRow {
                name: &s.display_name,
                platform_state: s.platform_state.as_str(),
                platform_color: platform_color(s.platform_state),
                connectivity_state: s.connectivity_state.as_str(),
                connectivity_color: connectivity_color(s.connectivity_state),
                location: &s.location,
                remark_lines: s.remark.lines().collect(),
            })
            .collect();

        let page = ReportTemplate {
            platform_label: &self.platform_label,
            connectivity_label: &self.connectivity_label,
            generated_at: generated_at.format("%Y-%m-%d %H:%M").to_string(),
            rows,
        };
        Ok(page.render()?)
    }

    /// Render, write to the report path and return the document.
    pub fn render(
        &self,
        statuses: &[UnitStatus],
        generated_at: DateTime<Local>,
    ) -> Result<Report, ReportError> {
        tracing::info!("Generating report for On {}", self.platform_label);
        let html = self.render_html(statuses, generated_at)?;

        fs::write(&self.path, &html).map_err(|source| ReportError::Io {
            path: self.path.clone(),
            source,
        })?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unit_status.html".to_string());

        Ok(Report {
            file_name,
            content_type: "text/html",
            bytes: html.into_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn status(name: &str, p: PlatformState, c: ConnectivityState, remark: &str) -> UnitStatus {
        UnitStatus {
            display_name: name.to_string(),
            platform_state: p,
            connectivity_state: c,
            location: "Pier 4".to_string(),
            remark: remark.to_string(),
        }
    }

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap()
    }

    #[test]
    fn test_palette() {
        assert_eq!(platform_color(PlatformState::Online), "CEEDD0");
        assert_eq!(platform_color(PlatformState::Offline), "F6CACF");
        assert_eq!(platform_color(PlatformState::Partial), "FBEBA6");
        assert_eq!(platform_color(PlatformState::Error), "FF0000");
        assert_eq!(connectivity_color(ConnectivityState::Offline), "F6CACF");
    }

    #[test]
    fn test_render_rows_and_headers() {
        let renderer = ReportRenderer::new("unused.html", "VFT", "Dataplicity");
        let html = renderer
            .render_html(
                &[
                    status("Unit A", PlatformState::Online, ConnectivityState::Online, ""),
                    status(
                        "Unit <B>",
                        PlatformState::Partial,
                        ConnectivityState::Offline,
                        "Old battery\nDevice disconnected and experiencing data lag",
                    ),
                ],
                at(),
            )
            .unwrap();

        assert!(html.contains("<th>On VFT</th>"));
        assert!(html.contains("<th>On Dataplicity</th>"));
        assert!(html.contains("2024-03-01 14:00"));
        assert!(html.contains("background-color: #FBEBA6\">partial</td>"));
        assert!(html.contains("background-color: #F6CACF\">offline</td>"));
        assert!(html.contains("Old battery<br>Device disconnected"));
        assert!(html.contains("Unit &lt;B&gt;"));
        assert_eq!(html.matches("<tr>").count(), 3);
    }

    #[test]
    fn test_render_writes_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("unit_status.html");
        let renderer = ReportRenderer::new(&path, "VFT", "Dataplicity");

        let report = renderer
            .render(
                &[status("Unit A", PlatformState::Error, ConnectivityState::Online, "x")],
                at(),
            )
            .unwrap();

        assert_eq!(report.file_name, "unit_status.html");
        assert_eq!(fs::read(&path).unwrap(), report.bytes);
    }

    struct QuietSource;

    impl crate::client::TelemetrySource for QuietSource {
        async fn data_dump_index(
            &self,
            _unit: &crate::models::TrackedUnit,
            _window: crate::client::QueryWindow,
        ) -> Result<String, crate::client::ClientError> {
            Ok("{\"data_dumps\": []}".to_string())
        }
    }

    #[tokio::test]
    async fn test_unmatched_unit_absent_from_report() {
        use crate::engine::Reconciler;
        use crate::models::{ConnectivityMap, Thresholds, TrackedUnit};

        let units: Vec<TrackedUnit> = ["Unit A", "Ghost Unit"]
            .iter()
            .enumerate()
            .map(|(i, name)| TrackedUnit {
                key: i.to_string(),
                display_name: name.to_string(),
                location: String::new(),
                base_remark: String::new(),
            })
            .collect();
        let mut connectivity = ConnectivityMap::new();
        connectivity.insert("Unit A".to_string(), ConnectivityState::Online);

        let thresholds = Thresholds { within_hours: 2, within_days: 3 };
        let statuses = Reconciler::new(&QuietSource, thresholds)
            .reconcile_all(&units, &connectivity, at().timestamp_millis())
            .await;

        let html = ReportRenderer::new("unused.html", "VFT", "Dataplicity")
            .render_html(&statuses, at())
            .unwrap();

        assert!(html.contains("Unit A"));
        assert!(!html.contains("Ghost Unit"));
        assert_eq!(html.matches("<tr>").count(), 2);
    }
}
