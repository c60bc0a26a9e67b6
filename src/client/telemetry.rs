//! Telemetry platform client.
//!
//! Signs in once per run and then pages the per-gateway data dump index.

use super::{execute, send_with_retry, ClientError, RetryPolicy};
use crate::config::{DataConfig, TelemetryConfig};
use crate::models::TrackedUnit;

use serde::Deserialize;

/// Time range of a log query, epoch millis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub from_ms: i64,
    pub to_ms: i64,
}

/// Anything that can return the raw log index of a unit.
#[allow(async_fn_in_trait)]
pub trait TelemetrySource {
    /// Raw body of a successful query for `unit` within `window`.
    async fn data_dump_index(
        &self,
        unit: &TrackedUnit,
        window: QueryWindow,
    ) -> Result<String, ClientError>;
}

#[derive(Debug, Deserialize)]
struct SignInReply {
    access_token: String,
}

/// Unauthenticated telemetry client.
pub struct TelemetryClient {
    http: reqwest::Client,
    config: TelemetryConfig,
    paging: (u32, u32),
    retry: RetryPolicy,
}

impl TelemetryClient {
    pub fn new(
        http: reqwest::Client,
        config: TelemetryConfig,
        data: &DataConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            config,
            paging: (data.page_size, data.page_number),
            retry,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Sign in, optionally exchanging the token for an organisation-scoped one.
    pub async fn sign_in(&self) -> Result<TelemetrySession<'_>, ClientError> {
        let credentials = [
            ("email", self.config.email.as_str()),
            ("password", self.config.password.as_str()),
        ];
        let body = execute(self.http.post(self.url("sign-in")).form(&credentials))
            .await?
            .into_ok_body()?;
        let mut token = parse_token(&body)?;

        if self.config.org_sign_in {
            let path = format!("orgs/{}/sign-in", self.config.org_id);
            let body = execute(self.http.post(self.url(&path)).header("Auth-Token", &token))
                .await?
                .into_ok_body()?;
            token = parse_token(&body)?;
        }

        tracing::debug!("{}: signed in", self.config.label);
        Ok(TelemetrySession {
            client: self,
            token,
        })
    }
}

fn parse_token(body: &str) -> Result<String, ClientError> {
    serde_json::from_str::<SignInReply>(body)
        .map(|r| r.access_token)
        .map_err(|e| ClientError::Payload(e.to_string()))
}

/// Signed-in view of the telemetry platform, valid for one run.
pub struct TelemetrySession<'a> {
    client: &'a TelemetryClient,
    token: String,
}

impl TelemetrySession<'_> {
    fn endpoint(&self, key: &str) -> String {
        let cfg = &self.client.config;
        self.client.url(&format!(
            "iot_mgmt/orgs/{}/projects/{}/gateways/{}/data_dump_index",
            cfg.org_id, cfg.project_id, key
        ))
    }
}

impl TelemetrySource for TelemetrySession<'_> {
    async fn data_dump_index(
        &self,
        unit: &TrackedUnit,
        window: QueryWindow,
    ) -> Result<String, ClientError> {
        let endpoint = self.endpoint(&unit.key);
        let (page_size, page_number) = self.client.paging;
        let params = [
            ("page_size", page_size.to_string()),
            ("page_number", page_number.to_string()),
            ("to_date", window.to_ms.to_string()),
            ("from_date", window.from_ms.to_string()),
        ];

        send_with_retry(&self.client.retry, &unit.display_name, || {
            execute(
                self.client
                    .http
                    .get(&endpoint)
                    .bearer_auth(&self.token)
                    .query(&params),
            )
        })
        .await
    }
}
