//! Connectivity tracker client.

use super::{execute, ClientError};
use crate::config::ConnectivityConfig;
use crate::models::{ConnectivityMap, ConnectivityState};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct AuthReply {
    token: String,
}

/// One entry of the device listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub name: String,
    #[serde(default)]
    pub online: bool,
}

/// Client for the device reachability platform.
pub struct ConnectivityClient {
    http: reqwest::Client,
    config: ConnectivityConfig,
}

impl ConnectivityClient {
    pub fn new(http: reqwest::Client, config: ConnectivityConfig) -> Self {
        Self { http, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Log in and fetch the reachability of every known device.
    pub async fn fetch_states(&self) -> Result<ConnectivityMap, ClientError> {
        let credentials = [
            ("email", self.config.email.as_str()),
            ("password", self.config.password.as_str()),
        ];
        let body = execute(self.http.post(self.url("auth/")).form(&credentials))
            .await?
            .into_ok_body()?;
        let auth: AuthReply =
            serde_json::from_str(&body).map_err(|e| ClientError::Payload(e.to_string()))?;

        let body = execute(
            self.http
                .get(self.url("devices/"))
                .header("Authorization", format!("Token {}", auth.token)),
        )
        .await?
        .into_ok_body()?;

        let map = parse_devices(&body)?;
        tracing::info!(
            "{}: {} devices listed, {} online",
            self.config.label,
            map.len(),
            map.values().filter(|s| **s == ConnectivityState::Online).count()
        );
        Ok(map)
    }
}

/// Turn the device listing into a name to state map.
pub fn parse_devices(body: &str) -> Result<ConnectivityMap, ClientError> {
    let devices: Vec<Device> =
        serde_json::from_str(body).map_err(|e| ClientError::Payload(e.to_string()))?;

    Ok(devices
        .into_iter()
        .map(|d| {
            let state = if d.online {
                ConnectivityState::Online
            } else {
                ConnectivityState::Offline
            };
            (d.name, state)
        })
        .collect())
}
