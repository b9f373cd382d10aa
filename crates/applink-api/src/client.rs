// Appliance REST client
//
// Wraps `reqwest::Client` with device-scoped URL construction and bearer
// authorization sourced from the TokenManager on every request, so a token
// refresh is picked up without rebuilding the client.

use std::sync::Arc;

use reqwest::header;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{ActionCommand, AllowedActions, DeviceEntry, DeviceStatus};
use crate::token::TokenManager;
use crate::transport::TransportConfig;

/// HTTP client for the appliance REST endpoints: device listing, state
/// snapshots, allowed actions, and control commands.
pub struct DeviceClient {
    http: reqwest::Client,
    base_url: Url,
    token: Arc<TokenManager>,
}

impl DeviceClient {
    /// Create a new client. `base_url` is the API root
    /// (e.g. `https://api.example.com`).
    pub fn new(
        base_url: Url,
        token: Arc<TokenManager>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    /// The API root this client talks to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `{base}/v1/devices`
    fn devices_url(&self) -> Url {
        let full = format!("{}/v1/devices", base(&self.base_url));
        Url::parse(&full).expect("invalid devices URL")
    }

    /// `{base}/v1/devices/{serial}/{leaf}` -- also used by the event stream
    /// to derive the per-device `events` endpoint.
    pub fn device_url(&self, serial: &str, leaf: &str) -> Url {
        let full = format!("{}/v1/devices/{serial}/{leaf}", base(&self.base_url));
        Url::parse(&full).expect("invalid device URL")
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// List all devices bound to the account.
    ///
    /// `GET /v1/devices` -- the remote keys the listing by fabrication
    /// number; the map is flattened into a vector.
    pub async fn list_devices(&self) -> Result<Vec<DeviceEntry>, Error> {
        let url = self.devices_url();
        debug!("listing devices");
        let listing: serde_json::Map<String, serde_json::Value> = self.get_json(url).await?;

        let mut devices = Vec::with_capacity(listing.len());
        for (serial, value) in listing {
            match serde_json::from_value::<DeviceEntry>(value) {
                Ok(entry) => devices.push(entry),
                Err(e) => {
                    // One malformed entry must not hide the rest of the fleet.
                    tracing::warn!(serial, error = %e, "skipping unreadable device entry");
                }
            }
        }
        Ok(devices)
    }

    /// Telemetry snapshot for one device.
    ///
    /// `GET /v1/devices/{serial}/state`
    pub async fn device_state(&self, serial: &str) -> Result<DeviceStatus, Error> {
        let url = self.device_url(serial, "state");
        debug!(serial, "reading device state");
        self.get_json(url).await
    }

    /// The control actions the device accepts in its current state.
    ///
    /// `GET /v1/devices/{serial}/actions`
    pub async fn device_actions(&self, serial: &str) -> Result<AllowedActions, Error> {
        let url = self.device_url(serial, "actions");
        debug!(serial, "reading allowed actions");
        self.get_json(url).await
    }

    /// Issue a control command.
    ///
    /// `PUT /v1/devices/{serial}/actions` -- success responses carry no body.
    pub async fn execute_action(
        &self,
        serial: &str,
        command: &ActionCommand,
    ) -> Result<(), Error> {
        let url = self.device_url(serial, "actions");
        debug!(serial, ?command, "executing action");

        let auth = self.token.access_header();
        let response = self
            .http
            .put(url)
            .header(header::AUTHORIZATION, auth.as_str())
            .json(command)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }
        Ok(())
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send an authorized GET request and deserialize the JSON body.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);

        let auth = self.token.access_header();
        let response = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, auth.as_str())
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(Error::Transport)?;

        if !status.is_success() {
            return Err(status_error(status, body));
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}

fn base(url: &Url) -> &str {
    url.as_str().trim_end_matches('/')
}

fn status_error(status: reqwest::StatusCode, body: String) -> Error {
    if status == reqwest::StatusCode::UNAUTHORIZED {
        Error::Authorization {
            message: "bearer token rejected".into(),
        }
    } else {
        Error::Api {
            message: body,
            status: status.as_u16(),
        }
    }
}
