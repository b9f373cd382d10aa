//! OAuth token lifecycle: persistence, refresh scheduling, and the
//! formatted authorization header consumers actually read.
//!
//! The manager owns the token material exclusively. Consumers only ever see
//! the `"Bearer ..."` header string, which is replaced wholesale on each
//! refresh through an [`arc_swap::ArcSwap`] slot -- readers never lock and
//! never observe a half-updated token.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use reqwest::header;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::Error;
use crate::store::TokenStore;
use crate::transport::TransportConfig;

/// Fixed record name the token is persisted under.
pub const TOKEN_STORAGE_NAME: &str = "applink.token.json";

/// Interval at which the token is checked for a required refresh.
/// Tokens are long-lived (weeks); a 30 minute cadence is plenty.
pub const DEFAULT_REFRESH_CHECK_INTERVAL: Duration = Duration::from_secs(30 * 60);

// ── TokenData ────────────────────────────────────────────────────────

/// Persisted token material. `creation_date + expires_in` is the absolute
/// expiry instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: String,
    /// Validity in seconds from `creation_date`.
    pub expires_in: u64,
    pub creation_date: DateTime<Utc>,
}

impl TokenData {
    /// The absolute instant this token expires.
    pub fn expiry(&self) -> DateTime<Utc> {
        self.creation_date + chrono::Duration::seconds(self.expires_in as i64)
    }

    /// Whether the token expires within the next `check_interval`.
    ///
    /// Refreshing is scheduled one check interval ahead of the actual
    /// expiry instant, so a refresh always lands while the old token is
    /// still accepted.
    pub fn is_nearly_expired(&self, check_interval: Duration, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(check_interval.as_secs() as i64) >= self.expiry()
    }

    fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }
}

// ── TokenConfig ──────────────────────────────────────────────────────

/// Static configuration for the token lifecycle.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Token endpoint (POST, url-encoded grant requests).
    pub token_url: Url,

    /// OAuth client credentials. Both are required for any grant request;
    /// when either is missing, auto-refresh degrades to a logged warning.
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,

    /// Statically configured token material, used only when the store holds
    /// no usable record. Treated as expiring immediately since its actual
    /// creation instant is unknown.
    pub bootstrap_access_token: Option<String>,
    pub bootstrap_refresh_token: Option<String>,

    pub refresh_check_interval: Duration,
}

impl TokenConfig {
    pub fn new(token_url: Url) -> Self {
        Self {
            token_url,
            client_id: None,
            client_secret: None,
            bootstrap_access_token: None,
            bootstrap_refresh_token: None,
            refresh_check_interval: DEFAULT_REFRESH_CHECK_INTERVAL,
        }
    }
}

// ── TokenManager ─────────────────────────────────────────────────────

/// Owner of the OAuth token material.
///
/// One instance per process: the composition root constructs it once and
/// clones it (cheap, `Arc`-backed) into every consumer. Construction never
/// fails -- storage problems degrade to logged warnings and best-effort
/// token material.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    http: reqwest::Client,
    config: TokenConfig,
    store: Box<dyn TokenStore>,
    header: ArcSwap<String>,
    data: Mutex<TokenData>,
    cancel: CancellationToken,
}

impl TokenManager {
    /// Load the token from the store, falling back to statically configured
    /// material when the store holds nothing usable.
    pub fn load(store: Box<dyn TokenStore>, config: TokenConfig, transport: &TransportConfig) -> Self {
        let persisted = match store.get(TOKEN_STORAGE_NAME) {
            Ok(Some(raw)) => match serde_json::from_str::<TokenData>(&raw) {
                Ok(data) if data.is_complete() => {
                    debug!("token record found in persistent storage");
                    Some(data)
                }
                Ok(_) => {
                    warn!("persisted token record is incomplete, falling back to configured token");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "persisted token record is unreadable, falling back to configured token");
                    None
                }
            },
            Ok(None) => {
                debug!("no persisted token record, creating one from configuration");
                None
            }
            Err(e) => {
                warn!(error = %e, "token store read failed, proceeding with configured token");
                None
            }
        };

        let data = persisted.unwrap_or_else(|| {
            // The creation instant of configured material is unknown, so it
            // counts as already expired and the first cycle refreshes it.
            let data = TokenData {
                access_token: config.bootstrap_access_token.clone().unwrap_or_default(),
                refresh_token: config.bootstrap_refresh_token.clone().unwrap_or_default(),
                expires_in: 0,
                creation_date: Utc::now(),
            };
            persist_record(store.as_ref(), &data);
            data
        });

        let header = ArcSwap::from_pointee(bearer(&data.access_token));
        let http = transport.build_client().unwrap_or_default();

        Self {
            inner: Arc::new(TokenInner {
                http,
                config,
                store,
                header,
                data: Mutex::new(data),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// The current `"Bearer ..."` authorization header.
    ///
    /// Synchronous and lock-free; never performs I/O.
    pub fn access_header(&self) -> Arc<String> {
        self.inner.header.load_full()
    }

    /// Snapshot of the current token material.
    pub fn token_data(&self) -> TokenData {
        self.inner.data.lock().expect("token lock poisoned").clone()
    }

    /// Whether the current token expires within the next check interval.
    pub fn is_nearly_expired(&self) -> bool {
        self.inner
            .data
            .lock()
            .expect("token lock poisoned")
            .is_nearly_expired(self.inner.config.refresh_check_interval, Utc::now())
    }

    // ── Background refresh ───────────────────────────────────────────

    /// Spawn the periodic refresh task. Checks expiry every
    /// `refresh_check_interval` and refreshes when the token is nearly
    /// expired. A failed refresh keeps the old token and retries on the
    /// next tick.
    pub fn spawn_refresh_task(&self) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(manager.inner.config.refresh_check_interval);
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    biased;
                    _ = manager.inner.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if manager.is_nearly_expired() {
                            info!("token nearly expired, refreshing");
                            if let Err(e) = manager.refresh().await {
                                error!(error = %e, "token refresh failed, keeping current token until next interval");
                            }
                        }
                    }
                }
            }
            debug!("token refresh task exiting");
        })
    }

    /// Stop the background refresh task.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    // ── Grant requests ───────────────────────────────────────────────

    /// Refresh the token via the `refresh_token` grant.
    ///
    /// Missing client credentials or refresh token are terminal for this
    /// cycle only: logged as warnings, reported as `Ok`, retried on the
    /// next interval once configuration is fixed.
    pub async fn refresh(&self) -> Result<(), Error> {
        let (Some(client_id), Some(client_secret)) = (
            self.inner.config.client_id.clone(),
            self.inner.config.client_secret.clone(),
        ) else {
            warn!(
                "'client_id' or 'client_secret' is not configured; the token will not be \
                 auto-refreshed and will expire soon"
            );
            return Ok(());
        };

        let refresh_token = {
            self.inner
                .data
                .lock()
                .expect("token lock poisoned")
                .refresh_token
                .clone()
        };
        if refresh_token.is_empty() {
            warn!("no refresh token known; the token will not be auto-refreshed and will expire soon");
            return Ok(());
        }

        let params = [
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.expose_secret()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        self.request_grant(&params).await
    }

    /// Exchange a fresh authorization code for token material, replacing
    /// whatever the store currently holds.
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<(), Error> {
        let (Some(client_id), Some(client_secret)) = (
            self.inner.config.client_id.clone(),
            self.inner.config.client_secret.clone(),
        ) else {
            return Err(Error::Authorization {
                message: "client_id and client_secret are required for the authorization-code grant"
                    .into(),
            });
        };

        let params = [
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.expose_secret()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        self.request_grant(&params).await
    }

    async fn request_grant(&self, params: &[(&str, &str)]) -> Result<(), Error> {
        let auth = self.access_header();
        let response = self
            .inner
            .http
            .post(self.inner.config.token_url.clone())
            .header(header::AUTHORIZATION, auth.as_str())
            .header(header::ACCEPT, "application/json;charset=utf-8")
            .form(params)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(Error::Transport)?;

        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(Error::Authorization { message: body });
            }
            return Err(Error::Api {
                message: body,
                status: status.as_u16(),
            });
        }

        let grant: TokenGrant =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: body.clone(),
            })?;

        self.install(TokenData {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_in: grant.expires_in,
            creation_date: Utc::now(),
        });
        debug!("token material replaced");
        Ok(())
    }

    /// Replace the token wholesale: header first (so readers switch to the
    /// new credential immediately), then persist, then the record itself.
    fn install(&self, data: TokenData) {
        self.inner.header.store(Arc::new(bearer(&data.access_token)));
        persist_record(self.inner.store.as_ref(), &data);
        *self.inner.data.lock().expect("token lock poisoned") = data;
    }
}

/// Token endpoint response body.
#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    refresh_token: String,
    expires_in: u64,
}

fn bearer(access_token: &str) -> String {
    format!("Bearer {access_token}")
}

/// Best-effort persistence; store failures degrade to warnings.
fn persist_record(store: &dyn TokenStore, data: &TokenData) {
    match serde_json::to_string(data) {
        Ok(raw) => {
            if let Err(e) = store.set(TOKEN_STORAGE_NAME, &raw) {
                warn!(error = %e, "failed to persist token record");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize token record"),
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryTokenStore, TokenStore as _};

    fn sample(expires_in: u64, created: DateTime<Utc>) -> TokenData {
        TokenData {
            access_token: "acc".into(),
            refresh_token: "ref".into(),
            expires_in,
            creation_date: created,
        }
    }

    #[test]
    fn nearly_expired_one_interval_before_expiry() {
        let now = Utc::now();
        let check = Duration::from_secs(600);

        // Expires well beyond one check interval: not nearly expired.
        let fresh = sample(3600, now);
        assert!(!fresh.is_nearly_expired(check, now));

        // Expires exactly one check interval from now: nearly expired.
        let boundary = sample(600, now);
        assert!(boundary.is_nearly_expired(check, now));

        // Already expired.
        let stale = sample(0, now - chrono::Duration::hours(1));
        assert!(stale.is_nearly_expired(check, now));
    }

    #[test]
    fn token_data_round_trip() {
        let data = sample(3600, Utc::now());
        let raw = serde_json::to_string(&data).unwrap();
        let back: TokenData = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn load_falls_back_to_configured_token_and_persists_it() {
        let store = MemoryTokenStore::new();
        let mut config = TokenConfig::new("https://example.invalid/token".parse().unwrap());
        config.bootstrap_access_token = Some("configured-access".into());
        config.bootstrap_refresh_token = Some("configured-refresh".into());

        let manager = TokenManager::load(Box::new(store), config, &TransportConfig::default());

        assert_eq!(manager.access_header().as_str(), "Bearer configured-access");
        // Unknown creation instant counts as expired, forcing a refresh.
        assert!(manager.is_nearly_expired());

        let persisted = manager.token_data();
        assert_eq!(persisted.access_token, "configured-access");
        assert_eq!(persisted.expires_in, 0);
    }

    #[test]
    fn load_prefers_persisted_record_over_configuration() {
        let store = MemoryTokenStore::new();
        let data = sample(86_400, Utc::now());
        store
            .set(TOKEN_STORAGE_NAME, &serde_json::to_string(&data).unwrap())
            .unwrap();

        let mut config = TokenConfig::new("https://example.invalid/token".parse().unwrap());
        config.bootstrap_access_token = Some("configured-access".into());

        let manager = TokenManager::load(Box::new(store), config, &TransportConfig::default());
        assert_eq!(manager.access_header().as_str(), "Bearer acc");
        assert!(!manager.is_nearly_expired());
    }

    #[test]
    fn load_rejects_incomplete_persisted_record() {
        let store = MemoryTokenStore::new();
        let incomplete = TokenData {
            access_token: String::new(),
            refresh_token: "ref".into(),
            expires_in: 86_400,
            creation_date: Utc::now(),
        };
        store
            .set(TOKEN_STORAGE_NAME, &serde_json::to_string(&incomplete).unwrap())
            .unwrap();

        let mut config = TokenConfig::new("https://example.invalid/token".parse().unwrap());
        config.bootstrap_access_token = Some("configured-access".into());

        let manager = TokenManager::load(Box::new(store), config, &TransportConfig::default());
        assert_eq!(manager.access_header().as_str(), "Bearer configured-access");
    }
}
