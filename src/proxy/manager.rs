use reqwest::{Proxy, Url};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;
use crate::error::{GuardError, Result};
use crate::proxy::endpoint::{endpoint_key, redact, ProxyEndpoint, ProxyScheme, RotationMode};

/// Credentials for the proxy gateway
#[derive(Clone)]
struct ProxyCredentials {
    username: String,
    password: String,
}

/// Endpoint chosen for one outbound call
#[derive(Clone, PartialEq, Eq)]
pub struct ProxySelection {
    endpoint: ProxyEndpoint,
    connection: String,
}

impl ProxySelection {
    pub fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }

    /// Full connection URL, credentials included. Never log this.
    pub fn connection_string(&self) -> &str {
        &self.connection
    }

    /// Connection URL with credentials removed
    pub fn redacted(&self) -> String {
        redact(&self.connection)
    }
}

impl fmt::Display for ProxySelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for ProxySelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySelection")
            .field("endpoint", &self.endpoint)
            .field("connection", &self.redacted())
            .finish()
    }
}

/// Endpoint bound to a session key
#[derive(Debug, Clone, Copy)]
struct StickySession {
    index: usize,
    expires_at: Instant,
    /// Selections served under this binding
    selections: u64,
}

#[derive(Debug, Default)]
struct RotationState {
    cursor: usize,
    sessions: HashMap<String, StickySession>,
    /// `host:port` -> end of cooldown
    failed: HashMap<String, Instant>,
}

impl RotationState {
    fn advance(&mut self, len: usize) -> usize {
        let index = self.cursor % len;
        self.cursor = self.cursor.wrapping_add(1);
        index
    }

    fn is_cooling_down(&mut self, key: &str, now: Instant) -> bool {
        match self.failed.get(key) {
            Some(until) if *until > now => true,
            Some(_) => {
                self.failed.remove(key);
                false
            }
            None => false,
        }
    }
}

/// Rotating proxy pool with sticky sessions and failure cooldowns
pub struct ProxyManager {
    credentials: Option<ProxyCredentials>,
    endpoints: Vec<ProxyEndpoint>,
    scheme: ProxyScheme,
    sticky_ttl: Duration,
    failure_cooldown: Duration,
    default_mode: RotationMode,
    state: Mutex<RotationState>,
}

impl fmt::Debug for ProxyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyManager")
            .field("configured", &self.is_configured())
            .field("endpoints", &self.endpoints)
            .field("scheme", &self.scheme)
            .field("sticky_ttl", &self.sticky_ttl)
            .field("failure_cooldown", &self.failure_cooldown)
            .field("default_mode", &self.default_mode)
            .finish()
    }
}

impl ProxyManager {
    pub fn new(config: ProxyConfig) -> Self {
        let credentials = if config.has_credentials() {
            match (config.username.clone(), config.password.clone()) {
                (Some(username), Some(password)) => Some(ProxyCredentials { username, password }),
                _ => None,
            }
        } else {
            None
        };

        let endpoints = config.effective_endpoints();
        info!(
            configured = credentials.is_some(),
            endpoints = endpoints.len(),
            mode = %config.default_mode,
            "Proxy manager initialized"
        );

        Self {
            credentials,
            endpoints,
            scheme: config.scheme,
            sticky_ttl: config.sticky_ttl,
            failure_cooldown: config.failure_cooldown,
            default_mode: config.default_mode,
            state: Mutex::new(RotationState::default()),
        }
    }

    /// Proxying is enabled only when credentials are present
    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn default_mode(&self) -> RotationMode {
        self.default_mode
    }

    /// Select with the configured default rotation mode
    pub async fn select_default(&self, session_key: Option<&str>) -> Option<ProxySelection> {
        self.select_endpoint(session_key, self.default_mode).await
    }

    /// Pick the endpoint for the next call.
    ///
    /// Returns `None` when proxying is disabled. An endpoint that is cooling
    /// down is swapped for the next one in rotation order, once; the swap is
    /// used even if that endpoint is cooling down too.
    pub async fn select_endpoint(
        &self,
        session_key: Option<&str>,
        mode: RotationMode,
    ) -> Option<ProxySelection> {
        let credentials = self.credentials.as_ref()?;
        let len = self.endpoints.len();
        if len == 0 {
            return None;
        }

        let now = Instant::now();
        let mut state = self.state.lock().await;

        let index = match (mode, session_key) {
            (RotationMode::PerSession, Some(key)) => {
                let bound = state
                    .sessions
                    .get_mut(key)
                    .filter(|session| session.expires_at > now);

                match bound {
                    Some(session) => {
                        session.selections += 1;
                        session.index
                    }
                    None => {
                        state.sessions.retain(|_, session| session.expires_at > now);
                        let index = state.advance(len);
                        state.sessions.insert(
                            key.to_string(),
                            StickySession {
                                index,
                                expires_at: now + self.sticky_ttl,
                                selections: 1,
                            },
                        );
                        debug!(session = key, index, "Bound session to proxy endpoint");
                        index
                    }
                }
            }
            (RotationMode::PerSession, None) => {
                debug!("Per-session rotation requested without a session key, rotating per request");
                state.advance(len)
            }
            (RotationMode::PerRequest, _) => state.advance(len),
        };

        let mut chosen = index;
        if state.is_cooling_down(&self.endpoints[index].key(), now) {
            chosen = (index + 1) % len;
            debug!(
                skipped = %self.endpoints[index],
                using = %self.endpoints[chosen],
                "Proxy endpoint cooling down, using next in rotation"
            );
        }
        drop(state);

        let endpoint = self.endpoints[chosen].clone();
        let connection = self.connection_string(&endpoint, credentials);
        Some(ProxySelection {
            endpoint,
            connection,
        })
    }

    /// Put the endpoint behind `connection` on cooldown.
    ///
    /// Accepts a full connection URL or a bare `host:port`.
    pub async fn mark_failed(&self, connection: &str) {
        let Some(key) = endpoint_key(connection) else {
            warn!(connection = %redact(connection), "Cannot mark unparsable proxy endpoint as failed");
            return;
        };

        let until = Instant::now() + self.failure_cooldown;
        self.state.lock().await.failed.insert(key.clone(), until);
        warn!(
            endpoint = %key,
            cooldown_secs = self.failure_cooldown.as_secs(),
            "Proxy endpoint marked as failed"
        );
    }

    /// Selections served under the live binding of a session key.
    ///
    /// Only per-session selections count. An expired binding reads as 0.
    pub async fn session_selections(&self, session_key: &str) -> u64 {
        let now = Instant::now();
        self.state
            .lock()
            .await
            .sessions
            .get(session_key)
            .filter(|session| session.expires_at > now)
            .map_or(0, |session| session.selections)
    }

    /// Session bindings held in memory, expired ones included until the next sweep
    #[cfg(test)]
    pub(crate) async fn retained_sessions(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Sticky sessions that have not expired yet
    pub async fn session_count(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .await
            .sessions
            .values()
            .filter(|session| session.expires_at > now)
            .count()
    }

    /// Build the reqwest dispatcher for a selection
    pub fn proxy_for(&self, selection: &ProxySelection) -> Result<Proxy> {
        let proxy_url = format!("{}://{}", self.scheme.as_str(), selection.endpoint);
        let proxy = Proxy::all(&proxy_url).map_err(|e| {
            GuardError::Config(format!("invalid proxy endpoint {}: {}", selection.endpoint, e))
        })?;

        Ok(match &self.credentials {
            Some(credentials) => proxy.basic_auth(&credentials.username, &credentials.password),
            None => proxy,
        })
    }

    fn connection_string(&self, endpoint: &ProxyEndpoint, credentials: &ProxyCredentials) -> String {
        let base = format!("{}://{}", self.scheme.as_str(), endpoint);
        match Url::parse(&base) {
            Ok(mut url) => {
                // Percent-encodes reserved characters in the credentials
                let _ = url.set_username(&credentials.username);
                let _ = url.set_password(Some(&credentials.password));
                let mut connection = url.to_string();
                if connection.ends_with('/') {
                    connection.pop();
                }
                connection
            }
            Err(_) => format!(
                "{}://{}:{}@{}",
                self.scheme.as_str(),
                credentials.username,
                credentials.password,
                endpoint
            ),
        }
    }
}
