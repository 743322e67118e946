use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{GuardError, Result};

/// A proxy gateway address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
}

impl ProxyEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Key used by the failure cooldown table
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ProxyEndpoint {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| GuardError::Config(format!("proxy endpoint '{}' is not host:port", trimmed)))?;

        if host.is_empty() {
            return Err(GuardError::Config(format!(
                "proxy endpoint '{}' has an empty host",
                trimmed
            )));
        }

        let port = port.parse::<u16>().map_err(|_| {
            GuardError::Config(format!("proxy endpoint '{}' has an invalid port", trimmed))
        })?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for ProxyEndpoint {
    type Error = GuardError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ProxyEndpoint> for String {
    fn from(endpoint: ProxyEndpoint) -> Self {
        endpoint.to_string()
    }
}

/// Protocol spoken to the proxy gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    #[default]
    Http,
    Socks5,
}

impl ProxyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Socks5 => "socks5",
        }
    }
}

impl FromStr for ProxyScheme {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(ProxyScheme::Http),
            "socks5" => Ok(ProxyScheme::Socks5),
            other => Err(GuardError::Config(format!("unknown proxy scheme: {}", other))),
        }
    }
}

/// How endpoints are handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationMode {
    /// Advance the round-robin cursor on every call
    PerRequest,
    /// Keep a session key on the same endpoint until its binding expires
    #[default]
    PerSession,
}

impl FromStr for RotationMode {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "per-request" | "request" => Ok(RotationMode::PerRequest),
            "per-session" | "session" | "sticky" => Ok(RotationMode::PerSession),
            other => Err(GuardError::Config(format!("unknown rotation mode: {}", other))),
        }
    }
}

impl fmt::Display for RotationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationMode::PerRequest => write!(f, "per-request"),
            RotationMode::PerSession => write!(f, "per-session"),
        }
    }
}

/// Strip user and password from a proxy connection string so it can be logged.
///
/// Unparsable input loses everything up to the last `@`, which is where
/// userinfo would end.
pub fn redact(connection: &str) -> String {
    if let Ok(mut url) = Url::parse(connection) {
        if url.has_host() {
            let had_userinfo = !url.username().is_empty() || url.password().is_some();
            if had_userinfo {
                // Both calls only fail for cannot-be-a-base URLs, excluded by has_host
                let _ = url.set_username("");
                let _ = url.set_password(None);
            }
            let mut redacted = url.to_string();
            if redacted.ends_with('/') && !connection.ends_with('/') {
                redacted.pop();
            }
            return redacted;
        }
    }

    match connection.rfind('@') {
        Some(at) => {
            let scheme = connection
                .find("://")
                .filter(|idx| *idx < at)
                .map(|idx| &connection[..idx + 3])
                .unwrap_or("");
            format!("{}{}", scheme, &connection[at + 1..])
        }
        None => connection.to_string(),
    }
}

/// Extract the cooldown key (`host:port`) from a connection string or a bare endpoint
pub(crate) fn endpoint_key(connection: &str) -> Option<String> {
    if let Ok(url) = Url::parse(connection) {
        if let (Some(host), Some(port)) = (url.host_str(), url.port_or_known_default()) {
            return Some(format!("{}:{}", host, port));
        }
    }

    connection
        .parse::<ProxyEndpoint>()
        .ok()
        .map(|endpoint| endpoint.key())
}
