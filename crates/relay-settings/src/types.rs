//! Settings types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and session settings.
    pub server: ServerSettings,
}

/// Listener and session settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (0 picks an ephemeral port).
    pub port: u16,
    /// Address the bridge signs its envelopes with.
    pub connection_id: String,
    /// Address of the consumer every envelope is delivered to.
    pub target_skill_id: String,
    /// OpenAPI document requests are validated against; all requests are
    /// accepted when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_spec_path: Option<String>,
    /// PEM certificate chain for TLS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_cert_path: Option<String>,
    /// PEM private key for TLS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_key_path: Option<String>,
    /// How long an upgraded connection waits for the consumer to answer.
    pub response_timeout_ms: u64,
    /// Inbox capacity; 0 means unbounded.
    pub inbox_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5556,
            connection_id: "relay/websocket_server:0.1.0".to_string(),
            target_skill_id: "relay/consumer:0.1.0".to_string(),
            api_spec_path: None,
            ssl_cert_path: None,
            ssl_key_path: None,
            response_timeout_ms: 6_000,
            inbox_capacity: 0,
        }
    }
}

impl ServerSettings {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Response timeout as a [`Duration`].
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Certificate and key paths, when TLS is configured.
    pub fn tls_paths(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.ssl_cert_path, &self.ssl_key_path) {
            (Some(cert), Some(key)) => Some((PathBuf::from(cert), PathBuf::from(key))),
            _ => None,
        }
    }

    /// Reject combinations the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.ssl_cert_path.is_some() != self.ssl_key_path.is_some() {
            return Err(SettingsError::InvalidValue(
                "sslCertPath and sslKeyPath must be set together".into(),
            ));
        }
        if self.response_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue("responseTimeoutMs must be positive".into()));
        }
        if self.target_skill_id.trim().is_empty() {
            return Err(SettingsError::InvalidValue("targetSkillId is empty".into()));
        }
        if self.connection_id.trim().is_empty() {
            return Err(SettingsError::InvalidValue("connectionId is empty".into()));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
