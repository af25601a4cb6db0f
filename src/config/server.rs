//! Server and webhook configuration types.

use serde::Deserialize;

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port for the webhook and health endpoints.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Default retention of processed message ids: seven days.
pub const DEFAULT_DEDUP_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;

/// Inbound webhook credential and replay window.
///
/// An empty secret rejects every request.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared secret the provider sends with every call.
    pub secret: String,
    /// Header carrying the secret.
    pub header: String,
    /// How long a processed message id is remembered for dedup, in seconds.
    /// Zero keeps ids forever.
    pub dedup_retention_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            header: "x-webhook-token".to_string(),
            dedup_retention_secs: DEFAULT_DEDUP_RETENTION_SECS,
        }
    }
}

impl WebhookConfig {
    /// `None` when processed ids are kept forever.
    pub fn dedup_retention(&self) -> Option<chrono::Duration> {
        match self.dedup_retention_secs {
            0 => None,
            secs => chrono::Duration::try_seconds(secs.min(i64::MAX as u64) as i64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let server = ServerConfig::default();
        assert_eq!(server.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_webhook_config_default() {
        let webhook = WebhookConfig::default();
        assert!(webhook.secret.is_empty());
        assert_eq!(webhook.header, "x-webhook-token");
        assert_eq!(webhook.dedup_retention(), Some(chrono::Duration::days(7)));
    }

    #[test]
    fn test_zero_retention_keeps_ids() {
        let webhook = WebhookConfig {
            dedup_retention_secs: 0,
            ..WebhookConfig::default()
        };
        assert!(webhook.dedup_retention().is_none());
    }
}
