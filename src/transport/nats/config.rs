//! NATS transport configuration

use serde::{Deserialize, Serialize};

/// NATS connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NatsConfig {
    /// Server URL (e.g., "nats://127.0.0.1:4222")
    pub url: String,

    /// Prefix prepended to every channel subject
    pub subject_prefix: String,

    /// Authentication token
    pub token: Option<String>,

    /// Client name reported to the server
    pub client_name: Option<String>,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            subject_prefix: "realtime".to_string(),
            token: None,
            client_name: None,
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

impl NatsConfig {
    /// Subject carrying the events of `channel`
    pub fn subject(&self, channel: &str) -> String {
        if self.subject_prefix.is_empty() {
            channel.to_string()
        } else {
            format!("{}.{}", self.subject_prefix, channel)
        }
    }
}
