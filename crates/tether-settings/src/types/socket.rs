use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upgrade endpoint and client lifecycle settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SocketSettings {
    /// Prefix for URLs sent to the browser (`"/"` or `"/app/"`).
    pub base_url: String,
    /// Whether new sessions are allowed to edit content.
    pub editable: bool,
    /// Origins accepted on upgrade. `None` means same-origin only.
    pub allowed_origins: Option<Vec<String>>,
    /// Header names snapshotted onto the client at creation. `"*"` forwards all.
    pub forwarded_headers: Vec<String>,
    /// Keepalive ping cadence on an idle connection, in milliseconds.
    pub ping_interval_ms: u64,
    /// Grace window a stale client waits for a reconnect, in milliseconds.
    pub reconnect_timeout_ms: u64,
}

impl SocketSettings {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            base_url: "/".to_string(),
            editable: false,
            allowed_origins: None,
            forwarded_headers: Vec::new(),
            ping_interval_ms: 50_000,
            reconnect_timeout_ms: 2_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_follow_millis() {
        let s = SocketSettings {
            ping_interval_ms: 250,
            reconnect_timeout_ms: 1_500,
            ..SocketSettings::default()
        };
        assert_eq!(s.ping_interval(), Duration::from_millis(250));
        assert_eq!(s.reconnect_timeout(), Duration::from_millis(1_500));
    }

    #[test]
    fn allowed_origins_null_vs_list() {
        let s: SocketSettings = serde_json::from_str(r#"{"allowedOrigins": null}"#).unwrap();
        assert!(s.allowed_origins.is_none());

        let s: SocketSettings =
            serde_json::from_str(r#"{"allowedOrigins": ["https://a.example"]}"#).unwrap();
        assert_eq!(s.allowed_origins.unwrap(), vec!["https://a.example"]);
    }
}
