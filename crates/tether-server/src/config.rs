//! Server configuration, built from [`TetherSettings`] or by hand in tests.

use std::time::Duration;

use tether_settings::{SocketSettings, TetherSettings};

use crate::client::ClientOptions;
use crate::policy::{ForwardingPolicy, OriginPolicy};

/// Upgrade endpoint and client lifecycle configuration.
#[derive(Clone, Debug)]
pub struct SocketConfig {
    /// Prefix for URLs sent to the browser.
    pub base_url: String,
    pub editable: bool,
    pub origins: OriginPolicy,
    pub forwarding: ForwardingPolicy,
    pub ping_interval: Duration,
    pub reconnect_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::from_settings(&SocketSettings::default())
    }
}

impl SocketConfig {
    pub fn from_settings(settings: &SocketSettings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            editable: settings.editable,
            origins: OriginPolicy::from_allowed(settings.allowed_origins.as_deref()),
            forwarding: ForwardingPolicy::from_names(settings.forwarded_headers.as_slice()),
            ping_interval: settings.ping_interval(),
            reconnect_timeout: settings.reconnect_timeout(),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            editable: self.editable,
            ping_interval: self.ping_interval,
            reconnect_timeout: self.reconnect_timeout,
            ..ClientOptions::default()
        }
    }
}

/// Configuration for the tether server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// How long shutdown waits for the serve loop.
    pub shutdown_timeout: Duration,
    pub socket: SocketConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 1024 * 1024,
            shutdown_timeout: Duration::from_secs(5),
            socket: SocketConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &TetherSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            shutdown_timeout: Duration::from_millis(settings.server.shutdown_timeout_ms),
            socket: SocketConfig::from_settings(&settings.socket),
        }
    }
}
