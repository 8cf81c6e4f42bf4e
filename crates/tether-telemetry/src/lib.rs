use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "tether_server::pump" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit one JSON object per line instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Directive string handed to [`EnvFilter`] when RUST_LOG is unset.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Initialize the global tracing subscriber. Call once at startup.
///
/// Fails if a global subscriber is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry().with(fmt_layer).try_init()
}

/// Install the global Prometheus recorder.
///
/// The returned handle renders the text exposition for `GET /metrics`.
pub fn install_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    tracing::info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Parse a level name the way settings and CLI flags spell it.
pub fn parse_level(s: &str) -> Option<Level> {
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_is_info() {
        assert_eq!(TelemetryConfig::default().filter_directives(), "info");
    }

    #[test]
    fn module_levels_append_directives() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![
                ("tether_server".to_string(), Level::DEBUG),
                ("tower_http".to_string(), Level::ERROR),
            ],
            json: true,
        };
        assert_eq!(
            config.filter_directives(),
            "warn,tether_server=debug,tower_http=error"
        );
    }

    #[test]
    fn parse_level_accepts_names() {
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level("TRACE"), Some(Level::TRACE));
        assert_eq!(parse_level("chatty"), None);
    }

    #[test]
    fn second_init_fails_instead_of_panicking() {
        let config = TelemetryConfig::default();
        let _ = init_telemetry(&config);
        assert!(init_telemetry(&config).is_err());
    }
}
