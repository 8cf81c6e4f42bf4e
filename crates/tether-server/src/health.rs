//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

use crate::registry::ClientCounts;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered clients by state.
    pub clients: ClientCounts,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, clients: ClientCounts) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        clients,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), ClientCounts::default());
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, ClientCounts::default());
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serializes_client_counts() {
        let resp = health_check(Instant::now(), ClientCounts { active: 3, stale: 1 });
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["clients"]["active"], 3);
        assert_eq!(json["clients"]["stale"], 1);
        assert!(json["uptime_secs"].is_number());
    }
}
