//! Control messages the transport itself sends over an upgraded connection.
//!
//! These never reach the application layer. The browser recognizes them by
//! their single top-level key.

use serde::{Deserialize, Serialize};

use crate::ids::ClientId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMessage {
    /// `{"id": "<client id>"}`: identity announcement on a fresh session.
    Id(ClientId),
    /// `{"navigate": "<url>"}`: forced navigation, sent when authentication fails.
    Navigate(String),
}

impl ControlMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// URL the browser is sent to when its session cannot be resolved.
pub fn logout_url(base_url: &str) -> String {
    format!("{base_url}_auth/logout")
}
