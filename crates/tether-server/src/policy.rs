//! Request policies applied at handshake time.

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::header::{HOST, ORIGIN};
use axum::http::HeaderMap;
use tether_core::TetherError;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Which request headers are snapshotted onto a new client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ForwardingPolicy {
    /// Every header.
    All,
    /// Only these names, stored lowercase.
    Names(HashSet<String>),
    /// Nothing.
    #[default]
    None,
}

impl ForwardingPolicy {
    /// Build from configured names. `"*"` anywhere selects every header.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        if names.iter().any(|n| n.as_ref() == "*") {
            return Self::All;
        }
        let set: HashSet<String> = names
            .iter()
            .map(|n| n.as_ref().trim().to_ascii_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
        if set.is_empty() {
            Self::None
        } else {
            Self::Names(set)
        }
    }

    pub fn allows(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Names(set) => set.contains(&name.to_ascii_lowercase()),
            Self::None => false,
        }
    }

    /// Copy the allowed headers out of a request.
    pub fn snapshot(&self, headers: &HeaderMap) -> HeaderMap {
        match self {
            Self::All => headers.clone(),
            Self::None => HeaderMap::new(),
            Self::Names(_) => {
                let mut out = HeaderMap::new();
                for (name, value) in headers {
                    if self.allows(name.as_str()) {
                        out.append(name.clone(), value.clone());
                    }
                }
                out
            }
        }
    }
}

/// Which browser origins may open a socket.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OriginPolicy {
    /// Origin host must match the `Host` header. Requests without `Origin` pass.
    #[default]
    SameOrigin,
    /// `Origin` must be present and exactly one of these.
    AllowList(HashSet<String>),
}

impl OriginPolicy {
    pub fn from_allowed(allowed: Option<&[String]>) -> Self {
        match allowed {
            None => Self::SameOrigin,
            Some(list) => Self::AllowList(list.iter().cloned().collect()),
        }
    }

    pub fn check(&self, headers: &HeaderMap) -> Result<(), TetherError> {
        let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
        match self {
            Self::AllowList(allowed) => match origin {
                Some(o) if allowed.contains(o) => Ok(()),
                other => Err(TetherError::OriginRejected(other.unwrap_or_default().to_string())),
            },
            Self::SameOrigin => {
                if !headers.contains_key(ORIGIN) {
                    return Ok(());
                }
                let origin = origin.unwrap_or_default();
                let origin_host = origin.split_once("://").map_or(origin, |(_, rest)| rest);
                let host = headers.get(HOST).and_then(|v| v.to_str().ok()).unwrap_or_default();
                if !host.is_empty() && origin_host.eq_ignore_ascii_case(host) {
                    Ok(())
                } else {
                    Err(TetherError::OriginRejected(origin.to_string()))
                }
            }
        }
    }
}

/// Network origin for audit logs: first `X-Forwarded-For` hop, else the socket peer.
pub fn remote_addr(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or_else(|| peer.to_string(), str::to_string)
}
