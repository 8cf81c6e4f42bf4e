//! Session resolution at upgrade time.

use async_trait::async_trait;
use axum::http::HeaderMap;
use tether_core::SessionIdentity;

/// Resolves the session behind an upgrade request.
///
/// `None` means the request carries no valid session. A server started
/// without an authenticator treats every request as anonymous.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn identify(&self, headers: &HeaderMap) -> Option<SessionIdentity>;
}

#[async_trait]
impl<F> Authenticator for F
where
    F: Fn(&HeaderMap) -> Option<SessionIdentity> + Send + Sync + 'static,
{
    async fn identify(&self, headers: &HeaderMap) -> Option<SessionIdentity> {
        self(headers)
    }
}
