use crate::ids::ClientId;

/// Errors raised while establishing or handing off a client connection.
///
/// Connection I/O failures on an established session are not represented
/// here: they are absorbed by the client state machine and only surface as
/// a state transition.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    #[error("origin not allowed: {0}")]
    OriginRejected(String),
    #[error("authentication required")]
    Unauthenticated,
    #[error("failed to encode control message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("client {0} is already registered")]
    DuplicateClient(ClientId),
}

impl TetherError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::OriginRejected(_) => "origin_rejected",
            Self::Unauthenticated => "unauthenticated",
            Self::Encode(_) => "encode",
            Self::DuplicateClient(_) => "duplicate_client",
        }
    }

    /// HTTP status reported when the error happens before the upgrade completes.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::OriginRejected(_) => 403,
            Self::Unauthenticated => 401,
            Self::Encode(_) | Self::DuplicateClient(_) => 500,
        }
    }
}
