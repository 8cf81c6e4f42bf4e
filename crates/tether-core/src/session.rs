use serde::{Deserialize, Serialize};

/// Principal a client session was opened under.
///
/// Resolved once at handshake time by the configured authenticator. When no
/// authenticator is configured every session is [`SessionIdentity::Anonymous`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionIdentity {
    #[default]
    Anonymous,
    Principal { subject: String },
}

impl SessionIdentity {
    pub fn principal(subject: impl Into<String>) -> Self {
        Self::Principal {
            subject: subject.into(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// Subject of an authenticated principal, `None` when anonymous.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::Principal { subject } => Some(subject),
        }
    }
}
