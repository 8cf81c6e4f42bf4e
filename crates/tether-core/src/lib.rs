//! Shared types for tether: client identities, session principals, control
//! messages, and the error taxonomy used across the transport.

pub mod control;
pub mod errors;
pub mod ids;
pub mod session;

pub use control::{logout_url, ControlMessage};
pub use errors::TetherError;
pub use ids::ClientId;
pub use session::SessionIdentity;
