//! # tether-server
//!
//! Durable WebSocket sessions over axum.
//!
//! - [`Registry`]: process-wide map from [`ClientId`](tether_core::ClientId) to [`Client`]
//! - [`Client`]: ACTIVE / STALE / DEAD state machine with an outbound queue that
//!   survives reconnection
//! - [`Handshake`]: origin check, authentication, fresh-vs-resume decision
//! - Outbound and inbound pumps, one task each per live connection
//! - HTTP surface: `/ws`, `/health`, `/metrics`, and graceful shutdown

#![deny(unsafe_code)]

pub mod app;
pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod handshake;
pub mod health;
mod heartbeat;
pub mod metrics;
mod outbox;
pub mod policy;
mod pump;
pub mod registry;
pub mod server;
pub mod shutdown;

pub use app::{AppHandler, EchoHandler};
pub use auth::Authenticator;
pub use client::{Client, ClientOptions, ClientState};
pub use config::{ServerConfig, SocketConfig};
pub use connection::Connection;
pub use handshake::{Handshake, HandshakeOutcome, Prepared};
pub use policy::{ForwardingPolicy, OriginPolicy};
pub use registry::Registry;
pub use server::{start, ServerHandle, TetherServer};
pub use shutdown::ShutdownCoordinator;
