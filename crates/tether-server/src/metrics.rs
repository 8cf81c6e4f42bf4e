//! Metric names recorded through the `metrics` facade.

/// Upgrade requests seen on `/ws` (counter, labels: outcome).
pub const WS_UPGRADES_TOTAL: &str = "ws_upgrades_total";
/// Fresh clients registered (counter).
pub const CLIENTS_CREATED_TOTAL: &str = "clients_created_total";
/// Reattachments to an existing client (counter).
pub const CLIENTS_RESUMED_TOTAL: &str = "clients_resumed_total";
/// ACTIVE to STALE transitions (counter, labels: reason).
pub const CLIENTS_STALE_TOTAL: &str = "clients_stale_total";
/// Clients that reached DEAD (counter, labels: reason).
pub const CLIENTS_EXPIRED_TOTAL: &str = "clients_expired_total";
/// Clients currently in the registry (gauge).
pub const CLIENTS_REGISTERED: &str = "clients_registered";
/// Application messages written to a connection (counter).
pub const OUTBOUND_MESSAGES_TOTAL: &str = "outbound_messages_total";
