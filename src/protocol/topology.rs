//! Exchange, queue and routing key names shared with the notification backend
//!
//! These names must match the existing broker deployment exactly; the backend
//! publishes replies to `car.notifications.<queue>` and broadcasts on the
//! fanout exchange.

/// Topic exchange carrying per-car events
pub const CAR_EXCHANGE: &str = "car.events";

/// Routing key for car metadata snapshots
pub const METADATA_ROUTING_KEY: &str = "car.metadata";

/// Prefix of the routing key that addresses one client's private queue
pub const NOTIFICATION_ROUTING_PREFIX: &str = "car.notifications.";

/// Fanout exchange carrying broadcast notifications
pub const FANOUT_EXCHANGE: &str = "fanout.events";

/// Durable queue bound to the fanout exchange
pub const GENERAL_QUEUE: &str = "general.notifications";

/// Content type stamped on every published message
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Routing key construction for the car topology
pub struct RoutingKeys;

impl RoutingKeys {
    /// Routing key for metadata publishes: `car.metadata`
    pub fn metadata() -> &'static str {
        METADATA_ROUTING_KEY
    }

    /// Routing key that reaches a private reply queue: `car.notifications.{queue}`
    pub fn notification(private_queue: &str) -> String {
        format!("{NOTIFICATION_ROUTING_PREFIX}{private_queue}")
    }

    /// Fanout exchanges ignore routing keys, bindings use an empty one
    pub fn broadcast() -> &'static str {
        ""
    }
}
