//! Test helpers and utilities for integration tests

use carlink::client::{CarClient, NotificationHandler};
use carlink::protocol::{CarMetadata, Notification};
use carlink::testing::MockBroker;
use carlink::transport::amqp::{BrokerEndpoint, ConnectionManager, ReconnectConfig};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Reconnect delay used by integration tests
#[allow(dead_code)]
pub const TEST_RECONNECT_DELAY: Duration = Duration::from_millis(25);

/// Manager over the mock broker with a short reconnect delay
#[allow(dead_code)]
pub fn test_manager(broker: &Arc<MockBroker>) -> ConnectionManager {
    ConnectionManager::new(
        broker.connector(),
        BrokerEndpoint::new("localhost", false),
        ReconnectConfig {
            delay: TEST_RECONNECT_DELAY,
        },
    )
}

#[allow(dead_code)]
pub fn test_client(broker: &Arc<MockBroker>) -> CarClient {
    CarClient::with_manager(test_manager(broker))
}

/// Handler that stores every notification it receives
#[allow(dead_code)]
pub fn collecting_handler() -> (NotificationHandler, Arc<Mutex<Vec<Notification>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let handler: NotificationHandler = Arc::new(move |notification: Notification| sink.lock().push(notification));
    (handler, received)
}

#[allow(dead_code)]
pub fn sample_metadata() -> CarMetadata {
    CarMetadata {
        latitude: 59.33,
        longitude: 18.07,
        battery: 95.0,
        timestamp: Utc::now(),
    }
}

#[allow(dead_code)]
pub fn reply(correlation_id: &str, message: &str) -> Value {
    json!({
        "type": "ack",
        "message": message,
        "correlationId": correlation_id,
    })
}

#[allow(dead_code)]
pub fn reply_at(correlation_id: &str, timestamp: DateTime<Utc>) -> Value {
    json!({
        "type": "info",
        "message": format!("reply for {correlation_id}"),
        "correlationId": correlation_id,
        "timestamp": timestamp.to_rfc3339(),
    })
}

#[allow(dead_code)]
pub fn broadcast(application: &str, message: &str) -> Value {
    json!({
        "type": "warning",
        "application": application,
        "message": message,
    })
}

/// Poll `condition` until it holds or `timeout` elapses
#[allow(dead_code)]
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
