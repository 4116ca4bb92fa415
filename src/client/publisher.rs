//! Telemetry publishing
//!
//! Every metadata snapshot is stamped with a fresh correlation id and the
//! private reply queue of the current connection, so the backend can answer
//! this client directly.

use super::correlation::CorrelationTracker;
use crate::error::ClientError;
use crate::protocol::{CarMetadata, RoutingKeys, CAR_EXCHANGE, CONTENT_TYPE_JSON};
use crate::simulation::TelemetrySink;
use crate::transport::amqp::ConnectionManager;
use crate::transport::MessageProperties;
use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct Publisher {
    manager: ConnectionManager,
    tracker: CorrelationTracker,
}

impl Publisher {
    pub fn new(manager: ConnectionManager, tracker: CorrelationTracker) -> Self {
        Self { manager, tracker }
    }

    /// Publish a snapshot to `car.events` under `car.metadata`
    ///
    /// Returns the correlation id once the publish has been handed to the
    /// channel. Broker-side failures are logged and not reported; the id then
    /// stays pending. Errors only come from the ready gate or serialization.
    pub async fn publish_metadata(&self, metadata: &CarMetadata) -> Result<String, ClientError> {
        let link = self.manager.ready_link().await?;
        let payload = serde_json::to_vec(metadata)?;

        let correlation_id = Uuid::new_v4().to_string();
        self.tracker.add(correlation_id.clone());

        let properties = MessageProperties {
            content_type: CONTENT_TYPE_JSON.to_string(),
            correlation_id: correlation_id.clone(),
            reply_to: link.topology.private_queue.clone(),
        };

        match link
            .session
            .publish(CAR_EXCHANGE, RoutingKeys::metadata(), payload, properties)
            .await
        {
            Ok(()) => debug!(
                correlation_id = %correlation_id,
                reply_to = %link.topology.private_queue,
                "Published car metadata"
            ),
            Err(e) => warn!(
                correlation_id = %correlation_id,
                "Failed to publish car metadata: {}", e
            ),
        }

        Ok(correlation_id)
    }

    pub fn tracker(&self) -> &CorrelationTracker {
        &self.tracker
    }
}

#[async_trait]
impl TelemetrySink for Publisher {
    async fn send(&self, snapshot: CarMetadata) -> Result<String, ClientError> {
        self.publish_metadata(&snapshot).await
    }
}
