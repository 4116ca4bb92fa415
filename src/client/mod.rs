//! Car client: publishing, consuming and correlation over one broker connection
//!
//! [`CarClient`] wires the pieces together around a single
//! [`ConnectionManager`]. It is constructed explicitly by its owner and torn
//! down with [`CarClient::shutdown`].

pub mod consumer;
pub mod correlation;
pub mod feed;
pub mod publisher;

pub use consumer::{Consumer, NotificationHandler};
pub use correlation::CorrelationTracker;
pub use feed::{FeedEntry, NotificationFeed, DEFAULT_FEED_CAPACITY};
pub use publisher::Publisher;

use crate::config::BrokerSection;
use crate::error::ClientResult;
use crate::protocol::CarMetadata;
use crate::transport::amqp::{ConnectionManager, ConnectionState, HealthMetrics};
use crate::transport::BrokerConnector;
use std::sync::Arc;
use tracing::info;

pub struct CarClient {
    manager: ConnectionManager,
    tracker: CorrelationTracker,
    publisher: Publisher,
    consumer: Consumer,
}

impl CarClient {
    pub fn new(connector: Arc<dyn BrokerConnector>, broker: &BrokerSection) -> Self {
        Self::with_manager(ConnectionManager::from_config(connector, broker))
    }

    pub fn with_manager(manager: ConnectionManager) -> Self {
        let tracker = CorrelationTracker::new();
        Self {
            publisher: Publisher::new(manager.clone(), tracker.clone()),
            consumer: Consumer::new(manager.clone(), tracker.clone()),
            manager,
            tracker,
        }
    }

    pub async fn connect(&self) -> ClientResult<()> {
        self.manager.connect().await?;
        Ok(())
    }

    pub async fn publish_metadata(&self, metadata: &CarMetadata) -> ClientResult<String> {
        self.publisher.publish_metadata(metadata).await
    }

    pub async fn consume_notifications(&self, handler: NotificationHandler) -> ClientResult<()> {
        self.consumer.consume_notifications(handler).await
    }

    /// Stop consuming and close the connection; no reconnect follows
    pub async fn shutdown(&self) -> ClientResult<()> {
        self.consumer.stop();
        self.manager.disconnect().await?;
        info!(
            pending_replies = self.tracker.len(),
            "Car client shut down"
        );
        Ok(())
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn consumer(&self) -> &Consumer {
        &self.consumer
    }

    pub fn tracker(&self) -> &CorrelationTracker {
        &self.tracker
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn health_metrics(&self) -> HealthMetrics {
        self.manager.health_metrics()
    }
}
