//! Notification consumption and demultiplexing
//!
//! One pump task owns both subscriptions (private reply queue and shared
//! broadcast queue), decodes each payload, clears matched correlation ids and
//! hands the result to a single handler. When either subscription ends, the
//! pump reports a fault, waits for the next connection and subscribes again
//! under the new private queue name.

use super::correlation::CorrelationTracker;
use crate::error::ClientError;
use crate::protocol::Notification;
use crate::transport::amqp::{AmqpError, ConnectionManager, Link, TopologyBinder};
use crate::transport::{BrokerFault, ConsumeOptions, DeliveryStream};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives every decoded notification from both subscriptions
pub type NotificationHandler = Arc<dyn Fn(Notification) + Send + Sync>;

const PRIVATE_CONSUME: ConsumeOptions = ConsumeOptions {
    no_ack: true,
    exclusive: true,
};

const GENERAL_CONSUME: ConsumeOptions = ConsumeOptions {
    no_ack: true,
    exclusive: false,
};

/// Item of the merged subscription stream
enum SubscriptionEvent {
    Delivery(Result<Vec<u8>, AmqpError>),
    /// The named queue's consumer stream finished
    Ended(String),
}

type Subscriptions = BoxStream<'static, SubscriptionEvent>;

pub struct Consumer {
    manager: ConnectionManager,
    tracker: CorrelationTracker,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Serializes replacement so two callers never hold exclusive consumers at once
    replacing: tokio::sync::Mutex<()>,
}

impl Consumer {
    pub fn new(manager: ConnectionManager, tracker: CorrelationTracker) -> Self {
        Self {
            manager,
            tracker,
            pump: Mutex::new(None),
            replacing: tokio::sync::Mutex::new(()),
        }
    }

    /// Subscribe to the private and broadcast queues, in that order
    ///
    /// Returns once both subscriptions are established; deliveries are then
    /// handled in the background until [`Consumer::stop`]. Calling it again
    /// replaces the previous handler: the old consumers are cancelled before
    /// the new ones are registered, since the private queue admits only one.
    ///
    /// A failed subscription is reported as a channel fault so the retry runs
    /// on a fresh channel and private queue.
    pub async fn consume_notifications(&self, handler: NotificationHandler) -> Result<(), ClientError> {
        let _replacing = self.replacing.lock().await;

        let previous = self.pump.lock().take();
        if let Some(previous) = previous {
            previous.abort();
            // Resolves once the task, and the streams it owns, are dropped
            let _ = previous.await;
            debug!("Previous notification pump cancelled");
        }

        let link = self.manager.ready_link().await?;
        let deliveries = match subscribe(&link).await {
            Ok(deliveries) => deliveries,
            Err(e) => {
                warn!(generation = link.generation, "Subscribing failed: {}", e);
                self.manager
                    .report_fault(link.generation, BrokerFault::Channel(e.to_string()))
                    .await;
                return Err(e.into());
            }
        };
        info!(
            private_queue = %link.topology.private_queue,
            general_queue = %link.topology.general_queue,
            "Consuming notifications"
        );

        let pump = tokio::spawn(run_pump(
            self.manager.clone(),
            self.tracker.clone(),
            handler,
            link.generation,
            deliveries,
        ));

        if let Some(stray) = self.pump.lock().replace(pump) {
            stray.abort();
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.pump
            .lock()
            .as_ref()
            .is_some_and(|pump| !pump.is_finished())
    }

    /// Stop dispatching; subscriptions end with the session
    pub fn stop(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
            debug!("Notification pump stopped");
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

/// Tag each delivery and mark the end of the stream
fn tagged(queue: &str, deliveries: DeliveryStream) -> Subscriptions {
    let queue = queue.to_string();
    deliveries
        .map(SubscriptionEvent::Delivery)
        .chain(stream::once(async move { SubscriptionEvent::Ended(queue) }))
        .boxed()
}

/// Bind then consume the private queue, then the broadcast queue
async fn subscribe(link: &Link) -> Result<Subscriptions, AmqpError> {
    let session = link.session.as_ref();

    TopologyBinder::bind_private(session, &link.topology).await?;
    let private = session
        .consume(&link.topology.private_queue, PRIVATE_CONSUME)
        .await?;

    TopologyBinder::bind_general(session, &link.topology).await?;
    let general = session
        .consume(&link.topology.general_queue, GENERAL_CONSUME)
        .await?;

    Ok(stream::select(
        tagged(&link.topology.private_queue, private),
        tagged(&link.topology.general_queue, general),
    )
    .boxed())
}

/// Dispatch until either subscription ends; the streams are dropped on return
async fn drain(
    tracker: &CorrelationTracker,
    handler: &NotificationHandler,
    mut subscriptions: Subscriptions,
) -> Option<String> {
    while let Some(event) = subscriptions.next().await {
        match event {
            SubscriptionEvent::Delivery(Ok(payload)) => dispatch(tracker, handler, &payload),
            SubscriptionEvent::Delivery(Err(e)) => warn!("Notification delivery failed: {}", e),
            SubscriptionEvent::Ended(queue) => return Some(queue),
        }
    }
    None
}

async fn run_pump(
    manager: ConnectionManager,
    tracker: CorrelationTracker,
    handler: NotificationHandler,
    mut generation: u64,
    mut deliveries: Subscriptions,
) {
    loop {
        let ended = drain(&tracker, &handler, deliveries)
            .await
            .unwrap_or_else(|| "all queues".to_string());

        warn!(generation, queue = %ended, "Notification subscription ended");
        manager
            .report_fault(
                generation,
                BrokerFault::Channel(format!("subscription to {ended} ended")),
            )
            .await;

        loop {
            let Some(link) = manager.next_link(generation).await else {
                return;
            };
            generation = link.generation;

            match subscribe(&link).await {
                Ok(stream) => {
                    info!(
                        generation,
                        private_queue = %link.topology.private_queue,
                        "Resubscribed to notifications"
                    );
                    deliveries = stream;
                    break;
                }
                Err(e) => {
                    warn!(generation, "Resubscribing failed: {}", e);
                    manager
                        .report_fault(generation, BrokerFault::Channel(e.to_string()))
                        .await;
                }
            }
        }
    }
}

/// Decode one payload, clear its correlation id if it is a reply, and hand it on
///
/// Undecodable payloads are logged and dropped.
pub(crate) fn dispatch(tracker: &CorrelationTracker, handler: &NotificationHandler, payload: &[u8]) {
    let notification = match Notification::decode(payload) {
        Ok(notification) => notification,
        Err(e) => {
            warn!("Dropping malformed notification: {}", e);
            return;
        }
    };

    match &notification {
        Notification::Reply(reply) => {
            if tracker.remove(&reply.correlation_id) {
                debug!(correlation_id = %reply.correlation_id, kind = %reply.kind, "Correlated reply received");
            } else {
                debug!(correlation_id = %reply.correlation_id, "Reply with no pending request");
            }
        }
        Notification::Broadcast(broadcast) => {
            debug!(application = %broadcast.application, kind = %broadcast.kind, "Broadcast received");
        }
        Notification::Unknown(_) => {
            debug!("Notification of unknown shape received");
        }
    }

    handler(notification);
}
