//! Mock implementations for testing
//!
//! [`MockBroker`] is an in-memory stand-in for the message broker. It records
//! every declaration, binding, consume and publish, routes published messages
//! through its bindings, and lets tests inject connect failures and transport
//! faults without a running broker.

use crate::protocol::FANOUT_EXCHANGE;
use crate::simulation::TelemetrySink;
use crate::transport::{
    AmqpError, BrokerConnector, BrokerEndpoint, BrokerFault, BrokerSession, ConsumeOptions,
    DeliveryStream, ExchangeKind, ExchangeOptions, FaultSender, MessageProperties, QueueOptions,
};
use crate::{CarMetadata, ClientError};
use async_trait::async_trait;
use futures::channel::mpsc as delivery;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A message handed to the mock broker
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub properties: Option<MessageProperties>,
}

impl PublishedMessage {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

struct MockConsumer {
    session_id: u64,
    queue: String,
    exclusive: bool,
    sender: delivery::UnboundedSender<Result<Vec<u8>, AmqpError>>,
}

struct MockSessionEntry {
    open: Arc<AtomicBool>,
    faults: FaultSender,
    exclusive_queues: Vec<String>,
}

#[derive(Default)]
struct BrokerState {
    open_count: usize,
    close_count: usize,
    failing_opens: usize,
    failing_queue_declares: usize,
    open_delay: Option<Duration>,
    publish_failure: bool,
    next_session_id: u64,
    next_queue_id: u64,
    next_round_robin: usize,
    sessions: HashMap<u64, MockSessionEntry>,
    exchange_declarations: Vec<(String, ExchangeKind)>,
    queue_declarations: Vec<String>,
    bindings: Vec<(String, String, String)>,
    consume_calls: Vec<(String, ConsumeOptions)>,
    consumers: Vec<MockConsumer>,
    published: Vec<PublishedMessage>,
}

impl BrokerState {
    /// Drop a session: its consumers' streams end and its exclusive queues vanish
    fn tear_down(&mut self, session_id: u64) -> Option<MockSessionEntry> {
        let entry = self.sessions.remove(&session_id)?;
        entry.open.store(false, Ordering::SeqCst);
        self.consumers
            .retain(|consumer| consumer.session_id != session_id);
        self.bindings
            .retain(|(queue, _, _)| !entry.exclusive_queues.contains(queue));
        Some(entry)
    }

    fn route(&mut self, exchange: &str, routing_key: &str, payload: &[u8]) -> usize {
        let targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|(_, bound_exchange, bound_key)| {
                bound_exchange == exchange
                    && (exchange == FANOUT_EXCHANGE || bound_key == routing_key)
            })
            .map(|(queue, _, _)| queue.clone())
            .collect();

        targets
            .iter()
            .filter(|queue| self.deliver(queue, payload))
            .count()
    }

    /// Competing consumers on one queue receive messages round-robin
    fn deliver(&mut self, queue: &str, payload: &[u8]) -> bool {
        self.consumers.retain(|consumer| !consumer.sender.is_closed());
        let live: Vec<usize> = self
            .consumers
            .iter()
            .enumerate()
            .filter(|(_, consumer)| consumer.queue == queue)
            .map(|(index, _)| index)
            .collect();
        if live.is_empty() {
            return false;
        }

        let pick = live[self.next_round_robin % live.len()];
        self.next_round_robin = self.next_round_robin.wrapping_add(1);
        self.consumers[pick]
            .sender
            .unbounded_send(Ok(payload.to_vec()))
            .is_ok()
    }
}

/// In-memory broker shared by every session it opens
#[derive(Default)]
pub struct MockBroker {
    state: Mutex<BrokerState>,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn BrokerConnector> {
        Arc::new(MockConnector {
            broker: Arc::clone(self),
        })
    }

    /// Make the next `count` opens fail with a connection error
    pub fn fail_next_opens(&self, count: usize) {
        self.state.lock().failing_opens = count;
    }

    /// Make the next `count` queue declarations fail
    pub fn fail_next_queue_declares(&self, count: usize) {
        self.state.lock().failing_queue_declares = count;
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.state.lock().open_delay = Some(delay);
    }

    pub fn set_publish_failure(&self, fail: bool) {
        self.state.lock().publish_failure = fail;
    }

    /// Kill the most recently opened live session and report `fault` on it
    pub fn inject_fault(&self, fault: BrokerFault) -> bool {
        let mut state = self.state.lock();
        let Some(&session_id) = state.sessions.keys().max() else {
            return false;
        };
        match state.tear_down(session_id) {
            Some(entry) => entry.faults.send(fault).is_ok(),
            None => false,
        }
    }

    /// End every consumer stream of the live sessions without a transport fault
    pub fn cancel_consumers(&self) {
        self.state.lock().consumers.clear();
    }

    /// End only the consumers of `queue`, as a broker-side basic.cancel does
    pub fn cancel_queue_consumers(&self, queue: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.consumers.len();
        state.consumers.retain(|consumer| consumer.queue != queue);
        before - state.consumers.len()
    }

    /// Close the newest session's channel but keep its connection, then report `reason`
    ///
    /// Consumers on the channel end; exclusive queues live on with the connection.
    pub fn close_channel(&self, reason: &str) -> bool {
        let mut state = self.state.lock();
        let Some(&session_id) = state.sessions.keys().max() else {
            return false;
        };
        state
            .consumers
            .retain(|consumer| consumer.session_id != session_id);
        match state.sessions.get(&session_id) {
            Some(entry) => {
                entry.open.store(false, Ordering::SeqCst);
                entry
                    .faults
                    .send(BrokerFault::Channel(reason.to_string()))
                    .is_ok()
            }
            None => false,
        }
    }

    /// Deliver a raw body straight to one consumer of `queue`
    pub fn deliver(&self, queue: &str, payload: impl AsRef<[u8]>) -> bool {
        self.state.lock().deliver(queue, payload.as_ref())
    }

    pub fn deliver_json(&self, queue: &str, body: &serde_json::Value) -> bool {
        self.deliver(queue, body.to_string())
    }

    /// Publish as the notification backend would; returns the number of queues reached
    pub fn publish(&self, exchange: &str, routing_key: &str, body: &serde_json::Value) -> usize {
        let payload = body.to_string().into_bytes();
        let mut state = self.state.lock();
        state.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.clone(),
            properties: None,
        });
        state.route(exchange, routing_key, &payload)
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }

    pub fn live_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn exchange_declaration_count(&self) -> usize {
        self.state.lock().exchange_declarations.len()
    }

    pub fn queue_declarations(&self) -> Vec<String> {
        self.state.lock().queue_declarations.clone()
    }

    /// `(queue, exchange, routing_key)` in binding order
    pub fn bindings(&self) -> Vec<(String, String, String)> {
        self.state.lock().bindings.clone()
    }

    pub fn consume_calls(&self) -> Vec<(String, ConsumeOptions)> {
        self.state.lock().consume_calls.clone()
    }

    pub fn active_consumers(&self, queue: &str) -> usize {
        let mut state = self.state.lock();
        state.consumers.retain(|consumer| !consumer.sender.is_closed());
        state
            .consumers
            .iter()
            .filter(|consumer| consumer.queue == queue)
            .count()
    }

    /// Messages published by clients, oldest first
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|message| message.properties.is_some())
            .cloned()
            .collect()
    }
}

struct MockConnector {
    broker: Arc<MockBroker>,
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn open(
        &self,
        _endpoint: &BrokerEndpoint,
        faults: FaultSender,
    ) -> Result<Arc<dyn BrokerSession>, AmqpError> {
        let delay = self.broker.state.lock().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.broker.state.lock();
        state.open_count += 1;
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(AmqpError::ConnectionFailed("mock broker unavailable".into()));
        }

        state.next_session_id += 1;
        let id = state.next_session_id;
        let open = Arc::new(AtomicBool::new(true));
        state.sessions.insert(
            id,
            MockSessionEntry {
                open: Arc::clone(&open),
                faults,
                exclusive_queues: Vec::new(),
            },
        );

        Ok(Arc::new(MockSession {
            broker: Arc::clone(&self.broker),
            id,
            open,
        }))
    }
}

struct MockSession {
    broker: Arc<MockBroker>,
    id: u64,
    open: Arc<AtomicBool>,
}

impl MockSession {
    fn ensure_open(&self) -> Result<(), AmqpError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AmqpError::SessionClosed)
        }
    }
}

#[async_trait]
impl BrokerSession for MockSession {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        _options: ExchangeOptions,
    ) -> Result<(), AmqpError> {
        self.ensure_open()?;
        self.broker
            .state
            .lock()
            .exchange_declarations
            .push((name.to_string(), kind));
        Ok(())
    }

    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<String, AmqpError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        if state.failing_queue_declares > 0 {
            state.failing_queue_declares -= 1;
            return Err(AmqpError::DeclareFailed {
                object: format!("queue '{name}'"),
                source: "mock declare failure".into(),
            });
        }

        let queue = if name.is_empty() {
            state.next_queue_id += 1;
            format!("amq.gen-{}", state.next_queue_id)
        } else {
            name.to_string()
        };

        if options.exclusive {
            if let Some(entry) = state.sessions.get_mut(&self.id) {
                entry.exclusive_queues.push(queue.clone());
            }
        }
        state.queue_declarations.push(queue.clone());
        Ok(queue)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        self.ensure_open()?;
        let binding = (
            queue.to_string(),
            exchange.to_string(),
            routing_key.to_string(),
        );
        let mut state = self.broker.state.lock();
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        properties: MessageProperties,
    ) -> Result<(), AmqpError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        if state.publish_failure {
            return Err(AmqpError::PublishFailed("mock publish failure".into()));
        }

        state.route(exchange, routing_key, &payload);
        state.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload,
            properties: Some(properties),
        });
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        state.consumers.retain(|consumer| !consumer.sender.is_closed());
        let conflict = state
            .consumers
            .iter()
            .any(|consumer| consumer.queue == queue && (consumer.exclusive || options.exclusive));
        if conflict {
            return Err(AmqpError::ConsumeFailed {
                queue: queue.to_string(),
                source: format!("ACCESS_REFUSED - queue '{queue}' in exclusive use").into(),
            });
        }

        let (sender, receiver) = delivery::unbounded();
        state.consume_calls.push((queue.to_string(), options));
        state.consumers.push(MockConsumer {
            session_id: self.id,
            queue: queue.to_string(),
            exclusive: options.exclusive,
            sender,
        });
        Ok(receiver.boxed())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let mut state = self.broker.state.lock();
        if state.tear_down(self.id).is_some() {
            state.close_count += 1;
        }
        Ok(())
    }
}

/// Telemetry sink that records every snapshot it is handed
#[derive(Default)]
pub struct RecordingSink {
    snapshots: Mutex<Vec<CarMetadata>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_failure() -> Arc<Self> {
        let sink = Self::default();
        sink.fail.store(true, Ordering::SeqCst);
        Arc::new(sink)
    }

    pub fn snapshots(&self) -> Vec<CarMetadata> {
        self.snapshots.lock().clone()
    }
}

#[async_trait]
impl TelemetrySink for RecordingSink {
    async fn send(&self, snapshot: CarMetadata) -> Result<String, ClientError> {
        self.snapshots.lock().push(snapshot);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Broker(AmqpError::NotConnected {
                state: crate::transport::amqp::ConnectionState::Reconnecting(1),
            }));
        }
        Ok(uuid::Uuid::new_v4().to_string())
    }
}
