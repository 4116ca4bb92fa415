//! Transport layer for broker communication
//!
//! This module provides the broker abstraction the client core is written
//! against, and the AMQP implementation used in production.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod amqp;

pub use amqp::{AmqpError, BrokerEndpoint};

/// Exchange routing behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Routes by pattern-matching the routing key
    Topic,
    /// Delivers to every bound queue, ignoring routing keys
    Fanout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExchangeOptions {
    pub durable: bool,
    pub auto_delete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueOptions {
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsumeOptions {
    /// Deliveries are settled by the broker on send
    pub no_ack: bool,
    pub exclusive: bool,
}

/// Properties stamped on a published message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: String,
    pub correlation_id: String,
    pub reply_to: String,
}

/// Raw message bodies delivered by one subscription
pub type DeliveryStream = BoxStream<'static, Result<Vec<u8>, AmqpError>>;

/// Asynchronous fault raised by the transport after a session was opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerFault {
    Transport(String),
    Channel(String),
}

impl std::fmt::Display for BrokerFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerFault::Transport(reason) => write!(f, "transport fault: {reason}"),
            BrokerFault::Channel(reason) => write!(f, "channel fault: {reason}"),
        }
    }
}

pub type FaultSender = mpsc::UnboundedSender<BrokerFault>;
pub type FaultReceiver = mpsc::UnboundedReceiver<BrokerFault>;

/// Opens sessions to the broker
///
/// Injected into the connection manager so it can be driven by a mock broker
/// in tests.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open the transport and its single logical channel
    ///
    /// Faults observed after this returns are reported on `faults`.
    async fn open(
        &self,
        endpoint: &BrokerEndpoint,
        faults: FaultSender,
    ) -> Result<Arc<dyn BrokerSession>, AmqpError>;
}

/// One transport connection plus its channel
#[async_trait]
pub trait BrokerSession: Send + Sync {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> Result<(), AmqpError>;

    /// Declare a queue; an empty name asks the broker to generate one.
    /// Returns the effective queue name.
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<String, AmqpError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError>;

    /// Hand a message to the channel without waiting for a broker confirm
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        properties: MessageProperties,
    ) -> Result<(), AmqpError>;

    async fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError>;

    /// Both the transport and the channel are usable
    fn is_open(&self) -> bool;

    /// Close the channel then the transport, skipping whichever is already closed
    async fn close(&self) -> Result<(), AmqpError>;
}
