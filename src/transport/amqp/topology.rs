//! Exchange and queue declarations for the car topology
//!
//! Declarations are idempotent at the broker and repeated on every connect.
//! The private reply queue is broker-named, so its name is re-derived each time.

use super::connection::AmqpError;
use crate::protocol::{RoutingKeys, CAR_EXCHANGE, FANOUT_EXCHANGE, GENERAL_QUEUE};
use crate::transport::{BrokerSession, ExchangeKind, ExchangeOptions, QueueOptions};
use tracing::{debug, info};

/// Declaration of one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: &'static str,
    pub kind: ExchangeKind,
    pub options: ExchangeOptions,
}

/// Exchanges declared on every connect
pub const EXCHANGES: [ExchangeSpec; 2] = [
    ExchangeSpec {
        name: CAR_EXCHANGE,
        kind: ExchangeKind::Topic,
        options: ExchangeOptions {
            durable: true,
            auto_delete: false,
        },
    },
    ExchangeSpec {
        name: FANOUT_EXCHANGE,
        kind: ExchangeKind::Fanout,
        options: ExchangeOptions {
            durable: true,
            auto_delete: false,
        },
    },
];

/// Shared broadcast queue options
pub const GENERAL_QUEUE_OPTIONS: QueueOptions = QueueOptions {
    durable: true,
    auto_delete: false,
    exclusive: false,
};

/// Private reply queue options; the broker assigns the name
pub const PRIVATE_QUEUE_OPTIONS: QueueOptions = QueueOptions {
    durable: false,
    auto_delete: true,
    exclusive: true,
};

/// Queue names in effect for one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundTopology {
    /// Broker-generated, exclusive to this connection
    pub private_queue: String,
    pub general_queue: String,
}

/// Declares and binds the fixed topology
pub struct TopologyBinder;

impl TopologyBinder {
    /// Declare both exchanges, the shared queue and a fresh private queue
    pub async fn declare(session: &dyn BrokerSession) -> Result<BoundTopology, AmqpError> {
        for exchange in EXCHANGES {
            session
                .declare_exchange(exchange.name, exchange.kind, exchange.options)
                .await?;
            debug!(exchange = exchange.name, kind = ?exchange.kind, "Exchange declared");
        }

        let general_queue = session
            .declare_queue(GENERAL_QUEUE, GENERAL_QUEUE_OPTIONS)
            .await?;
        let private_queue = session.declare_queue("", PRIVATE_QUEUE_OPTIONS).await?;
        info!(private_queue = %private_queue, "Private reply queue declared");

        Ok(BoundTopology {
            private_queue,
            general_queue,
        })
    }

    /// Bind the private queue to the topic exchange under its own name
    pub async fn bind_private(
        session: &dyn BrokerSession,
        topology: &BoundTopology,
    ) -> Result<(), AmqpError> {
        let routing_key = RoutingKeys::notification(&topology.private_queue);
        session
            .bind_queue(&topology.private_queue, CAR_EXCHANGE, &routing_key)
            .await?;
        debug!(queue = %topology.private_queue, routing_key = %routing_key, "Private queue bound");
        Ok(())
    }

    /// Bind the shared queue to the fanout exchange
    pub async fn bind_general(
        session: &dyn BrokerSession,
        topology: &BoundTopology,
    ) -> Result<(), AmqpError> {
        session
            .bind_queue(
                &topology.general_queue,
                FANOUT_EXCHANGE,
                RoutingKeys::broadcast(),
            )
            .await?;
        debug!(queue = %topology.general_queue, "Broadcast queue bound");
        Ok(())
    }
}
