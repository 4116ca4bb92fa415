//! AMQP 0-9-1 client for the car messaging topology
//!
//! Pure state and decision logic is kept apart from the I/O so the
//! reconnection behaviour can be exercised against a mock broker.
//!
//! # Architecture
//!
//! - [`connection`] - Connection states, reconnect policy, endpoint and errors
//! - [`health_monitor`] - Pure state transitions and health metrics
//! - [`topology`] - Exchange and queue declarations
//! - [`session`] - Impure lapin-backed sessions
//! - [`manager`] - Connection lifecycle, retry timer and ready gate
//!
//! # Usage
//!
//! ```rust,no_run
//! use carlink::config::BrokerSection;
//! use carlink::transport::amqp::{AmqpConnector, ConnectionManager};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let manager = ConnectionManager::from_config(
//!     Arc::new(AmqpConnector::new()),
//!     &BrokerSection::default(),
//! );
//! manager.connect().await?;
//! let link = manager.ready_link().await?;
//! println!("replies arrive on {}", link.topology.private_queue);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod connection;
pub mod health_monitor;
pub mod manager;
pub mod session;
pub mod topology;

pub use connection::{AmqpError, BrokerEndpoint, ConnectionState, ReconnectConfig};
pub use health_monitor::{ConnectionEvent, HealthMetrics, HealthMonitor};
pub use manager::{ConnectionManager, Link};
pub use session::{AmqpConnector, AmqpSession};
pub use topology::{BoundTopology, TopologyBinder};
