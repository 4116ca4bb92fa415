//! carlink - broker-backed telemetry and notification client for simulated cars
//!
//! # Overview
//!
//! A car publishes metadata snapshots (position, battery) to a topic exchange
//! and receives two kinds of notifications back:
//! - correlated replies on a private, broker-named queue, matched to the
//!   publish that caused them by correlation id
//! - broadcasts from a fanout exchange, shared with every other car
//!
//! The crate provides:
//! - An AMQP connection manager with a fixed-interval reconnect loop and a
//!   ready gate every broker operation passes through
//! - Topology declaration matching the existing broker deployment
//! - A publisher, a demultiplexing consumer and a correlation tracker
//! - A car simulation that drives the publisher
//! - A small HTTP client for the notification backend
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use carlink::client::{CarClient, NotificationFeed};
//! use carlink::config::ClientConfig;
//! use carlink::simulation::SimulationDriver;
//! use carlink::transport::amqp::AmqpConnector;
//! use parking_lot::Mutex;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = ClientConfig::default();
//! let client = CarClient::new(Arc::new(AmqpConnector::new()), &config.broker);
//! client.connect().await?;
//!
//! let feed = Arc::new(Mutex::new(NotificationFeed::new(config.feed.capacity)));
//! client.consume_notifications(NotificationFeed::handler(feed.clone())).await?;
//!
//! let simulation = SimulationDriver::from_config(&config.simulation)
//!     .start(Arc::new(client.publisher().clone()));
//! # simulation.stop();
//! # client.shutdown().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod simulation;
pub mod testing;
pub mod transport;

pub use client::{CarClient, CorrelationTracker, NotificationFeed, NotificationHandler};
pub use config::*;
pub use error::{ClientError, ClientResult};
pub use protocol::*;
pub use transport::amqp::{ConnectionManager, ConnectionState};
