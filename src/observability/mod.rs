//! Observability for the car client
//!
//! Structured logging only; connection health is exposed by
//! [`crate::transport::amqp::HealthMetrics`].

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat, LogSettings};

// Span macros for structured logging
pub use logging::{broker_span, simulation_span};
