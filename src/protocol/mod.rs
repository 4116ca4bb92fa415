//! Wire-level definitions for the car notification system
//!
//! Message bodies and the fixed exchange/queue naming of the broker deployment.

pub mod messages;
pub mod topology;

pub use messages::*;
pub use topology::*;
