//! Organization-assignment event consumer
//!
//! Keeps the employee-to-organization assignments of every tenant current between
//! full syncs by applying the lifecycle events published on a Redis stream.

pub mod consumer;
pub mod handler;
pub mod stream;

pub use consumer::{AssignmentConsumer, BatchStats};
pub use handler::{AssignmentEventHandler, HandleOutcome, SkipReason};
pub use stream::{decode_fields, EventStream, RedisEventStream, StreamMessage};
