//! Hivelink: correlated command/result exchange over a pub/sub broker.
//!
//! An initiator publishes a command tagged with a fresh correlation id and
//! waits for the one result carrying the same id. A responder listens for
//! commands, runs a domain computation on each, and publishes the result
//! with the id copied back.
//!
//! # Core Invariants
//!
//! 1. **Matched or nothing**: an exchange returns only the result whose id
//!    equals the id it generated
//! 2. **Bounded wait**: every exchange ends within its overall budget
//! 3. **Thin delivery path**: the broker client only appends to the inbound
//!    queue; all filtering happens in the consumer
//! 4. **Loop liveness**: a bad command costs one reply, never the responder
//!
//! # Architecture
//!
//! ```text
//! Initiator                  Broker                 Responder
//! Correlator --command--> <ns>/neopixel --------> InboundQueue -> Responder
//!     ^                                                              |
//! InboundQueue <--------- <ns>/as7341 <-----------result------------|
//! ```

pub mod config;
pub mod connection;
pub mod correlation;
pub mod correlator;
pub mod error;
pub mod memory;
pub mod mqtt;
pub mod payload;
pub mod queue;
pub mod readiness;
pub mod records;
pub mod responder;
pub mod transport;

#[cfg(test)]
mod tests;

pub use config::{BrokerSettings, ExchangeTimeouts, ResponderSettings};
pub use connection::{Connection, ConnectionState, Lifecycle};
pub use correlation::CorrelationId;
pub use correlator::{Correlator, Exchange};
pub use error::{HivelinkError, HivelinkResult, TimeoutKind};
pub use memory::MemoryBroker;
pub use mqtt::connect_mqtt;
pub use payload::{CommandPayload, Fields, ResultPayload, Topics};
pub use queue::{Delivery, InboundEntry, InboundQueue, QueueSender};
pub use readiness::ReadinessSignal;
pub use records::{verify, RunRecord, Violation};
pub use responder::{spawn_heartbeat, ColorExperiment, CommandHandler, Responder};
pub use transport::{QoS, Transport};
