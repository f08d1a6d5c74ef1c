//! Publish/subscribe seam.
//!
//! Everything above this trait is broker-agnostic. Inbound traffic does not
//! flow through the trait; each transport appends delivered messages to the
//! [`InboundQueue`](crate::queue::InboundQueue) it was built with.

use crate::error::HivelinkResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broker delivery-guarantee tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    /// Level used for command and result traffic.
    pub const STRONGEST: QoS = QoS::ExactlyOnce;

    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl Default for QoS {
    fn default() -> Self {
        QoS::STRONGEST
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "qos{}", self.level())
    }
}

/// Outbound half of a broker client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand `payload` to the client for delivery on `topic`.
    ///
    /// Returns once the client has accepted the message; delivery itself is
    /// governed by `qos`.
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> HivelinkResult<()>;

    /// Ask the broker to route `topic` to this client's inbound queue.
    ///
    /// Returns once the broker has acknowledged the subscription. A refusal
    /// is a transport error.
    async fn subscribe(&self, topic: &str, qos: QoS) -> HivelinkResult<()>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}
