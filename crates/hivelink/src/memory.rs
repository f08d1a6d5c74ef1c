//! In-process broker.
//!
//! Routes every publish to the inbound queue of each connected client that
//! subscribed to exactly that topic. Used by the test suites and by the
//! `demo` subcommand, and able to simulate a broker-wide outage.

use crate::config::{CONNECT_TIMEOUT, DEFAULT_QUEUE_CAPACITY, DELIVERY_WAIT};
use crate::connection::{Connection, ConnectionState, Lifecycle};
use crate::error::{HivelinkError, HivelinkResult};
use crate::queue::{Delivery, InboundEntry, InboundQueue, QueueSender};
use crate::transport::{QoS, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A message as seen by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

struct ClientSlot {
    sender: QueueSender,
    lifecycle: Lifecycle,
    topics: HashSet<String>,
}

impl ClientSlot {
    fn is_connected(&self) -> bool {
        self.lifecycle.state() == ConnectionState::Connected
    }
}

#[derive(Default)]
struct BrokerState {
    online: bool,
    next_client: u64,
    clients: HashMap<u64, ClientSlot>,
    history: Vec<PublishedMessage>,
}

/// Shared handle to an in-process broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// A new broker that accepts connections.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                online: true,
                ..Default::default()
            })),
        }
    }

    /// Connect a client subscribed to `subscribe_topic`.
    pub async fn connect(&self, subscribe_topic: &str, qos: QoS) -> HivelinkResult<Connection> {
        self.connect_with(subscribe_topic, qos, DEFAULT_QUEUE_CAPACITY, CONNECT_TIMEOUT)
            .await
    }

    /// Connect with an explicit queue capacity and handshake bound.
    pub async fn connect_with(
        &self,
        subscribe_topic: &str,
        qos: QoS,
        capacity: usize,
        connect_timeout: Duration,
    ) -> HivelinkResult<Connection> {
        let (sender, queue) = InboundQueue::bounded(capacity);
        let lifecycle = Lifecycle::new();
        let readiness = lifecycle.readiness();
        let state_rx = lifecycle.watch();

        let client_id = {
            let mut state = self.state.lock();
            let id = state.next_client;
            state.next_client += 1;
            lifecycle.connecting();
            if state.online {
                lifecycle.connected();
            }
            state.clients.insert(
                id,
                ClientSlot {
                    sender,
                    lifecycle,
                    topics: HashSet::new(),
                },
            );
            id
        };

        let transport = Arc::new(MemoryTransport {
            broker: self.clone(),
            client_id,
        });
        let mut connection = Connection::new(transport, readiness, state_rx, queue);

        let established = async {
            connection.establish(connect_timeout).await?;
            connection
                .subscribe_and_renew(subscribe_topic, qos, connect_timeout)
                .await
        };
        if let Err(e) = established.await {
            self.state.lock().clients.remove(&client_id);
            return Err(e);
        }

        debug!(client_id, topic = %subscribe_topic, "Memory client connected");
        Ok(connection)
    }

    /// Drop every client's connection and subscriptions, and refuse new
    /// handshakes until [`restore`](Self::restore).
    pub fn outage(&self) {
        let mut state = self.state.lock();
        state.online = false;
        for slot in state.clients.values_mut() {
            slot.topics.clear();
            slot.lifecycle.disconnected();
        }
        info!(clients = state.clients.len(), "Memory broker outage");
    }

    /// Bring the broker back; every client reconnects.
    pub fn restore(&self) {
        let mut state = self.state.lock();
        state.online = true;
        for slot in state.clients.values_mut() {
            slot.lifecycle.connecting();
            slot.lifecycle.connected();
        }
        info!(clients = state.clients.len(), "Memory broker restored");
    }

    /// Number of connected clients subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .clients
            .values()
            .filter(|slot| slot.is_connected() && slot.topics.contains(topic))
            .count()
    }

    /// Every message routed so far, in publish order.
    pub fn history(&self) -> Vec<PublishedMessage> {
        self.state.lock().history.clone()
    }

    /// Publish as an external client, outside any connection.
    pub async fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        self.route(topic, payload.into(), QoS::STRONGEST).await;
    }

    async fn route(&self, topic: &str, payload: Vec<u8>, qos: QoS) {
        let targets: Vec<QueueSender> = {
            let mut state = self.state.lock();
            state.history.push(PublishedMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
                qos,
            });
            state
                .clients
                .values()
                .filter(|slot| slot.is_connected() && slot.topics.contains(topic))
                .map(|slot| slot.sender.clone())
                .collect()
        };

        for sender in targets {
            let entry = InboundEntry::new(topic, payload.clone());
            if sender.push_within(entry, DELIVERY_WAIT).await == Delivery::Closed {
                debug!(topic = %topic, "Subscriber gone, message dropped");
            }
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// One client's view of a [`MemoryBroker`].
pub struct MemoryTransport {
    broker: MemoryBroker,
    client_id: u64,
}

impl MemoryTransport {
    fn ensure_connected(&self) -> HivelinkResult<()> {
        let state = self.broker.state.lock();
        match state.clients.get(&self.client_id) {
            Some(slot) if slot.is_connected() => Ok(()),
            Some(_) => Err(HivelinkError::Transport("client is disconnected".to_string())),
            None => Err(HivelinkError::Transport("client is not registered".to_string())),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> HivelinkResult<()> {
        self.ensure_connected()?;
        self.broker.route(topic, payload, qos).await;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> HivelinkResult<()> {
        let mut state = self.broker.state.lock();
        match state.clients.get_mut(&self.client_id) {
            Some(slot) if slot.is_connected() => {
                slot.topics.insert(topic.to_string());
                Ok(())
            }
            _ => Err(HivelinkError::Transport("client is disconnected".to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.broker.state.lock().clients.remove(&self.client_id);
    }
}
