//! Connection lifecycle.
//!
//! A [`Lifecycle`] is held by whatever drives the broker client (the MQTT
//! event loop, or the in-memory broker). It is the only writer of the
//! connection state and of the readiness signal. A [`Connection`] is the
//! read-side bundle handed to correlators and responders: the transport,
//! the inbound queue, and views of the state.
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!       ^                          |
//!       |______ disconnect ________|
//! ```

use crate::error::{HivelinkError, HivelinkResult};
use crate::queue::InboundQueue;
use crate::readiness::ReadinessSignal;
use crate::transport::{QoS, Transport};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Broker connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Write side of the connection state, owned by the client driver.
#[derive(Debug)]
pub struct Lifecycle {
    state: watch::Sender<ConnectionState>,
    readiness: ReadinessSignal,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            readiness: ReadinessSignal::new(),
        }
    }

    pub fn connecting(&self) {
        self.state.send_replace(ConnectionState::Connecting);
    }

    /// Handshake completed. Raises readiness once for this connect.
    pub fn connected(&self) {
        let previous = self.state.send_replace(ConnectionState::Connected);
        if previous != ConnectionState::Connected {
            self.readiness.set();
        }
    }

    /// Connection lost. Lowers readiness.
    pub fn disconnected(&self) {
        self.state.send_replace(ConnectionState::Disconnected);
        self.readiness.clear();
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn readiness(&self) -> ReadinessSignal {
        self.readiness.clone()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// An established broker connection with its inbound queue.
///
/// Background tasks attached to the connection (client driver, subscription
/// renewal) are aborted when it is dropped.
pub struct Connection {
    transport: Arc<dyn Transport>,
    readiness: ReadinessSignal,
    state: watch::Receiver<ConnectionState>,
    queue: InboundQueue,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    pub fn new(
        transport: Arc<dyn Transport>,
        readiness: ReadinessSignal,
        state: watch::Receiver<ConnectionState>,
        queue: InboundQueue,
    ) -> Self {
        Self {
            transport,
            readiness,
            state,
            queue,
            tasks: Vec::new(),
        }
    }

    /// Tie a background task's lifetime to this connection.
    pub fn attach(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    /// Wait for the handshake to complete within `connect_timeout`.
    pub async fn establish(&self, connect_timeout: Duration) -> HivelinkResult<()> {
        match tokio::time::timeout(connect_timeout, self.wait_connected()).await {
            Ok(result) => result,
            Err(_) => Err(HivelinkError::Connection(format!(
                "{} handshake did not complete within {:?}",
                self.transport.name(),
                connect_timeout
            ))),
        }
    }

    /// Subscribe to `topic` within `bound`, then keep the subscription alive
    /// across reconnects.
    ///
    /// A subscription the broker refuses or never acknowledges within `bound`
    /// is a connection error.
    pub async fn subscribe_and_renew(
        &mut self,
        topic: &str,
        qos: QoS,
        bound: Duration,
    ) -> HivelinkResult<()> {
        match tokio::time::timeout(bound, self.transport.subscribe(topic, qos)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(HivelinkError::Connection(format!(
                    "subscribe to {} failed: {}",
                    topic, e
                )))
            }
            Err(_) => {
                return Err(HivelinkError::Connection(format!(
                    "subscribe to {} did not complete within {:?}",
                    topic, bound
                )))
            }
        }
        info!(topic = %topic, qos = %qos, "Subscribed");

        let renewal = self.spawn_resubscribe(topic, qos);
        self.attach(renewal);
        Ok(())
    }

    /// Spawn the renewal task: each time readiness is raised, lower it and
    /// re-issue the subscription.
    pub fn spawn_resubscribe(&self, topic: &str, qos: QoS) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let readiness = self.readiness.clone();
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                readiness.wait().await;
                readiness.clear();
                match transport.subscribe(&topic, qos).await {
                    Ok(()) => debug!(topic = %topic, "Subscription renewed"),
                    Err(e) => error!(topic = %topic, error = %e, "Failed to renew subscription"),
                }
            }
        })
    }

    /// Publish through the transport. Delivery is left to `qos`.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> HivelinkResult<()> {
        let payload_len = payload.len();
        self.transport.publish(topic, payload, qos).await.map_err(|e| {
            warn!(topic = %topic, payload_len, error = %e, "Publish rejected");
            e
        })?;
        debug!(topic = %topic, payload_len, qos = %qos, "Published");
        Ok(())
    }

    /// Suspend until the state is `Connected`.
    pub async fn wait_connected(&self) -> HivelinkResult<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .map(|_| ())
            .map_err(|_| HivelinkError::Connection("client driver has stopped".to_string()))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn readiness(&self) -> &ReadinessSignal {
        &self.readiness
    }

    pub fn queue(&self) -> &InboundQueue {
        &self.queue
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("transport", &self.transport.name())
            .field("state", &self.state())
            .field("ready", &self.readiness.is_set())
            .finish()
    }
}
