//! MQTT transport over rumqttc.
//!
//! The event loop runs in its own task. Its jobs are tracking the
//! connection state, resolving subscription acknowledgements, and appending
//! every inbound publish to the queue; matching and filtering happen on the
//! consuming side.
//!
//! A full inbound queue stalls the event loop for at most
//! [`DELIVERY_WAIT`], after which the message is dropped. Keep-alive pings
//! and QoS handshakes pause while it waits. Traffic that arrives while no
//! exchange is draining the queue (during the settle period, say) is the
//! usual cause.

use crate::config::{BrokerSettings, CONNECT_TIMEOUT, DEFAULT_QUEUE_CAPACITY, DELIVERY_WAIT};
use crate::connection::{Connection, Lifecycle};
use crate::error::{HivelinkError, HivelinkResult};
use crate::queue::{Delivery, InboundEntry, InboundQueue, QueueSender};
use crate::transport::{QoS, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, SubAck,
    SubscribeReasonCode,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Pause between a failed poll and the next reconnect attempt.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Capacity of the client's outgoing request channel.
const REQUEST_CAPACITY: usize = 10;

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

type AckWaiter = oneshot::Sender<HivelinkResult<()>>;

/// Subscribe requests awaiting their SubAck.
///
/// rumqttc assigns the packet id only when the request leaves the client,
/// so waiters queue in request order until the matching outgoing
/// `Subscribe` event names their packet id.
#[derive(Default)]
struct SubscribeAcks {
    queued: VecDeque<AckWaiter>,
    in_flight: HashMap<u16, AckWaiter>,
}

impl SubscribeAcks {
    fn enqueue(&mut self, waiter: AckWaiter) {
        self.queued.push_back(waiter);
    }

    fn sent(&mut self, pkid: u16) {
        match self.queued.pop_front() {
            Some(waiter) => {
                self.in_flight.insert(pkid, waiter);
            }
            None => debug!(pkid, "Subscribe sent without a waiter"),
        }
    }

    fn acked(&mut self, ack: &SubAck) {
        let Some(waiter) = self.in_flight.remove(&ack.pkid) else {
            debug!(pkid = ack.pkid, "SubAck without a waiter");
            return;
        };
        let outcome = if ack
            .return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
        {
            Err(HivelinkError::Transport(
                "broker refused the subscription".to_string(),
            ))
        } else {
            Ok(())
        };
        // The subscriber may have stopped waiting.
        let _ = waiter.send(outcome);
    }

    /// Fail every pending waiter; their acknowledgements died with the
    /// connection.
    fn reset(&mut self) {
        self.queued.clear();
        self.in_flight.clear();
    }
}

/// Outbound half of a rumqttc client.
pub struct MqttTransport {
    client: AsyncClient,
    acks: Arc<Mutex<SubscribeAcks>>,
    /// Keeps waiter order identical to request order.
    subscribe_order: tokio::sync::Mutex<()>,
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> HivelinkResult<()> {
        self.client
            .publish(topic, qos.into(), false, payload)
            .await
            .map_err(|e| HivelinkError::Transport(e.to_string()))
    }

    /// Resolves once the broker acknowledged the subscription.
    async fn subscribe(&self, topic: &str, qos: QoS) -> HivelinkResult<()> {
        let (waiter, acked) = oneshot::channel();
        {
            let _order = self.subscribe_order.lock().await;
            self.acks.lock().enqueue(waiter);
            if let Err(e) = self.client.subscribe(topic, qos.into()).await {
                self.acks.lock().queued.pop_back();
                return Err(HivelinkError::Transport(e.to_string()));
            }
        }

        match tokio::time::timeout(CONNECT_TIMEOUT, acked).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(HivelinkError::Transport(format!(
                "connection lost before {} was acknowledged",
                topic
            ))),
            Err(_) => Err(HivelinkError::Transport(format!(
                "no SubAck for {} within {:?}",
                topic, CONNECT_TIMEOUT
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

fn mqtt_options(settings: &BrokerSettings) -> MqttOptions {
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(settings.keep_alive());
    options.set_credentials(&settings.username, &settings.password);
    options.set_clean_session(true);
    if settings.tls {
        options.set_transport(rumqttc::Transport::tls_with_default_config());
    }
    options
}

/// Connect to the broker described by `settings` and subscribe to
/// `subscribe_topic`.
///
/// Fails with a connection error if the handshake or the subscription does
/// not complete within the connect bound. The subscription is renewed on
/// every reconnect for the lifetime of the returned connection.
pub async fn connect_mqtt(
    settings: &BrokerSettings,
    subscribe_topic: &str,
    qos: QoS,
) -> HivelinkResult<Connection> {
    settings.validate()?;

    info!(
        host = %settings.host,
        port = settings.port,
        tls = settings.tls,
        client_id = %settings.client_id,
        "Connecting to MQTT broker"
    );

    let (client, eventloop) = AsyncClient::new(mqtt_options(settings), REQUEST_CAPACITY);
    let (sender, queue) = InboundQueue::bounded(DEFAULT_QUEUE_CAPACITY);
    let lifecycle = Lifecycle::new();
    let readiness = lifecycle.readiness();
    let state = lifecycle.watch();

    let acks = Arc::new(Mutex::new(SubscribeAcks::default()));
    let transport = Arc::new(MqttTransport {
        client,
        acks: acks.clone(),
        subscribe_order: tokio::sync::Mutex::new(()),
    });
    let mut connection = Connection::new(transport, readiness, state, queue);
    connection.attach(tokio::spawn(drive(eventloop, lifecycle, sender, acks)));

    connection.establish(CONNECT_TIMEOUT).await?;
    connection
        .subscribe_and_renew(subscribe_topic, qos, CONNECT_TIMEOUT)
        .await?;

    info!(host = %settings.host, "Connected to MQTT broker");
    Ok(connection)
}

/// Poll the event loop until the inbound queue goes away.
async fn drive(
    mut eventloop: EventLoop,
    lifecycle: Lifecycle,
    sender: QueueSender,
    acks: Arc<Mutex<SubscribeAcks>>,
) {
    lifecycle.connecting();

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    debug!(session_present = ack.session_present, "ConnAck received");
                    lifecycle.connected();
                } else {
                    warn!(code = ?ack.code, "Broker refused connection");
                }
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => acks.lock().sent(pkid),
            Ok(Event::Incoming(Packet::SubAck(ack))) => acks.lock().acked(&ack),
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let entry = InboundEntry {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                    retained: publish.retain,
                };
                if sender.push_within(entry, DELIVERY_WAIT).await == Delivery::Closed {
                    debug!("Inbound queue closed, stopping MQTT event loop");
                    lifecycle.disconnected();
                    return;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker sent disconnect");
                acks.lock().reset();
                lifecycle.disconnected();
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "MQTT connection lost, reconnecting");
                acks.lock().reset();
                lifecycle.disconnected();
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                lifecycle.connecting();
            }
        }
    }
}
