//! Responder-side listen loop.
//!
//! Turns every command arriving on the command topic into a domain
//! computation and a correlated reply on the result topic. A bad message or
//! a failed computation costs that one reply and nothing else: the loop logs
//! the error and moves on.
//!
//! ```text
//! AwaitingConnection --(connected)--> Listening --(message)--> Listening
//!         ^                              |
//!         |________(disconnected)________|
//! ```

use crate::config::ResponderSettings;
use crate::connection::Connection;
use crate::error::{HivelinkError, HivelinkResult};
use crate::payload::{CommandPayload, Fields, ResultPayload, Topics};
use crate::queue::InboundEntry;
use crate::transport::QoS;
use color_experiment::{run_color_experiment, ColorCommand};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// How long one idle `take` waits before connectivity is checked again.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// The domain computation plugged into a [`Responder`].
pub trait CommandHandler: Send + Sync {
    /// Compute result fields for one command's parameters.
    fn handle(&self, command: &Fields) -> HivelinkResult<Fields>;
}

impl<F> CommandHandler for F
where
    F: Fn(&Fields) -> HivelinkResult<Fields> + Send + Sync,
{
    fn handle(&self, command: &Fields) -> HivelinkResult<Fields> {
        self(command)
    }
}

/// Simulated color experiment: RGB command in, eight spectral channels out.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorExperiment;

impl CommandHandler for ColorExperiment {
    fn handle(&self, command: &Fields) -> HivelinkResult<Fields> {
        let color = ColorCommand::from_map(command)?;
        Ok(run_color_experiment(color).to_map())
    }
}

pub struct Responder {
    connection: Arc<Connection>,
    topics: Topics,
    handler: Arc<dyn CommandHandler>,
    settings: ResponderSettings,
    qos: QoS,
}

impl Responder {
    pub fn new(
        connection: Arc<Connection>,
        topics: Topics,
        handler: Arc<dyn CommandHandler>,
        settings: ResponderSettings,
    ) -> Self {
        Self {
            connection,
            topics,
            handler,
            settings,
            qos: QoS::STRONGEST,
        }
    }

    /// Override the reply QoS (defaults to the strongest level).
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Serve one inbound entry.
    ///
    /// Entries on other topics are ignored (`Ok(None)`). Returns the reply
    /// that was published.
    pub async fn process_one(&self, entry: InboundEntry) -> HivelinkResult<Option<ResultPayload>> {
        if entry.topic != self.topics.command {
            debug!(topic = %entry.topic, "Ignoring message on other topic");
            return Ok(None);
        }

        let command = CommandPayload::decode(&entry.payload)?;
        debug!(
            experiment_id = %command.experiment_id,
            retained = entry.retained,
            "Command received"
        );

        let sensor_data = self.handler.handle(&command.command)?;
        let result = ResultPayload::for_command(command, sensor_data);

        if !self.settings.reply_delay.is_zero() {
            tokio::time::sleep(self.settings.reply_delay).await;
        }

        self.connection
            .publish(&self.topics.result, result.encode()?, self.qos)
            .await?;
        info!(
            experiment_id = %result.experiment_id,
            topic = %self.topics.result,
            "Result published"
        );
        Ok(Some(result))
    }

    /// Serve commands until the connection's inbound side shuts down.
    ///
    /// Per-message failures are logged and never end the loop.
    ///
    /// Leaving AwaitingConnection is gated on the connection state, not on
    /// the readiness signal: the subscription renewal task consumes each
    /// readiness edge.
    pub async fn run(&self) -> HivelinkResult<()> {
        info!(topic = %self.topics.command, "Responder starting");

        loop {
            if !self.connection.is_connected() {
                info!("Awaiting connection");
                self.connection.wait_connected().await?;
                info!(topic = %self.topics.command, "Listening");
            }

            let entry = match self.connection.queue().take(IDLE_POLL).await {
                Ok(entry) => entry,
                Err(HivelinkError::Timeout(_)) => continue,
                Err(e) => {
                    error!(error = %e, "Inbound queue closed, responder stopping");
                    return Err(e);
                }
            };

            let topic = entry.topic.clone();
            if let Err(e) = self.process_one(entry).await {
                error!(topic = %topic, error = %e, "Command not served");
            }
        }
    }
}

/// Spawn the liveness loop: one log line every `interval`.
pub fn spawn_heartbeat(interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            info!(elapsed_secs = started.elapsed().as_secs(), "Heartbeat");
        }
    })
}
