//! Initiator-side request/response correlation.
//!
//! An exchange publishes one tagged command and then drains the result
//! queue until the reply carrying the same id turns up. Everything else on
//! the queue (other topics, malformed payloads, stale replies from earlier
//! exchanges) is discarded. Two deadlines bound the wait:
//!
//! - `queue_timeout`: silence between two inbound messages
//! - `overall_timeout`: total time since the exchange started publishing
//!
//! The consumer guard on the queue is held from publish to match, so
//! exchanges issued concurrently through one correlator run one after the
//! other and never consume each other's replies. The primitive never
//! retries; a caller wanting another attempt issues a fresh exchange with a
//! fresh id.

use crate::config::ExchangeTimeouts;
use crate::connection::Connection;
use crate::correlation::CorrelationId;
use crate::error::{HivelinkError, HivelinkResult, TimeoutKind};
use crate::payload::{CommandPayload, Fields, ResultPayload, Topics};
use crate::queue::InboundEntry;
use crate::records::RunRecord;
use crate::transport::QoS;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A completed exchange.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub request: CommandPayload,
    pub result: ResultPayload,
    /// Inbound entries consumed and thrown away before the match
    pub discarded: usize,
    pub elapsed: Duration,
}

enum Verdict {
    Match(ResultPayload),
    Discard(&'static str),
}

pub struct Correlator {
    connection: Arc<Connection>,
    topics: Topics,
    timeouts: ExchangeTimeouts,
    qos: QoS,
}

impl Correlator {
    pub fn new(connection: Arc<Connection>, topics: Topics, timeouts: ExchangeTimeouts) -> Self {
        Self {
            connection,
            topics,
            timeouts,
            qos: QoS::STRONGEST,
        }
    }

    /// Override the publish QoS (defaults to the strongest level).
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn timeouts(&self) -> ExchangeTimeouts {
        self.timeouts
    }

    /// Publish `command` under a fresh id and return the matching result.
    pub async fn exchange(&self, command: Fields) -> HivelinkResult<ResultPayload> {
        self.exchange_with_id(command, CorrelationId::generate())
            .await
    }

    /// Like [`exchange`](Self::exchange) with a caller-chosen id.
    pub async fn exchange_with_id(
        &self,
        command: Fields,
        id: CorrelationId,
    ) -> HivelinkResult<ResultPayload> {
        Ok(self.send(CommandPayload::new(command, id)).await?.result)
    }

    /// Run one exchange for a fully built request.
    pub async fn send(&self, request: CommandPayload) -> HivelinkResult<Exchange> {
        let ExchangeTimeouts {
            queue_timeout,
            overall_timeout,
        } = self.timeouts;

        let payload = request.encode()?;
        let mut queue = self.connection.queue().lock().await;

        // The overall budget includes a publish stalled on backpressure.
        let started = Instant::now();
        let publish = self
            .connection
            .publish(&self.topics.command, payload, self.qos);
        match tokio::time::timeout(overall_timeout, publish).await {
            Ok(published) => published?,
            Err(_) => return Err(self.overall_expired(&request, 0)),
        }

        info!(
            experiment_id = %request.experiment_id,
            topic = %self.topics.command,
            "Command published, awaiting result"
        );

        let mut discarded = 0usize;
        loop {
            let remaining = overall_timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(self.overall_expired(&request, discarded));
            }

            let window = queue_timeout.min(remaining);
            let entry = match queue.take(window).await {
                Ok(entry) => entry,
                Err(HivelinkError::Timeout(_)) if window < queue_timeout => {
                    return Err(self.overall_expired(&request, discarded));
                }
                Err(e) => {
                    warn!(
                        experiment_id = %request.experiment_id,
                        discarded,
                        error = %e,
                        "Exchange failed while waiting for result"
                    );
                    return Err(e);
                }
            };

            match self.judge(&request, entry) {
                Verdict::Match(result) => {
                    let elapsed = started.elapsed();
                    info!(
                        experiment_id = %request.experiment_id,
                        discarded,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Result matched"
                    );
                    return Ok(Exchange {
                        request,
                        result,
                        discarded,
                        elapsed,
                    });
                }
                Verdict::Discard(reason) => {
                    discarded += 1;
                    debug!(
                        experiment_id = %request.experiment_id,
                        reason,
                        "Inbound entry discarded"
                    );
                }
            }
        }
    }

    fn judge(&self, request: &CommandPayload, entry: InboundEntry) -> Verdict {
        if entry.topic != self.topics.result {
            return Verdict::Discard("other topic");
        }

        let result = match ResultPayload::decode(&entry.payload) {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    topic = %entry.topic,
                    payload_len = entry.payload.len(),
                    error = %e,
                    "Discarding malformed result"
                );
                return Verdict::Discard("malformed");
            }
        };

        if result.experiment_id != request.experiment_id {
            debug!(
                found = %result.experiment_id,
                retained = entry.retained,
                "Stale or foreign result"
            );
            return Verdict::Discard("foreign id");
        }

        if !result.answers(request) {
            warn!(
                experiment_id = %request.experiment_id,
                "Result id matches but command fields differ"
            );
        }
        Verdict::Match(result)
    }

    fn overall_expired(&self, request: &CommandPayload, discarded: usize) -> HivelinkError {
        warn!(
            experiment_id = %request.experiment_id,
            discarded,
            "Overall exchange budget exhausted"
        );
        HivelinkError::Timeout(TimeoutKind::Overall(self.timeouts.overall_timeout))
    }

    /// Run `commands` one after another with `pause` between exchanges.
    ///
    /// Stops at the first failed exchange.
    pub async fn run_batch(
        &self,
        commands: Vec<Fields>,
        pause: Duration,
    ) -> HivelinkResult<RunRecord> {
        let total = commands.len();
        let mut record = RunRecord::default();

        for (index, command) in commands.into_iter().enumerate() {
            if index > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }

            let request = CommandPayload::new(command, CorrelationId::generate());
            info!(
                index,
                total,
                experiment_id = %request.experiment_id,
                "Starting exchange"
            );
            let exchange = self.send(request).await?;
            record.push(exchange.request, exchange.result);
        }

        Ok(record)
    }
}
