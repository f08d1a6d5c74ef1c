//! Timeout fidelity.
//!
//! A silent queue fails the exchange after `queue_timeout`; a queue kept
//! busy with non-matching traffic fails it once `overall_timeout` is spent.
//! Replies that arrive after their exchange gave up are discarded by the
//! next exchange.

use super::harness::{fast_timeouts, reply_with_id, rgb, ManualLink, TestHarness};
use crate::config::{ExchangeTimeouts, ResponderSettings};
use crate::correlation::CorrelationId;
use crate::correlator::Correlator;
use crate::error::{HivelinkError, TimeoutKind};
use crate::payload::{CommandPayload, Topics};
use crate::queue::InboundEntry;
use crate::responder::ColorExperiment;
use crate::transport::QoS;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_silent_broker_fails_with_queue_timeout() {
    let harness = TestHarness::new();
    let timeouts = ExchangeTimeouts {
        queue_timeout: Duration::from_millis(100),
        overall_timeout: Duration::from_secs(10),
    };
    let correlator = harness.correlator(timeouts).await;

    let started = Instant::now();
    let err = correlator.exchange(rgb(1, 1, 1)).await.unwrap_err();

    assert!(matches!(
        err,
        HivelinkError::Timeout(TimeoutKind::Queue(d)) if d == Duration::from_millis(100)
    ));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_busy_queue_fails_with_overall_timeout() {
    let link = ManualLink::new(8);
    let topics = Topics::new("lab-7");
    let timeouts = ExchangeTimeouts {
        queue_timeout: Duration::from_millis(200),
        overall_timeout: Duration::from_millis(500),
    };
    let correlator = Correlator::new(link.connection.clone(), topics.clone(), timeouts);

    // Keep the queue warm with foreign replies so no single take ever
    // waits the full queue timeout.
    let spammer = {
        let sender = link.sender.clone();
        let topic = topics.result.clone();
        tokio::spawn(async move {
            let foreign = CommandPayload::new(rgb(0, 0, 0), "foreign".into());
            loop {
                let entry = InboundEntry::new(topic.clone(), reply_with_id(&foreign, "x"));
                if !sender.push(entry).await {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
    };

    let started = Instant::now();
    let err = correlator.exchange(rgb(1, 2, 3)).await.unwrap_err();
    let elapsed = started.elapsed();
    spammer.abort();

    assert!(matches!(
        err,
        HivelinkError::Timeout(TimeoutKind::Overall(d)) if d == Duration::from_millis(500)
    ));
    assert!(elapsed >= Duration::from_millis(500));
    // Bounded by the overall budget plus at most one queue window.
    assert!(elapsed < Duration::from_millis(500 + 200 + 300), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_overall_budget_caps_final_take() {
    let link = ManualLink::new(8);
    let timeouts = ExchangeTimeouts {
        queue_timeout: Duration::from_secs(5),
        overall_timeout: Duration::from_millis(150),
    };
    let correlator = Correlator::new(link.connection.clone(), Topics::new("lab-7"), timeouts);

    let started = Instant::now();
    let err = correlator.exchange(rgb(1, 2, 3)).await.unwrap_err();

    assert!(matches!(err, HivelinkError::Timeout(TimeoutKind::Overall(_))));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_stalled_publish_counts_against_overall_budget() {
    let harness = TestHarness::new();

    // A device that never drains its command queue, already full.
    let _stuck_device = harness
        .broker
        .connect_with(&harness.topics.command, QoS::STRONGEST, 1, Duration::from_secs(1))
        .await
        .unwrap();
    harness
        .broker
        .inject(&harness.topics.command, b"backlog".to_vec())
        .await;

    let correlator = harness
        .correlator(ExchangeTimeouts {
            queue_timeout: Duration::from_secs(5),
            overall_timeout: Duration::from_millis(300),
        })
        .await;

    let started = Instant::now();
    let err = correlator.exchange(rgb(1, 2, 3)).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(
        err,
        HivelinkError::Timeout(TimeoutKind::Overall(d)) if d == Duration::from_millis(300)
    ));
    assert!(elapsed < Duration::from_millis(800), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_late_reply_is_discarded_by_next_exchange() {
    let harness = TestHarness::new();
    let _responder = harness
        .spawn_responder(
            Arc::new(ColorExperiment),
            ResponderSettings {
                reply_delay: Duration::from_millis(300),
                ..Default::default()
            },
        )
        .await;

    let connection = harness.initiator_connection().await;
    let impatient = Correlator::new(
        connection.clone(),
        harness.topics.clone(),
        ExchangeTimeouts {
            queue_timeout: Duration::from_millis(50),
            overall_timeout: Duration::from_secs(1),
        },
    );
    let patient = Correlator::new(connection, harness.topics.clone(), fast_timeouts());

    let abandoned = CommandPayload::new(rgb(9, 9, 9), CorrelationId::generate());
    let err = impatient.send(abandoned.clone()).await.unwrap_err();
    assert!(err.is_timeout());

    // The responder still answers the abandoned command; that reply lands
    // while the next exchange is draining.
    let request = CommandPayload::new(rgb(7, 7, 7), CorrelationId::generate());
    let exchange = patient.send(request.clone()).await.unwrap();

    assert_eq!(exchange.result.experiment_id, request.experiment_id);
    assert_eq!(exchange.discarded, 1);
}
