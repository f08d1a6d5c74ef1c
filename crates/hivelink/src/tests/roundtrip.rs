//! Full round trips over the in-memory broker.

use super::harness::{fast_timeouts, rgb, TestHarness};
use crate::config::ResponderSettings;
use crate::correlation::CorrelationId;
use crate::payload::CommandPayload;
use crate::records::{verify, RunRecord};
use crate::responder::ColorExperiment;
use color_experiment::Gemstone;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn assert_close(actual: &Value, expected: f64) {
    let actual = actual.as_f64().unwrap();
    assert!((actual - expected).abs() < 1e-9, "{} != {}", actual, expected);
}

#[tokio::test]
async fn test_sapphire_round_trip_wire_shape() {
    let harness = TestHarness::new();
    let _responder = harness
        .spawn_responder(Arc::new(ColorExperiment), ResponderSettings::default())
        .await;
    let correlator = harness.correlator(fast_timeouts()).await;

    let result = correlator
        .exchange_with_id(rgb(15, 82, 186), "a1b2c3d4".into())
        .await
        .unwrap();

    // Inspect the reply exactly as it crossed the broker.
    let wire = harness
        .broker
        .history()
        .into_iter()
        .find(|m| m.topic == "lab-7/as7341")
        .unwrap();
    let value: Value = serde_json::from_slice(&wire.payload).unwrap();

    assert_eq!(value["command"], json!({"R": 15, "G": 82, "B": 186}));
    assert_eq!(value["experiment_id"], json!("a1b2c3d4"));

    let mut keys: Vec<&String> = value["sensor_data"].as_object().unwrap().keys().collect();
    keys.sort();
    assert_eq!(
        keys,
        ["ch410", "ch440", "ch470", "ch510", "ch550", "ch583", "ch620", "ch670"]
    );

    // ch410 = 0.1*15 + 0.2*82 + 0.9*186
    assert_close(&value["sensor_data"]["ch410"], 185.3);
    assert_close(&value["sensor_data"]["ch670"], 15.0 + 0.2 * 82.0);
    assert_eq!(Value::Object(result.sensor_data), value["sensor_data"]);
}

#[tokio::test]
async fn test_leftover_reply_in_flight_does_not_match_next_exchange() {
    let harness = TestHarness::new();
    let _responder = harness
        .spawn_responder(Arc::new(ColorExperiment), ResponderSettings::default())
        .await;
    let correlator = harness.correlator(fast_timeouts()).await;

    // A command published behind the correlator's back; its reply will be
    // in flight while the next exchange drains.
    let orphan = CommandPayload::new(rgb(15, 82, 186), "a1b2c3d4".into());
    harness
        .broker
        .inject(&harness.topics.command, orphan.encode().unwrap())
        .await;

    let request = CommandPayload::new(rgb(15, 82, 186), CorrelationId::generate());
    let exchange = correlator.send(request.clone()).await.unwrap();

    assert_eq!(exchange.result.experiment_id, request.experiment_id);
    assert_ne!(exchange.result.experiment_id.as_str(), "a1b2c3d4");
}

#[tokio::test]
async fn test_gemstone_batch_record_persists_and_verifies() {
    let harness = TestHarness::new();
    let _responder = harness
        .spawn_responder(Arc::new(ColorExperiment), ResponderSettings::default())
        .await;
    let correlator = harness.correlator(fast_timeouts()).await;

    let commands = Gemstone::ALL.iter().map(|g| g.command().to_map()).collect();
    let record = correlator
        .run_batch(commands, Duration::from_millis(20))
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    record.write(dir.path()).unwrap();
    let loaded = RunRecord::load(dir.path()).unwrap();

    assert_eq!(loaded, record);
    assert!(verify(&loaded).is_empty());
    assert_eq!(loaded.results[1].command, rgb(155, 17, 30));
}

#[tokio::test(flavor = "current_thread")]
async fn test_cooperative_single_thread_shape() {
    // Responder loop, subscription renewal, heartbeat and initiator all
    // share one thread and only yield at awaits.
    let harness = TestHarness::new();
    let heartbeat = crate::responder::spawn_heartbeat(Duration::from_millis(20));
    let _responder = harness
        .spawn_responder(Arc::new(ColorExperiment), ResponderSettings::default())
        .await;
    let correlator = harness.correlator(fast_timeouts()).await;

    for gem in Gemstone::ALL {
        let result = correlator.exchange(gem.command().to_map()).await.unwrap();
        assert_eq!(result.command, gem.command().to_map());
    }
    heartbeat.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_threaded_shape() {
    let harness = TestHarness::new();
    let _responder = harness
        .spawn_responder(
            Arc::new(ColorExperiment),
            ResponderSettings {
                reply_delay: Duration::from_millis(10),
                ..Default::default()
            },
        )
        .await;
    let correlator = harness.correlator(fast_timeouts()).await;

    let record = correlator
        .run_batch(vec![rgb(1, 2, 3), rgb(4, 5, 6)], Duration::ZERO)
        .await
        .unwrap();
    assert!(verify(&record).is_empty());
}
