//! Mismatch rejection.
//!
//! Foreign ids, malformed payloads and entries on other topics ahead of the
//! true match are consumed and discarded; the match is returned; nothing
//! after the match is consumed.

use super::harness::{fast_timeouts, reply_to, reply_with_id, rgb, ManualLink, TestHarness};
use crate::correlation::CorrelationId;
use crate::correlator::Correlator;
use crate::payload::{CommandPayload, Topics};
use std::time::Duration;

fn manual_correlator(link: &ManualLink) -> (Correlator, Topics) {
    let topics = Topics::new("lab-7");
    let correlator = Correlator::new(link.connection.clone(), topics.clone(), fast_timeouts());
    (correlator, topics)
}

#[tokio::test]
async fn test_consumes_exactly_k_plus_one_entries() {
    let link = ManualLink::new(32);
    let (correlator, topics) = manual_correlator(&link);
    let request = CommandPayload::new(rgb(15, 82, 186), "a1b2c3d4".into());

    let exchange = {
        let request = request.clone();
        async move { correlator.send(request).await }
    };
    let feed = async {
        link.await_publish(1).await;

        let junk: Vec<(String, Vec<u8>)> = vec![
            (topics.result.clone(), reply_with_id(&request, "deadbeef")),
            (topics.result.clone(), b"{not json".to_vec()),
            (topics.result.clone(), b"[1,2,3]".to_vec()),
            (topics.result.clone(), vec![0xff, 0xfe]),
            (topics.result.clone(), br#"{"command":{},"experiment_id":"a1b2c3d4"}"#.to_vec()),
            (topics.command.clone(), reply_to(&request)),
            (topics.result.clone(), reply_with_id(&request, "a1b2c3d")),
        ];
        let k = junk.len();
        for (topic, payload) in junk {
            link.deliver(&topic, payload).await;
        }
        link.deliver(&topics.result, reply_to(&request)).await;
        link.deliver(&topics.result, reply_with_id(&request, "after-1")).await;
        link.deliver(&topics.result, reply_to(&request)).await;
        k
    };

    let (exchange, k) = tokio::join!(exchange, feed);
    let exchange = exchange.unwrap();

    assert_eq!(exchange.result.experiment_id, request.experiment_id);
    assert_eq!(exchange.discarded, k);

    // The two entries behind the match are still queued, in order.
    let mut queue = link.connection.queue().lock().await;
    let next = queue.try_take().unwrap();
    assert_eq!(next.payload, reply_with_id(&request, "after-1"));
    assert_eq!(queue.try_take().unwrap().payload, reply_to(&request));
    assert!(queue.try_take().is_none());
}

#[tokio::test]
async fn test_stale_reply_from_abandoned_exchange_is_skipped() {
    let harness = TestHarness::new();
    let stale_id = CorrelationId::generate();
    let scripted = {
        let stale_id = stale_id.clone();
        harness
            .spawn_scripted(move |command| {
                // Answer the abandoned exchange first, then this one.
                vec![
                    reply_with_id(command, stale_id.as_str()),
                    reply_with_id(command, stale_id.as_str()),
                    reply_to(command),
                ]
            })
            .await
    };
    let correlator = harness.correlator(fast_timeouts()).await;

    let request = CommandPayload::new(rgb(155, 17, 30), CorrelationId::generate());
    let exchange = correlator.send(request.clone()).await.unwrap();

    assert_eq!(exchange.result.experiment_id, request.experiment_id);
    assert_eq!(exchange.discarded, 2);
    assert_eq!(scripted.received().len(), 1);
}

#[tokio::test]
async fn test_many_foreign_replies_beyond_queue_capacity() {
    let harness = TestHarness::new();
    let _scripted = harness
        .spawn_scripted(|command| {
            let mut replies: Vec<Vec<u8>> = (0..20)
                .map(|i| reply_with_id(command, &format!("foreign-{}", i)))
                .collect();
            replies.push(reply_to(command));
            replies
        })
        .await;
    let correlator = harness.correlator(fast_timeouts()).await;

    let request = CommandPayload::new(rgb(80, 200, 120), CorrelationId::generate());
    let exchange = correlator.send(request.clone()).await.unwrap();

    assert_eq!(exchange.result.experiment_id, request.experiment_id);
    assert_eq!(exchange.discarded, 20);
}

#[tokio::test]
async fn test_match_is_on_id_even_if_command_was_altered() {
    let link = ManualLink::new(8);
    let (correlator, topics) = manual_correlator(&link);
    let request = CommandPayload::new(rgb(1, 2, 3), "abcd".into());

    let feed = async {
        link.await_publish(1).await;
        let altered = CommandPayload::new(rgb(9, 9, 9), "abcd".into());
        link.deliver(&topics.result, reply_to(&altered)).await;
    };
    let (exchange, _) = tokio::join!(correlator.send(request), feed);

    let exchange = exchange.unwrap();
    assert_eq!(exchange.result.experiment_id.as_str(), "abcd");
    assert_eq!(exchange.discarded, 0);
    assert!(exchange.elapsed < Duration::from_secs(1));
}
