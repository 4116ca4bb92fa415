//! Publish → reply → tracker round trips through the mock broker

mod test_helpers;

use carlink::protocol::{Notification, NotificationType, CAR_EXCHANGE};
use carlink::testing::MockBroker;
use carlink::CarMetadata;
use chrono::{TimeZone, Utc};
use std::time::Duration;
use test_helpers::{collecting_handler, eventually, reply, sample_metadata, test_client};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

fn reply_routing_key(queue: &str) -> String {
    format!("car.notifications.{queue}")
}

#[tokio::test]
async fn test_matching_reply_clears_pending_id() {
    let broker = MockBroker::new();
    let client = test_client(&broker);
    let (handler, received) = collecting_handler();
    client.consume_notifications(handler).await.unwrap();

    let id = client.publish_metadata(&sample_metadata()).await.unwrap();
    assert!(client.tracker().has(&id));

    let published = broker.published();
    let reply_to = published[0].properties.as_ref().unwrap().reply_to.clone();
    assert_eq!(
        broker.publish(CAR_EXCHANGE, &reply_routing_key(&reply_to), &reply(&id, "ok")),
        1
    );

    assert!(eventually(DELIVERY_TIMEOUT, || received.lock().len() == 1).await);
    assert!(!client.tracker().has(&id));
}

#[tokio::test]
async fn test_unknown_reply_still_reaches_handler() {
    let broker = MockBroker::new();
    let client = test_client(&broker);
    let (handler, received) = collecting_handler();
    client.consume_notifications(handler).await.unwrap();

    let id = client.publish_metadata(&sample_metadata()).await.unwrap();
    let queue = client.manager().private_queue().unwrap();
    broker.publish(CAR_EXCHANGE, &reply_routing_key(&queue), &reply("someone-else", "hi"));

    assert!(eventually(DELIVERY_TIMEOUT, || received.lock().len() == 1).await);
    assert!(client.tracker().has(&id));
    assert_eq!(client.tracker().len(), 1);
    assert_eq!(received.lock()[0].correlation_id(), Some("someone-else"));
}

#[tokio::test]
async fn test_end_to_end_ack() {
    let broker = MockBroker::new();
    let client = test_client(&broker);
    let (handler, received) = collecting_handler();
    client.consume_notifications(handler).await.unwrap();

    let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let metadata = CarMetadata {
        latitude: 59.33,
        longitude: 18.07,
        battery: 95.0,
        timestamp,
    };
    let id = client.publish_metadata(&metadata).await.unwrap();

    let message = &broker.published()[0];
    let body: CarMetadata = serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(body, metadata);
    assert_eq!(message.exchange, "car.events");
    assert_eq!(message.routing_key, "car.metadata");
    let properties = message.properties.as_ref().unwrap();
    assert_eq!(properties.content_type, "application/json");
    assert_eq!(properties.correlation_id, id);

    // The backend answers on the reply-to queue
    broker.publish(
        CAR_EXCHANGE,
        &reply_routing_key(&properties.reply_to),
        &reply(&id, "ok"),
    );

    assert!(eventually(DELIVERY_TIMEOUT, || !client.tracker().has(&id)).await);
    let received = received.lock();
    match &received[0] {
        Notification::Reply(ack) => {
            assert_eq!(ack.kind, NotificationType::Ack);
            assert_eq!(ack.correlation_id, id);
            assert_eq!(ack.message, "ok");
        }
        other => panic!("expected a reply, got {other:?}"),
    }
}

#[tokio::test]
async fn test_replies_to_old_queue_are_lost_after_reconnect() {
    let broker = MockBroker::new();
    let client = test_client(&broker);
    let (handler, received) = collecting_handler();
    client.consume_notifications(handler).await.unwrap();

    let id = client.publish_metadata(&sample_metadata()).await.unwrap();
    let old_queue = client.manager().private_queue().unwrap();
    let generation = client.manager().ready_link().await.unwrap().generation;

    broker.inject_fault(carlink::transport::BrokerFault::Transport("reset".to_string()));
    tokio::time::timeout(DELIVERY_TIMEOUT, client.manager().next_link(generation))
        .await
        .unwrap()
        .unwrap();

    // Exclusive queue died with the old connection
    assert_eq!(
        broker.publish(CAR_EXCHANGE, &reply_routing_key(&old_queue), &reply(&id, "late")),
        0
    );
    assert!(client.tracker().has(&id));
    assert!(received.lock().is_empty());

    // New publishes carry the new reply queue
    client.publish_metadata(&sample_metadata()).await.unwrap();
    let latest = broker.published().last().cloned().unwrap();
    assert_ne!(latest.properties.unwrap().reply_to, old_queue);
}
