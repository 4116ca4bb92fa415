//! Connection manager behaviour against the mock broker
//!
//! Covers idempotent connect, convergence after repeated faults, the ready
//! gate and cancellation of pending reconnects.

mod test_helpers;

use carlink::testing::MockBroker;
use carlink::transport::amqp::{AmqpError, ConnectionState};
use carlink::transport::BrokerFault;
use std::time::Duration;
use test_helpers::{test_manager, TEST_RECONNECT_DELAY};

const CONVERGE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_connect_twice_declares_topology_once() {
    let broker = MockBroker::new();
    let manager = test_manager(&broker);

    manager.connect().await.unwrap();
    let queue = manager.private_queue();
    manager.connect().await.unwrap();

    assert_eq!(broker.open_count(), 1);
    assert_eq!(broker.exchange_declaration_count(), 2);
    assert_eq!(broker.queue_declarations().len(), 2);
    assert_eq!(manager.private_queue(), queue);
    assert_eq!(manager.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn test_concurrent_connects_are_serialized() {
    let broker = MockBroker::new();
    broker.set_open_delay(Duration::from_millis(50));
    let manager = test_manager(&broker);

    let (first, second) = tokio::join!(manager.connect(), manager.connect());

    assert!(first.is_ok() && second.is_ok());
    assert_eq!(broker.open_count(), 1);
    assert_eq!(broker.exchange_declaration_count(), 2);
}

#[tokio::test]
async fn test_converges_after_repeated_faults() {
    let broker = MockBroker::new();
    let manager = test_manager(&broker);
    manager.connect().await.unwrap();

    const FAULTS: usize = 4;
    let mut generation = manager.ready_link().await.unwrap().generation;

    for _ in 0..FAULTS {
        assert!(broker.inject_fault(BrokerFault::Transport("connection reset".to_string())));

        let link = tokio::time::timeout(CONVERGE_TIMEOUT, manager.next_link(generation))
            .await
            .expect("manager should reconnect")
            .expect("manager alive");
        assert!(link.generation > generation);
        generation = link.generation;
    }

    assert_eq!(manager.state(), ConnectionState::Ready);
    assert_eq!(broker.open_count(), FAULTS + 1);
    // Two exchanges per successful connect, nothing more
    assert_eq!(broker.exchange_declaration_count(), 2 * (FAULTS + 1));

    let metrics = manager.health_metrics();
    assert!(metrics.is_healthy);
    assert_eq!(metrics.reconnect_count, FAULTS as u32);
    assert!(metrics
        .last_fault
        .is_some_and(|fault| fault.contains("connection reset")));
}

#[tokio::test]
async fn test_converges_after_failed_connects() {
    let broker = MockBroker::new();
    broker.fail_next_opens(3);
    let manager = test_manager(&broker);

    let result = manager.connect().await;
    assert!(matches!(result, Err(AmqpError::ConnectionFailed(_))));
    assert_eq!(manager.state(), ConnectionState::Reconnecting(1));

    assert!(manager.wait_until_ready(CONVERGE_TIMEOUT).await);
    assert_eq!(broker.open_count(), 4);
    // Failed opens never reach the declare step
    assert_eq!(broker.exchange_declaration_count(), 2);
}

#[tokio::test]
async fn test_retry_interval_is_fixed() {
    let broker = MockBroker::new();
    broker.fail_next_opens(3);
    let manager = test_manager(&broker);

    let started = tokio::time::Instant::now();
    let _ = manager.connect().await;
    assert!(manager.wait_until_ready(CONVERGE_TIMEOUT).await);

    // Three retries at the fixed delay, no growth
    let elapsed = started.elapsed();
    assert!(elapsed >= TEST_RECONNECT_DELAY * 3);
    assert!(elapsed < TEST_RECONNECT_DELAY * 3 + Duration::from_secs(2));
}

#[tokio::test]
async fn test_channel_error_alone_triggers_reconnect() {
    let broker = MockBroker::new();
    let manager = test_manager(&broker);
    manager.connect().await.unwrap();
    let generation = manager.ready_link().await.unwrap().generation;
    let mut states = manager.subscribe_state();

    // Connection stays up; only the channel is gone
    assert!(broker.close_channel("NOT_FOUND - no exchange 'car.events'"));

    let reconnecting = tokio::time::timeout(
        CONVERGE_TIMEOUT,
        states.wait_for(|state| matches!(state, ConnectionState::Reconnecting(_))),
    )
    .await
    .is_ok_and(|changed| changed.is_ok());
    assert!(reconnecting);

    let link = tokio::time::timeout(CONVERGE_TIMEOUT, manager.next_link(generation))
        .await
        .expect("manager should reconnect")
        .expect("manager alive");
    assert!(link.generation > generation);
    assert_eq!(manager.state(), ConnectionState::Ready);
    assert_eq!(broker.open_count(), 2);
    // The connection under the dead channel was closed, not leaked
    assert_eq!(broker.close_count(), 1);
    assert_eq!(broker.live_sessions(), 1);
    assert!(manager
        .health_metrics()
        .last_fault
        .is_some_and(|fault| fault.contains("channel fault")));
}

#[tokio::test]
async fn test_failed_topology_closes_half_open_session() {
    let broker = MockBroker::new();
    broker.fail_next_queue_declares(1);
    let manager = test_manager(&broker);

    let result = manager.connect().await;
    assert!(matches!(result, Err(AmqpError::DeclareFailed { .. })));
    assert_eq!(broker.close_count(), 1);
    assert_eq!(broker.live_sessions(), 0);

    assert!(manager.wait_until_ready(CONVERGE_TIMEOUT).await);
    assert_eq!(broker.live_sessions(), 1);
}

#[tokio::test]
async fn test_disconnect_cancels_pending_reconnect() {
    let broker = MockBroker::new();
    broker.fail_next_opens(1);
    let manager = test_manager(&broker);

    assert!(manager.connect().await.is_err());
    assert_eq!(manager.state(), ConnectionState::Reconnecting(1));

    manager.disconnect().await.unwrap();
    tokio::time::sleep(TEST_RECONNECT_DELAY * 8).await;

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(broker.open_count(), 1);
}

#[tokio::test]
async fn test_disconnect_is_safe_when_already_closed() {
    let broker = MockBroker::new();
    let manager = test_manager(&broker);

    manager.disconnect().await.unwrap();

    manager.connect().await.unwrap();
    manager.disconnect().await.unwrap();
    manager.disconnect().await.unwrap();

    assert_eq!(broker.close_count(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(manager.private_queue(), None);
}

#[tokio::test]
async fn test_fault_after_disconnect_does_not_reconnect() {
    let broker = MockBroker::new();
    let manager = test_manager(&broker);
    manager.connect().await.unwrap();
    let generation = manager.ready_link().await.unwrap().generation;

    manager.disconnect().await.unwrap();
    manager
        .report_fault(generation, BrokerFault::Channel("late".to_string()))
        .await;
    tokio::time::sleep(TEST_RECONNECT_DELAY * 4).await;

    assert_eq!(broker.open_count(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_ready_gate_connects_on_demand() {
    let broker = MockBroker::new();
    let manager = test_manager(&broker);

    let link = manager.ready_link().await.unwrap();

    assert_eq!(broker.open_count(), 1);
    assert!(link.topology.private_queue.starts_with("amq.gen-"));
    assert_eq!(link.topology.general_queue, "general.notifications");
}

#[tokio::test]
async fn test_ready_gate_waits_for_in_flight_connect() {
    let broker = MockBroker::new();
    broker.set_open_delay(Duration::from_millis(100));
    let manager = test_manager(&broker);

    let connecting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(manager.state(), ConnectionState::Connecting);

    let link = manager.ready_link().await.unwrap();
    connecting.await.unwrap().unwrap();

    assert_eq!(broker.open_count(), 1);
    assert_eq!(manager.private_queue(), Some(link.topology.private_queue.clone()));
}

#[tokio::test]
async fn test_ready_gate_reports_not_connected() {
    let broker = MockBroker::new();
    broker.fail_next_opens(1);
    let manager = test_manager(&broker);

    let result = manager.ready_link().await;

    assert!(result.is_err());
    assert!(!manager.is_ready());
}

#[tokio::test]
async fn test_state_changes_are_observable() {
    let broker = MockBroker::new();
    let manager = test_manager(&broker);
    let mut states = manager.subscribe_state();
    assert_eq!(*states.borrow(), ConnectionState::Disconnected);

    manager.connect().await.unwrap();
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), ConnectionState::Ready);

    broker.inject_fault(BrokerFault::Transport("gone".to_string()));
    states.changed().await.unwrap();
    assert!(matches!(
        *states.borrow_and_update(),
        ConnectionState::Reconnecting(1) | ConnectionState::Connecting | ConnectionState::Ready
    ));
}
