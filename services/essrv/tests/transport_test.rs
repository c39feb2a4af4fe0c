#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use common::{started_transport, test_options, FakeDevice};
use essrv::error::EssrvError;
use essrv::transport::{TransportOptions, UdpTransport};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use voltage_marstek::command;

#[tokio::test]
async fn test_request_reply_correlation() {
    let device = FakeDevice::start().await;
    let transport = started_transport().await;

    let cmd = command::es_mode(transport.next_request_id(), 0);
    let reply = transport
        .send_request(&cmd, &device.host(), device.port(), Duration::from_secs(2), false)
        .await
        .unwrap();

    assert_eq!(reply["id"], cmd.id());
    assert_eq!(reply["result"]["mode"], "Auto");
    assert_eq!(transport.pending_count(), 0);

    let stats = transport.command_stats_for_ip(&device.host());
    assert_eq!(stats["ES.GetMode"].successes, 1);
    transport.cleanup().await;
}

#[tokio::test]
async fn test_out_of_order_replies_reach_their_callers() {
    let device = FakeDevice::start().await;
    device.state.delay("ES.GetStatus", Duration::from_millis(300));
    let transport = started_transport().await;

    let slow = command::es_status(transport.next_request_id(), 0);
    let fast = command::es_mode(transport.next_request_id(), 0);
    let host = device.host();
    let timeout = Duration::from_secs(2);

    let (slow_reply, fast_reply) = tokio::join!(
        transport.send_request(&slow, &host, device.port(), timeout, false),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            transport
                .send_request(&fast, &host, device.port(), timeout, false)
                .await
        }
    );

    let slow_reply = slow_reply.unwrap();
    let fast_reply = fast_reply.unwrap();
    assert_eq!(slow_reply["id"], slow.id());
    assert!(slow_reply["result"].get("bat_cap").is_some());
    assert_eq!(fast_reply["id"], fast.id());
    assert_eq!(fast_reply["result"]["mode"], "Auto");
    transport.cleanup().await;
}

#[tokio::test]
async fn test_echoed_request_is_ignored() {
    let device = FakeDevice::start().await;
    device.state.echo.store(true, Ordering::SeqCst);
    let transport = started_transport().await;

    let cmd = command::es_mode(transport.next_request_id(), 0);
    let reply = transport
        .send_request(&cmd, &device.host(), device.port(), Duration::from_secs(2), false)
        .await
        .unwrap();

    assert!(reply.get("method").is_none());
    assert_eq!(reply["result"]["mode"], "Auto");
    transport.cleanup().await;
}

#[tokio::test]
async fn test_timeout_when_device_silent() {
    let device = FakeDevice::start().await;
    device.state.silent.store(true, Ordering::SeqCst);
    let transport = started_transport().await;

    let cmd = command::es_status(transport.next_request_id(), 0);
    let err = transport
        .send_request(&cmd, &device.host(), device.port(), Duration::from_millis(200), true)
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "unexpected error: {}", err);
    assert_eq!(transport.pending_count(), 0);
    let stats = transport.command_stats();
    assert_eq!(stats["ES.GetStatus"].timeouts, 1);
    assert_eq!(device.state.methods_received(), vec!["ES.GetStatus"]);
    transport.cleanup().await;
}

#[tokio::test]
async fn test_duplicate_in_flight_id_rejected() {
    let device = FakeDevice::start().await;
    device.state.silent.store(true, Ordering::SeqCst);
    let transport = started_transport().await;
    let cmd = command::es_mode(42, 0);
    let host = device.host();

    let first = {
        let transport = Arc::clone(&transport);
        let cmd = cmd.clone();
        let host = host.clone();
        let port = device.port();
        tokio::spawn(async move {
            transport
                .send_request(&cmd, &host, port, Duration::from_millis(500), true)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = transport
        .send_request(&cmd, &host, device.port(), Duration::from_millis(100), true)
        .await
        .unwrap_err();
    assert!(matches!(err, EssrvError::Validation { ref field, .. } if field == "id"));
    assert!(first.await.unwrap().unwrap_err().is_timeout());
    transport.cleanup().await;
}

#[tokio::test]
async fn test_cleanup_fails_in_flight_calls() {
    let device = FakeDevice::start().await;
    device.state.silent.store(true, Ordering::SeqCst);
    let transport = started_transport().await;

    let in_flight = {
        let transport = Arc::clone(&transport);
        let cmd = command::es_mode(transport.next_request_id(), 0);
        let host = device.host();
        let port = device.port();
        tokio::spawn(async move {
            transport
                .send_request(&cmd, &host, port, Duration::from_secs(10), false)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.pending_count(), 1);

    transport.cleanup().await;
    let err = tokio::time::timeout(Duration::from_secs(1), in_flight)
        .await
        .expect("in-flight call must end with cleanup")
        .unwrap()
        .unwrap_err();
    assert_eq!(err, EssrvError::transport("transport closed"));
    assert!(!transport.is_running());
}

#[tokio::test]
async fn test_raw_message_validated_before_send() {
    let device = FakeDevice::start().await;
    let transport = started_transport().await;

    let err = transport
        .send_raw(
            r#"{"id":1,"method":"ES.SetMode","params":{"id":0,"config":{"mode":"Manual","manual_cfg":{"time_num":0,"start_time":"00:00","end_time":"23:59","week_set":127,"power":99999,"enable":1}}}}"#,
            &device.host(),
            device.port(),
            Duration::from_millis(200),
            true,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EssrvError::Validation { .. }), "unexpected error: {}", err);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(device.state.received.lock().is_empty());
    transport.cleanup().await;
}

#[tokio::test]
async fn test_requests_to_one_device_are_spaced() {
    let device = FakeDevice::start().await;
    let transport = UdpTransport::new(TransportOptions {
        min_request_interval: Duration::from_millis(300),
        ..test_options()
    });
    transport.setup().await.unwrap();
    let host = device.host();

    let first = command::es_mode(transport.next_request_id(), 0);
    let second = command::es_status(transport.next_request_id(), 0);
    let (a, b) = tokio::join!(
        transport.send_request(&first, &host, device.port(), Duration::from_secs(2), false),
        transport.send_request(&second, &host, device.port(), Duration::from_secs(2), false),
    );
    a.unwrap();
    b.unwrap();

    let arrivals = device.state.arrivals.lock().clone();
    assert_eq!(arrivals.len(), 2);
    let gap = arrivals[1].duration_since(arrivals[0]);
    assert!(gap >= Duration::from_millis(290), "sends only {:?} apart", gap);
    transport.cleanup().await;
}
