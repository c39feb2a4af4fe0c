#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use common::{started_client, FakeDevice};
use essrv::client::DeviceClient;
use essrv::error::EssrvError;
use essrv::verifier::{CommandVerifier, ModeAction, VerifierPolicy};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn quick_policy() -> VerifierPolicy {
    VerifierPolicy {
        max_attempts: 3,
        attempt_timeouts_secs: vec![0.3],
        backoff_secs: vec![0.05],
        jitter_factor: 0.0,
        verify_polls: 2,
        poll_timeout_secs: 0.3,
        poll_interval_secs: 0.05,
        stop_threshold_w: 50.0,
    }
}

fn set_mode_count(device: &FakeDevice) -> usize {
    device
        .state
        .methods_received()
        .iter()
        .filter(|m| *m == "ES.SetMode")
        .count()
}

#[tokio::test]
async fn test_lost_write_is_retried_until_visible() {
    let device = FakeDevice::start().await;
    device.state.lost_writes.store(1, Ordering::SeqCst);
    let client = started_client(device.port()).await;
    let verifier = CommandVerifier::new(client.clone() as Arc<dyn DeviceClient>, quick_policy());
    let host = device.host();

    let (outcome, paused_midway) = tokio::join!(
        verifier.apply(&host, device.port(), ModeAction::Charge(1500)),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            client.polling().is_paused(&host)
        }
    );

    let outcome = outcome.unwrap();
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.battery_power, Some(-1500.0));
    assert!(paused_midway);
    assert!(!client.polling().is_paused(&host));
    assert_eq!(set_mode_count(&device), 2);
    assert_eq!(device.state.mode.lock().as_str(), "Manual");
    client.cleanup().await;
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let device = FakeDevice::start().await;
    device.state.lost_writes.store(u32::MAX, Ordering::SeqCst);
    let client = started_client(device.port()).await;
    let verifier = CommandVerifier::new(client.clone() as Arc<dyn DeviceClient>, quick_policy());

    let err = verifier
        .apply(&device.host(), device.port(), ModeAction::Stop)
        .await
        .unwrap_err();

    // the idle device already reads 0 W, but reports Auto rather than Manual
    assert_eq!(
        err,
        EssrvError::NotConfirmed {
            action: "stop".to_string(),
            host: device.host(),
            attempts: 3,
        }
    );
    assert_eq!(set_mode_count(&device), 3);
    assert!(!client.polling().is_paused(&device.host()));
    client.cleanup().await;
}

#[tokio::test]
async fn test_mode_change_confirmed_first_attempt() {
    let device = FakeDevice::start().await;
    let client = started_client(device.port()).await;
    let verifier = CommandVerifier::new(client.clone() as Arc<dyn DeviceClient>, quick_policy());

    let outcome = verifier
        .apply(&device.host(), device.port(), ModeAction::parse("ai", 0).unwrap())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.mode.as_deref(), Some("ai"));
    client.cleanup().await;
}

#[tokio::test]
async fn test_invalid_power_rejected_without_io() {
    let device = FakeDevice::start().await;
    let client = started_client(device.port()).await;
    let verifier = CommandVerifier::new(client.clone() as Arc<dyn DeviceClient>, quick_policy());

    let err = verifier
        .apply(&device.host(), device.port(), ModeAction::Discharge(20_000))
        .await
        .unwrap_err();

    assert!(matches!(err, EssrvError::Validation { .. }), "unexpected error: {}", err);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(device.state.received.lock().is_empty());
    client.cleanup().await;
}
