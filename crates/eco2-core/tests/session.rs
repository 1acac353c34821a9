//! Session scenarios against the in-memory thermostat.
//!
//! Run with: `cargo test --package eco2-core --test session`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use eco2_core::mock::{MOCK_KEY, encrypt_value};
use eco2_core::uuid::{
    BATTERY_CHARACTERISTIC, NAME_CHARACTERISTIC, PIN, PIN_CHARACTERISTIC,
    SECRET_KEY_CHARACTERISTIC, TEMPERATURE_CHARACTERISTIC,
};
use eco2_core::{
    ConnectionState, EncryptionKey, Error, ErrorKind, LinkEvent, MockTransport, Pin, Session,
    SessionConfig,
};

const ADDRESS: &str = "A1:B2:C3:D4:E5:F6";

fn connect_session(device: &MockTransport) -> Session<MockTransport> {
    Session::new(ADDRESS, device.clone()).unwrap()
}

// =============================================================================
// Connect
// =============================================================================

#[tokio::test]
async fn test_end_to_end_ready() {
    let device = MockTransport::builder()
        .name("Living Room")
        .room_temperature(44)
        .set_point(42)
        .battery(77)
        .build();
    let mut session = connect_session(&device);

    session.connect_with_key(&MOCK_KEY).await.unwrap();

    assert!(session.is_ready());
    assert_eq!(session.state(), ConnectionState::Ready);
    assert_eq!(session.name(), "Living Room");
    assert_eq!(session.temperature(), 22.0);
    assert_eq!(session.set_point_temperature(), 21.0);
    assert_eq!(session.battery_level(), 77);

    let description = session.describe();
    assert!(description.contains("Living Room"));
    assert!(description.contains("22.0"));
    assert!(description.contains("77%"));
    assert_eq!(
        description,
        "Device 'Living Room (A1:B2:C3:D4:E5:F6)' is reporting room temperature 22.0C \
         and remaining battery level is 77%."
    );

    let reading = session.reading().unwrap();
    assert!(reading.captured_at.is_some());

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_pin_written_as_big_endian_integer() {
    let device = MockTransport::new();
    let mut session = connect_session(&device);

    session.set_pin(1234).unwrap();
    session.connect_with_key(&MOCK_KEY).await.unwrap();

    let written = device.written_values().await;
    assert_eq!(written, vec![(PIN, vec![0x00, 0x00, 0x04, 0xD2])]);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_default_pin_is_zero() {
    let device = MockTransport::new();
    let mut session = connect_session(&device);

    session.connect_with_key(&MOCK_KEY).await.unwrap();
    assert_eq!(device.written_values().await, vec![(PIN, vec![0, 0, 0, 0])]);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_wrong_length_key_rejected_before_io() {
    let device = MockTransport::new();
    let mut session = connect_session(&device);

    for key in [&[0u8; 15][..], &[0u8; 17][..], &[][..]] {
        let err = session.connect_with_key(key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    assert_eq!(device.open_count(), 0);
    assert_eq!(device.io_count(), 0);
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_link_open_failure_stays_disconnected() {
    let device = MockTransport::new();
    device.set_open_should_fail(true);
    let mut session = connect_session(&device);

    let err = session.connect_with_key(&MOCK_KEY).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportUnavailable);
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(
        session.describe(),
        "Device 'A1:B2:C3:D4:E5:F6' is disconnected."
    );
}

#[tokio::test]
async fn test_pin_not_writable() {
    let device = MockTransport::new();
    device.set_writable(PIN_CHARACTERISTIC, false).await;
    let mut session = connect_session(&device);

    let err = session.connect_with_key(&MOCK_KEY).await.unwrap_err();
    assert!(matches!(err, Error::AuthenticationRejected(_)));
    assert_eq!(err.kind(), ErrorKind::AuthenticationRejected);

    assert!(!session.is_ready());
    assert_eq!(session.state(), ConnectionState::LinkUp);
    assert_eq!(
        session.describe(),
        "Device 'A1:B2:C3:D4:E5:F6' is reachable, but no data available. \
         Please check PIN code and encryption key."
    );

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_pin_missing_is_rejection() {
    let device = MockTransport::new();
    device.remove_characteristic(PIN_CHARACTERISTIC).await;
    let mut session = connect_session(&device);

    let err = session.connect_with_key(&MOCK_KEY).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthenticationRejected);
    assert_eq!(session.state(), ConnectionState::LinkUp);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_pin_retry_reuses_link() {
    let device = MockTransport::builder()
        .pin(Pin::new(4321).unwrap())
        .build();
    let mut session = connect_session(&device);

    assert!(session.connect_with_key(&MOCK_KEY).await.is_err());
    assert_eq!(session.state(), ConnectionState::LinkUp);

    session.set_pin(4321).unwrap();
    session.connect_with_key(&MOCK_KEY).await.unwrap();

    assert!(session.is_ready());
    assert_eq!(device.open_count(), 1);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_wrong_key_yields_wrong_values() {
    let device = MockTransport::new();
    let mut session = connect_session(&device);

    // A wrong key still decrypts to *something*; the session cannot tell,
    // but the name will not match.
    session.connect_with_key(&[0x55; 16]).await.unwrap();
    assert_ne!(session.name(), "Living Room");

    session.disconnect().await.unwrap();
}

// =============================================================================
// Refresh
// =============================================================================

#[tokio::test]
async fn test_refresh_failing_at_battery_resets_everything() {
    let device = MockTransport::new();
    let mut session = connect_session(&device);
    session.connect_with_key(&MOCK_KEY).await.unwrap();

    device.set_readable(BATTERY_CHARACTERISTIC, false).await;
    let err = session.refresh().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedPayload);

    assert_eq!(session.state(), ConnectionState::Authenticated);
    assert_eq!(session.name(), "");
    assert_eq!(session.temperature(), 0.0);
    assert_eq!(session.set_point_temperature(), 0.0);
    assert_eq!(session.battery_level(), 0);
    assert!(session.reading().is_none());

    device.set_readable(BATTERY_CHARACTERISTIC, true).await;
    session.refresh().await.unwrap();
    assert!(session.is_ready());

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_first_connect_refresh_failure_is_authenticated() {
    let device = MockTransport::new();
    device.remove_characteristic(TEMPERATURE_CHARACTERISTIC).await;
    let mut session = connect_session(&device);

    let err = session.connect_with_key(&MOCK_KEY).await.unwrap_err();
    assert!(matches!(err, Error::CharacteristicNotFound { .. }));
    assert_eq!(session.state(), ConnectionState::Authenticated);
    assert!(session.describe().contains("no data available"));

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_refresh_picks_up_new_values() {
    let device = MockTransport::new();
    let mut session = connect_session(&device);
    session.connect_with_key(&MOCK_KEY).await.unwrap();

    device.set_name("Bathroom").await;
    device.set_temperatures(46, 39).await;
    device.set_battery(12).await;
    session.refresh().await.unwrap();

    assert_eq!(session.name(), "Bathroom");
    assert_eq!(session.temperature(), 19.5);
    assert_eq!(session.set_point_temperature(), 23.0);
    assert_eq!(session.battery_level(), 12);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_misaligned_payload_is_malformed() {
    let device = MockTransport::new();
    let mut session = connect_session(&device);
    session.connect_with_key(&MOCK_KEY).await.unwrap();

    device
        .set_raw_value(NAME_CHARACTERISTIC, vec![1, 2, 3, 4, 5, 6])
        .await;
    let err = session.refresh().await.unwrap_err();
    assert!(matches!(err, Error::MalformedPayload(_)));
    assert!(!session.is_ready());

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_oversize_and_empty_payloads_are_malformed() {
    let device = MockTransport::new();
    let mut session = connect_session(&device);
    session.connect_with_key(&MOCK_KEY).await.unwrap();

    device.set_raw_value(BATTERY_CHARACTERISTIC, Vec::new()).await;
    let err = session.refresh().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedPayload);

    device.set_raw_value(BATTERY_CHARACTERISTIC, vec![50]).await;
    device
        .set_raw_value(NAME_CHARACTERISTIC, vec![0; 24])
        .await;
    let err = session.refresh().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedPayload);
    assert_eq!(session.state(), ConnectionState::Authenticated);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_single_word_payload_is_cipher_failure() {
    let device = MockTransport::new();
    let mut session = connect_session(&device);
    session.connect_with_key(&MOCK_KEY).await.unwrap();

    device
        .set_raw_value(TEMPERATURE_CHARACTERISTIC, vec![1, 2, 3, 4])
        .await;
    let err = session.refresh().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CipherFailure);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_negative_temperature() {
    let device = MockTransport::new();
    let mut session = connect_session(&device);
    session.connect_with_key(&MOCK_KEY).await.unwrap();

    let key = EncryptionKey::new(MOCK_KEY);
    device
        .set_raw_value(
            TEMPERATURE_CHARACTERISTIC,
            encrypt_value(&[10, 0xFE, 0, 0, 0, 0, 0, 0], &key).unwrap(),
        )
        .await;
    session.refresh().await.unwrap();
    assert_eq!(session.temperature(), -1.0);

    session.disconnect().await.unwrap();
}

// =============================================================================
// Link loss
// =============================================================================

#[tokio::test]
async fn test_link_loss_clears_readings() {
    let device = MockTransport::new();
    let mut session = connect_session(&device);
    session.connect_with_key(&MOCK_KEY).await.unwrap();
    assert!(session.is_ready());

    device.simulate_link_loss();

    // Observed immediately, before any further call.
    assert!(!session.is_ready());
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.name(), "");
    assert!(!session.describe().contains("Living Room"));

    assert!(session.refresh().await.is_err());
    assert!(!session.is_ready());
    assert_eq!(session.battery_level(), 0);
    assert_eq!(
        session.describe(),
        "Device 'A1:B2:C3:D4:E5:F6' is disconnected."
    );
    assert!(session.key().is_none());
}

#[tokio::test]
async fn test_unannounced_link_drop_fails_first_read() {
    let device = MockTransport::new();
    let mut session = connect_session(&device);
    session.connect_with_key(&MOCK_KEY).await.unwrap();
    assert!(session.is_ready());

    device.drop_link_silently();
    let io_before = device.io_count();

    let err = session.refresh().await.unwrap_err();
    assert!(matches!(err, Error::NotConnected));
    assert_eq!(err.kind(), ErrorKind::TransportUnavailable);
    // Only the name read was attempted.
    assert_eq!(device.io_count(), io_before + 1);

    assert!(!session.is_ready());
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.name(), "");
    assert_eq!(session.battery_level(), 0);
    assert_eq!(session.temperature(), 0.0);
    assert!(session.key().is_none());
    assert!(!session.describe().contains("Living Room"));
    assert_eq!(
        session.describe(),
        "Device 'A1:B2:C3:D4:E5:F6' is disconnected."
    );

    session.connect_with_key(&MOCK_KEY).await.unwrap();
    assert!(session.is_ready());
    assert_eq!(device.open_count(), 2);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_after_link_loss() {
    let device = MockTransport::new();
    let mut session = connect_session(&device);
    session.connect_with_key(&MOCK_KEY).await.unwrap();

    device.simulate_link_loss();
    session.connect_with_key(&MOCK_KEY).await.unwrap();

    assert!(session.is_ready());
    assert_eq!(device.open_count(), 2);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_link_events_forwarded_to_caller() {
    let device = MockTransport::new();
    let mut session = connect_session(&device);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    session.on_link_event(move |event| sink.lock().unwrap().push(event));

    session.connect_with_key(&MOCK_KEY).await.unwrap();
    device.simulate_link_loss();

    assert_eq!(*events.lock().unwrap(), vec![LinkEvent::Up, LinkEvent::Down]);
}

// =============================================================================
// Disconnect
// =============================================================================

#[tokio::test]
async fn test_disconnect_resets_session() {
    let device = MockTransport::new();
    let mut session = connect_session(&device);
    session.connect_with_key(&MOCK_KEY).await.unwrap();

    session.disconnect().await.unwrap();

    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.name(), "");
    assert!(session.key().is_none());
    assert_eq!(device.close_count(), 1);
    assert!(session.describe().ends_with("is disconnected."));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_times_out_when_link_stays_up() {
    let device = MockTransport::new();
    let config = SessionConfig::default()
        .disconnect_poll_interval(Duration::from_millis(100))
        .disconnect_poll_limit(5);
    let mut session = Session::with_config(ADDRESS, device.clone(), config).unwrap();
    session.connect_with_key(&MOCK_KEY).await.unwrap();

    device.set_close_confirms(false);
    let started = tokio::time::Instant::now();
    let err = session.disconnect().await.unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(500));
    assert!(waited < Duration::from_millis(600));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_when_never_connected() {
    let device = MockTransport::new();
    let mut session = connect_session(&device);
    session.disconnect().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

// =============================================================================
// PIN, key retrieval, sharing
// =============================================================================

#[test]
fn test_set_pin_bounds() {
    let mut session = connect_session(&MockTransport::new());

    assert!(session.set_pin(0).is_ok());
    assert!(session.set_pin(9999).is_ok());
    assert_eq!(session.pin().value(), 9999);

    for pin in [10000, -1] {
        let err = session.set_pin(pin).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
    assert_eq!(session.pin().value(), 9999);
}

#[tokio::test]
async fn test_retrieve_key_when_exposed() {
    let device = MockTransport::builder().expose_key(true).build();
    device.set_writable(PIN_CHARACTERISTIC, false).await;
    let mut session = connect_session(&device);

    // PIN refused, but the link is up, which is all key retrieval needs.
    assert!(session.connect_with_key(&[0; 16]).await.is_err());
    let key = session.retrieve_key().await.unwrap();
    assert_eq!(key.as_bytes(), &MOCK_KEY);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_retrieve_key_when_hidden() {
    let device = MockTransport::new();
    let mut session = connect_session(&device);
    session.connect_with_key(&MOCK_KEY).await.unwrap();

    let err = session.retrieve_key().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthenticationRejected);

    device.expose_key(true).await;
    device
        .set_raw_value(SECRET_KEY_CHARACTERISTIC, vec![1, 2, 3])
        .await;
    let err = session.retrieve_key().await.unwrap_err();
    assert!(matches!(err, Error::MalformedPayload(_)));

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_retrieve_key_requires_link() {
    let mut session = connect_session(&MockTransport::new());
    let err = session.retrieve_key().await.unwrap_err();
    assert!(matches!(err, Error::NotConnected));
}

#[tokio::test]
async fn test_shared_session_across_tasks() {
    let device = MockTransport::new();
    let shared = connect_session(&device).into_shared();

    let worker = Arc::clone(&shared);
    tokio::spawn(async move {
        let mut session = worker.lock().await;
        session.connect_with_key(&MOCK_KEY).await.unwrap();
    })
    .await
    .unwrap();

    let mut session = shared.lock().await;
    assert!(session.is_ready());
    session.disconnect().await.unwrap();
}

#[test]
fn test_reading_serializes_to_json() {
    let reading =
        eco2_core::Reading::from_plaintext(b"Office\0", &[40, 41, 0, 0], &[64]).unwrap();
    let json = serde_json::to_value(&reading).unwrap();
    assert_eq!(json["name"], "Office");
    assert_eq!(json["temperature"], 20.5);
    assert_eq!(json["set_point_temperature"], 20.0);
}
