// Integration tests for `ActionDispatcher` and the writable
// characteristics' acknowledge-then-revert protocol, using wiremock.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use applink_api::models::CodeValue;
use applink_api::store::MemoryTokenStore;
use applink_api::token::{TokenConfig, TokenManager};
use applink_api::transport::TransportConfig;
use applink_api::DeviceClient;

use applink_core::characteristic::{
    BinaryCommand, BinaryStateMap, Characteristic, SwitchCharacteristic,
    TargetTemperatureCharacteristic,
};
use applink_core::dispatch::{ActionDispatcher, DeviceAction, DispatchOutcome, ProcessAction};
use applink_core::hub::{names, RecordingSink, StateValue};
use applink_core::status::ProgramStatus;

const SERIAL: &str = "000123456789";

// ── Helpers ─────────────────────────────────────────────────────────

fn test_token() -> Arc<TokenManager> {
    let mut config = TokenConfig::new("https://example.invalid/token".parse().unwrap());
    config.bootstrap_access_token = Some("test-access".into());
    Arc::new(TokenManager::load(
        Box::new(MemoryTokenStore::new()),
        config,
        &TransportConfig::default(),
    ))
}

fn dispatcher(server: &MockServer) -> Arc<ActionDispatcher> {
    let client = Arc::new(
        DeviceClient::new(
            server.uri().parse().unwrap(),
            test_token(),
            &TransportConfig::default(),
        )
        .unwrap(),
    );
    // Short revert delay keeps the revert tests fast and deterministic.
    Arc::new(ActionDispatcher::with_revert_delay(
        client,
        Duration::from_millis(10),
    ))
}

async fn mount_allowed_actions(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/devices/{SERIAL}/actions")))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(server)
        .await;
}

fn running_status() -> applink_api::models::DeviceStatus {
    applink_api::models::DeviceStatus {
        status: CodeValue {
            value_raw: ProgramStatus::InUse.raw(),
            value_localized: None,
        },
        ..applink_api::models::DeviceStatus::default()
    }
}

// ── Dispatcher outcomes ─────────────────────────────────────────────

#[tokio::test]
async fn stop_not_in_allowed_set_is_rejected_without_put() {
    let server = MockServer::start().await;
    mount_allowed_actions(&server, serde_json::json!({ "processAction": [1] })).await;

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = dispatcher(&server)
        .dispatch(SERIAL, &DeviceAction::Process(ProcessAction::Stop), false)
        .await;

    assert_eq!(outcome, DispatchOutcome::Rejected);
    server.verify().await;
}

#[tokio::test]
async fn allowed_process_action_is_sent() {
    let server = MockServer::start().await;
    mount_allowed_actions(&server, serde_json::json!({ "processAction": [1, 2] })).await;

    Mock::given(method("PUT"))
        .and(path(format!("/v1/devices/{SERIAL}/actions")))
        .and(body_json(serde_json::json!({ "processAction": 1 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = dispatcher(&server)
        .dispatch(SERIAL, &DeviceAction::Process(ProcessAction::Start), false)
        .await;

    assert_eq!(outcome, DispatchOutcome::Applied);
    server.verify().await;
}

#[tokio::test]
async fn disabled_request_never_contacts_the_remote() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = dispatcher(&server)
        .dispatch(SERIAL, &DeviceAction::Process(ProcessAction::Stop), true)
        .await;

    assert_eq!(outcome, DispatchOutcome::Disabled);
    server.verify().await;
}

#[tokio::test]
async fn power_command_gated_by_allowed_booleans() {
    let server = MockServer::start().await;
    mount_allowed_actions(
        &server,
        serde_json::json!({ "powerOn": true, "powerOff": false }),
    )
    .await;

    Mock::given(method("PUT"))
        .and(body_json(serde_json::json!({ "powerOn": true })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let d = dispatcher(&server);

    let on = d.dispatch(SERIAL, &DeviceAction::Power { on: true }, false).await;
    assert_eq!(on, DispatchOutcome::Applied);

    let off = d.dispatch(SERIAL, &DeviceAction::Power { on: false }, false).await;
    assert_eq!(off, DispatchOutcome::Rejected);

    server.verify().await;
}

#[tokio::test]
async fn server_fault_acknowledgement_counts_as_applied() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path(format!("/v1/devices/{SERIAL}/actions")))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = dispatcher(&server)
        .dispatch(
            SERIAL,
            &DeviceAction::TargetTemperature { zone: 1, value: 5 },
            false,
        )
        .await;

    assert_eq!(outcome, DispatchOutcome::Applied);
    server.verify().await;
}

#[tokio::test]
async fn allowed_actions_query_failure_fails_the_dispatch() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("/v1/devices/{SERIAL}/actions")))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let outcome = dispatcher(&server)
        .dispatch(SERIAL, &DeviceAction::Process(ProcessAction::Start), false)
        .await;

    assert_eq!(outcome, DispatchOutcome::Failed);
}

// ── Acknowledge-then-revert protocol ────────────────────────────────

#[tokio::test]
async fn rejected_switch_write_reverts_the_published_value() {
    let server = MockServer::start().await;
    // Start is allowed, Stop is not.
    mount_allowed_actions(&server, serde_json::json!({ "processAction": [1] })).await;

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::new());
    let characteristic = SwitchCharacteristic::new(
        names::ACTIVE,
        sink.clone(),
        BinaryStateMap::from_inactive(&[ProgramStatus::Off]),
        0,
        1,
        dispatcher(&server),
        SERIAL.into(),
        BinaryCommand::Process,
        false,
        CancellationToken::new(),
    );

    // Telemetry says the device is running: published on sentinel.
    characteristic.update(&running_status());
    assert_eq!(sink.last_for(names::ACTIVE), Some(StateValue::Int(1)));
    assert_eq!(sink.count_for(names::ACTIVE), 1);

    // User asks for off; Stop is not allowed, so after the delay the
    // published value snaps back to the cached one.
    characteristic.set(StateValue::Int(0));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(sink.count_for(names::ACTIVE), 2);
    assert_eq!(sink.last_for(names::ACTIVE), Some(StateValue::Int(1)));
    assert_eq!(characteristic.get(), StateValue::Int(1));

    server.verify().await;
}

#[tokio::test]
async fn rejected_write_matching_the_cache_skips_the_revert() {
    let server = MockServer::start().await;
    mount_allowed_actions(&server, serde_json::json!({ "processAction": [1] })).await;

    let sink = Arc::new(RecordingSink::new());
    let characteristic = SwitchCharacteristic::new(
        names::ACTIVE,
        sink.clone(),
        BinaryStateMap::from_inactive(&[ProgramStatus::Off]),
        0,
        1,
        dispatcher(&server),
        SERIAL.into(),
        BinaryCommand::Process,
        false,
        CancellationToken::new(),
    );

    // Cache still holds the initial off value; requesting off again is a
    // no-op even though Stop is rejected.
    characteristic.set(StateValue::Int(0));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(sink.count_for(names::ACTIVE), 0);
}

#[tokio::test]
async fn temperature_write_with_server_fault_does_not_revert() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path(format!("/v1/devices/{SERIAL}/actions")))
        .and(body_json(serde_json::json!({
            "targetTemperature": [ { "zone": 1, "value": 5 } ]
        })))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .expect(1)
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::new());
    let characteristic = TargetTemperatureCharacteristic::new(
        names::TARGET_TEMPERATURE,
        sink.clone(),
        dispatcher(&server),
        SERIAL.into(),
        1,
        (1.0, 9.0),
        false,
        CancellationToken::new(),
    );

    characteristic.set(StateValue::Float(5.0));
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Treated as applied: no revert publish.
    assert_eq!(sink.count_for(names::TARGET_TEMPERATURE), 0);
    server.verify().await;
}

#[tokio::test]
async fn disabled_temperature_write_reverts_locally() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::new());
    let characteristic = TargetTemperatureCharacteristic::new(
        names::TARGET_TEMPERATURE,
        sink.clone(),
        dispatcher(&server),
        SERIAL.into(),
        1,
        (1.0, 9.0),
        true,
        CancellationToken::new(),
    );

    characteristic.set(StateValue::Float(5.0));
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Reverted to the cached value without any network traffic.
    assert_eq!(sink.count_for(names::TARGET_TEMPERATURE), 1);
    assert_eq!(
        sink.last_for(names::TARGET_TEMPERATURE),
        Some(StateValue::Float(0.0))
    );
    server.verify().await;
}
