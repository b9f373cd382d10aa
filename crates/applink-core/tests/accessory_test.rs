// Integration tests for accessory composition using wiremock.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use applink_api::events::StaggerAllocator;
use applink_api::models::{CodeValue, DeviceIdentity, DeviceStatus, TemperatureReading};
use applink_api::store::MemoryTokenStore;
use applink_api::token::{TokenConfig, TokenManager};
use applink_api::transport::TransportConfig;
use applink_api::DeviceClient;

use applink_core::accessory::{Accessory, AccessoryContext};
use applink_core::config::{BridgeConfig, DeviceFlags};
use applink_core::dispatch::ActionDispatcher;
use applink_core::hub::{names, RecordingSink, StateValue};
use applink_core::registry::classify;

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

fn context(server: &MockServer) -> AccessoryContext {
    let token = test_token();
    let client = Arc::new(
        DeviceClient::new(
            server.uri().parse().unwrap(),
            Arc::clone(&token),
            &TransportConfig::default(),
        )
        .unwrap(),
    );

    AccessoryContext {
        dispatcher: Arc::new(ActionDispatcher::with_revert_delay(
            Arc::clone(&client),
            Duration::from_millis(10),
        )),
        client,
        token,
        stagger: Arc::new(StaggerAllocator::new(Duration::from_secs(1))),
        transport: TransportConfig::default(),
        config: BridgeConfig::new(server.uri().parse().unwrap()),
    }
}

fn identity(type_code: i64) -> DeviceIdentity {
    DeviceIdentity {
        unique_id: SERIAL.into(),
        display_name: "Test appliance".into(),
        model_number: "T1000".into(),
        firmware_revision: "1.0".into(),
        device_type_code: type_code,
    }
}

fn target_temp_status(raw: i64) -> DeviceStatus {
    DeviceStatus {
        target_temperature: vec![TemperatureReading {
            value_raw: Some(raw),
            unit: Some("Celsius".into()),
        }],
        ..DeviceStatus::default()
    }
}

// ── Composition ─────────────────────────────────────────────────────

#[tokio::test]
async fn fridge_uses_the_remote_writable_range() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("/v1/devices/{SERIAL}/actions")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "targetTemperature": [ { "zone": 1, "min": 2, "max": 8 } ]
        })))
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::new());
    let plan = classify(19).unwrap();
    let accessory = Accessory::build(identity(19), &plan, sink.clone(), &context(&server))
        .await
        .unwrap();

    // 9 degrees exceeds the remote's declared maximum of 8: clipped.
    accessory.apply_status(&target_temp_status(900));
    assert_eq!(
        sink.last_for(names::TARGET_TEMPERATURE),
        Some(StateValue::Float(8.0))
    );
}

#[tokio::test]
async fn range_query_failure_falls_back_to_the_default_range() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("/v1/devices/{SERIAL}/actions")))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::new());
    let plan = classify(19).unwrap();
    let accessory = Accessory::build(identity(19), &plan, sink.clone(), &context(&server))
        .await
        .unwrap();

    // The default range tops out at 9, so 9 degrees passes unclipped.
    accessory.apply_status(&target_temp_status(900));
    assert_eq!(
        sink.last_for(names::TARGET_TEMPERATURE),
        Some(StateValue::Float(9.0))
    );
}

#[tokio::test]
async fn laundry_composition_updates_every_characteristic() {
    let server = MockServer::start().await;

    let sink = Arc::new(RecordingSink::new());
    let plan = classify(1).unwrap();
    let accessory = Accessory::build(identity(1), &plan, sink.clone(), &context(&server))
        .await
        .unwrap();

    let status = DeviceStatus {
        status: CodeValue {
            value_raw: 5,
            value_localized: Some("In use".into()),
        },
        remaining_time: vec![1, 30],
        ..DeviceStatus::default()
    };

    accessory.apply_status(&status);
    assert_eq!(sink.last_for(names::ACTIVE), Some(StateValue::Int(1)));
    assert_eq!(sink.last_for(names::IN_USE), Some(StateValue::Int(1)));
    assert_eq!(
        sink.last_for(names::REMAINING_DURATION),
        Some(StateValue::Float(5400.0))
    );

    // The same snapshot again publishes nothing new.
    accessory.apply_status(&status);
    assert_eq!(sink.count_for(names::ACTIVE), 1);
    assert_eq!(sink.count_for(names::IN_USE), 1);
    assert_eq!(sink.count_for(names::REMAINING_DURATION), 1);
}

#[tokio::test]
async fn temperature_sensor_opt_out_skips_those_characteristics() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("/v1/devices/{SERIAL}/actions")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let mut ctx = context(&server);
    ctx.config.device_flags.insert(
        SERIAL.into(),
        DeviceFlags {
            disable_temperature_sensor: true,
            ..DeviceFlags::default()
        },
    );

    let sink = Arc::new(RecordingSink::new());
    let plan = classify(19).unwrap();
    let accessory = Accessory::build(identity(19), &plan, sink.clone(), &ctx)
        .await
        .unwrap();

    let status = DeviceStatus {
        temperature: vec![TemperatureReading {
            value_raw: Some(400),
            unit: Some("Celsius".into()),
        }],
        ..DeviceStatus::default()
    };
    accessory.apply_status(&status);

    assert_eq!(sink.count_for(names::CURRENT_TEMPERATURE), 0);
    assert_eq!(sink.count_for(names::TEMPERATURE_UNIT), 0);
    // The rest of the thermostat composition is still there.
    assert_eq!(accessory.characteristics().len(), 3);
}

#[tokio::test]
async fn accessory_start_and_shutdown_round_trip() {
    let server = MockServer::start().await;

    let sink = Arc::new(RecordingSink::new());
    let plan = classify(1).unwrap();
    let mut accessory = Accessory::build(identity(1), &plan, sink, &context(&server))
        .await
        .unwrap();

    accessory.start();
    accessory.shutdown();
}
