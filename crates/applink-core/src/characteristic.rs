//! Characteristic cache engine.
//!
//! A characteristic is one named, typed state value exposed to the hub.
//! Reads are always served from the in-memory cache -- the hub's read path
//! must never wait on the network -- and freshness comes from telemetry
//! updates. Writes acknowledge first and take effect asynchronously;
//! requests the device rejects are rolled back after a short delay so a
//! read/write-shaped hub UI behaves like a read-only one.
//!
//! Instead of an inheritance ladder, the engine is a closed set of
//! variants over one capability interface (`get`, optional `set`,
//! `update`), sharing a [`CachedState`] base and per-instance strategy
//! values ([`TelemetrySource`], [`BinaryStateMap`], [`BinaryCommand`]).

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use applink_api::models::{DeviceStatus, TemperatureReading, TEMPERATURE_NO_VALUE};

use crate::dispatch::{ActionDispatcher, DeviceAction, ProcessAction};
use crate::hub::{HubSink, StateValue};
use crate::status::{contains, ProgramStatus};

/// Fallback writable range (degrees Celsius) when the remote's reported
/// range cannot be queried.
pub const DEFAULT_TARGET_TEMPERATURE_RANGE: (f64, f64) = (1.0, 9.0);

// ── Capability interface ─────────────────────────────────────────────

/// One state value exposed to the hub.
pub trait Characteristic: Send + Sync {
    /// Hub-facing characteristic name.
    fn name(&self) -> &'static str;

    /// The cached value. Synchronous; never performs I/O.
    fn get(&self) -> StateValue;

    /// User-initiated write. Returns before any network I/O starts; the
    /// effect (and a possible revert) runs in a spawned task. Read-only
    /// characteristics log and ignore the request.
    fn set(&self, requested: StateValue) {
        error!(
            characteristic = self.name(),
            %requested,
            "attempt to set a read-only characteristic, ignored"
        );
    }

    /// Apply one telemetry update.
    fn update(&self, status: &DeviceStatus);
}

// ── Shared cached state ──────────────────────────────────────────────

/// Cache plus publish bookkeeping shared by every variant.
struct CachedState {
    name: &'static str,
    sink: Arc<dyn HubSink>,
    value: Mutex<StateValue>,
    last_published: Mutex<Option<StateValue>>,
}

impl CachedState {
    fn new(name: &'static str, sink: Arc<dyn HubSink>, initial: StateValue) -> Self {
        Self {
            name,
            sink,
            value: Mutex::new(initial),
            last_published: Mutex::new(None),
        }
    }

    fn get(&self) -> StateValue {
        *self.value.lock().expect("characteristic lock poisoned")
    }

    /// Cache a derived value and publish it, suppressing republication of
    /// an unchanged value (and the log churn that comes with it).
    fn apply(&self, value: StateValue) {
        *self.value.lock().expect("characteristic lock poisoned") = value;

        let mut published = self
            .last_published
            .lock()
            .expect("characteristic lock poisoned");
        if *published == Some(value) {
            return;
        }
        *published = Some(value);
        drop(published);

        debug!(characteristic = self.name, %value, "publishing value");
        self.sink.publish(self.name, value);
    }

    /// Publish the cached value unconditionally. The revert path must
    /// overwrite whatever the hub is optimistically showing, even though
    /// the cache itself never changed.
    fn republish(&self) {
        let value = self.get();
        *self
            .last_published
            .lock()
            .expect("characteristic lock poisoned") = Some(value);
        self.sink.publish(self.name, value);
    }
}

// ── Binary state mapping ─────────────────────────────────────────────

/// Derives a binary on/off state from the primary status code.
///
/// Exactly one of the two sets is supplied: an inactive set ("everything
/// else is on") or an active set ("everything else is off").
pub struct BinaryStateMap {
    inactive: Option<&'static [ProgramStatus]>,
    active: Option<&'static [ProgramStatus]>,
}

impl BinaryStateMap {
    /// Supplying both or neither set is a wiring bug, not a runtime
    /// condition, and fails fast.
    pub fn new(
        inactive: Option<&'static [ProgramStatus]>,
        active: Option<&'static [ProgramStatus]>,
    ) -> Self {
        assert!(
            inactive.is_some() != active.is_some(),
            "exactly one of the inactive or active state sets must be supplied"
        );
        Self { inactive, active }
    }

    pub fn from_inactive(set: &'static [ProgramStatus]) -> Self {
        Self::new(Some(set), None)
    }

    pub fn from_active(set: &'static [ProgramStatus]) -> Self {
        Self::new(None, Some(set))
    }

    fn is_active(&self, status_raw: i64) -> bool {
        if let Some(inactive) = self.inactive {
            !contains(inactive, status_raw)
        } else if let Some(active) = self.active {
            contains(active, status_raw)
        } else {
            unreachable!("construction enforces exactly one set")
        }
    }
}

// ── Read-only numeric ────────────────────────────────────────────────

/// Where a numeric characteristic takes its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetrySource {
    /// `remainingTime` pair, in seconds.
    RemainingSeconds,
    /// First measured temperature, centi-degrees to degrees.
    CurrentTemperature,
    /// First target temperature, centi-degrees to degrees.
    TargetTemperature,
    /// Unit of the first measured temperature: 0 Celsius, 1 Fahrenheit.
    TemperatureUnit,
    /// Ventilation step scaled to a 0-100 rotation speed.
    VentilationStep,
}

impl TelemetrySource {
    /// Derive the value, or `None` when the payload carries nothing for
    /// this source (the cache then stays untouched).
    fn read(self, status: &DeviceStatus, off_default: f64) -> Option<f64> {
        match self {
            Self::RemainingSeconds => Some(f64::from(status.remaining_seconds())),
            Self::CurrentTemperature => temperature(&status.temperature, off_default),
            Self::TargetTemperature => temperature(&status.target_temperature, off_default),
            Self::TemperatureUnit => temperature_unit(&status.temperature),
            Self::VentilationStep => status
                .ventilation_step
                .as_ref()
                .map(|step| step.value_raw as f64 * 25.0),
        }
    }
}

fn temperature(readings: &[TemperatureReading], off_default: f64) -> Option<f64> {
    let raw = readings.first()?.value_raw?;
    if raw == TEMPERATURE_NO_VALUE {
        // Nothing reported (device off); publish the off default rather
        // than the sentinel magnitude.
        Some(off_default)
    } else {
        Some(raw as f64 / 100.0)
    }
}

fn temperature_unit(readings: &[TemperatureReading]) -> Option<f64> {
    match readings.first()?.unit.as_deref()? {
        "Fahrenheit" => Some(1.0),
        _ => Some(0.0),
    }
}

/// Read-only numeric characteristic (remaining duration, temperatures,
/// rotation speed).
pub struct NumericCharacteristic {
    cache: CachedState,
    source: TelemetrySource,
    bounds: Option<(f64, f64)>,
    off_default: f64,
}

impl NumericCharacteristic {
    pub fn new(
        name: &'static str,
        sink: Arc<dyn HubSink>,
        source: TelemetrySource,
        bounds: Option<(f64, f64)>,
    ) -> Self {
        Self {
            cache: CachedState::new(name, sink, StateValue::Float(0.0)),
            source,
            bounds,
            off_default: 0.0,
        }
    }

    fn derive(&self, status: &DeviceStatus) -> Option<StateValue> {
        let mut value = self.source.read(status, self.off_default)?;
        if let Some((min, max)) = self.bounds {
            value = value.clamp(min, max);
        }
        Some(StateValue::Float(value))
    }
}

impl Characteristic for NumericCharacteristic {
    fn name(&self) -> &'static str {
        self.cache.name
    }

    fn get(&self) -> StateValue {
        self.cache.get()
    }

    fn update(&self, status: &DeviceStatus) {
        if let Some(value) = self.derive(status) {
            self.cache.apply(value);
        }
    }
}

// ── Read-only binary ─────────────────────────────────────────────────

/// Read-only binary characteristic (in-use, active-cooling flag), mapped
/// to a characteristic-specific pair of off/on sentinel values.
pub struct BinaryCharacteristic {
    cache: CachedState,
    map: BinaryStateMap,
    off_value: i64,
    on_value: i64,
}

impl BinaryCharacteristic {
    pub fn new(
        name: &'static str,
        sink: Arc<dyn HubSink>,
        map: BinaryStateMap,
        off_value: i64,
        on_value: i64,
    ) -> Self {
        Self {
            cache: CachedState::new(name, sink, StateValue::Int(off_value)),
            map,
            off_value,
            on_value,
        }
    }

    fn derive(&self, status: &DeviceStatus) -> StateValue {
        if self.map.is_active(status.status.value_raw) {
            StateValue::Int(self.on_value)
        } else {
            StateValue::Int(self.off_value)
        }
    }
}

impl Characteristic for BinaryCharacteristic {
    fn name(&self) -> &'static str {
        self.cache.name
    }

    fn get(&self) -> StateValue {
        self.cache.get()
    }

    fn update(&self, status: &DeviceStatus) {
        self.cache.apply(self.derive(status));
    }
}

// ── Writable binary ──────────────────────────────────────────────────

/// How a binary write maps onto the control endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryCommand {
    /// on → Start, off → Stop, gated by the allowed process-action set.
    Process,
    /// powerOn / powerOff, gated by the allowed power booleans.
    Power,
}

/// Binary writable characteristic (power, start/stop).
///
/// The read path is identical to [`BinaryCharacteristic`]; `set`
/// acknowledges synchronously and dispatches in a spawned task scoped to
/// the owning accessory's cancellation token.
#[derive(Clone)]
pub struct SwitchCharacteristic {
    inner: Arc<SwitchInner>,
}

struct SwitchInner {
    binary: BinaryCharacteristic,
    dispatcher: Arc<ActionDispatcher>,
    serial: String,
    command: BinaryCommand,
    deactivate_disabled: bool,
    cancel: CancellationToken,
}

impl SwitchCharacteristic {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &'static str,
        sink: Arc<dyn HubSink>,
        map: BinaryStateMap,
        off_value: i64,
        on_value: i64,
        dispatcher: Arc<ActionDispatcher>,
        serial: String,
        command: BinaryCommand,
        deactivate_disabled: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(SwitchInner {
                binary: BinaryCharacteristic::new(name, sink, map, off_value, on_value),
                dispatcher,
                serial,
                command,
                deactivate_disabled,
                cancel,
            }),
        }
    }
}

impl Characteristic for SwitchCharacteristic {
    fn name(&self) -> &'static str {
        self.inner.binary.cache.name
    }

    fn get(&self) -> StateValue {
        self.inner.binary.get()
    }

    fn set(&self, requested: StateValue) {
        debug!(
            characteristic = self.name(),
            serial = %self.inner.serial,
            %requested,
            "write requested"
        );

        // Acknowledged here; everything network-bound runs detached.
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.write(requested).await;
        });
    }

    fn update(&self, status: &DeviceStatus) {
        self.inner.binary.update(status);
    }
}

impl SwitchInner {
    async fn write(&self, requested: StateValue) {
        let on = requested.as_i64() == self.binary.on_value;
        let action = match self.command {
            BinaryCommand::Process => DeviceAction::Process(if on {
                ProcessAction::Start
            } else {
                ProcessAction::Stop
            }),
            BinaryCommand::Power => DeviceAction::Power { on },
        };
        let disabled = self.deactivate_disabled && !on;

        let outcome = self
            .dispatcher
            .dispatch(&self.serial, &action, disabled)
            .await;

        if outcome.needs_revert() {
            revert(
                &self.binary.cache,
                &self.serial,
                requested,
                &self.dispatcher,
                &self.cancel,
            )
            .await;
        }
    }
}

// ── Writable numeric (target temperature) ────────────────────────────

/// Target-temperature characteristic: numeric read path plus a zone-scoped
/// write. The writable range is queried once at composition time from the
/// remote's reported allowed range.
#[derive(Clone)]
pub struct TargetTemperatureCharacteristic {
    inner: Arc<TargetTemperatureInner>,
}

struct TargetTemperatureInner {
    numeric: NumericCharacteristic,
    dispatcher: Arc<ActionDispatcher>,
    serial: String,
    zone: i64,
    range: (f64, f64),
    set_disabled: bool,
    cancel: CancellationToken,
}

impl TargetTemperatureCharacteristic {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &'static str,
        sink: Arc<dyn HubSink>,
        dispatcher: Arc<ActionDispatcher>,
        serial: String,
        zone: i64,
        range: (f64, f64),
        set_disabled: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(TargetTemperatureInner {
                numeric: NumericCharacteristic::new(
                    name,
                    sink,
                    TelemetrySource::TargetTemperature,
                    Some(range),
                ),
                dispatcher,
                serial,
                zone,
                range,
                set_disabled,
                cancel,
            }),
        }
    }

    /// The declared writable range in degrees.
    pub fn range(&self) -> (f64, f64) {
        self.inner.range
    }
}

impl Characteristic for TargetTemperatureCharacteristic {
    fn name(&self) -> &'static str {
        self.inner.numeric.cache.name
    }

    fn get(&self) -> StateValue {
        self.inner.numeric.get()
    }

    fn set(&self, requested: StateValue) {
        debug!(
            characteristic = self.name(),
            serial = %self.inner.serial,
            %requested,
            "write requested"
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let action = DeviceAction::TargetTemperature {
                zone: inner.zone,
                value: requested.as_i64(),
            };
            let outcome = inner
                .dispatcher
                .dispatch(&inner.serial, &action, inner.set_disabled)
                .await;

            if outcome.needs_revert() {
                revert(
                    &inner.numeric.cache,
                    &inner.serial,
                    requested,
                    &inner.dispatcher,
                    &inner.cancel,
                )
                .await;
            }
        });
    }

    fn update(&self, status: &DeviceStatus) {
        self.inner.numeric.update(status);
    }
}

// ── Revert ───────────────────────────────────────────────────────────

/// Roll the hub back to the cached value after the revert delay, unless
/// the request matched it anyway or the accessory is being torn down.
async fn revert(
    cache: &CachedState,
    serial: &str,
    requested: StateValue,
    dispatcher: &ActionDispatcher,
    cancel: &CancellationToken,
) {
    let cached = cache.get();
    if requested == cached {
        return;
    }

    info!(
        serial,
        characteristic = cache.name,
        %cached,
        "reverting to the cached value"
    );

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(dispatcher.revert_delay()) => cache.republish(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{names, RecordingSink};
    use applink_api::models::CodeValue;

    fn status_with_code(code: i64) -> DeviceStatus {
        DeviceStatus {
            status: CodeValue {
                value_raw: code,
                value_localized: None,
            },
            ..DeviceStatus::default()
        }
    }

    fn temp_status(raw: i64) -> DeviceStatus {
        DeviceStatus {
            temperature: vec![TemperatureReading {
                value_raw: Some(raw),
                unit: Some("Celsius".into()),
            }],
            ..DeviceStatus::default()
        }
    }

    const INACTIVE: &[ProgramStatus] = &[
        ProgramStatus::Off,
        ProgramStatus::EndProgrammed,
        ProgramStatus::Interrupted,
    ];

    #[test]
    fn binary_publishes_on_for_status_outside_inactive_set() {
        let sink = Arc::new(RecordingSink::new());
        let characteristic = BinaryCharacteristic::new(
            names::IN_USE,
            sink.clone(),
            BinaryStateMap::from_inactive(INACTIVE),
            0,
            1,
        );

        // 5 (InUse) is not in {1, 7, 9}: on sentinel.
        characteristic.update(&status_with_code(5));
        assert_eq!(sink.last_for(names::IN_USE), Some(StateValue::Int(1)));
        assert_eq!(characteristic.get(), StateValue::Int(1));

        // 1 (Off) is in the inactive set: off sentinel.
        characteristic.update(&status_with_code(1));
        assert_eq!(sink.last_for(names::IN_USE), Some(StateValue::Int(0)));
    }

    #[test]
    fn binary_suppresses_duplicate_publishes() {
        let sink = Arc::new(RecordingSink::new());
        let characteristic = BinaryCharacteristic::new(
            names::IN_USE,
            sink.clone(),
            BinaryStateMap::from_inactive(INACTIVE),
            0,
            1,
        );

        characteristic.update(&status_with_code(5));
        characteristic.update(&status_with_code(5));
        characteristic.update(&status_with_code(5));

        assert_eq!(sink.count_for(names::IN_USE), 1);
    }

    #[test]
    fn binary_active_set_derivation() {
        let sink = Arc::new(RecordingSink::new());
        let characteristic = BinaryCharacteristic::new(
            names::CURRENT_COOLING,
            sink.clone(),
            BinaryStateMap::from_active(&[ProgramStatus::InUse, ProgramStatus::Supercooling]),
            0,
            2,
        );

        characteristic.update(&status_with_code(14));
        assert_eq!(
            sink.last_for(names::CURRENT_COOLING),
            Some(StateValue::Int(2))
        );

        characteristic.update(&status_with_code(1));
        assert_eq!(
            sink.last_for(names::CURRENT_COOLING),
            Some(StateValue::Int(0))
        );
    }

    #[test]
    #[should_panic(expected = "exactly one")]
    fn binary_map_rejects_neither_set() {
        let _ = BinaryStateMap::new(None, None);
    }

    #[test]
    #[should_panic(expected = "exactly one")]
    fn binary_map_rejects_both_sets() {
        let _ = BinaryStateMap::new(Some(INACTIVE), Some(INACTIVE));
    }

    #[test]
    fn numeric_scales_temperature_and_clamps() {
        let sink = Arc::new(RecordingSink::new());
        let characteristic = NumericCharacteristic::new(
            names::CURRENT_TEMPERATURE,
            sink.clone(),
            TelemetrySource::CurrentTemperature,
            Some((-20.0, 60.0)),
        );

        characteristic.update(&temp_status(4000));
        assert_eq!(
            sink.last_for(names::CURRENT_TEMPERATURE),
            Some(StateValue::Float(40.0))
        );

        // Out-of-range readings clip to the declared bounds.
        characteristic.update(&temp_status(9000));
        assert_eq!(
            sink.last_for(names::CURRENT_TEMPERATURE),
            Some(StateValue::Float(60.0))
        );
    }

    #[test]
    fn numeric_sentinel_maps_to_off_default() {
        let sink = Arc::new(RecordingSink::new());
        let characteristic = NumericCharacteristic::new(
            names::CURRENT_TEMPERATURE,
            sink.clone(),
            TelemetrySource::CurrentTemperature,
            None,
        );

        characteristic.update(&temp_status(TEMPERATURE_NO_VALUE));
        assert_eq!(
            sink.last_for(names::CURRENT_TEMPERATURE),
            Some(StateValue::Float(0.0))
        );
    }

    #[test]
    fn numeric_ignores_missing_telemetry() {
        let sink = Arc::new(RecordingSink::new());
        let characteristic = NumericCharacteristic::new(
            names::CURRENT_TEMPERATURE,
            sink.clone(),
            TelemetrySource::CurrentTemperature,
            None,
        );

        // No temperature entries at all: nothing published, cache untouched.
        characteristic.update(&DeviceStatus::default());
        assert_eq!(sink.count_for(names::CURRENT_TEMPERATURE), 0);
        assert_eq!(characteristic.get(), StateValue::Float(0.0));
    }

    #[test]
    fn remaining_duration_from_hours_minutes_pair() {
        let sink = Arc::new(RecordingSink::new());
        let characteristic = NumericCharacteristic::new(
            names::REMAINING_DURATION,
            sink.clone(),
            TelemetrySource::RemainingSeconds,
            Some((0.0, 86_400.0)),
        );

        let status = DeviceStatus {
            remaining_time: vec![1, 30],
            ..DeviceStatus::default()
        };
        characteristic.update(&status);
        assert_eq!(
            sink.last_for(names::REMAINING_DURATION),
            Some(StateValue::Float(5400.0))
        );
    }

    #[test]
    fn temperature_unit_maps_to_enumeration() {
        let sink = Arc::new(RecordingSink::new());
        let characteristic = NumericCharacteristic::new(
            names::TEMPERATURE_UNIT,
            sink.clone(),
            TelemetrySource::TemperatureUnit,
            None,
        );

        characteristic.update(&temp_status(2100));
        assert_eq!(
            sink.last_for(names::TEMPERATURE_UNIT),
            Some(StateValue::Float(0.0))
        );

        let fahrenheit = DeviceStatus {
            temperature: vec![TemperatureReading {
                value_raw: Some(7000),
                unit: Some("Fahrenheit".into()),
            }],
            ..DeviceStatus::default()
        };
        characteristic.update(&fahrenheit);
        assert_eq!(
            sink.last_for(names::TEMPERATURE_UNIT),
            Some(StateValue::Float(1.0))
        );
    }

    #[test]
    fn ventilation_step_scales_to_rotation_speed() {
        let sink = Arc::new(RecordingSink::new());
        let characteristic = NumericCharacteristic::new(
            names::ROTATION_SPEED,
            sink.clone(),
            TelemetrySource::VentilationStep,
            Some((0.0, 100.0)),
        );

        let status = DeviceStatus {
            ventilation_step: Some(CodeValue {
                value_raw: 3,
                value_localized: None,
            }),
            ..DeviceStatus::default()
        };
        characteristic.update(&status);
        assert_eq!(
            sink.last_for(names::ROTATION_SPEED),
            Some(StateValue::Float(75.0))
        );
    }
}
