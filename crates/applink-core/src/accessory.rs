//! Per-device accessory composition.
//!
//! Realizes an [`AccessoryPlan`] into characteristic instances, wires them
//! to one shared event channel, and owns every background task scoped to
//! the device: the telemetry pump, the optional polling fallback, and any
//! in-flight revert timers. Tearing the accessory down cancels all of them.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use applink_api::events::{StaggerAllocator, StreamConfig, StreamConnection};
use applink_api::models::{DeviceIdentity, DeviceStatus};
use applink_api::token::TokenManager;
use applink_api::transport::TransportConfig;
use applink_api::DeviceClient;

use crate::characteristic::{
    BinaryCharacteristic, BinaryCommand, BinaryStateMap, Characteristic, NumericCharacteristic,
    SwitchCharacteristic, TargetTemperatureCharacteristic, TelemetrySource,
    DEFAULT_TARGET_TEMPERATURE_RANGE,
};
use crate::config::BridgeConfig;
use crate::dispatch::ActionDispatcher;
use crate::error::CoreError;
use crate::hub::{names, HubSink};
use crate::registry::{AccessoryPlan, CharacteristicPlan};
use crate::status::ProgramStatus;

/// Status codes in which a power-switched device counts as off.
const POWER_INACTIVE: &[ProgramStatus] = &[ProgramStatus::Off, ProgramStatus::NotConnected];

// ── Shared context ───────────────────────────────────────────────────

/// Process-wide dependencies every accessory composition draws from.
pub struct AccessoryContext {
    pub client: Arc<DeviceClient>,
    pub token: Arc<TokenManager>,
    pub dispatcher: Arc<ActionDispatcher>,
    pub stagger: Arc<StaggerAllocator>,
    pub transport: TransportConfig,
    pub config: BridgeConfig,
}

// ── Accessory ────────────────────────────────────────────────────────

/// One composed device: its characteristic set, its event channel, and
/// the background tasks that keep them synchronized.
pub struct Accessory {
    identity: DeviceIdentity,
    characteristics: Vec<Arc<dyn Characteristic>>,
    stream: StreamConnection,
    client: Arc<DeviceClient>,
    poll_interval: std::time::Duration,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Accessory {
    /// Realize a composition plan for one discovered device.
    ///
    /// Queries the remote's writable temperature range where the plan asks
    /// for a target-temperature characteristic; the query failing degrades
    /// to the hardcoded default range.
    pub async fn build(
        identity: DeviceIdentity,
        plan: &AccessoryPlan,
        sink: Arc<dyn HubSink>,
        ctx: &AccessoryContext,
    ) -> Result<Self, CoreError> {
        let serial = identity.unique_id.clone();
        let flags = ctx.config.flags_for(&serial);
        let cancel = CancellationToken::new();

        debug!(
            serial,
            kind = ?plan.kind,
            name = %identity.display_name,
            "composing accessory"
        );

        let mut characteristics: Vec<Arc<dyn Characteristic>> = Vec::new();
        for item in plan.characteristics {
            match *item {
                CharacteristicPlan::Active { inactive } => {
                    characteristics.push(Arc::new(SwitchCharacteristic::new(
                        names::ACTIVE,
                        Arc::clone(&sink),
                        BinaryStateMap::from_inactive(inactive),
                        0,
                        1,
                        Arc::clone(&ctx.dispatcher),
                        serial.clone(),
                        BinaryCommand::Process,
                        flags.disable_stop_action,
                        cancel.child_token(),
                    )));
                }
                CharacteristicPlan::InUse { inactive } => {
                    characteristics.push(Arc::new(BinaryCharacteristic::new(
                        names::IN_USE,
                        Arc::clone(&sink),
                        BinaryStateMap::from_inactive(inactive),
                        0,
                        1,
                    )));
                }
                CharacteristicPlan::RemainingDuration => {
                    characteristics.push(Arc::new(NumericCharacteristic::new(
                        names::REMAINING_DURATION,
                        Arc::clone(&sink),
                        TelemetrySource::RemainingSeconds,
                        Some((0.0, 86_400.0)),
                    )));
                }
                CharacteristicPlan::CurrentTemperature => {
                    if flags.disable_temperature_sensor {
                        continue;
                    }
                    characteristics.push(Arc::new(NumericCharacteristic::new(
                        names::CURRENT_TEMPERATURE,
                        Arc::clone(&sink),
                        TelemetrySource::CurrentTemperature,
                        Some((-100.0, 100.0)),
                    )));
                }
                CharacteristicPlan::TemperatureUnit => {
                    if flags.disable_temperature_sensor {
                        continue;
                    }
                    characteristics.push(Arc::new(NumericCharacteristic::new(
                        names::TEMPERATURE_UNIT,
                        Arc::clone(&sink),
                        TelemetrySource::TemperatureUnit,
                        None,
                    )));
                }
                CharacteristicPlan::TargetTemperature { zone } => {
                    let range = writable_range(&ctx.client, &serial, zone).await;
                    characteristics.push(Arc::new(TargetTemperatureCharacteristic::new(
                        names::TARGET_TEMPERATURE,
                        Arc::clone(&sink),
                        Arc::clone(&ctx.dispatcher),
                        serial.clone(),
                        zone,
                        range,
                        flags.disable_target_temperature,
                        cancel.child_token(),
                    )));
                }
                CharacteristicPlan::CurrentCooling { active } => {
                    characteristics.push(Arc::new(BinaryCharacteristic::new(
                        names::CURRENT_COOLING,
                        Arc::clone(&sink),
                        BinaryStateMap::from_active(active),
                        0,
                        2,
                    )));
                }
                CharacteristicPlan::TargetCooling { active } => {
                    characteristics.push(Arc::new(SwitchCharacteristic::new(
                        names::TARGET_COOLING,
                        Arc::clone(&sink),
                        BinaryStateMap::from_active(active),
                        0,
                        2,
                        Arc::clone(&ctx.dispatcher),
                        serial.clone(),
                        BinaryCommand::Power,
                        flags.disable_stop_action,
                        cancel.child_token(),
                    )));
                }
                CharacteristicPlan::Power => {
                    characteristics.push(Arc::new(SwitchCharacteristic::new(
                        names::ON,
                        Arc::clone(&sink),
                        BinaryStateMap::from_inactive(POWER_INACTIVE),
                        0,
                        1,
                        Arc::clone(&ctx.dispatcher),
                        serial.clone(),
                        BinaryCommand::Power,
                        flags.disable_stop_action,
                        cancel.child_token(),
                    )));
                }
                CharacteristicPlan::VentilationStep => {
                    characteristics.push(Arc::new(NumericCharacteristic::new(
                        names::ROTATION_SPEED,
                        Arc::clone(&sink),
                        TelemetrySource::VentilationStep,
                        Some((0.0, 100.0)),
                    )));
                }
            }
        }

        let stream = StreamConnection::new(
            ctx.client.device_url(&serial, "events"),
            Arc::clone(&ctx.token),
            &ctx.transport,
            StreamConfig {
                reconnect_delay: ctx.config.reconnect_delay,
                forced_reconnect_interval: ctx.config.forced_reconnect_interval,
                stagger: ctx.stagger.next_offset(),
            },
        )?;

        Ok(Self {
            identity,
            characteristics,
            stream,
            client: Arc::clone(&ctx.client),
            poll_interval: ctx.config.poll_interval,
            cancel,
            tasks: Vec::new(),
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn characteristics(&self) -> &[Arc<dyn Characteristic>] {
        &self.characteristics
    }

    pub fn stream(&self) -> &StreamConnection {
        &self.stream
    }

    /// Feed one telemetry snapshot through every characteristic. Used by
    /// the pump and poller, and by discovery to seed the initial state the
    /// listing already carries.
    pub fn apply_status(&self, status: &DeviceStatus) {
        for characteristic in &self.characteristics {
            characteristic.update(status);
        }
    }

    /// Connect the event channel and spawn the background tasks.
    pub fn start(&mut self) {
        self.stream.connect();

        // Telemetry pump: event channel → characteristic updates.
        let mut rx = self.stream.subscribe();
        let characteristics = self.characteristics.clone();
        let pump_cancel = self.cancel.child_token();
        let serial = self.identity.unique_id.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = pump_cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(status) => {
                            for characteristic in &characteristics {
                                characteristic.update(&status);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(serial, skipped, "telemetry receiver lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            debug!(serial, "telemetry pump exiting");
        }));

        // Polling fallback: periodic state reads through the same path.
        if !self.poll_interval.is_zero() {
            let client = Arc::clone(&self.client);
            let characteristics = self.characteristics.clone();
            let poll_cancel = self.cancel.child_token();
            let serial = self.identity.unique_id.clone();
            let poll_interval = self.poll_interval;
            self.tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(poll_interval);
                interval.tick().await; // consume the immediate first tick
                loop {
                    tokio::select! {
                        biased;
                        _ = poll_cancel.cancelled() => break,
                        _ = interval.tick() => {
                            match client.device_state(&serial).await {
                                Ok(status) => {
                                    for characteristic in &characteristics {
                                        characteristic.update(&status);
                                    }
                                }
                                Err(e) => warn!(serial, error = %e, "state poll failed"),
                            }
                        }
                    }
                }
                debug!(serial, "state poller exiting");
            }));
        }

        info!(
            serial = %self.identity.unique_id,
            name = %self.identity.display_name,
            "accessory started"
        );
    }

    /// Tear the accessory down: cancels the event channel (pending
    /// reconnect timers included), the pump, the poller, and any revert
    /// timers still in flight. No callbacks fire afterward.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        self.stream.shutdown();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        debug!(serial = %self.identity.unique_id, "accessory shut down");
    }
}

/// Ask the remote for the writable range of `zone`, falling back to the
/// default range when the device cannot answer.
async fn writable_range(client: &DeviceClient, serial: &str, zone: i64) -> (f64, f64) {
    match client.device_actions(serial).await {
        Ok(allowed) => allowed
            .target_temperature
            .iter()
            .find(|range| range.zone == zone)
            .map(|range| (range.min as f64, range.max as f64))
            .unwrap_or_else(|| {
                warn!(serial, zone, "remote reported no writable range for this zone, using the default");
                DEFAULT_TARGET_TEMPERATURE_RANGE
            }),
        Err(e) => {
            warn!(serial, zone, error = %e, "could not query the writable temperature range, using the default");
            DEFAULT_TARGET_TEMPERATURE_RANGE
        }
    }
}
