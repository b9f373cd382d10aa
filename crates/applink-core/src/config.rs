// ── Runtime bridge configuration ──
//
// These types describe *how* the engine talks to the cloud and which
// controls are opted out per device. They never touch disk -- the
// applink-config crate (or any other composition root) constructs a
// `BridgeConfig` and hands it in.

use std::collections::HashMap;
use std::time::Duration;

use url::Url;

/// Per-device control opt-outs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceFlags {
    /// Ignore deactivation requests (stop / power-off) for this device.
    pub disable_stop_action: bool,

    /// Ignore target-temperature writes for this device.
    pub disable_target_temperature: bool,

    /// Skip the temperature sensor characteristics entirely.
    pub disable_temperature_sensor: bool,
}

/// Configuration for one bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// API root, e.g. `https://api.example.com`.
    pub base_url: Url,

    /// Telemetry polling fallback interval. Zero disables polling and
    /// leaves freshness entirely to the event stream.
    pub poll_interval: Duration,

    /// Delay before an event channel reconnect attempt.
    pub reconnect_delay: Duration,

    /// Scheduled event channel recycle interval.
    pub forced_reconnect_interval: Duration,

    /// Stagger step added per constructed accessory.
    pub stagger_step: Duration,

    /// Delay before a rejected optimistic write is reverted.
    pub revert_delay: Duration,

    /// Per-device opt-outs, keyed by fabrication number.
    pub device_flags: HashMap<String, DeviceFlags>,
}

impl BridgeConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            poll_interval: Duration::ZERO,
            reconnect_delay: Duration::from_secs(60),
            forced_reconnect_interval: Duration::from_secs(60 * 60),
            stagger_step: Duration::from_secs(1),
            revert_delay: Duration::from_millis(500),
            device_flags: HashMap::new(),
        }
    }

    /// Opt-outs for one device; devices without an entry get the defaults.
    pub fn flags_for(&self, serial: &str) -> DeviceFlags {
        self.device_flags.get(serial).copied().unwrap_or_default()
    }
}
