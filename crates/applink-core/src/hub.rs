//! Publishing contract toward the home hub.
//!
//! The engine never talks to the hub directly; it pushes changed
//! characteristic values through a [`HubSink`] the hub glue implements.

use std::fmt;
use std::sync::Mutex;

/// A value published for one characteristic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateValue {
    Int(i64),
    Float(f64),
}

impl StateValue {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Self::Int(v) => v,
            Self::Float(v) => v.round() as i64,
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// Hub-facing characteristic names.
pub mod names {
    pub const ACTIVE: &str = "Active";
    pub const IN_USE: &str = "InUse";
    pub const REMAINING_DURATION: &str = "RemainingDuration";
    pub const CURRENT_TEMPERATURE: &str = "CurrentTemperature";
    pub const TARGET_TEMPERATURE: &str = "TargetTemperature";
    pub const TEMPERATURE_UNIT: &str = "TemperatureDisplayUnits";
    pub const CURRENT_COOLING: &str = "CurrentHeatingCoolingState";
    pub const TARGET_COOLING: &str = "TargetHeatingCoolingState";
    pub const ON: &str = "On";
    pub const ROTATION_SPEED: &str = "RotationSpeed";
}

/// Receiver for published characteristic values, one per accessory
/// service. Implementations must be cheap and non-blocking -- publishes
/// happen on telemetry and revert paths.
pub trait HubSink: Send + Sync {
    fn publish(&self, characteristic: &'static str, value: StateValue);
}

// ── Recording sink ───────────────────────────────────────────────────

/// Sink that records every publish. Used by the test suites; also handy
/// when wiring a dry-run mode.
#[derive(Debug, Default)]
pub struct RecordingSink {
    published: Mutex<Vec<(&'static str, StateValue)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish in order.
    pub fn published(&self) -> Vec<(&'static str, StateValue)> {
        self.published.lock().expect("sink lock poisoned").clone()
    }

    /// The most recent value published for `characteristic`.
    pub fn last_for(&self, characteristic: &str) -> Option<StateValue> {
        self.published
            .lock()
            .expect("sink lock poisoned")
            .iter()
            .rev()
            .find(|(name, _)| *name == characteristic)
            .map(|(_, value)| *value)
    }

    /// How many times `characteristic` was published.
    pub fn count_for(&self, characteristic: &str) -> usize {
        self.published
            .lock()
            .expect("sink lock poisoned")
            .iter()
            .filter(|(name, _)| *name == characteristic)
            .count()
    }
}

impl HubSink for RecordingSink {
    fn publish(&self, characteristic: &'static str, value: StateValue) {
        self.published
            .lock()
            .expect("sink lock poisoned")
            .push((characteristic, value));
    }
}
