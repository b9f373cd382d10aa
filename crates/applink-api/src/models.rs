//! Wire types for the cloud appliance API.
//!
//! Everything here mirrors the JSON the remote actually sends: localized
//! `{value_raw, value_localized}` pairs, remaining time as an
//! `[hours, minutes]` pair, temperatures in centi-degrees. Helpers convert
//! into the flat shapes the engine works with.

use serde::{Deserialize, Serialize};

/// Raw temperature magnitude the remote reports when a device has no value
/// to report (device off, sensor absent). Must never be published literally.
pub const TEMPERATURE_NO_VALUE: i64 = -32768;

// ── Localized code/value pair ────────────────────────────────────────

/// A `{value_raw, value_localized}` pair as used for status, program phase,
/// device type and ventilation step. Unlike the container objects, these
/// inner fields are snake_case on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeValue {
    #[serde(default)]
    pub value_raw: i64,

    #[serde(default)]
    pub value_localized: Option<String>,
}

// ── Device listing ───────────────────────────────────────────────────

/// One entry of the device listing: identity block plus an optional state
/// snapshot the listing already carries.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub ident: DeviceIdent,

    #[serde(default)]
    pub state: Option<DeviceStatus>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdent {
    /// User-assigned name. Empty when the user never renamed the device.
    #[serde(default)]
    pub device_name: String,

    /// Device type as a localized code pair; `value_raw` is the type code
    /// the registry classifies on.
    #[serde(rename = "type", default)]
    pub device_type: CodeValue,

    pub device_ident_label: DeviceIdentLabel,

    #[serde(default)]
    pub xkm_ident_label: XkmIdentLabel,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentLabel {
    /// Fabrication number -- the stable unique id of the physical device.
    pub fab_number: String,

    #[serde(default)]
    pub tech_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XkmIdentLabel {
    #[serde(default)]
    pub release_version: String,
}

/// Flattened identity of a discovered device, as the accessory layer
/// consumes it. Rebuilt (overwritten) on every discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub unique_id: String,
    pub display_name: String,
    pub model_number: String,
    pub firmware_revision: String,
    pub device_type_code: i64,
}

impl DeviceEntry {
    /// Flatten the identity block. The display name falls back to the
    /// localized type name when the user never assigned one.
    pub fn identity(&self) -> DeviceIdentity {
        let display_name = if self.ident.device_name.is_empty() {
            self.ident
                .device_type
                .value_localized
                .clone()
                .unwrap_or_else(|| self.ident.device_ident_label.tech_type.clone())
        } else {
            self.ident.device_name.clone()
        };

        DeviceIdentity {
            unique_id: self.ident.device_ident_label.fab_number.clone(),
            display_name,
            model_number: self.ident.device_ident_label.tech_type.clone(),
            firmware_revision: self.ident.xkm_ident_label.release_version.clone(),
            device_type_code: self.ident.device_type.value_raw,
        }
    }
}

// ── Telemetry status ─────────────────────────────────────────────────

/// Telemetry snapshot for one device, delivered by both the state endpoint
/// and the `device` event of the live channel.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    /// Primary operation status code.
    #[serde(default)]
    pub status: CodeValue,

    #[serde(default)]
    pub program_phase: CodeValue,

    /// Remaining program time as an `[hours, minutes]` pair.
    #[serde(default)]
    pub remaining_time: Vec<u32>,

    /// Measured temperatures, one entry per zone.
    #[serde(default)]
    pub temperature: Vec<TemperatureReading>,

    /// Target temperatures, one entry per zone.
    #[serde(default)]
    pub target_temperature: Vec<TemperatureReading>,

    #[serde(default)]
    pub ventilation_step: Option<CodeValue>,
}

impl DeviceStatus {
    /// Remaining program time in seconds, derived from the
    /// `[hours, minutes]` pair. Missing entries count as zero.
    pub fn remaining_seconds(&self) -> u32 {
        let hours = self.remaining_time.first().copied().unwrap_or(0);
        let minutes = self.remaining_time.get(1).copied().unwrap_or(0);
        hours * 3600 + minutes * 60
    }
}

/// One temperature entry: centi-degree magnitude plus a unit name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemperatureReading {
    #[serde(default)]
    pub value_raw: Option<i64>,

    #[serde(default)]
    pub unit: Option<String>,
}

// ── Allowed actions ──────────────────────────────────────────────────

/// The set of control actions the device accepts in its current state.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AllowedActions {
    /// Allowed process action codes (start, stop, pause, ...).
    pub process_action: Vec<i64>,

    pub power_on: bool,
    pub power_off: bool,

    /// Writable target-temperature ranges, one entry per zone.
    pub target_temperature: Vec<TemperatureRange>,

    pub ventilation_step: Vec<i64>,
}

/// Declared writable range for one temperature zone, in whole degrees.
#[derive(Debug, Clone, Deserialize)]
pub struct TemperatureRange {
    pub zone: i64,
    pub min: i64,
    pub max: i64,
}

// ── Control commands ─────────────────────────────────────────────────

/// Body of a control request. Exactly one field is expected to be set;
/// the constructors below keep it that way.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_action: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_on: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_off: Option<bool>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_temperature: Vec<TargetTemperatureEntry>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ventilation_step: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetTemperatureEntry {
    pub zone: i64,
    pub value: i64,
}

impl ActionCommand {
    pub fn process(action: i64) -> Self {
        Self {
            process_action: Some(action),
            ..Self::default()
        }
    }

    pub fn power(on: bool) -> Self {
        if on {
            Self {
                power_on: Some(true),
                ..Self::default()
            }
        } else {
            Self {
                power_off: Some(true),
                ..Self::default()
            }
        }
    }

    pub fn target_temperature(zone: i64, value: i64) -> Self {
        Self {
            target_temperature: vec![TargetTemperatureEntry { zone, value }],
            ..Self::default()
        }
    }

    pub fn ventilation_step(step: i64) -> Self {
        Self {
            ventilation_step: Some(step),
            ..Self::default()
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
