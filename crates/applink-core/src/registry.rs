//! Device type classification.
//!
//! A static table maps the discovery listing's raw type codes to the hub
//! service and characteristic set an accessory should expose. Unknown
//! codes are a normal outcome -- the caller skips the device and must not
//! register it with the hub.

use crate::status::ProgramStatus;

// ── Device kinds ─────────────────────────────────────────────────────

/// Appliance categories the bridge knows how to compose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Washer,
    TumbleDryer,
    Dishwasher,
    CoffeeSystem,
    Hood,
    Fridge,
    Freezer,
    WasherDryer,
    Hob,
}

impl DeviceKind {
    /// Map a raw discovery type code, or `None` for unsupported codes.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Washer),
            2 => Some(Self::TumbleDryer),
            7 => Some(Self::Dishwasher),
            17 => Some(Self::CoffeeSystem),
            18 => Some(Self::Hood),
            19 => Some(Self::Fridge),
            20 => Some(Self::Freezer),
            24 => Some(Self::WasherDryer),
            27 => Some(Self::Hob),
            _ => None,
        }
    }
}

/// Hub service an accessory is composed around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Valve,
    Thermostat,
    Switch,
    Fan,
    Outlet,
}

// ── Characteristic blueprints ────────────────────────────────────────

/// What to instantiate for one characteristic slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicPlan {
    /// Writable start/stop state derived from the inactive set.
    Active { inactive: &'static [ProgramStatus] },
    /// Read-only running flag derived from the inactive set.
    InUse { inactive: &'static [ProgramStatus] },
    RemainingDuration,
    CurrentTemperature,
    TargetTemperature { zone: i64 },
    TemperatureUnit,
    /// Read-only cooling flag derived from the active set.
    CurrentCooling { active: &'static [ProgramStatus] },
    /// Writable cooling target derived from the active set, driven by
    /// power commands.
    TargetCooling { active: &'static [ProgramStatus] },
    /// Writable on/off via power commands.
    Power,
    /// Read-only fan speed from the ventilation step.
    VentilationStep,
}

/// Composition recipe for one accessory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessoryPlan {
    pub kind: DeviceKind,
    pub service: ServiceKind,
    pub characteristics: &'static [CharacteristicPlan],
}

// ── Static tables ────────────────────────────────────────────────────

/// Status codes in which a program device counts as switched off.
const PROGRAM_INACTIVE: &[ProgramStatus] = &[ProgramStatus::Off];

/// Status codes in which a program device is not actually running water
/// or heat: everything up to start plus pause and finish.
const PROGRAM_NOT_RUNNING: &[ProgramStatus] = &[
    ProgramStatus::Off,
    ProgramStatus::On,
    ProgramStatus::Programmed,
    ProgramStatus::WaitingToStart,
    ProgramStatus::Paused,
    ProgramStatus::EndProgrammed,
];

const COOLING_ACTIVE_FRIDGE: &[ProgramStatus] =
    &[ProgramStatus::InUse, ProgramStatus::Supercooling];

const COOLING_ACTIVE_FREEZER: &[ProgramStatus] =
    &[ProgramStatus::InUse, ProgramStatus::Superfreezing];

const LAUNDRY: &[CharacteristicPlan] = &[
    CharacteristicPlan::Active {
        inactive: PROGRAM_INACTIVE,
    },
    CharacteristicPlan::InUse {
        inactive: PROGRAM_NOT_RUNNING,
    },
    CharacteristicPlan::RemainingDuration,
];

const FRIDGE: &[CharacteristicPlan] = &[
    CharacteristicPlan::CurrentCooling {
        active: COOLING_ACTIVE_FRIDGE,
    },
    CharacteristicPlan::TargetCooling {
        active: COOLING_ACTIVE_FRIDGE,
    },
    CharacteristicPlan::CurrentTemperature,
    CharacteristicPlan::TargetTemperature { zone: 1 },
    CharacteristicPlan::TemperatureUnit,
];

const FREEZER: &[CharacteristicPlan] = &[
    CharacteristicPlan::CurrentCooling {
        active: COOLING_ACTIVE_FREEZER,
    },
    CharacteristicPlan::TargetCooling {
        active: COOLING_ACTIVE_FREEZER,
    },
    CharacteristicPlan::CurrentTemperature,
    CharacteristicPlan::TargetTemperature { zone: 1 },
    CharacteristicPlan::TemperatureUnit,
];

const HOOD: &[CharacteristicPlan] = &[
    CharacteristicPlan::Power,
    CharacteristicPlan::VentilationStep,
];

const SWITCHED: &[CharacteristicPlan] = &[CharacteristicPlan::Power];

/// Classify a discovery type code into a composition recipe.
///
/// `None` means the code is unknown; the device is skipped, logged at info
/// severity by the caller, never treated as an error.
pub fn classify(device_type_code: i64) -> Option<AccessoryPlan> {
    let kind = DeviceKind::from_code(device_type_code)?;

    let (service, characteristics) = match kind {
        DeviceKind::Washer | DeviceKind::WasherDryer | DeviceKind::Dishwasher => {
            (ServiceKind::Valve, LAUNDRY)
        }
        DeviceKind::TumbleDryer => (ServiceKind::Valve, LAUNDRY),
        DeviceKind::Fridge => (ServiceKind::Thermostat, FRIDGE),
        DeviceKind::Freezer => (ServiceKind::Thermostat, FREEZER),
        DeviceKind::Hood => (ServiceKind::Fan, HOOD),
        DeviceKind::CoffeeSystem => (ServiceKind::Switch, SWITCHED),
        DeviceKind::Hob => (ServiceKind::Outlet, SWITCHED),
    };

    Some(AccessoryPlan {
        kind,
        service,
        characteristics,
    })
}

// ── Tests ────────────────────────────────────────────────────────────
