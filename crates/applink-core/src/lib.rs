// applink-core: device state synchronization and action-dispatch engine
// between applink-api and the home hub glue.

pub mod accessory;
pub mod characteristic;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod registry;
pub mod status;

// ── Primary re-exports ──────────────────────────────────────────────
pub use accessory::{Accessory, AccessoryContext};
pub use characteristic::{
    BinaryCharacteristic, BinaryCommand, BinaryStateMap, Characteristic, NumericCharacteristic,
    SwitchCharacteristic, TargetTemperatureCharacteristic, TelemetrySource,
};
pub use config::{BridgeConfig, DeviceFlags};
pub use dispatch::{ActionDispatcher, DeviceAction, DispatchOutcome, ProcessAction};
pub use error::CoreError;
pub use hub::{HubSink, RecordingSink, StateValue};
pub use registry::{classify, AccessoryPlan, CharacteristicPlan, DeviceKind, ServiceKind};
pub use status::ProgramStatus;
