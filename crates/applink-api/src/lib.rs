// applink-api: Async client for the cloud appliance API (devices, actions,
// token lifecycle, server-sent event stream)

pub mod client;
pub mod error;
pub mod events;
pub mod models;
pub mod store;
pub mod token;
pub mod transport;

pub use client::DeviceClient;
pub use error::Error;
pub use events::{ChannelState, StaggerAllocator, StreamConfig, StreamConnection};
pub use models::{
    ActionCommand, AllowedActions, CodeValue, DeviceEntry, DeviceIdentity, DeviceStatus,
    TemperatureReading, TemperatureRange, TEMPERATURE_NO_VALUE,
};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::{TokenConfig, TokenData, TokenManager, TOKEN_STORAGE_NAME};
