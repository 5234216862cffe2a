mod backend;
mod config;
mod device;
mod error;
mod gpio;
mod pins;
mod plugin;
mod routes;

pub use config::{AppConfig, Debounce, DebugLevel, Heartbeat, HttpConfig};
pub use device::{Device, DeviceRegistry, DeviceType, MemoryRegistry};
pub use error::AppError;
pub use gpio::{
    Edge, EdgeCallbackHandler, EdgeHandler, GpioBackend, Level, NumberingScheme, PinDirection,
    board_to_bcm,
};
pub use pins::{PinRole, PinSpec, Polarity, parse_input_pins, parse_output_pins};
pub use plugin::{DeviceSync, GenericGpioPlugin, GpioPlugin};
pub use routes::AppState;

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::MockGpioBackend;
