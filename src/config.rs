use std::{fmt, fs, path::Path, time::Duration};

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const DEBOUNCE_OPTIONS_MS: [u64; 5] = [50, 100, 150, 200, 250];
pub const HEARTBEAT_OPTIONS_SECS: [u64; 13] = [1, 2, 3, 4, 5, 6, 8, 10, 12, 14, 16, 18, 20];

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    pub path: String,
}

// only the values the host offers
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "u64", into = "u64")]
pub struct Debounce(u64);

impl Debounce {
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl Default for Debounce {
    fn default() -> Self {
        Debounce(200)
    }
}

impl TryFrom<u64> for Debounce {
    type Error = AppError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if DEBOUNCE_OPTIONS_MS.contains(&value) {
            Ok(Debounce(value))
        } else {
            Err(AppError::Config(format!(
                "debounce must be one of {DEBOUNCE_OPTIONS_MS:?} ms, got {value}"
            )))
        }
    }
}

impl From<Debounce> for u64 {
    fn from(value: Debounce) -> Self {
        value.0
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "u64", into = "u64")]
pub struct Heartbeat(u64);

impl Heartbeat {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Heartbeat(10)
    }
}

impl TryFrom<u64> for Heartbeat {
    type Error = AppError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if HEARTBEAT_OPTIONS_SECS.contains(&value) {
            Ok(Heartbeat(value))
        } else {
            Err(AppError::Config(format!(
                "heartbeat must be one of {HEARTBEAT_OPTIONS_SECS:?} s, got {value}"
            )))
        }
    }
}

impl From<Heartbeat> for u64 {
    fn from(value: Heartbeat) -> Self {
        value.0
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DebugLevel {
    #[default]
    Off,
    Basic,
    Verbose,
}

impl DebugLevel {
    pub fn level_filter(&self) -> LevelFilter {
        match self {
            DebugLevel::Off => LevelFilter::Info,
            DebugLevel::Basic => LevelFilter::Debug,
            DebugLevel::Verbose => LevelFilter::Trace,
        }
    }
}

fn default_gpio_chip() -> String {
    "/dev/gpiochip0".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub outputs: String,
    #[serde(default)]
    pub inputs: String,
    #[serde(default)]
    pub debounce_ms: Debounce,
    #[serde(default)]
    pub heartbeat_secs: Heartbeat,
    #[serde(default)]
    pub debug: DebugLevel,
    #[serde(default)]
    pub poll_inputs_on_heartbeat: bool,
    #[serde(default = "default_gpio_chip")]
    pub gpio_chip: String,
    pub http: Option<HttpConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            outputs: String::new(),
            inputs: String::new(),
            debounce_ms: Debounce::default(),
            heartbeat_secs: Heartbeat::default(),
            debug: DebugLevel::default(),
            poll_inputs_on_heartbeat: false,
            gpio_chip: default_gpio_chip(),
            http: None,
        }
    }
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, AppError> {
        serde_json::from_str(contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))
    }
}

impl fmt::Display for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "outputs='{}' inputs='{}' debounce={}ms heartbeat={}s debug={:?} poll_inputs={} chip='{}'",
            self.outputs,
            self.inputs,
            self.debounce_ms.0,
            self.heartbeat_secs.0,
            self.debug,
            self.poll_inputs_on_heartbeat,
            self.gpio_chip,
        )
    }
}
