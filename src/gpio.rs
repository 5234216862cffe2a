use std::fmt;
use std::sync::Arc;

use crate::error::AppError;

// BCM line offset for each position of the 40-pin header, None for power and ground
const BOARD_TO_BCM: [Option<u32>; 41] = [
    None,     // 0, unused
    None,     // 1, 3V3
    None,     // 2, 5V
    Some(2),  // 3
    None,     // 4, 5V
    Some(3),  // 5
    None,     // 6, GND
    Some(4),  // 7
    Some(14), // 8
    None,     // 9, GND
    Some(15), // 10
    Some(17), // 11
    Some(18), // 12
    Some(27), // 13
    None,     // 14, GND
    Some(22), // 15
    Some(23), // 16
    None,     // 17, 3V3
    Some(24), // 18
    Some(10), // 19
    None,     // 20, GND
    Some(9),  // 21
    Some(25), // 22
    Some(11), // 23
    Some(8),  // 24
    None,     // 25, GND
    Some(7),  // 26
    Some(0),  // 27
    Some(1),  // 28
    Some(5),  // 29
    None,     // 30, GND
    Some(6),  // 31
    Some(12), // 32
    Some(13), // 33
    None,     // 34, GND
    Some(19), // 35
    Some(16), // 36
    Some(26), // 37
    Some(20), // 38
    None,     // 39, GND
    Some(21), // 40
];

pub fn board_to_bcm(pin: u8) -> Option<u32> {
    BOARD_TO_BCM.get(pin as usize).copied().flatten()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(&self) -> bool {
        *self == Level::High
    }

    pub fn as_value(&self) -> i32 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => f.write_str("LOW"),
            Level::High => f.write_str("HIGH"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

impl Edge {
    pub fn matches(&self, observed: Edge) -> bool {
        match self {
            Edge::Both => matches!(observed, Edge::Rising | Edge::Falling),
            configured => *configured == observed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumberingScheme {
    // physical header position, 1 to 40
    #[default]
    Board,
    // SoC line offset
    Bcm,
}

pub struct EdgeCallbackHandler {
    callback: Box<dyn Fn(u8) + Send + Sync>,
}

impl EdgeCallbackHandler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    pub fn dispatch(&self, pin: u8) {
        (self.callback)(pin)
    }
}

pub type EdgeHandler = Arc<EdgeCallbackHandler>;

// Handlers read pins back through the same backend, so implementations must
// release their own locks before calling `dispatch`.
pub trait GpioBackend: Send + Sync {
    fn describe(&self) -> String;
    fn set_mode(&self, scheme: NumberingScheme) -> Result<(), AppError>;
    fn setup(&self, pin: u8, direction: PinDirection, initial: Option<Level>)
    -> Result<(), AppError>;
    fn input(&self, pin: u8) -> Result<Level, AppError>;
    fn output(&self, pin: u8, level: Level) -> Result<(), AppError>;
    fn add_edge_interrupt(
        &self,
        pin: u8,
        edge: Edge,
        debounce_ms: u64,
        handler: EdgeHandler,
    ) -> Result<(), AppError>;
    fn cleanup(&self) -> Result<(), AppError>;
}
