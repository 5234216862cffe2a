use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use crate::error::AppError;
use crate::gpio::{Edge, EdgeHandler, GpioBackend, Level, NumberingScheme, PinDirection};

const MOCK_BOARD_PINS: std::ops::RangeInclusive<u8> = 1..=40;

#[derive(Default)]
pub struct MockGpioBackend {
    scheme: RwLock<NumberingScheme>,
    pins: RwLock<HashMap<u8, MockPinState>>, // keyed by board pin
}

#[derive(Clone)]
struct MockPinState {
    direction: Option<PinDirection>,
    value: Level,
    interrupt: Option<MockInterrupt>,
}

impl Default for MockPinState {
    fn default() -> Self {
        Self {
            direction: None,
            value: Level::Low,
            interrupt: None,
        }
    }
}

#[derive(Clone)]
struct MockInterrupt {
    edge: Edge,
    debounce_ms: u64,
    handler: EdgeHandler,
    last_event: Option<Instant>,
}

fn poisoned<E: std::fmt::Display>(e: E) -> AppError {
    AppError::Hardware(format!("lock poisoned: {e}"))
}

impl MockGpioBackend {
    fn check_pin(pin: u8) -> Result<(), AppError> {
        if MOCK_BOARD_PINS.contains(&pin) {
            Ok(())
        } else {
            Err(AppError::Hardware(format!(
                "pin {pin} is not a valid board pin"
            )))
        }
    }

    pub fn numbering(&self) -> NumberingScheme {
        self.scheme.read().map(|s| *s).unwrap_or_default()
    }

    pub fn direction(&self, pin: u8) -> Option<PinDirection> {
        let pins = self.pins.read().ok()?;
        pins.get(&pin).and_then(|p| p.direction)
    }

    pub fn level(&self, pin: u8) -> Option<Level> {
        let pins = self.pins.read().ok()?;
        pins.get(&pin).map(|p| p.value)
    }

    pub fn interrupt(&self, pin: u8) -> Option<(Edge, u64)> {
        let pins = self.pins.read().ok()?;
        pins.get(&pin)
            .and_then(|p| p.interrupt.as_ref())
            .map(|i| (i.edge, i.debounce_ms))
    }

    // also accepted before setup, so an input can start out high
    pub fn drive_input(&self, pin: u8, level: Level) -> Result<(), AppError> {
        Self::check_pin(pin)?;

        let dispatch = {
            let mut pins = self.pins.write().map_err(poisoned)?;
            let state = pins.entry(pin).or_default();
            if state.direction == Some(PinDirection::Out) {
                return Err(AppError::Hardware(format!(
                    "pin {pin} is an output and cannot be driven externally"
                )));
            }

            let old = state.value;
            state.value = level;

            let edge = match (old, level) {
                (Level::Low, Level::High) => Some(Edge::Rising),
                (Level::High, Level::Low) => Some(Edge::Falling),
                _ => None,
            };

            match (edge, state.interrupt.as_mut()) {
                (Some(edge), Some(interrupt)) if interrupt.edge.matches(edge) => {
                    let now = Instant::now();
                    let debounce = interrupt.debounce_ms as u128;
                    let allow = interrupt
                        .last_event
                        .map(|t| now.duration_since(t).as_millis() >= debounce)
                        .unwrap_or(true);
                    if allow {
                        interrupt.last_event = Some(now);
                        Some(interrupt.handler.clone())
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        if let Some(handler) = dispatch {
            handler.dispatch(pin);
        }
        Ok(())
    }
}

impl GpioBackend for MockGpioBackend {
    fn describe(&self) -> String {
        "mock GPIO backend, 40-pin header".to_string()
    }

    fn set_mode(&self, scheme: NumberingScheme) -> Result<(), AppError> {
        *self.scheme.write().map_err(poisoned)? = scheme;
        Ok(())
    }

    fn setup(
        &self,
        pin: u8,
        direction: PinDirection,
        initial: Option<Level>,
    ) -> Result<(), AppError> {
        Self::check_pin(pin)?;
        let mut pins = self.pins.write().map_err(poisoned)?;
        let state = pins.entry(pin).or_default();

        state.direction = Some(direction);
        if direction == PinDirection::Out {
            state.value = initial.unwrap_or(Level::Low);
            state.interrupt = None;
        }
        Ok(())
    }

    fn input(&self, pin: u8) -> Result<Level, AppError> {
        let pins = self.pins.read().map_err(poisoned)?;
        match pins.get(&pin) {
            Some(state) if state.direction.is_some() => Ok(state.value),
            _ => Err(AppError::Hardware(format!(
                "pin {pin} not set up, call setup first"
            ))),
        }
    }

    fn output(&self, pin: u8, level: Level) -> Result<(), AppError> {
        let mut pins = self.pins.write().map_err(poisoned)?;
        match pins.get_mut(&pin) {
            Some(state) if state.direction == Some(PinDirection::Out) => {
                state.value = level;
                Ok(())
            }
            Some(state) if state.direction.is_some() => Err(AppError::Hardware(format!(
                "pin {pin} must be an output to set its level"
            ))),
            _ => Err(AppError::Hardware(format!(
                "pin {pin} not set up, call setup first"
            ))),
        }
    }

    fn add_edge_interrupt(
        &self,
        pin: u8,
        edge: Edge,
        debounce_ms: u64,
        handler: EdgeHandler,
    ) -> Result<(), AppError> {
        let mut pins = self.pins.write().map_err(poisoned)?;
        let state = pins
            .get_mut(&pin)
            .filter(|s| s.direction == Some(PinDirection::In))
            .ok_or_else(|| {
                AppError::Hardware(format!("pin {pin} must be set up as an input first"))
            })?;

        if state.interrupt.is_some() {
            return Err(AppError::Hardware(format!(
                "conflicting edge detection already enabled on pin {pin}"
            )));
        }

        state.interrupt = Some(MockInterrupt {
            edge,
            debounce_ms,
            handler,
            last_event: None,
        });
        Ok(())
    }

    fn cleanup(&self) -> Result<(), AppError> {
        let released: Vec<MockInterrupt> = {
            let mut pins = self.pins.write().map_err(poisoned)?;
            pins.values_mut()
                .filter_map(|state| {
                    state.direction = None;
                    state.interrupt.take()
                })
                .collect()
        };
        // handlers may hold references back into the bridge, drop them unlocked
        drop(released);
        Ok(())
    }
}
