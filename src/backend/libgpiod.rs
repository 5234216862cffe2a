use log::{debug, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, yield_now};
use std::time::Duration;

use libgpiod::{chip::Chip, line, request};
use parking_lot::{FairMutex, RwLock};
use rustc_hash::FxHashMap;

use crate::error::AppError;
use crate::gpio::{
    Edge, EdgeHandler, GpioBackend, Level, NumberingScheme, PinDirection, board_to_bcm,
};

const LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY: usize = 64;
const LIBGPIOD_BACKEND_EVENT_WAIT_TIMEOUT_MS: Duration = Duration::from_millis(10);

pub struct LibgpiodBackend {
    chip: String,
    scheme: RwLock<NumberingScheme>,
    pins: RwLock<FxHashMap<u8, PinHandle>>, // keyed by pin as numbered by the caller
}

struct PinHandle {
    listener: Option<EdgeListener>, // stopped before the request is released
    line: u32,
    direction: PinDirection,
    gpiod_handle: Arc<FairMutex<GpiodHandle>>,
}

struct GpiodHandle {
    request: request::Request,
}

impl GpiodHandle {
    fn new(chip: &str, line_cfg: &line::Config) -> Result<Self, AppError> {
        let chip = Self::open_chip(chip)?;
        let request = Self::request_lines(&chip, line_cfg)?;
        Ok(Self { request })
    }

    fn open_chip(path: &str) -> Result<Chip, AppError> {
        let p = PathBuf::from(path);
        Chip::open(&p).map_err(|e| AppError::Hardware(format!("open chip {path}: {e}")))
    }

    fn request_lines(chip: &Chip, line_cfg: &line::Config) -> Result<request::Request, AppError> {
        let mut req_cfg = request::Config::new()
            .map_err(|e| AppError::Hardware(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| AppError::Hardware(format!("request consumer: {e}")))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| AppError::Hardware(format!("request lines: {e}")))
    }
}

struct EdgeListener {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EdgeListener {
    fn new(
        pin: u8,
        gpiod_handle: Arc<FairMutex<GpiodHandle>>,
        handler: EdgeHandler,
    ) -> Result<Self, AppError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = cancel.clone();
        let mut buffer = request::Buffer::new(LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY)
            .map_err(|e| AppError::Hardware(format!("event buffer: {e}")))?;

        let handle = std::thread::spawn(move || {
            while !cancel_flag.load(Ordering::Relaxed) {
                let mut pending = 0usize;
                {
                    let hdl = gpiod_handle.lock();
                    let req = &hdl.request;

                    let has_event =
                        match req.wait_edge_events(Some(LIBGPIOD_BACKEND_EVENT_WAIT_TIMEOUT_MS)) {
                            Ok(v) => v,
                            Err(e) => {
                                warn!("wait edge events error for pin {pin}: {e}");
                                drop(hdl);
                                yield_now();
                                continue;
                            }
                        };
                    if !has_event {
                        drop(hdl);
                        yield_now();
                        continue;
                    }

                    let events = match req.read_edge_events(&mut buffer) {
                        Ok(evts) => evts,
                        Err(e) => {
                            warn!("read edge events error for pin {pin}: {e}");
                            drop(hdl);
                            yield_now();
                            continue;
                        }
                    };
                    for evt in events {
                        if matches!(evt.and_then(|e| e.event_type()), Ok(_)) {
                            pending += 1;
                        }
                    }
                }

                // handlers read the line back, so the request must be unlocked here
                for _ in 0..pending {
                    handler.dispatch(pin);
                }
            }
        });

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }
}

impl Drop for EdgeListener {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl LibgpiodBackend {
    pub fn new(chip: &str) -> Result<Self, AppError> {
        // fail early when the chip is missing rather than on first setup
        GpiodHandle::open_chip(chip)?;
        Ok(Self {
            chip: chip.to_string(),
            scheme: RwLock::new(NumberingScheme::default()),
            pins: RwLock::new(FxHashMap::default()),
        })
    }

    fn line_offset(&self, pin: u8) -> Result<u32, AppError> {
        match *self.scheme.read() {
            NumberingScheme::Bcm => Ok(pin as u32),
            NumberingScheme::Board => board_to_bcm(pin).ok_or_else(|| {
                AppError::Hardware(format!(
                    "board pin {pin} is not a GPIO on this board revision"
                ))
            }),
        }
    }

    fn make_line_settings(
        direction: PinDirection,
        initial: Option<Level>,
        interrupt: Option<(Edge, u64)>,
    ) -> Result<line::Settings, AppError> {
        let mut ls = line::Settings::new()
            .map_err(|e| AppError::Hardware(format!("libgpiod settings: {e}")))?;

        match direction {
            PinDirection::Out => {
                ls.set_direction(line::Direction::Output)
                    .map_err(|e| AppError::Hardware(format!("set direction: {e}")))?;
                ls.set_drive(line::Drive::PushPull)
                    .map_err(|e| AppError::Hardware(format!("set drive: {e}")))?;
                ls.set_output_value(to_line_value(initial.unwrap_or(Level::Low)))
                    .map_err(|e| AppError::Hardware(format!("set output value: {e}")))?;
            }
            PinDirection::In => {
                ls.set_direction(line::Direction::Input)
                    .map_err(|e| AppError::Hardware(format!("set direction: {e}")))?;
            }
        }

        if let Some((edge, debounce_ms)) = interrupt {
            let edge = match edge {
                Edge::Rising => line::Edge::Rising,
                Edge::Falling => line::Edge::Falling,
                Edge::Both => line::Edge::Both,
            };
            ls.set_edge_detection(Some(edge))
                .map_err(|e| AppError::Hardware(format!("set edge detection: {e}")))?;
            ls.set_debounce_period(Duration::from_millis(debounce_ms));
        }

        Ok(ls)
    }

    fn make_line_config(offset: u32, settings: line::Settings) -> Result<line::Config, AppError> {
        let mut cfg =
            line::Config::new().map_err(|e| AppError::Hardware(format!("line config: {e}")))?;
        cfg.add_line_settings(&[offset], settings)
            .map_err(|e| AppError::Hardware(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }
}

fn to_line_value(level: Level) -> line::Value {
    match level {
        Level::Low => line::Value::InActive,
        Level::High => line::Value::Active,
    }
}

impl GpioBackend for LibgpiodBackend {
    fn describe(&self) -> String {
        format!("libgpiod backend on {}", self.chip)
    }

    fn set_mode(&self, scheme: NumberingScheme) -> Result<(), AppError> {
        if !self.pins.read().is_empty() {
            return Err(AppError::Hardware(
                "numbering scheme cannot change while pins are claimed".into(),
            ));
        }
        *self.scheme.write() = scheme;
        Ok(())
    }

    fn setup(
        &self,
        pin: u8,
        direction: PinDirection,
        initial: Option<Level>,
    ) -> Result<(), AppError> {
        let offset = self.line_offset(pin)?;
        let line_settings = Self::make_line_settings(direction, initial, None)?;
        let line_cfg = Self::make_line_config(offset, line_settings)?;

        let mut pins = self.pins.write();
        match pins.get_mut(&pin) {
            Some(handle) => {
                // edge detection does not survive a direction change
                let listener = handle.listener.take();
                let reconfigured = handle
                    .gpiod_handle
                    .lock()
                    .request
                    .reconfigure_lines(&line_cfg)
                    .map(|_| ())
                    .map_err(|e| AppError::Hardware(format!("reconfigure lines: {e}")));
                if reconfigured.is_ok() {
                    handle.direction = direction;
                }
                // the listener may be inside a handler waiting for the pin map
                drop(pins);
                drop(listener);
                reconfigured?;
            }
            None => {
                let gpiod_handle =
                    Arc::new(FairMutex::new(GpiodHandle::new(&self.chip, &line_cfg)?));
                pins.insert(
                    pin,
                    PinHandle {
                        listener: None,
                        line: offset,
                        direction,
                        gpiod_handle,
                    },
                );
            }
        }
        debug!("pin {pin} (line {offset}) set up as {direction:?}");
        Ok(())
    }

    fn input(&self, pin: u8) -> Result<Level, AppError> {
        let pins = self.pins.read();
        let handle = pins
            .get(&pin)
            .ok_or_else(|| AppError::Hardware(format!("pin {pin} not set up, call setup first")))?;

        let value = handle
            .gpiod_handle
            .lock()
            .request
            .value(handle.line)
            .map_err(|e| AppError::Hardware(format!("get value: {e}")))?;
        Ok(match value {
            line::Value::InActive => Level::Low,
            line::Value::Active => Level::High,
        })
    }

    fn output(&self, pin: u8, level: Level) -> Result<(), AppError> {
        let pins = self.pins.read();
        let handle = pins
            .get(&pin)
            .ok_or_else(|| AppError::Hardware(format!("pin {pin} not set up, call setup first")))?;

        if handle.direction != PinDirection::Out {
            return Err(AppError::Hardware(format!(
                "pin {pin} must be an output to set its level"
            )));
        }

        handle
            .gpiod_handle
            .lock()
            .request
            .set_value(handle.line, to_line_value(level))
            .map_err(|e| AppError::Hardware(format!("set value: {e}")))?;
        Ok(())
    }

    fn add_edge_interrupt(
        &self,
        pin: u8,
        edge: Edge,
        debounce_ms: u64,
        handler: EdgeHandler,
    ) -> Result<(), AppError> {
        let mut pins = self.pins.write();
        let handle = pins
            .get_mut(&pin)
            .filter(|h| h.direction == PinDirection::In)
            .ok_or_else(|| {
                AppError::Hardware(format!("pin {pin} must be set up as an input first"))
            })?;

        if handle.listener.is_some() {
            return Err(AppError::Hardware(format!(
                "conflicting edge detection already enabled on pin {pin}"
            )));
        }

        let line_settings =
            Self::make_line_settings(PinDirection::In, None, Some((edge, debounce_ms)))?;
        let line_cfg = Self::make_line_config(handle.line, line_settings)?;
        handle
            .gpiod_handle
            .lock()
            .request
            .reconfigure_lines(&line_cfg)
            .map_err(|e| AppError::Hardware(format!("reconfigure lines: {e}")))?;

        handle.listener = Some(EdgeListener::new(
            pin,
            handle.gpiod_handle.clone(),
            handler,
        )?);
        Ok(())
    }

    fn cleanup(&self) -> Result<(), AppError> {
        // take the handles out first: a listener may be inside a handler that
        // is waiting for the pin map
        let released = std::mem::take(&mut *self.pins.write());
        let count = released.len();
        drop(released);
        debug!("released {count} pins");
        Ok(())
    }
}
