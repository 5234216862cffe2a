use log::{debug, error, info, trace, warn};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::config::{AppConfig, DebugLevel};
use crate::device::{Device, DeviceRegistry};
use crate::error::AppError;
use crate::gpio::{
    Edge, EdgeCallbackHandler, GpioBackend, Level, NumberingScheme, PinDirection,
};
use crate::pins::{PinSpec, parse_input_pins, parse_output_pins};

pub type GpioPlugin<B, R> = GenericGpioPlugin<B, R>;

// Edge listeners, commands and the heartbeat all write devices through here.
pub struct DeviceSync<R: DeviceRegistry> {
    registry: Arc<R>,
    lock: Mutex<()>,
}

impl<R: DeviceRegistry> DeviceSync<R> {
    pub fn new(registry: Arc<R>) -> Self {
        Self {
            registry,
            lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }

    pub fn update_device(
        &self,
        unit: u8,
        n_value: i32,
        s_value: &str,
        timed_out: bool,
    ) -> Result<bool, AppError> {
        let _guard = self.lock.lock();

        let Some(device) = self.registry.get(unit) else {
            trace!("unit {unit} no longer exists, skipping update");
            return Ok(false);
        };
        if device.state_matches(n_value, s_value, timed_out) {
            return Ok(false);
        }

        match self.registry.update(unit, n_value, s_value, timed_out) {
            Ok(()) => {
                info!("Update {n_value}:'{s_value}' ({})", device.name);
                Ok(true)
            }
            Err(AppError::NotFoundDevice(_)) => {
                trace!("unit {unit} removed during update, skipping");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

pub struct GenericGpioPlugin<B: GpioBackend, R: DeviceRegistry> {
    config: Arc<AppConfig>,
    backend: Arc<B>,
    sync: Arc<DeviceSync<R>>,
    pins: Mutex<Vec<PinSpec>>,
    command_lock: Mutex<()>, // output, read-back and update happen as one step
}

impl<B: GpioBackend + 'static, R: DeviceRegistry + 'static> GenericGpioPlugin<B, R> {
    pub fn new(config: Arc<AppConfig>, backend: Arc<B>, registry: Arc<R>) -> Self {
        Self {
            config,
            backend,
            sync: Arc::new(DeviceSync::new(registry)),
            pins: Mutex::new(Vec::new()),
            command_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<R> {
        self.sync.registry()
    }

    pub fn device(&self, unit: u8) -> Result<Device, AppError> {
        self.registry()
            .get(unit)
            .ok_or(AppError::NotFoundDevice(unit))
    }

    pub fn pins(&self) -> Vec<PinSpec> {
        self.pins.lock().clone()
    }

    pub fn update_device(
        &self,
        unit: u8,
        n_value: i32,
        s_value: &str,
        timed_out: bool,
    ) -> Result<bool, AppError> {
        self.sync.update_device(unit, n_value, s_value, timed_out)
    }

    pub fn on_start(&self) -> Result<(), AppError> {
        if self.config.debug != DebugLevel::Off {
            info!("Debug level is '{:?}'", self.config.debug);
            self.dump_config();
        }

        self.backend.set_mode(NumberingScheme::Board)?;
        info!(
            "GPIO ready: {}, heartbeat every {:?}",
            self.backend.describe(),
            self.config.heartbeat_secs.period()
        );

        self.pins.lock().clear();

        self.start_outputs().inspect_err(|e| {
            error!("start failed while processing output pins: {e}");
        })?;

        self.start_inputs().inspect_err(|e| {
            error!("start failed while processing input pins: {e}");
        })?;

        Ok(())
    }

    fn start_outputs(&self) -> Result<(), AppError> {
        for spec in parse_output_pins(&self.config.outputs)? {
            self.ensure_device(&spec)?;
            self.backend
                .setup(spec.pin, PinDirection::Out, spec.initial_level())?;
            self.pins.lock().push(spec);
            self.sync_pin(spec.pin, "")?;
        }
        Ok(())
    }

    fn start_inputs(&self) -> Result<(), AppError> {
        for spec in parse_input_pins(&self.config.inputs)? {
            if self.pins.lock().iter().any(|p| p.pin == spec.pin) {
                return Err(AppError::Config(format!(
                    "pin {} is already configured as an output",
                    spec.pin
                )));
            }

            self.ensure_device(&spec)?;
            self.backend.setup(spec.pin, PinDirection::In, None)?;
            self.backend.add_edge_interrupt(
                spec.pin,
                Edge::Both,
                self.config.debounce_ms.as_millis(),
                self.edge_handler(),
            )?;
            self.pins.lock().push(spec);
            self.sync_pin(spec.pin, "")?;
        }
        Ok(())
    }

    fn ensure_device(&self, spec: &PinSpec) -> Result<(), AppError> {
        let registry = self.registry();
        if !registry.exists(spec.pin) {
            let kind = if spec.is_output() { "Output" } else { "Input" };
            info!("Creating {kind} device #{}", spec.pin);
            registry.create(spec.pin, &spec.device_name(), spec.device_type())?;
        }
        Ok(())
    }

    fn sync_pin(&self, pin: u8, s_value: &str) -> Result<bool, AppError> {
        let level = self.backend.input(pin)?;
        self.sync
            .update_device(pin, level.as_value(), s_value, false)
    }

    fn edge_handler(&self) -> Arc<EdgeCallbackHandler> {
        let backend: Weak<B> = Arc::downgrade(&self.backend);
        let sync = self.sync.clone();

        Arc::new(EdgeCallbackHandler::new(move |pin: u8| {
            let Some(backend) = backend.upgrade() else {
                return;
            };
            if let Err(e) = on_edge(&*backend, &*sync, pin) {
                warn!("edge callback for pin {pin} failed: {e}");
            }
        }))
    }

    pub fn on_command(
        &self,
        unit: u8,
        command: &str,
        level: i32,
    ) -> Result<Option<Device>, AppError> {
        info!("command '{command}' for unit {unit}, level {level}");

        let spec = self
            .pins
            .lock()
            .iter()
            .find(|p| p.pin == unit)
            .copied()
            .ok_or(AppError::NotFoundDevice(unit))?;
        if !spec.is_output() {
            return Err(AppError::NotOutput(unit));
        }

        let target = Level::from(command == "On");
        let _guard = self.command_lock.lock();
        self.backend.output(unit, target)?;
        self.sync_pin(unit, command)?;

        // the host may have deleted the device, the pin is switched regardless
        Ok(self.registry().get(unit))
    }

    pub fn on_heartbeat(&self) -> Result<(), AppError> {
        trace!("heartbeat");
        if !self.config.poll_inputs_on_heartbeat {
            return Ok(());
        }

        let inputs: Vec<u8> = self
            .pins
            .lock()
            .iter()
            .filter(|p| !p.is_output())
            .map(|p| p.pin)
            .collect();
        for pin in inputs {
            on_edge(&*self.backend, &*self.sync, pin)?;
        }
        Ok(())
    }

    pub fn on_stop(&self) -> Result<(), AppError> {
        debug!("stopping, releasing pins");
        self.pins.lock().clear();
        self.backend.cleanup()
    }

    fn dump_config(&self) {
        info!("Config: {}", self.config);
        let devices = self.registry().devices();
        info!("Device count: {}", devices.len());
        for d in devices {
            info!(
                "Device {} '{}': id={} type={:?} n_value={} s_value='{}' timed_out={}",
                d.unit, d.name, d.id, d.device_type, d.n_value, d.s_value, d.timed_out
            );
        }
    }
}

fn on_edge<B: GpioBackend, R: DeviceRegistry>(
    backend: &B,
    sync: &DeviceSync<R>,
    pin: u8,
) -> Result<bool, AppError> {
    let level = backend.input(pin)?;
    debug!("gpio callback, pin: {pin}, value: {level}");
    let text = if level.is_high() { "On" } else { "Off" };
    sync.update_device(pin, level.as_value(), text, false)
}
