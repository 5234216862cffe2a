use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::sleep;
use std::time::Duration;

use log::{Level as LogLevel, LevelFilter, Log, Metadata, Record};
use pinbridge::{
    AppConfig, AppError, Debounce, Device, DeviceRegistry, DeviceType, Edge, GpioPlugin, Level,
    MemoryRegistry, MockGpioBackend, NumberingScheme, PinDirection,
};

#[derive(Default)]
struct CountingRegistry {
    inner: MemoryRegistry,
    creates: AtomicUsize,
    updates: AtomicUsize,
}

impl CountingRegistry {
    fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

impl DeviceRegistry for CountingRegistry {
    fn exists(&self, unit: u8) -> bool {
        self.inner.exists(unit)
    }

    fn create(&self, unit: u8, name: &str, device_type: DeviceType) -> Result<(), AppError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(unit, name, device_type)
    }

    fn get(&self, unit: u8) -> Option<Device> {
        self.inner.get(unit)
    }

    fn update(
        &self,
        unit: u8,
        n_value: i32,
        s_value: &str,
        timed_out: bool,
    ) -> Result<(), AppError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update(unit, n_value, s_value, timed_out)
    }

    fn devices(&self) -> Vec<Device> {
        self.inner.devices()
    }
}

type TestPlugin = GpioPlugin<MockGpioBackend, CountingRegistry>;

// Records are kept per thread so tests running in parallel do not see each other.
struct CaptureLogger;

thread_local! {
    static RECORDS: RefCell<Vec<(LogLevel, String)>> = const { RefCell::new(Vec::new()) };
}

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        RECORDS.with(|r| {
            r.borrow_mut()
                .push((record.level(), record.args().to_string()))
        });
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;

fn capture_logs() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Trace);
    RECORDS.with(|r| r.borrow_mut().clear());
}

fn take_logs() -> Vec<(LogLevel, String)> {
    RECORDS.with(|r| r.borrow_mut().drain(..).collect())
}

fn config(outputs: &str, inputs: &str) -> AppConfig {
    AppConfig {
        outputs: outputs.to_string(),
        inputs: inputs.to_string(),
        ..Default::default()
    }
}

fn setup(config: AppConfig) -> (Arc<MockGpioBackend>, Arc<CountingRegistry>, TestPlugin) {
    setup_with_registry(config, Arc::new(CountingRegistry::default()))
}

fn setup_with_registry(
    config: AppConfig,
    registry: Arc<CountingRegistry>,
) -> (Arc<MockGpioBackend>, Arc<CountingRegistry>, TestPlugin) {
    let backend = Arc::new(MockGpioBackend::default());
    let plugin = GpioPlugin::new(Arc::new(config), backend.clone(), registry.clone());
    (backend, registry, plugin)
}

#[test]
fn normally_open_output_is_created_low() {
    let (backend, registry, plugin) = setup(config("39:NO", ""));

    plugin.on_start().expect("start");

    assert_eq!(backend.numbering(), NumberingScheme::Board);
    assert_eq!(registry.creates(), 1);
    let device = registry.get(39).expect("device 39");
    assert_eq!(device.name, "Output 39");
    assert_eq!(device.device_type, DeviceType::PushOn);
    assert_eq!(backend.direction(39), Some(PinDirection::Out));
    assert_eq!(backend.level(39), Some(Level::Low));
    assert_eq!(device.n_value, 0);
    assert_eq!(device.s_value, "");
    assert!(!device.timed_out);
}

#[test]
fn normally_closed_output_is_created_high() {
    let (backend, registry, plugin) = setup(config("40:NC", ""));

    plugin.on_start().expect("start");

    let device = registry.get(40).expect("device 40");
    assert_eq!(device.device_type, DeviceType::PushOff);
    assert_eq!(backend.level(40), Some(Level::High));
    assert_eq!(device.n_value, 1);
    assert_eq!(device.s_value, "");
}

#[test]
fn unknown_mode_means_normally_open() {
    let (backend, registry, plugin) = setup(config("12:XX", ""));

    plugin.on_start().expect("start");

    assert_eq!(registry.get(12).unwrap().device_type, DeviceType::PushOn);
    assert_eq!(backend.level(12), Some(Level::Low));
}

#[test]
fn inputs_get_both_edge_interrupts_with_debounce() {
    let (backend, registry, plugin) = setup(config("", "5,7"));

    plugin.on_start().expect("start");

    assert_eq!(registry.creates(), 2);
    for pin in [5, 7] {
        let device = registry.get(pin).expect("input device");
        assert_eq!(device.name, format!("Input {pin}"));
        assert_eq!(device.device_type, DeviceType::Contact);
        assert_eq!(backend.direction(pin), Some(PinDirection::In));
        assert_eq!(backend.interrupt(pin), Some((Edge::Both, 200)));
    }
}

#[test]
fn start_reads_the_physical_input_level() {
    let (backend, registry, plugin) = setup(config("", "7"));
    backend.drive_input(7, Level::High).unwrap();

    plugin.on_start().expect("start");

    let device = registry.get(7).unwrap();
    assert_eq!(device.n_value, 1);
    assert_eq!(device.s_value, "");
    assert!(!device.timed_out);
}

#[test]
fn malformed_output_pin_stops_before_inputs() {
    let (backend, registry, plugin) = setup(config("abc:NO", "5"));

    let err = plugin.on_start().unwrap_err();

    assert!(matches!(err, AppError::Config(_)));
    assert!(registry.devices().is_empty());
    assert_eq!(backend.direction(5), None);
}

#[test]
fn missing_mode_is_a_configuration_error() {
    let (_backend, registry, plugin) = setup(config("39", ""));

    assert!(matches!(plugin.on_start(), Err(AppError::Config(_))));
    assert_eq!(registry.creates(), 0);
}

#[test]
fn one_bad_token_rejects_the_whole_output_list() {
    let (backend, registry, plugin) = setup(config("11:NO,x:NC", ""));

    assert!(matches!(plugin.on_start(), Err(AppError::Config(_))));

    // the list is parsed before any pin is touched
    assert_eq!(registry.creates(), 0);
    assert_eq!(backend.direction(11), None);
}

#[test]
fn invalid_board_pin_is_a_hardware_error() {
    let (_backend, _registry, plugin) = setup(config("41:NO", ""));

    assert!(matches!(plugin.on_start(), Err(AppError::Hardware(_))));
}

#[test]
fn input_pin_already_used_as_output_is_rejected() {
    let (backend, registry, plugin) = setup(config("11:NO", "11"));

    assert!(matches!(plugin.on_start(), Err(AppError::Config(_))));
    assert_eq!(registry.get(11).unwrap().name, "Output 11");
    assert_eq!(backend.direction(11), Some(PinDirection::Out));
    assert_eq!(backend.interrupt(11), None);
}

#[test]
fn existing_devices_are_left_untouched() {
    let registry = Arc::new(CountingRegistry::default());
    registry
        .inner
        .create(39, "Garden pump", DeviceType::PushOff)
        .unwrap();
    let (_backend, registry, plugin) = setup_with_registry(config("39:NO,40:NC", ""), registry);

    plugin.on_start().expect("start");

    assert_eq!(registry.creates(), 1);
    let pump = registry.get(39).unwrap();
    assert_eq!(pump.name, "Garden pump");
    assert_eq!(pump.device_type, DeviceType::PushOff);
    assert_eq!(pump.id, 1);
    assert_eq!(registry.get(40).unwrap().name, "Output 40");
}

#[test]
fn restarting_with_the_same_pins_creates_nothing() {
    let (_backend, registry, plugin) = setup(config("39:NO,40:NC", "5,7"));

    plugin.on_start().expect("first start");
    plugin.on_stop().expect("stop");
    let before = registry.devices();
    plugin.on_start().expect("second start");

    assert_eq!(registry.creates(), 4);
    assert_eq!(registry.devices(), before);
}

#[test]
fn identical_update_is_suppressed() {
    let (_backend, registry, plugin) = setup(config("39:NO", ""));
    plugin.on_start().expect("start");
    let writes = registry.updates();

    let written = plugin.update_device(39, 0, "", false).unwrap();

    assert!(!written);
    assert_eq!(registry.updates(), writes);
}

#[test]
fn any_differing_field_writes_once() {
    let (_backend, registry, plugin) = setup(config("39:NO", ""));
    plugin.on_start().expect("start");

    for (n_value, s_value, timed_out) in [(1, "", false), (1, "On", false), (1, "On", true)] {
        let writes = registry.updates();
        assert!(plugin.update_device(39, n_value, s_value, timed_out).unwrap());
        assert_eq!(registry.updates(), writes + 1);

        let device = registry.get(39).unwrap();
        assert!(device.state_matches(n_value, s_value, timed_out));
    }
}

#[test]
fn identical_update_logs_nothing() {
    let (_backend, _registry, plugin) = setup(config("39:NO", ""));
    plugin.on_start().expect("start");
    capture_logs();

    plugin.update_device(39, 0, "", false).unwrap();

    assert!(take_logs().is_empty());
}

#[test]
fn differing_update_logs_one_info_line() {
    let (_backend, _registry, plugin) = setup(config("39:NO", ""));
    plugin.on_start().expect("start");
    capture_logs();

    plugin.update_device(39, 1, "On", false).unwrap();

    let logs = take_logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].0, LogLevel::Info);
    assert_eq!(logs[0].1, "Update 1:'On' (Output 39)");
}

#[test]
fn failed_start_logs_an_error() {
    let (_backend, _registry, plugin) = setup(config("abc:NO", ""));
    capture_logs();

    assert!(matches!(plugin.on_start(), Err(AppError::Config(_))));

    let logs = take_logs();
    assert!(
        logs.iter()
            .any(|(level, msg)| *level == LogLevel::Error && msg.contains("output pins"))
    );
}

#[test]
fn update_for_unknown_unit_is_a_noop() {
    let (_backend, registry, plugin) = setup(config("", ""));
    plugin.on_start().expect("start");

    assert!(!plugin.update_device(17, 1, "On", false).unwrap());
    assert_eq!(registry.updates(), 0);
    assert!(registry.get(17).is_none());
}

#[test]
fn command_on_drives_the_pin_high() {
    let (backend, registry, plugin) = setup(config("39:NO", ""));
    plugin.on_start().expect("start");

    let device = plugin
        .on_command(39, "On", 0)
        .expect("command")
        .expect("device 39");

    assert_eq!(backend.level(39), Some(Level::High));
    assert_eq!(device.n_value, 1);
    assert_eq!(device.s_value, "On");
    assert_eq!(registry.get(39).unwrap(), device);
}

#[test]
fn any_other_command_drives_the_pin_low() {
    let (backend, _registry, plugin) = setup(config("40:NC", ""));
    plugin.on_start().expect("start");

    let device = plugin
        .on_command(40, "Off", 0)
        .expect("command")
        .expect("device 40");

    assert_eq!(backend.level(40), Some(Level::Low));
    assert_eq!(device.n_value, 0);
    assert_eq!(device.s_value, "Off");
}

#[test]
fn command_for_deleted_device_still_switches_the_pin() {
    let (backend, registry, plugin) = setup(config("39:NO", ""));
    plugin.on_start().expect("start");
    registry.inner.remove(39);

    let device = plugin.on_command(39, "On", 0).expect("command");

    assert!(device.is_none());
    assert_eq!(backend.level(39), Some(Level::High));
    assert!(registry.get(39).is_none());
    assert_eq!(registry.creates(), 1);
}

#[test]
fn command_against_input_is_rejected() {
    let (backend, _registry, plugin) = setup(config("", "5"));
    plugin.on_start().expect("start");

    assert!(matches!(
        plugin.on_command(5, "On", 0),
        Err(AppError::NotOutput(5))
    ));
    assert_eq!(backend.level(5), Some(Level::Low));
}

#[test]
fn command_against_unconfigured_unit_is_rejected() {
    let (_backend, _registry, plugin) = setup(config("39:NO", ""));
    plugin.on_start().expect("start");

    assert!(matches!(
        plugin.on_command(3, "On", 0),
        Err(AppError::NotFoundDevice(3))
    ));
}

#[test]
fn edge_updates_the_input_device() {
    let mut cfg = config("", "5");
    cfg.debounce_ms = Debounce::try_from(50).unwrap();
    let (backend, registry, plugin) = setup(cfg);
    plugin.on_start().expect("start");

    backend.drive_input(5, Level::High).unwrap();
    let device = registry.get(5).unwrap();
    assert_eq!((device.n_value, device.s_value.as_str()), (1, "On"));

    sleep(Duration::from_millis(80));
    backend.drive_input(5, Level::Low).unwrap();
    let device = registry.get(5).unwrap();
    assert_eq!((device.n_value, device.s_value.as_str()), (0, "Off"));
}

#[test]
fn bouncing_edges_are_filtered_by_the_backend() {
    let (backend, registry, plugin) = setup(config("", "5"));
    plugin.on_start().expect("start");

    backend.drive_input(5, Level::High).unwrap();
    backend.drive_input(5, Level::Low).unwrap();

    let device = registry.get(5).unwrap();
    assert_eq!(device.s_value, "On");
}

#[test]
fn edge_for_deleted_device_is_ignored() {
    let (backend, registry, plugin) = setup(config("", "5"));
    plugin.on_start().expect("start");
    registry.inner.remove(5);

    backend.drive_input(5, Level::High).unwrap();

    assert!(registry.get(5).is_none());
    assert_eq!(registry.creates(), 1);
}

#[test]
fn heartbeat_repolls_inputs_when_enabled() {
    let mut cfg = config("", "5");
    cfg.poll_inputs_on_heartbeat = true;
    let (backend, registry, plugin) = setup(cfg);
    plugin.on_start().expect("start");

    backend.drive_input(5, Level::High).unwrap();
    // swallowed by the debounce window
    backend.drive_input(5, Level::Low).unwrap();
    assert_eq!(registry.get(5).unwrap().s_value, "On");

    plugin.on_heartbeat().expect("heartbeat");

    let device = registry.get(5).unwrap();
    assert_eq!((device.n_value, device.s_value.as_str()), (0, "Off"));
}

#[test]
fn heartbeat_leaves_devices_alone_by_default() {
    let (backend, registry, plugin) = setup(config("", "5"));
    plugin.on_start().expect("start");
    backend.drive_input(5, Level::High).unwrap();
    backend.drive_input(5, Level::Low).unwrap();
    let writes = registry.updates();

    plugin.on_heartbeat().expect("heartbeat");

    assert_eq!(registry.updates(), writes);
    assert_eq!(registry.get(5).unwrap().s_value, "On");
}

#[test]
fn stop_releases_every_pin() {
    let (backend, registry, plugin) = setup(config("39:NO", "5"));
    plugin.on_start().expect("start");

    plugin.on_stop().expect("stop");

    assert_eq!(backend.direction(39), None);
    assert_eq!(backend.direction(5), None);
    assert_eq!(backend.interrupt(5), None);
    assert!(plugin.pins().is_empty());
    // devices belong to the host and survive
    assert_eq!(registry.devices().len(), 2);
}

#[test]
fn concurrent_edges_and_commands_keep_devices_consistent() {
    let (backend, registry, plugin) = setup(config("39:NO", "5"));
    let plugin = Arc::new(plugin);
    plugin.on_start().expect("start");

    let commands = {
        let plugin = plugin.clone();
        std::thread::spawn(move || {
            for i in 0..200 {
                let command = if i % 2 == 0 { "On" } else { "Off" };
                plugin.on_command(39, command, 0).expect("command");
            }
        })
    };
    for i in 0..200 {
        let level = Level::from(i % 2 == 0);
        backend.drive_input(5, level).unwrap();
    }
    commands.join().unwrap();

    let relay = registry.get(39).unwrap();
    assert_eq!((relay.n_value, relay.s_value.as_str()), (0, "Off"));
    let input = registry.get(5).unwrap();
    assert_eq!(input.n_value == 1, input.s_value == "On");
}

#[test]
fn concurrent_commands_on_one_relay_leave_a_consistent_device() {
    let (backend, registry, plugin) = setup(config("39:NO", ""));
    let plugin = Arc::new(plugin);
    plugin.on_start().expect("start");

    let workers: Vec<_> = (0..4)
        .map(|w| {
            let plugin = plugin.clone();
            std::thread::spawn(move || {
                for i in 0..50 {
                    let command = if (i + w) % 2 == 0 { "On" } else { "Off" };
                    plugin.on_command(39, command, 0).expect("command");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let relay = registry.get(39).unwrap();
    assert_eq!(relay.n_value == 1, relay.s_value == "On");
    assert_eq!(Some(Level::from(relay.n_value == 1)), backend.level(39));
}
