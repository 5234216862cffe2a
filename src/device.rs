use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    #[serde(rename = "Push On")]
    PushOn,
    #[serde(rename = "Push Off")]
    PushOff,
    #[serde(rename = "Contact")]
    Contact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: u32,
    pub unit: u8,
    pub name: String,
    pub device_type: DeviceType,
    pub n_value: i32,
    pub s_value: String,
    pub timed_out: bool,
}

impl Device {
    pub fn state_matches(&self, n_value: i32, s_value: &str, timed_out: bool) -> bool {
        self.n_value == n_value && self.s_value == s_value && self.timed_out == timed_out
    }
}

// The host may remove devices at any time without telling the bridge.
pub trait DeviceRegistry: Send + Sync {
    fn exists(&self, unit: u8) -> bool;
    fn create(&self, unit: u8, name: &str, device_type: DeviceType) -> Result<(), AppError>;
    fn get(&self, unit: u8) -> Option<Device>;
    fn update(&self, unit: u8, n_value: i32, s_value: &str, timed_out: bool)
    -> Result<(), AppError>;
    fn devices(&self) -> Vec<Device>;
}

#[derive(Default)]
pub struct MemoryRegistry {
    devices: RwLock<FxHashMap<u8, Device>>,
    next_id: AtomicU32,
}

impl MemoryRegistry {
    pub fn remove(&self, unit: u8) -> Option<Device> {
        self.devices.write().remove(&unit)
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn exists(&self, unit: u8) -> bool {
        self.devices.read().contains_key(&unit)
    }

    fn create(&self, unit: u8, name: &str, device_type: DeviceType) -> Result<(), AppError> {
        let mut devices = self.devices.write();
        if devices.contains_key(&unit) {
            return Err(AppError::InvalidValue(format!("unit {unit} already exists")));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        devices.insert(
            unit,
            Device {
                id,
                unit,
                name: name.to_string(),
                device_type,
                n_value: 0,
                s_value: String::new(),
                timed_out: false,
            },
        );
        Ok(())
    }

    fn get(&self, unit: u8) -> Option<Device> {
        self.devices.read().get(&unit).cloned()
    }

    fn update(
        &self,
        unit: u8,
        n_value: i32,
        s_value: &str,
        timed_out: bool,
    ) -> Result<(), AppError> {
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(&unit)
            .ok_or(AppError::NotFoundDevice(unit))?;
        device.n_value = n_value;
        device.s_value = s_value.to_string();
        device.timed_out = timed_out;
        Ok(())
    }

    fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.read().values().cloned().collect();
        devices.sort_by_key(|d| d.unit);
        devices
    }
}
