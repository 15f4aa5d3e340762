//! Device registry and the per-tick fan-out.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::blackboard::Blackboard;
use crate::config::{Config, ALTERNATE_SPEED};
use crate::device::{Device, DeviceCell};
use crate::error::{ControllerError, DeviceError};
use crate::message::DeviceId;

pub type DeviceHandle = Arc<Mutex<DeviceCell>>;

/// Outcome of one device in one tick.
enum Run {
    Ran,
    Skipped,
    Busy,
}

/// What happened during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub ran: usize,
    pub skipped: usize,
    /// Still running from an earlier tick.
    pub busy: usize,
    pub failed: usize,
    pub panicked: usize,
}

pub struct Controller {
    blackboard: Arc<Blackboard>,
    devices: BTreeMap<DeviceId, DeviceHandle>,
    capacity: usize,
    alternate_speed: u32,
    ticks: AtomicU64,
}

impl Controller {
    pub fn new(blackboard: Arc<Blackboard>) -> Self {
        Self {
            blackboard,
            devices: BTreeMap::new(),
            capacity: DeviceId::COUNT,
            alternate_speed: ALTERNATE_SPEED,
            ticks: AtomicU64::new(0),
        }
    }

    pub fn from_config(blackboard: Arc<Blackboard>, config: &Config) -> Self {
        Self::new(blackboard)
            .with_capacity(config.controller.max_devices)
            .with_alternate_speed(config.scheduler.alternate_speed)
    }

    /// Builder method to set the registry capacity and return `self`
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Builder method to set how many ticks pass between `alternate` calls and return `self`
    pub fn with_alternate_speed(mut self, alternate_speed: u32) -> Self {
        self.alternate_speed = alternate_speed;
        self
    }

    pub fn blackboard(&self) -> &Arc<Blackboard> {
        &self.blackboard
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn add_device<D: Device + 'static>(&mut self, device: D) -> Result<DeviceHandle, ControllerError> {
        let id = device.id();
        if self.devices.contains_key(&id) {
            return Err(ControllerError::DuplicateDevice(id));
        }
        if self.devices.len() >= self.capacity {
            return Err(ControllerError::RegistryFull {
                capacity: self.capacity,
            });
        }

        let cell = DeviceCell::new(Box::new(device), self.blackboard.clone(), self.alternate_speed);
        let handle = Arc::new(Mutex::new(cell));
        self.devices.insert(id, handle.clone());
        tracing::debug!(device = %id, "registered");
        Ok(handle)
    }

    pub fn remove_device(&mut self, id: DeviceId) -> Result<DeviceHandle, ControllerError> {
        self.devices
            .remove(&id)
            .ok_or(ControllerError::UnknownDevice(id))
    }

    pub fn get_device(&self, id: DeviceId) -> Result<DeviceHandle, ControllerError> {
        self.devices
            .get(&id)
            .cloned()
            .ok_or(ControllerError::UnknownDevice(id))
    }

    /// Initialize every device that has not been yet. Returns the failures.
    pub fn initialize_all(&self) -> Vec<(DeviceId, DeviceError)> {
        self.devices
            .iter()
            .filter_map(|(id, cell)| cell.lock().initialize().err().map(|error| (*id, error)))
            .collect()
    }

    /// Power-on self test. Every device is tested even after a failure.
    pub fn self_test_all(&self) -> bool {
        self.initialize_all();

        let mut passed = true;
        for (id, cell) in &self.devices {
            if !cell.lock().self_test() {
                tracing::error!(device = %id, "self test failed");
                passed = false;
            }
        }
        passed
    }

    /// Run every device once, in parallel, then maintain the blackboard.
    pub async fn tick(&self) -> TickReport {
        let jobs: Vec<_> = self
            .devices
            .iter()
            .map(|(id, cell)| {
                let cell = cell.clone();
                let job = tokio::task::spawn_blocking(move || {
                    let mut cell = match cell.try_lock() {
                        Some(cell) => cell,
                        None => return Ok(Run::Busy),
                    };
                    if !cell.is_runnable() {
                        return Ok(Run::Skipped);
                    }
                    cell.run_once().map(|()| Run::Ran)
                });
                (*id, job)
            })
            .collect();

        let mut report = TickReport::default();
        for (id, job) in jobs {
            match job.await {
                Ok(Ok(Run::Ran)) => report.ran += 1,
                Ok(Ok(Run::Skipped)) => report.skipped += 1,
                Ok(Ok(Run::Busy)) => {
                    tracing::debug!(device = %id, "still busy, skipped");
                    report.busy += 1;
                }
                Ok(Err(error)) => {
                    tracing::warn!(device = %id, %error, "run failed");
                    report.failed += 1;
                }
                Err(join_error) => {
                    tracing::error!(device = %id, %join_error, "run panicked");
                    report.panicked += 1;
                }
            }
        }

        self.blackboard.maintain();
        self.ticks.fetch_add(1, Ordering::Relaxed);
        report
    }

    /// Shut down every device, waiting at most `timeout` for each one's lock.
    pub fn shutdown(&self, timeout: Duration) {
        for (id, cell) in &self.devices {
            match cell.try_lock_for(timeout) {
                Some(mut cell) => cell.shutdown(),
                None => tracing::warn!(device = %id, ?timeout, "busy, not shut down"),
            }
        }
    }
}
