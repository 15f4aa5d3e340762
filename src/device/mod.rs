//! Devices and their lifecycle.
//!
//! A [`Device`] owns one piece of hardware or one logical responsibility and
//! talks to the rest of the aircraft only through its [`DeviceContext`].
//! The controller wraps every device in a [`DeviceCell`], which enforces the
//! lifecycle and paces the slow `alternate` path.

use std::sync::Arc;

use crate::blackboard::Blackboard;
use crate::error::DeviceError;
use crate::message::{AclMessage, ActionId, DeviceId};

mod button;
pub use button::RedButton;

mod camera;
pub use camera::CameraDevice;

mod comm;
pub use comm::{CommBridge, CommRole};

mod gps;
pub use gps::{parse_gga, Fix, GpsDevice};

mod gyro;
pub use gyro::GyroMagAcc;

mod motor;
pub use motor::Motor;

mod oled;
pub use oled::OledDevice;

mod pid;
pub use pid::PidController;

mod worker;
pub use worker::{StopFlag, Worker};

/// Upper bound on mailbox messages a device handles in one update.
pub const MAX_MESSAGES_PER_UPDATE: usize = 16;

pub trait Device: Send {
    fn id(&self) -> DeviceId;

    fn name(&self) -> &str {
        self.id().name()
    }

    /// Bring up the owned hardware. Called at most once.
    fn init(&mut self, cx: &DeviceContext) -> Result<(), DeviceError>;

    /// Per-tick work: drain the mailbox and act on it.
    fn update(&mut self, cx: &DeviceContext) -> Result<(), DeviceError>;

    /// Slow housekeeping, run every `alternate_speed` ticks.
    fn alternate(&mut self, _cx: &DeviceContext) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Power-on sanity check.
    fn self_test(&mut self) -> bool {
        true
    }

    /// Release the owned hardware. Must tolerate a failed or missing `init`.
    fn shutdown(&mut self);
}

/// A device's view of the blackboard.
#[derive(Clone)]
pub struct DeviceContext {
    id: DeviceId,
    blackboard: Arc<Blackboard>,
}

impl DeviceContext {
    pub fn new(id: DeviceId, blackboard: Arc<Blackboard>) -> Self {
        Self { id, blackboard }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Start a message from this device.
    pub fn message(&self, action_id: ActionId, receiver: DeviceId) -> AclMessage {
        AclMessage::new(action_id, self.id, receiver)
    }

    pub fn send(&self, message: AclMessage) {
        self.blackboard.send(message)
    }

    /// Take the next message addressed to this device.
    pub fn receive(&self) -> AclMessage {
        self.blackboard.receive(self.id)
    }

    /// Pending messages, at most [`MAX_MESSAGES_PER_UPDATE`] of them.
    pub fn drain(&self) -> impl Iterator<Item = AclMessage> + '_ {
        (0..MAX_MESSAGES_PER_UPDATE)
            .map(move |_| self.receive())
            .take_while(|message| !message.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Uninitialized,
    Initialized,
    /// `init` returned an error; the device is never run.
    Failed,
    Shutdown,
}

/// Lifecycle wrapper around a device.
pub struct DeviceCell {
    device: Box<dyn Device>,
    cx: DeviceContext,
    state: DeviceState,
    runs: u32,
    alternate_speed: u32,
}

impl DeviceCell {
    pub fn new(device: Box<dyn Device>, blackboard: Arc<Blackboard>, alternate_speed: u32) -> Self {
        let cx = DeviceContext::new(device.id(), blackboard);
        Self {
            device,
            cx,
            state: DeviceState::Uninitialized,
            runs: 0,
            alternate_speed: alternate_speed.max(1),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.cx.id()
    }

    pub fn name(&self) -> &str {
        self.device.name()
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Updates since the last `alternate`.
    pub fn runs(&self) -> u32 {
        self.runs
    }

    pub fn is_runnable(&self) -> bool {
        matches!(
            self.state,
            DeviceState::Uninitialized | DeviceState::Initialized
        )
    }

    /// Run `init` if it has never been attempted.
    pub fn initialize(&mut self) -> Result<(), DeviceError> {
        if self.state != DeviceState::Uninitialized {
            return Ok(());
        }

        match self.device.init(&self.cx) {
            Ok(()) => {
                tracing::info!(device = %self.id(), "initialized");
                self.state = DeviceState::Initialized;
                Ok(())
            }
            Err(error) => {
                tracing::error!(device = %self.id(), %error, "init failed");
                self.state = DeviceState::Failed;
                Err(error)
            }
        }
    }

    /// One tick of this device.
    pub fn run_once(&mut self) -> Result<(), DeviceError> {
        if !self.is_runnable() {
            return Ok(());
        }
        self.initialize()?;

        self.device.update(&self.cx)?;

        self.runs += 1;
        if self.runs >= self.alternate_speed {
            self.runs = 0;
            self.device.alternate(&self.cx)?;
        }
        Ok(())
    }

    pub fn self_test(&mut self) -> bool {
        match self.state {
            DeviceState::Initialized => self.device.self_test(),
            _ => false,
        }
    }

    pub fn shutdown(&mut self) {
        if self.state == DeviceState::Shutdown {
            return;
        }
        self.device.shutdown();
        self.state = DeviceState::Shutdown;
        tracing::info!(device = %self.id(), "shut down");
    }
}
