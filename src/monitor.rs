//! Global flight-state machine.
//!
//! [`StateMonitor::update`] runs on the slow loop. Each state's entry action
//! fires once, on the update after the transition into it. The monitor
//! drives the rest of the application through the [`Lifecycle`] trait.

use std::sync::Arc;

use crate::blackboard::Blackboard;
use crate::config::{CalibrationConfig, Config, MotorConfig};
use crate::message::{AclMessage, ActionId, DeviceId, Priority};
use crate::state::{OnyxState, StateCell};
use crate::task::{CalibrationTask, Task};

/// Exit status when an error state was ever entered.
pub const EXIT_FAILURE: i32 = -1;

/// Power-on self test retries during recovery before giving up.
pub const MAX_RECOVERY_ATTEMPTS: u32 = 3;

/// Throttle (percent) held while descending out of a fault.
pub const DESCENT_THROTTLE: f32 = 35.;

/// Button holds (seconds) in `LANDED`.
const CALIBRATION_HOLD: f64 = 2.;
const SHUTDOWN_HOLD: f64 = 5.;

/// What the monitor can ask of the application.
pub trait Lifecycle {
    /// Initialize and test every device.
    fn power_on_self_test(&mut self) -> bool;

    /// Start ticking the controller.
    fn start(&mut self);

    /// Stop ticking the controller.
    fn stop(&mut self);

    fn dispatch(&mut self, task: Box<dyn Task>);

    /// Request process exit with `code` once teardown is done.
    fn exit(&mut self, code: i32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    SelfTest,
    Fault,
    RecoveryExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Nominal,
    Failed(FailureCode),
}

pub struct StateMonitor {
    state: StateCell,
    blackboard: Arc<Blackboard>,
    calibration: CalibrationConfig,
    motor: MotorConfig,
    status: Status,
    fault_origin: Option<OnyxState>,
    error_seen: bool,
    recovery_attempts: u32,
    button_hold: Option<f64>,
    task_result: Option<bool>,
    exiting: bool,
}

impl StateMonitor {
    pub fn new(blackboard: Arc<Blackboard>, config: &Config) -> Self {
        Self {
            state: StateCell::default(),
            blackboard,
            calibration: config.calibration.clone(),
            motor: config.motor.clone(),
            status: Status::Nominal,
            fault_origin: None,
            error_seen: false,
            recovery_attempts: 0,
            button_hold: None,
            task_result: None,
            exiting: false,
        }
    }

    pub fn state(&self) -> OnyxState {
        self.state.current()
    }

    pub fn previous(&self) -> OnyxState {
        self.state.previous()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Whether an exit has been requested from the application.
    pub fn is_exiting(&self) -> bool {
        self.exiting
    }

    /// Move to `next`. Guards run in the next update.
    pub fn set_state(&mut self, next: OnyxState) {
        if next == self.state.current() {
            return;
        }
        tracing::info!(from = %self.state.current(), to = %next, "state change");
        self.state.transition(next);
        self.display(0, &format!("STATE {next}"));
    }

    /// Report a fault from outside the state machine.
    pub fn fault(&mut self, reason: &str) {
        tracing::error!(state = %self.state.current(), reason, "fault reported");
        if self.status == Status::Nominal {
            self.status = Status::Failed(FailureCode::Fault);
        }
        self.set_state(OnyxState::Error);
    }

    pub fn update(&mut self, app: &mut impl Lifecycle) {
        if self.exiting {
            return;
        }
        self.read_mailbox();

        match self.state.current() {
            OnyxState::Startup => self.do_startup(app),
            OnyxState::Landed => self.do_landed(),
            OnyxState::Airborne => self.do_airborne(),
            OnyxState::Landing => self.do_landing(),
            OnyxState::Calibration => self.do_calibration(app),
            OnyxState::Error => self.do_error(),
            OnyxState::Recovery => self.do_recovery(app),
            OnyxState::Shutdown => self.do_shutdown(app),
        }

        // Holds only mean something while landed
        self.button_hold = None;
    }

    fn read_mailbox(&mut self) {
        for _ in 0..crate::device::MAX_MESSAGES_PER_UPDATE {
            let message = self.blackboard.receive(DeviceId::StateMonitor);
            if message.is_empty() {
                break;
            }
            match message.action_id() {
                Some(ActionId::ButtonHold) => self.button_hold = message.value(),
                Some(ActionId::TaskComplete) => {
                    self.task_result = Some(message.value().unwrap_or(0.) >= 1.)
                }
                Some(ActionId::SetState) => self.request(&message),
                other => tracing::trace!(action = ?other, "monitor ignored message"),
            }
        }
    }

    /// External requests are only honoured once the aircraft is up and healthy.
    fn accepts_requests(&self) -> bool {
        self.status == Status::Nominal
            && matches!(
                self.state.current(),
                OnyxState::Landed | OnyxState::Airborne | OnyxState::Landing
            )
    }

    fn request(&mut self, message: &AclMessage) {
        let requested = message.content().and_then(|name| name.parse::<OnyxState>().ok());
        match requested {
            Some(state) if state.is_requestable() && self.accepts_requests() => {
                self.set_state(state)
            }
            Some(state) if state.is_requestable() => tracing::warn!(
                current = %self.state.current(),
                requested = %state,
                status = ?self.status,
                "state request refused in current state"
            ),
            _ => tracing::warn!(
                content = ?message.content(),
                sender = ?message.sender(),
                "refused state request"
            ),
        }
    }

    fn send(&self, message: AclMessage) {
        self.blackboard.send(message)
    }

    fn display(&self, row: u8, text: &str) {
        self.send(
            AclMessage::new(ActionId::DisplayText, DeviceId::StateMonitor, DeviceId::OledDevice)
                .with_content(format!("{row}:{text}")),
        );
    }

    fn start_motors(&self, started: bool) {
        self.send(
            AclMessage::new(ActionId::StartMotors, DeviceId::StateMonitor, DeviceId::Pid)
                .with_content(started.to_string())
                .with_priority(Priority::Max),
        );
    }

    fn do_startup(&mut self, app: &mut impl Lifecycle) {
        if !self.state.take_changed() {
            return;
        }
        if app.power_on_self_test() {
            app.start();
            self.set_state(OnyxState::Landed);
        } else {
            self.status = Status::Failed(FailureCode::SelfTest);
            self.set_state(OnyxState::Error);
        }
    }

    fn do_landed(&mut self) {
        if self.state.take_changed() {
            if matches!(self.state.previous(), OnyxState::Airborne | OnyxState::Landing) {
                self.start_motors(false);
            }
            tracing::info!("landed");
        }

        match self.button_hold {
            Some(held) if held >= SHUTDOWN_HOLD => self.set_state(OnyxState::Shutdown),
            Some(held) if held >= CALIBRATION_HOLD => self.set_state(OnyxState::Calibration),
            _ => {}
        }
    }

    fn do_airborne(&mut self) {
        if self.state.take_changed() {
            tracing::info!("airborne");
        }
    }

    fn do_landing(&mut self) {
        if self.state.take_changed() {
            tracing::info!("landing");
        }
    }

    fn do_calibration(&mut self, app: &mut impl Lifecycle) {
        if self.state.take_changed() {
            if self.state.previous() != OnyxState::Landed {
                tracing::warn!(from = %self.state.previous(), "calibration refused");
                self.state.revert();
                return;
            }
            self.task_result = None;
            app.dispatch(Box::new(CalibrationTask::new(&self.calibration, &self.motor)));
            return;
        }

        if let Some(succeeded) = self.task_result.take() {
            if !succeeded {
                tracing::warn!("calibration did not complete");
            }
            self.set_state(OnyxState::Landed);
        }
    }

    fn do_error(&mut self) {
        self.state.take_changed();
        if self.status == Status::Nominal {
            self.status = Status::Failed(FailureCode::Fault);
        }
        self.error_seen = true;
        self.fault_origin = Some(self.state.previous());
        tracing::error!(status = ?self.status, origin = %self.state.previous(), "entering recovery");
        self.set_state(OnyxState::Recovery);
    }

    fn do_recovery(&mut self, app: &mut impl Lifecycle) {
        let entered = self.state.take_changed();
        let origin = self.fault_origin.unwrap_or(OnyxState::Startup);

        if matches!(origin, OnyxState::Airborne | OnyxState::Landing) {
            // Never cut motors in the air: level out and come down
            self.send(
                AclMessage::new(ActionId::Control, DeviceId::StateMonitor, DeviceId::Pid)
                    .with_content(format!("0,0,0,{DESCENT_THROTTLE}"))
                    .with_priority(Priority::Max),
            );
            self.recover(OnyxState::Landing);
            return;
        }

        if entered {
            self.start_motors(false);
        }
        if self.recovery_attempts >= MAX_RECOVERY_ATTEMPTS {
            tracing::error!(attempts = self.recovery_attempts, "recovery failed");
            self.status = Status::Failed(FailureCode::RecoveryExhausted);
            self.exiting = true;
            app.stop();
            app.exit(EXIT_FAILURE);
            return;
        }

        self.recovery_attempts += 1;
        if app.power_on_self_test() {
            if origin == OnyxState::Startup {
                app.start();
            }
            self.recover(OnyxState::Landed);
        } else {
            tracing::warn!(attempt = self.recovery_attempts, "self test still failing");
        }
    }

    fn recover(&mut self, next: OnyxState) {
        tracing::info!(to = %next, "recovered");
        self.status = Status::Nominal;
        self.recovery_attempts = 0;
        self.fault_origin = None;
        self.set_state(next);
    }

    fn do_shutdown(&mut self, app: &mut impl Lifecycle) {
        if !self.state.take_changed() {
            return;
        }
        if self.state.previous() != OnyxState::Landed {
            tracing::warn!(from = %self.state.previous(), "shutdown refused");
            self.state.revert();
            return;
        }

        tracing::info!(error_seen = self.error_seen, "shutting down");
        self.start_motors(false);
        self.exiting = true;
        app.stop();
        app.exit(if self.error_seen { EXIT_FAILURE } else { 0 });
    }
}
