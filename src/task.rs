//! One-shot jobs run off the tick.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::blackboard::Blackboard;
use crate::config::{CalibrationConfig, MotorConfig};
use crate::error::TaskError;
use crate::message::{AclMessage, ActionId, DeviceId, Priority};

pub trait Task: Send + 'static {
    fn name(&self) -> &'static str;

    /// Run to completion. May block.
    fn run(self: Box<Self>, cx: &TaskContext) -> Result<(), TaskError>;
}

/// A task's view of the blackboard. Tasks share the `TASK` mailbox.
pub struct TaskContext {
    blackboard: Arc<Blackboard>,
}

impl TaskContext {
    pub fn new(blackboard: Arc<Blackboard>) -> Self {
        Self { blackboard }
    }

    pub fn message(&self, action_id: ActionId, receiver: DeviceId) -> AclMessage {
        AclMessage::new(action_id, DeviceId::Task, receiver)
    }

    pub fn send(&self, message: AclMessage) {
        self.blackboard.send(message)
    }

    pub fn receive(&self) -> AclMessage {
        self.blackboard.receive(DeviceId::Task)
    }

    pub fn is_closed(&self) -> bool {
        self.blackboard.is_shutdown()
    }
}

/// Runs tasks on the blocking pool and reports their outcome to the monitor.
pub struct TaskDispatcher {
    blackboard: Arc<Blackboard>,
    runtime: Handle,
    running: Vec<(&'static str, JoinHandle<()>)>,
}

impl TaskDispatcher {
    pub fn new(blackboard: Arc<Blackboard>, runtime: Handle) -> Self {
        Self {
            blackboard,
            runtime,
            running: Vec::new(),
        }
    }

    /// Tasks not yet finished.
    pub fn running(&mut self) -> usize {
        self.running.retain(|(_, handle)| !handle.is_finished());
        self.running.len()
    }

    pub fn dispatch(&mut self, task: Box<dyn Task>) {
        let name = task.name();
        let blackboard = self.blackboard.clone();
        tracing::info!(task = name, "dispatched");

        let handle = self.runtime.spawn_blocking(move || {
            let cx = TaskContext::new(blackboard);
            let result = task.run(&cx);
            let value = match &result {
                Ok(()) => {
                    tracing::info!(task = name, "complete");
                    1.
                }
                Err(error) => {
                    tracing::warn!(task = name, %error, "failed");
                    0.
                }
            };
            cx.send(
                cx.message(ActionId::TaskComplete, DeviceId::StateMonitor)
                    .with_content(name)
                    .with_value(value)
                    .with_priority(Priority::High),
            );
        });

        self.running.retain(|(_, handle)| !handle.is_finished());
        self.running.push((name, handle));
    }

    /// Wait up to `timeout` in total for every running task.
    /// Returns `false` if any had to be abandoned.
    pub async fn await_all(&mut self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut all_done = true;
        for (name, handle) in self.running.drain(..) {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) => {
                    tracing::error!(task = name, %join_error, "panicked");
                    all_done = false;
                }
                Err(_) => {
                    tracing::warn!(task = name, "still running at shutdown");
                    all_done = false;
                }
            }
        }
        all_done
    }
}

/// ESC range calibration.
///
/// Holds every motor at the calibration pulse width until the operator
/// confirms with the button, then drops them back to the minimum.
pub struct CalibrationTask {
    pulse_us: f32,
    idle_us: f32,
    timeout: Duration,
    poll: Duration,
}

impl CalibrationTask {
    pub fn new(calibration: &CalibrationConfig, motor: &MotorConfig) -> Self {
        Self {
            pulse_us: calibration.pulse_us,
            idle_us: motor.min_pulse_us,
            timeout: Duration::from_millis(calibration.confirm_timeout_ms),
            poll: Duration::from_millis(10),
        }
    }

    /// Builder method to set the confirmation timeout and return `self`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn all_motors(&self, cx: &TaskContext, pulse_us: f32) {
        for motor in DeviceId::MOTORS {
            cx.send(
                cx.message(ActionId::ChangePulseWidth, motor)
                    .with_value(pulse_us.into())
                    .with_priority(Priority::Max),
            );
        }
    }

    fn await_confirm(&self, cx: &TaskContext) -> Result<(), TaskError> {
        let deadline = Instant::now() + self.timeout;
        while Instant::now() < deadline {
            if cx.is_closed() {
                return Err(TaskError::Aborted("blackboard closed".into()));
            }
            loop {
                let message = cx.receive();
                if message.is_empty() {
                    break;
                }
                if message.action_id() == Some(ActionId::Confirm) {
                    return Ok(());
                }
            }
            std::thread::sleep(self.poll);
        }
        Err(TaskError::Timeout)
    }
}

impl Task for CalibrationTask {
    fn name(&self) -> &'static str {
        "calibration"
    }

    fn run(self: Box<Self>, cx: &TaskContext) -> Result<(), TaskError> {
        // Confirms from before the task started do not count
        while !cx.receive().is_empty() {}

        self.all_motors(cx, self.pulse_us);
        let confirmed = self.await_confirm(cx);
        self.all_motors(cx, self.idle_us);
        confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibration(timeout: Duration) -> Box<CalibrationTask> {
        Box::new(
            CalibrationTask::new(&CalibrationConfig::default(), &MotorConfig::default())
                .with_timeout(timeout),
        )
    }

    #[test]
    fn confirm_ends_calibration() {
        let blackboard = Arc::new(Blackboard::default());
        let cx = TaskContext::new(blackboard.clone());

        let confirmer = {
            let blackboard = blackboard.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                blackboard.send(AclMessage::new(ActionId::Confirm, DeviceId::RedButton, DeviceId::Task));
            })
        };
        assert_eq!(calibration(Duration::from_secs(2)).run(&cx), Ok(()));
        confirmer.join().unwrap();

        for motor in DeviceId::MOTORS {
            assert_eq!(blackboard.receive(motor).value(), Some(1300.));
            assert_eq!(blackboard.receive(motor).value(), Some(1000.));
        }
    }

    #[test]
    fn stale_confirms_are_ignored() {
        let blackboard = Arc::new(Blackboard::default());
        blackboard.send(AclMessage::new(ActionId::Confirm, DeviceId::RedButton, DeviceId::Task));

        let cx = TaskContext::new(blackboard);
        assert_eq!(
            calibration(Duration::from_millis(30)).run(&cx),
            Err(TaskError::Timeout)
        );
    }

    #[tokio::test]
    async fn dispatcher_reports_completion_to_the_monitor() {
        let blackboard = Arc::new(Blackboard::default());
        let mut tasks = TaskDispatcher::new(blackboard.clone(), Handle::current());
        tasks.dispatch(calibration(Duration::from_millis(20)));
        assert!(tasks.await_all(Duration::from_secs(2)).await);
        assert_eq!(tasks.running(), 0);

        let complete = blackboard.receive(DeviceId::StateMonitor);
        assert_eq!(complete.action_id(), Some(ActionId::TaskComplete));
        assert_eq!(complete.content(), Some("calibration"));
        assert_eq!(complete.value(), Some(0.));
    }
}
