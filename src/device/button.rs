use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver};

use crate::device::{Device, DeviceContext, Worker};
use crate::error::DeviceError;
use crate::hal::ButtonInput;
use crate::message::{ActionId, DeviceId, Priority};

/// Presses shorter than this confirm; longer ones are holds.
pub const HOLD_THRESHOLD: Duration = Duration::from_secs(2);

/// The red push button on the frame.
pub struct RedButton {
    input: Option<Box<dyn ButtonInput>>,
    poll: Duration,
    worker: Option<Worker>,
    presses: Option<Receiver<Duration>>,
}

impl RedButton {
    pub fn new(input: impl ButtonInput + 'static) -> Self {
        Self {
            input: Some(Box::new(input)),
            poll: Duration::from_millis(10),
            worker: None,
            presses: None,
        }
    }

    /// Builder method to set the polling period and return `self`
    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }
}

impl Device for RedButton {
    fn id(&self) -> DeviceId {
        DeviceId::RedButton
    }

    fn init(&mut self, _cx: &DeviceContext) -> Result<(), DeviceError> {
        let mut input = self
            .input
            .take()
            .ok_or_else(|| DeviceError::Init("button already taken".into()))?;
        input.is_pressed()?;

        let (tx, rx) = channel::unbounded();
        let poll = self.poll;
        let worker = Worker::spawn("red-button", move |stop| {
            let mut pressed_at: Option<Instant> = None;
            while stop.sleep(poll) {
                let pressed = match input.is_pressed() {
                    Ok(pressed) => pressed,
                    Err(error) => {
                        tracing::warn!(%error, "button read failed");
                        continue;
                    }
                };
                match (pressed, pressed_at) {
                    (true, None) => pressed_at = Some(Instant::now()),
                    (false, Some(since)) => {
                        pressed_at = None;
                        if tx.send(since.elapsed()).is_err() {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        })?;

        self.presses = Some(rx);
        self.worker = Some(worker);
        Ok(())
    }

    fn update(&mut self, cx: &DeviceContext) -> Result<(), DeviceError> {
        let presses = match &self.presses {
            Some(presses) => presses,
            None => return Ok(()),
        };

        for held in presses.try_iter() {
            tracing::debug!(device = %self.id(), ?held, "released");
            let message = if held < HOLD_THRESHOLD {
                cx.message(ActionId::Confirm, DeviceId::Task)
                    .with_priority(Priority::Max)
            } else {
                cx.message(ActionId::ButtonHold, DeviceId::StateMonitor)
                    .with_value(held.as_secs_f64())
            };
            cx.send(message);
        }
        Ok(())
    }

    fn self_test(&mut self) -> bool {
        self.worker.as_ref().map_or(false, Worker::is_running)
    }

    fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop(Duration::from_millis(500));
        }
        self.presses = None;
    }
}
