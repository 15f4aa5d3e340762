use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Sender, TrySendError};

use crate::device::{Device, DeviceContext, Worker};
use crate::error::DeviceError;
use crate::hal::Display;
use crate::message::{AclMessage, ActionId, DeviceId};

pub const OLED_ROWS: usize = 4;

/// Status display. Text arrives as `"row:text"` and is redrawn on the slow path.
pub struct OledDevice {
    display: Option<Box<dyn Display>>,
    worker: Option<Worker>,
    frames: Option<Sender<Vec<String>>>,
    draw_failures: Arc<AtomicU32>,
    lines: Vec<String>,
    dirty: bool,
}

impl OledDevice {
    pub fn new(display: impl Display + 'static) -> Self {
        Self {
            display: Some(Box::new(display)),
            worker: None,
            frames: None,
            draw_failures: Arc::new(AtomicU32::new(0)),
            lines: vec![String::new(); OLED_ROWS],
            dirty: false,
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    fn set_line(&mut self, message: &AclMessage) -> Result<(), DeviceError> {
        let content = message
            .content()
            .ok_or_else(|| DeviceError::Payload("display text without content".into()))?;
        let (row, text) = content
            .split_once(':')
            .ok_or_else(|| DeviceError::Payload(format!("`{content}` has no row")))?;
        let row: usize = row
            .trim()
            .parse()
            .map_err(|_| DeviceError::Payload(format!("`{row}` is not a row")))?;

        let line = self
            .lines
            .get_mut(row)
            .ok_or_else(|| DeviceError::Payload(format!("row {row} out of range")))?;
        if line != text {
            *line = text.to_owned();
            self.dirty = true;
        }
        Ok(())
    }
}

fn draw(display: &mut dyn Display, lines: &[String]) -> Result<(), DeviceError> {
    display.clear()?;
    for (row, line) in (0u8..).zip(lines) {
        display.draw_line(row, line)?;
    }
    display.flush()
}

impl Device for OledDevice {
    fn id(&self) -> DeviceId {
        DeviceId::OledDevice
    }

    fn init(&mut self, _cx: &DeviceContext) -> Result<(), DeviceError> {
        let mut display = self
            .display
            .take()
            .ok_or_else(|| DeviceError::Init("display already taken".into()))?;
        display.clear()?;
        display.flush()?;

        let (tx, rx) = channel::bounded::<Vec<String>>(1);
        let failures = self.draw_failures.clone();
        let worker = Worker::spawn("oled", move |stop| {
            while !stop.is_set() {
                let frame = match rx.recv_timeout(Duration::from_millis(20)) {
                    Ok(frame) => frame,
                    Err(channel::RecvTimeoutError::Timeout) => continue,
                    Err(channel::RecvTimeoutError::Disconnected) => break,
                };
                if let Err(error) = draw(display.as_mut(), &frame) {
                    failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(%error, "oled redraw failed");
                }
            }
        })?;

        self.frames = Some(tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn update(&mut self, cx: &DeviceContext) -> Result<(), DeviceError> {
        for message in cx.drain() {
            if message.action_id() != Some(ActionId::DisplayText) {
                continue;
            }
            if let Err(error) = self.set_line(&message) {
                tracing::warn!(device = %self.id(), %error, "rejected display text");
            }
        }
        Ok(())
    }

    fn alternate(&mut self, _cx: &DeviceContext) -> Result<(), DeviceError> {
        if !self.dirty {
            return Ok(());
        }
        let frames = self.frames.as_ref().ok_or(DeviceError::WorkerStopped)?;
        match frames.try_send(self.lines.clone()) {
            Ok(()) => self.dirty = false,
            // The previous frame is still being drawn; retry next time
            Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => return Err(DeviceError::WorkerStopped),
        }
        Ok(())
    }

    fn self_test(&mut self) -> bool {
        self.worker.as_ref().map_or(false, Worker::is_running)
            && self.draw_failures.load(Ordering::Relaxed) == 0
    }

    fn shutdown(&mut self) {
        self.frames = None;
        if let Some(mut worker) = self.worker.take() {
            worker.stop(Duration::from_millis(500));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::Blackboard;
    use crate::sim::SimDisplay;

    fn text(content: &str) -> AclMessage {
        AclMessage::new(ActionId::DisplayText, DeviceId::StateMonitor, DeviceId::OledDevice)
            .with_content(content)
    }

    #[test]
    fn dirty_lines_are_redrawn_through_the_worker() {
        let blackboard = Arc::new(Blackboard::default());
        let cx = DeviceContext::new(DeviceId::OledDevice, blackboard.clone());
        let display = SimDisplay::default();
        let mut oled = OledDevice::new(display.clone());
        oled.init(&cx).unwrap();
        assert!(oled.self_test());

        blackboard.send(text("0:LANDED"));
        blackboard.send(text("3:time: 12s"));
        oled.update(&cx).unwrap();
        oled.alternate(&cx).unwrap();

        let mut drawn = Vec::new();
        for _ in 0..100 {
            drawn = display.frame();
            if !drawn.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        oled.shutdown();

        assert_eq!(drawn, vec!["LANDED", "", "", "time: 12s"]);
        assert!(display.flushes() >= 2);
    }

    #[test]
    fn malformed_rows_are_ignored() {
        let blackboard = Arc::new(Blackboard::default());
        let cx = DeviceContext::new(DeviceId::OledDevice, blackboard.clone());
        let mut oled = OledDevice::new(SimDisplay::default());

        blackboard.send(text("9:too low"));
        blackboard.send(text("no row"));
        blackboard.send(text("1:ok"));
        oled.update(&cx).unwrap();

        assert_eq!(oled.lines(), ["", "ok", "", ""]);
    }

    #[test]
    fn alternate_without_worker_reports_it() {
        let blackboard = Arc::new(Blackboard::default());
        let cx = DeviceContext::new(DeviceId::OledDevice, blackboard.clone());
        let mut oled = OledDevice::new(SimDisplay::default());
        blackboard.send(text("0:x"));
        oled.update(&cx).unwrap();

        assert!(matches!(oled.alternate(&cx), Err(DeviceError::WorkerStopped)));
    }
}
