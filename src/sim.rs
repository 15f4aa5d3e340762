//! Simulated collaborators for bench runs and tests.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use embedded_time::{clock, rate::Fraction, Clock, Instant};
use nalgebra::Vector3;
use parking_lot::Mutex;

use crate::error::DeviceError;
use crate::hal::{ButtonInput, Display, Esc, FrameSource, GpsReceiver, ImuSample, InertialSensor, Link};
use crate::message::wire::{self, FrameDecoder};
use crate::message::AclMessage;

/// A fix over Munich, 8 satellites, 545.4 m.
pub const SAMPLE_GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

#[derive(Debug, Default)]
struct EscLog {
    armed: bool,
    pulses: Vec<f32>,
}

/// Records every pulse width it is given.
#[derive(Debug, Clone, Default)]
pub struct SimEsc {
    log: Arc<Mutex<EscLog>>,
}

impl SimEsc {
    pub fn is_armed(&self) -> bool {
        self.log.lock().armed
    }

    pub fn pulses(&self) -> Vec<f32> {
        self.log.lock().pulses.clone()
    }
}

impl Esc for SimEsc {
    fn arm(&mut self) {
        self.log.lock().armed = true;
    }

    fn output(&mut self, pulse_us: f32) {
        self.log.lock().pulses.push(pulse_us);
    }
}

/// A level, motionless IMU with optional scripted read failures.
pub struct SimImu {
    gyro: Vector3<f32>,
    failures: u32,
    resets: Arc<AtomicU32>,
}

impl Default for SimImu {
    fn default() -> Self {
        Self {
            gyro: Vector3::zeros(),
            failures: 0,
            resets: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl SimImu {
    /// Builder method to set a constant gyro rate and return `self`
    pub fn with_gyro(mut self, gyro: Vector3<f32>) -> Self {
        self.gyro = gyro;
        self
    }

    /// Builder method to fail the first `failures` reads and return `self`
    pub fn with_failures(mut self, failures: u32) -> Self {
        self.failures = failures;
        self
    }

    pub fn resets(&self) -> Arc<AtomicU32> {
        self.resets.clone()
    }
}

impl InertialSensor for SimImu {
    fn read(&mut self) -> Result<ImuSample, DeviceError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(DeviceError::Hardware("i2c nack".into()));
        }
        Ok(ImuSample {
            gyro: self.gyro,
            ..ImuSample::default()
        })
    }

    fn reset(&mut self) -> Result<(), DeviceError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Repeats one sentence forever.
pub struct SimGps {
    sentence: String,
}

impl Default for SimGps {
    fn default() -> Self {
        Self {
            sentence: SAMPLE_GGA.to_owned(),
        }
    }
}

impl GpsReceiver for SimGps {
    fn read_sentence(&mut self) -> Result<Option<String>, DeviceError> {
        Ok(Some(self.sentence.clone()))
    }
}

#[derive(Debug, Default)]
struct Screen {
    drawing: Vec<String>,
    frame: Vec<String>,
    flushes: u32,
}

/// Keeps the last flushed frame.
#[derive(Debug, Clone, Default)]
pub struct SimDisplay {
    screen: Arc<Mutex<Screen>>,
}

impl SimDisplay {
    pub fn frame(&self) -> Vec<String> {
        self.screen.lock().frame.clone()
    }

    pub fn flushes(&self) -> u32 {
        self.screen.lock().flushes
    }
}

impl Display for SimDisplay {
    fn clear(&mut self) -> Result<(), DeviceError> {
        self.screen.lock().drawing.clear();
        Ok(())
    }

    fn draw_line(&mut self, row: u8, text: &str) -> Result<(), DeviceError> {
        let mut screen = self.screen.lock();
        let row = usize::from(row);
        if screen.drawing.len() <= row {
            screen.drawing.resize(row + 1, String::new());
        }
        screen.drawing[row] = text.to_owned();
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        let mut screen = self.screen.lock();
        screen.frame = screen.drawing.clone();
        screen.flushes += 1;
        Ok(())
    }
}

/// A button pressed and released from another thread.
#[derive(Debug, Clone, Default)]
pub struct SimButton {
    pressed: Arc<AtomicBool>,
}

impl SimButton {
    pub fn press(&self) {
        self.pressed.store(true, Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.pressed.store(false, Ordering::SeqCst)
    }
}

impl ButtonInput for SimButton {
    fn is_pressed(&mut self) -> Result<bool, DeviceError> {
        Ok(self.pressed.load(Ordering::SeqCst))
    }
}

/// Frames of a fixed size, each filled with its sequence number.
pub struct SimCamera {
    len: usize,
    captured: u8,
}

impl SimCamera {
    pub fn new(len: usize) -> Self {
        Self { len, captured: 0 }
    }
}

impl FrameSource for SimCamera {
    fn capture(&mut self) -> Result<Vec<u8>, DeviceError> {
        self.captured = self.captured.wrapping_add(1);
        Ok(vec![self.captured; self.len])
    }
}

/// In-memory byte link. The other end is a [`GroundStation`].
pub struct SimLink {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl SimLink {
    pub fn pair() -> (SimLink, GroundStation) {
        let (up_tx, up_rx) = channel::unbounded();
        let (down_tx, down_rx) = channel::unbounded();
        let link = SimLink {
            tx: down_tx,
            rx: up_rx,
            pending: Vec::new(),
        };
        let ground = GroundStation {
            tx: up_tx,
            rx: down_rx,
            decoder: Mutex::new(FrameDecoder::new()),
        };
        (link, ground)
    }
}

impl Link for SimLink {
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        if self.pending.is_empty() {
            match self.rx.try_recv() {
                Ok(bytes) => self.pending = bytes,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        self.tx
            .send(bytes.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe).into())
    }
}

/// The far end of a [`SimLink`].
pub struct GroundStation {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    decoder: Mutex<FrameDecoder>,
}

impl GroundStation {
    pub fn send(&self, message: &AclMessage) {
        if let Ok(frame) = wire::encode(message) {
            let _ = self.tx.send(frame);
        }
    }

    /// Next message from the aircraft, waiting up to `timeout`.
    pub fn recv(&self, timeout: Duration) -> Option<AclMessage> {
        let mut decoder = self.decoder.lock();
        loop {
            if let Ok(Some(message)) = decoder.next_message() {
                return Some(message);
            }
            let bytes = self.rx.recv_timeout(timeout).ok()?;
            decoder.extend(&bytes);
        }
    }
}

/// A millisecond clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn advance(&self, ms: u32) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u32) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    type T = u32;

    const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000);

    fn try_now(&self) -> Result<Instant<Self>, clock::Error> {
        Ok(Instant::new(self.now_ms.load(Ordering::SeqCst)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::now_ms;
    use crate::message::{ActionId, DeviceId};

    #[test]
    fn manual_clock_reads_in_milliseconds() {
        let clock = ManualClock::default();
        clock.set(40);
        clock.advance(2);
        assert_eq!(now_ms(&clock).unwrap(), 42);
    }

    #[test]
    fn link_splits_frames_across_reads() {
        let (mut link, ground) = SimLink::pair();
        ground.send(&AclMessage::new(ActionId::Capture, DeviceId::CommClient, DeviceId::Camera));

        let mut decoder = FrameDecoder::new();
        let mut buf = [0; 7];
        let message = loop {
            let n = link.recv(&mut buf).unwrap();
            assert!(n > 0, "frame ended early");
            decoder.extend(&buf[..n]);
            if let Some(message) = decoder.next_message().unwrap() {
                break message;
            }
        };
        assert_eq!(message.receiver(), Some(DeviceId::Camera));
        assert_eq!(link.recv(&mut buf).unwrap(), 0);
    }
}
