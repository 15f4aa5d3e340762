//! Hardware abstraction layer.
//!
//! Devices reach their hardware or network only through these collaborator
//! traits. Implementations may block, so every collaborator except the ESC
//! is driven from a device's worker thread, never from the tick.

use nalgebra::Vector3;

use crate::error::DeviceError;

pub mod clock;
pub use clock::{now_ms, ClockError, MonotonicClock};

pub mod esc;
pub use esc::{Esc, RcEsc};

/// One reading of a 9-axis inertial unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    /// Angular rate in degrees per second.
    pub gyro: Vector3<f32>,
    /// Acceleration in g.
    pub accel: Vector3<f32>,
    /// Magnetic field, arbitrary units.
    pub mag: Vector3<f32>,
}

impl Default for ImuSample {
    fn default() -> Self {
        Self {
            gyro: Vector3::zeros(),
            accel: Vector3::new(0., 0., 1.),
            mag: Vector3::new(1., 0., 0.),
        }
    }
}

pub trait InertialSensor: Send {
    fn read(&mut self) -> Result<ImuSample, DeviceError>;

    /// Re-initialize the underlying handle after a failed read.
    fn reset(&mut self) -> Result<(), DeviceError>;
}

pub trait GpsReceiver: Send {
    /// Read the next NMEA sentence, if one is available.
    fn read_sentence(&mut self) -> Result<Option<String>, DeviceError>;
}

pub trait Display: Send {
    fn clear(&mut self) -> Result<(), DeviceError>;

    fn draw_line(&mut self, row: u8, text: &str) -> Result<(), DeviceError>;

    fn flush(&mut self) -> Result<(), DeviceError>;
}

pub trait ButtonInput: Send {
    fn is_pressed(&mut self) -> Result<bool, DeviceError>;
}

pub trait FrameSource: Send {
    fn capture(&mut self) -> Result<Vec<u8>, DeviceError>;
}

/// A byte stream to the ground station.
pub trait Link: Send {
    /// Read whatever bytes are available into `buf`, returning 0 when none are.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError>;

    fn send(&mut self, bytes: &[u8]) -> Result<(), DeviceError>;
}
