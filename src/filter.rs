use nalgebra::Vector3;
use num_traits::Float;

use crate::hal::ImuSample;

/// First order low pass filter. Every sample moves the output by
/// `alpha * (sample - output)`.
pub struct LowPassFilter<T> {
    output: T,
    alpha: T,
}

impl<T: Float> LowPassFilter<T> {
    pub fn with_alpha(alpha: T) -> Self {
        Self {
            output: T::zero(),
            alpha: alpha.max(T::zero()).min(T::one()),
        }
    }

    pub fn apply(&mut self, sample: T) -> T {
        self.output = self.output + (sample - self.output) * self.alpha;
        self.output
    }
}

/// Fuses gyro rates with the gravity and magnetic field directions into an
/// orientation estimate of `(yaw, pitch, roll)` in degrees.
pub struct ComplementaryFilter {
    /// Weight of the integrated gyro path.
    gyro_weight: f32,
    orientation: Option<Vector3<f32>>,
}

impl Default for ComplementaryFilter {
    fn default() -> Self {
        Self::new(0.98)
    }
}

impl ComplementaryFilter {
    pub fn new(gyro_weight: f32) -> Self {
        Self {
            gyro_weight: gyro_weight.max(0.).min(1.),
            orientation: None,
        }
    }

    pub fn orientation(&self) -> Vector3<f32> {
        self.orientation.unwrap_or_else(Vector3::zeros)
    }

    /// Fold in a sample taken `dt` seconds after the previous one.
    pub fn update(&mut self, sample: &ImuSample, dt: f32) -> Vector3<f32> {
        let reference = reference_orientation(sample);

        let fused = match self.orientation {
            // The first sample has no history to integrate from
            None => reference,
            Some(last) => {
                let rates = Vector3::new(sample.gyro.z, sample.gyro.y, sample.gyro.x);
                let integrated = last + rates * dt;
                integrated * self.gyro_weight + reference * (1. - self.gyro_weight)
            }
        };

        self.orientation = Some(fused);
        fused
    }
}

/// Orientation seen by the accelerometer and magnetometer alone.
fn reference_orientation(sample: &ImuSample) -> Vector3<f32> {
    let a = sample.accel;
    let roll = a.y.atan2(a.z);
    let pitch = (-a.x).atan2((a.y * a.y + a.z * a.z).sqrt());
    let yaw = (-sample.mag.y).atan2(sample.mag.x);

    Vector3::new(yaw, pitch, roll).map(f32::to_degrees)
}
