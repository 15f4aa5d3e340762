use nalgebra::Vector3;

/// Quad-X motor mixer.
///
/// Combines the base throttle pulse with the three axis corrections
/// `(cx, cy, cz)` into the four motor commands, in motor order:
///
/// ```text
/// esc1 = t - cx + cy - cz
/// esc2 = t + cx + cy + cz
/// esc3 = t + cx - cy - cz
/// esc4 = t - cx - cy + cz
/// ```
#[derive(Debug, Clone, Copy)]
pub struct QuadMixer {
    /// Lowest command of a spinning motor.
    pub min: f32,
    /// Highest command of any motor.
    pub max: f32,
    /// Command of a stopped motor.
    pub idle: f32,
}

impl QuadMixer {
    pub fn new(idle: f32, min: f32, max: f32) -> Self {
        Self { min, max, idle }
    }

    /// Mix throttle and corrections without limiting.
    pub fn mix(&self, throttle: f32, correction: &Vector3<f32>) -> [f32; 4] {
        let (cx, cy, cz) = (correction.x, correction.y, correction.z);
        [
            throttle - cx + cy - cz,
            throttle + cx + cy + cz,
            throttle + cx - cy - cz,
            throttle - cx - cy + cz,
        ]
    }

    /// Motor commands for the current arming state.
    ///
    /// Disarmed motors always get the idle command whatever the mix says.
    pub fn output(&self, armed: bool, throttle: f32, correction: &Vector3<f32>) -> [f32; 4] {
        if !armed {
            return [self.idle; 4];
        }
        self.mix(throttle, correction)
            .map(|esc| esc.max(self.min).min(self.max))
    }
}
