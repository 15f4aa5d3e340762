use embedded_hal::PwmPin;

use super::RcEsc;
use crate::config::{MOTOR_MAX_MS, MOTOR_MIN_MS};

pub struct Builder {
    arm_us: f32,
    min_us: f32,
    max_us: f32,
    period_us: f32,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            arm_us: MOTOR_MIN_MS,
            min_us: MOTOR_MIN_MS,
            max_us: MOTOR_MAX_MS,
            period_us: 20_000.,
        }
    }
}

impl Builder {
    pub fn arm(mut self, arm_us: f32) -> Self {
        self.arm_us = arm_us;
        self
    }

    pub fn min(mut self, min_us: f32) -> Self {
        self.min_us = min_us;
        self
    }

    pub fn max(mut self, max_us: f32) -> Self {
        self.max_us = max_us;
        self
    }

    /// PWM period in microseconds (20000 for a 50 Hz servo signal).
    pub fn period(mut self, period_us: f32) -> Self {
        self.period_us = period_us;
        self
    }

    pub fn build<P: PwmPin>(self, pin: P) -> RcEsc<P> {
        RcEsc::new(self.arm_us, self.min_us, self.max_us, self.period_us, pin)
    }
}
