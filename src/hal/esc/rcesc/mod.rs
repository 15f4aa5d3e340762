mod builder;
pub use builder::Builder;

use embedded_hal::PwmPin;
use num_traits::NumCast;

use super::Esc;

/// An ESC implementation for RC motor controllers on a PWM pin.
pub struct RcEsc<P: PwmPin> {
    arm_us: f32,
    min_us: f32,
    max_us: f32,
    period_us: f32,
    pin: P,
}

impl<P: PwmPin> RcEsc<P> {
    pub fn new(arm_us: f32, min_us: f32, max_us: f32, period_us: f32, pin: P) -> Self {
        Self {
            arm_us,
            min_us,
            max_us,
            period_us,
            pin,
        }
    }

    pub fn builder() -> Builder {
        Builder::default()
    }

    pub fn pin(&self) -> &P {
        &self.pin
    }
}

impl<P> RcEsc<P>
where
    P: PwmPin,
    P::Duty: NumCast,
{
    fn set_pulse(&mut self, pulse_us: f32) {
        let pulse_us = pulse_us.max(self.min_us).min(self.max_us);
        let max_duty = <f32 as NumCast>::from(self.pin.get_max_duty()).unwrap_or(0.);

        let duty = max_duty * pulse_us / self.period_us;
        if let Some(duty) = <P::Duty as NumCast>::from(duty) {
            self.pin.set_duty(duty);
        }
    }
}

impl<P> Esc for RcEsc<P>
where
    P: PwmPin + Send,
    P::Duty: NumCast,
{
    fn arm(&mut self) {
        self.pin.enable();
        self.set_pulse(self.arm_us);
    }

    fn output(&mut self, pulse_us: f32) {
        self.set_pulse(pulse_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Pin {
        enabled: bool,
        duty: u16,
        history: Vec<u16>,
    }

    impl PwmPin for Pin {
        type Duty = u16;

        fn disable(&mut self) {
            self.enabled = false;
        }

        fn enable(&mut self) {
            self.enabled = true;
        }

        fn get_duty(&self) -> u16 {
            self.duty
        }

        fn get_max_duty(&self) -> u16 {
            20_000
        }

        fn set_duty(&mut self, duty: u16) {
            self.duty = duty;
            self.history.push(duty);
        }
    }

    #[test]
    fn pulse_width_maps_to_duty() {
        let mut esc = RcEsc::<Pin>::builder().build(Pin::default());
        esc.arm();
        assert!(esc.pin().enabled);
        assert_eq!(esc.pin().duty, 1000);

        esc.output(1500.);
        assert_eq!(esc.pin().duty, 1500);
    }

    #[test]
    fn arm_pulse_comes_from_the_builder() {
        let mut esc = RcEsc::<Pin>::builder().arm(1050.).build(Pin::default());
        esc.arm();
        esc.output(1200.);
        assert_eq!(esc.pin().history, vec![1050, 1200]);
    }

    #[test]
    fn output_is_clamped_to_range() {
        let mut esc = RcEsc::<Pin>::builder().build(Pin::default());
        esc.output(5000.);
        assert_eq!(esc.pin().duty, 2000);
        esc.output(0.);
        assert_eq!(esc.pin().duty, 1000);
    }
}
