use embedded_time::Clock;
use nalgebra::Vector3;

use crate::config::{MotorConfig, PidConfig};
use crate::control::{Pid, QuadMixer};
use crate::device::{Device, DeviceContext};
use crate::error::DeviceError;
use crate::filter::LowPassFilter;
use crate::hal::{now_ms, MonotonicClock};
use crate::message::{AclMessage, ActionId, DeviceId, Priority};

/// Weight of a new gyro sample in the rate smoothing.
const GYRO_SMOOTHING: f32 = 0.2;

/// Rate stabilization loop: gyro rates in, four motor pulse widths out.
///
/// Axes are ordered `(yaw, pitch, roll)` throughout.
pub struct PidController<C = MonotonicClock> {
    clock: C,
    pids: [Pid; 3],
    smoothing: [LowPassFilter<f32>; 3],
    mixer: QuadMixer,
    config: PidConfig,
    motor: MotorConfig,
    gyro: Vector3<f32>,
    orientation: Vector3<f32>,
    computed: Vector3<f32>,
    throttle: f32,
    started: bool,
    escs: [f32; 4],
    sent: [Option<f32>; 4],
}

impl<C> PidController<C>
where
    C: Clock<T = u32>,
{
    pub fn new(config: &PidConfig, motor: &MotorConfig, clock: C) -> Self {
        let pid = |gains: &crate::config::AxisGains| {
            Pid::new(gains.kp, gains.ki, gains.kd)
                .with_limits(config.output_min, config.output_max)
                .with_sample_period(config.sample_period_ms)
        };

        Self {
            clock,
            pids: [pid(&config.yaw), pid(&config.pitch), pid(&config.roll)],
            smoothing: [(); 3].map(|_| LowPassFilter::with_alpha(GYRO_SMOOTHING)),
            mixer: QuadMixer::new(
                motor.min_pulse_us,
                motor.default_rotor_speed,
                motor.max_pulse_us,
            ),
            config: config.clone(),
            motor: motor.clone(),
            gyro: Vector3::zeros(),
            orientation: Vector3::zeros(),
            computed: Vector3::zeros(),
            throttle: 0.,
            started: false,
            escs: [motor.min_pulse_us; 4],
            sent: [None; 4],
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn throttle(&self) -> f32 {
        self.throttle
    }

    /// Axis corrections of the last step.
    pub fn computed(&self) -> Vector3<f32> {
        self.computed
    }

    /// Motor pulse widths of the last step.
    pub fn escs(&self) -> [f32; 4] {
        self.escs
    }

    pub fn setpoints(&self) -> Vector3<f32> {
        Vector3::new(
            self.pids[0].setpoint(),
            self.pids[1].setpoint(),
            self.pids[2].setpoint(),
        )
    }

    fn handle(&mut self, message: &AclMessage) -> Result<(), DeviceError> {
        match message.action_id() {
            Some(ActionId::Gyro) => self.gyro = Vector3::from(message.floats::<3>(':')?),
            Some(ActionId::Orient) => self.orientation = Vector3::from(message.floats::<3>(':')?),
            Some(ActionId::Control) => {
                let [yaw, pitch, roll, throttle] = message.floats::<4>(',')?;
                for (pid, setpoint) in self.pids.iter_mut().zip([yaw, pitch, roll]) {
                    pid.set_setpoint(setpoint);
                }
                self.throttle = throttle.max(0.).min(self.config.max_throttle);
            }
            Some(ActionId::StartMotors) => {
                let content = message.content().unwrap_or_default();
                let started = content
                    .trim()
                    .to_ascii_lowercase()
                    .parse::<bool>()
                    .map_err(|_| DeviceError::Payload(format!("`{content}` is not a flag")))?;
                if started != self.started {
                    tracing::info!(device = %DeviceId::Pid, started, "motors toggled");
                    self.started = started;
                    self.throttle = 0.;
                    self.pids.iter_mut().for_each(Pid::reset);
                }
            }
            other => tracing::trace!(device = %DeviceId::Pid, action = ?other, "ignored"),
        }
        Ok(())
    }

    /// Base pulse width for the current throttle.
    fn base_pulse(&self) -> f32 {
        let span = self.motor.max_pulse_us - self.motor.min_pulse_us;
        self.motor.min_pulse_us + span * self.throttle / self.config.max_throttle.max(f32::EPSILON)
    }

    /// Run the control law once at `now_ms`.
    pub fn step(&mut self, now_ms: u32) -> [f32; 4] {
        let scale = if self.config.gyro_scale == 0. {
            1.
        } else {
            self.config.gyro_scale
        };

        for axis in 0..3 {
            let rate = self.smoothing[axis].apply(self.gyro[axis] / scale);
            self.computed[axis] = self.pids[axis].compute(rate, now_ms);
        }

        // Too steep on yaw or pitch: stop correcting that axis. Either sign
        // counts, and the limit itself is already too steep.
        for axis in 0..2 {
            if self.orientation[axis].abs() >= self.config.max_flight_incline {
                self.computed[axis] = 0.;
            }
        }

        self.escs = self
            .mixer
            .output(self.started, self.base_pulse(), &self.computed);
        self.escs
    }

    fn publish(&mut self, cx: &DeviceContext) {
        for ((motor, esc), sent) in DeviceId::MOTORS
            .into_iter()
            .zip(self.escs)
            .zip(self.sent.iter_mut())
        {
            if *sent == Some(esc) {
                continue;
            }
            cx.send(
                cx.message(ActionId::ChangePulseWidth, motor)
                    .with_value(esc.into())
                    .with_priority(Priority::High),
            );
            *sent = Some(esc);
        }
    }
}

impl<C> Device for PidController<C>
where
    C: Clock<T = u32> + Send,
{
    fn id(&self) -> DeviceId {
        DeviceId::Pid
    }

    fn init(&mut self, _cx: &DeviceContext) -> Result<(), DeviceError> {
        now_ms(&self.clock).map_err(|error| DeviceError::Init(error.to_string()))?;
        self.pids.iter_mut().for_each(Pid::reset);
        self.sent = [None; 4];
        Ok(())
    }

    fn update(&mut self, cx: &DeviceContext) -> Result<(), DeviceError> {
        for message in cx.drain() {
            if let Err(error) = self.handle(&message) {
                tracing::warn!(device = %self.id(), %error, "rejected message");
            }
        }

        let now = now_ms(&self.clock).map_err(|error| DeviceError::Hardware(error.to_string()))?;
        self.step(now);
        self.publish(cx);
        Ok(())
    }

    fn alternate(&mut self, _cx: &DeviceContext) -> Result<(), DeviceError> {
        tracing::debug!(
            device = %self.id(),
            started = self.started,
            throttle = self.throttle,
            escs = ?self.escs,
            "pid status"
        );
        Ok(())
    }

    fn shutdown(&mut self) {
        self.started = false;
        self.throttle = 0.;
        self.escs = [self.motor.min_pulse_us; 4];
    }
}
