/// Discrete-time PID controller for a single axis.
///
/// Gains are per sample: the integrator grows by `ki * error` on every
/// computation, and the derivative acts on the change of the measurement
/// rather than the error, so setpoint steps do not kick the output.
#[derive(Debug, Clone)]
pub struct Pid {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    setpoint: f32,
    integrator: f32,
    out_min: f32,
    out_max: f32,
    sample_period_ms: u32,
    last_input: f32,
    last_time_ms: Option<u32>,
    output: f32,
}

impl Pid {
    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint: 0.,
            integrator: 0.,
            out_min: f32::MIN,
            out_max: f32::MAX,
            sample_period_ms: 0,
            last_input: 0.,
            last_time_ms: None,
            output: 0.,
        }
    }

    /// Builder method to set the output bounds and return `self`
    pub fn with_limits(mut self, min: f32, max: f32) -> Self {
        self.set_limits(min, max);
        self
    }

    /// Builder method to set the minimum time between computations and return `self`
    pub fn with_sample_period(mut self, ms: u32) -> Self {
        self.sample_period_ms = ms;
        self
    }

    pub fn set_limits(&mut self, min: f32, max: f32) {
        if min >= max {
            return;
        }
        self.out_min = min;
        self.out_max = max;
        self.integrator = self.clamp(self.integrator);
        self.output = self.clamp(self.output);
    }

    pub fn set_setpoint(&mut self, setpoint: f32) {
        self.setpoint = setpoint;
    }

    pub fn setpoint(&self) -> f32 {
        self.setpoint
    }

    /// The most recently computed output.
    pub fn output(&self) -> f32 {
        self.output
    }

    pub fn integrator(&self) -> f32 {
        self.integrator
    }

    /// Forget all history, keeping gains, limits and setpoint.
    pub fn reset(&mut self) {
        self.integrator = 0.;
        self.last_input = 0.;
        self.last_time_ms = None;
        self.output = 0.;
    }

    /// Compute a new output for `input` measured at `now_ms`.
    ///
    /// Calls made less than one sample period after the last computation
    /// return the previous output unchanged.
    pub fn compute(&mut self, input: f32, now_ms: u32) -> f32 {
        // don't process inf or NaN
        if !input.is_finite() {
            return self.output;
        }

        if let Some(last_time_ms) = self.last_time_ms {
            if now_ms.wrapping_sub(last_time_ms) < self.sample_period_ms {
                return self.output;
            }
        }

        let error = self.setpoint - input;
        self.integrator = self.clamp(self.integrator + self.ki * error);

        let derivative = match self.last_time_ms {
            Some(_) => input - self.last_input,
            None => 0.,
        };

        self.output = self.clamp(self.kp * error + self.integrator - self.kd * derivative);
        self.last_input = input;
        self.last_time_ms = Some(now_ms);

        self.output
    }

    fn clamp(&self, value: f32) -> f32 {
        value.max(self.out_min).min(self.out_max)
    }
}
