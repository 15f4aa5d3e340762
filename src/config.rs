//! Runtime configuration.
//!
//! Every field has a default so an empty or partial TOML file is valid.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::blackboard::{BLACKBOARD_SIZE, MAX_BLACKBOARD_BUCKET_SIZE};
use crate::error::ConfigError;

/// Pulse width (µs) that keeps a motor quiet.
pub const MOTOR_MIN_MS: f32 = 1000.;

/// Largest pulse width (µs) sent to a motor.
pub const MOTOR_MAX_MS: f32 = 2000.;

/// Lowest pulse width (µs) of an armed motor.
pub const DEFAULT_ROTOR_SPEED: f32 = 1100.;

/// Throttle is given in percent.
pub const MAX_THROTTLE: f32 = 100.;

/// Orientation angle (degrees) past which a correction term is cut.
pub const MAX_FLIGHT_INCLINE: f32 = 30.;

/// Ticks between two `alternate` runs of a device.
pub const ALTERNATE_SPEED: u32 = 200;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub blackboard: BlackboardConfig,
    pub controller: ControllerConfig,
    pub pid: PidConfig,
    pub motor: MotorConfig,
    pub calibration: CalibrationConfig,
}

impl Config {
    /// Load a config file, falling back to defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_period_us: u64,
    pub monitor_period_ms: u64,
    pub alternate_speed: u32,
    pub shutdown_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_period_us: 1500,
            monitor_period_ms: 100,
            alternate_speed: ALTERNATE_SPEED,
            shutdown_timeout_ms: 2000,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_micros(self.tick_period_us.max(1))
    }

    pub fn monitor_period(&self) -> Duration {
        Duration::from_millis(self.monitor_period_ms.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlackboardConfig {
    pub bucket_size: usize,
    pub capacity: usize,
}

impl Default for BlackboardConfig {
    fn default() -> Self {
        Self {
            bucket_size: MAX_BLACKBOARD_BUCKET_SIZE,
            capacity: BLACKBOARD_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub max_devices: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { max_devices: 16 }
    }
}

/// Gains of one control axis.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AxisGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl AxisGains {
    pub const fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PidConfig {
    pub yaw: AxisGains,
    pub pitch: AxisGains,
    pub roll: AxisGains,
    /// Bounds of each axis correction (µs of pulse width).
    pub output_min: f32,
    pub output_max: f32,
    pub sample_period_ms: u32,
    /// Raw gyro units per degree per second.
    pub gyro_scale: f32,
    pub max_throttle: f32,
    pub max_flight_incline: f32,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            yaw: AxisGains::new(2.0, 0.02, 0.),
            pitch: AxisGains::new(1.3, 0.04, 18.),
            roll: AxisGains::new(1.3, 0.04, 18.),
            output_min: -400.,
            output_max: 400.,
            sample_period_ms: 2,
            gyro_scale: 1.,
            max_throttle: MAX_THROTTLE,
            max_flight_incline: MAX_FLIGHT_INCLINE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    pub min_pulse_us: f32,
    pub max_pulse_us: f32,
    pub default_rotor_speed: f32,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            min_pulse_us: MOTOR_MIN_MS,
            max_pulse_us: MOTOR_MAX_MS,
            default_rotor_speed: DEFAULT_ROTOR_SPEED,
        }
    }
}

impl MotorConfig {
    /// Map a speed in percent onto the pulse width range.
    pub fn pulse_for_percent(&self, percent: f32) -> f32 {
        let percent = percent.max(0.).min(100.);
        self.min_pulse_us + (self.max_pulse_us - self.min_pulse_us) * percent / 100.
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub pulse_us: f32,
    pub confirm_timeout_ms: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            pulse_us: 1300.,
            confirm_timeout_ms: 30_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_keep_defaults() {
        let config = Config::from_toml(
            r#"
            [scheduler]
            tick_period_us = 2500

            [pid]
            pitch = { kp = 2.0, ki = 0.1, kd = 5.0 }
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.tick_period(), Duration::from_micros(2500));
        assert_eq!(config.scheduler.monitor_period_ms, 100);
        assert_eq!(config.pid.pitch, AxisGains::new(2., 0.1, 5.));
        assert_eq!(config.pid.roll, PidConfig::default().roll);
        assert_eq!(config.blackboard.bucket_size, MAX_BLACKBOARD_BUCKET_SIZE);
    }

    #[test]
    fn malformed_files_are_errors() {
        assert!(matches!(
            Config::from_toml("[scheduler]\ntick_period_us = \"fast\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let config = Config::load("/nonexistent/onyx.toml").unwrap();
        assert_eq!(config.motor.min_pulse_us, MOTOR_MIN_MS);
    }

    #[test]
    fn percent_maps_onto_pulse_range() {
        let motor = MotorConfig::default();
        assert_eq!(motor.pulse_for_percent(0.), MOTOR_MIN_MS);
        assert_eq!(motor.pulse_for_percent(50.), 1500.);
        assert_eq!(motor.pulse_for_percent(150.), MOTOR_MAX_MS);
    }
}
