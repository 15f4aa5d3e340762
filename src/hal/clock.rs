use core::fmt;

use embedded_time::{clock, duration::Milliseconds, rate::Fraction, Clock, ConversionError};

/// A clock read that failed.
#[derive(Debug)]
pub enum ClockError {
    Clock(clock::Error),
    Time(ConversionError),
}

impl From<clock::Error> for ClockError {
    fn from(clock_error: clock::Error) -> Self {
        ClockError::Clock(clock_error)
    }
}

impl From<ConversionError> for ClockError {
    fn from(time_error: ConversionError) -> Self {
        ClockError::Time(time_error)
    }
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockError::Clock(error) => write!(f, "clock error: {error:?}"),
            ClockError::Time(error) => write!(f, "time conversion error: {error:?}"),
        }
    }
}

impl std::error::Error for ClockError {}

/// Milliseconds elapsed since the clock's epoch.
pub fn now_ms<C: Clock<T = u32>>(clock: &C) -> Result<u32, ClockError> {
    let instant = clock.try_now()?;
    let ms = Milliseconds::<u32>::try_from(instant.duration_since_epoch())?;
    Ok(ms.0)
}

/// Millisecond clock counting from its creation.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: std::time::Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    type T = u32;

    const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000);

    fn try_now(&self) -> Result<embedded_time::Instant<Self>, clock::Error> {
        let elapsed = self.start.elapsed().as_millis();
        Ok(embedded_time::Instant::new(elapsed as u32))
    }
}
