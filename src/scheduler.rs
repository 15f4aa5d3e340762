//! Fixed-rate driver for [`Controller::tick`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::controller::Controller;

/// Consecutive overruns before the ticker complains.
const OVERRUN_WARN_STREAK: u32 = 10;

/// Clean ticks after which an overrun streak is considered over.
const RECOVERED_AFTER: u32 = 50;

/// Counters shared between the ticker task and its observers.
#[derive(Debug, Default)]
pub struct TickStats {
    ticks: AtomicU64,
    overruns: AtomicU64,
    last_tick_us: AtomicU64,
}

impl TickStats {
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Ticks that took longer than the period.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn last_tick(&self) -> Duration {
        Duration::from_micros(self.last_tick_us.load(Ordering::Relaxed))
    }
}

/// Loop bookkeeping, in the manner of an adaptive flight scheduler.
struct Load {
    period: Duration,
    not_achieved: u32,
    all_achieved: u32,
    struggling: bool,
}

impl Load {
    fn record(&mut self, elapsed: Duration) -> bool {
        if elapsed > self.period {
            self.not_achieved += 1;
            self.all_achieved = 0;
            if self.not_achieved == OVERRUN_WARN_STREAK {
                self.struggling = true;
                tracing::warn!(period = ?self.period, ?elapsed, "tick keeps overrunning its period");
            }
            return true;
        }

        self.all_achieved += 1;
        if self.all_achieved > RECOVERED_AFTER {
            self.all_achieved = 0;
            self.not_achieved = 0;
            if self.struggling {
                self.struggling = false;
                tracing::info!("tick load has eased");
            }
        }
        false
    }
}

/// Runs the controller every `period` until stopped.
pub struct Ticker {
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<TickStats>,
}

impl Ticker {
    pub fn spawn(runtime: &Handle, controller: Arc<Controller>, period: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let stats = Arc::new(TickStats::default());
        let shared = stats.clone();

        let handle = runtime.spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut load = Load {
                period,
                not_achieved: 0,
                all_achieved: 0,
                struggling: false,
            };

            tracing::info!(?period, "ticker started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = stopped.changed() => break,
                }

                let started = Instant::now();
                let report = controller.tick().await;
                let elapsed = started.elapsed();

                shared.ticks.fetch_add(1, Ordering::Relaxed);
                shared
                    .last_tick_us
                    .store(elapsed.as_micros() as u64, Ordering::Relaxed);
                if load.record(elapsed) {
                    shared.overruns.fetch_add(1, Ordering::Relaxed);
                }
                if report.failed > 0 || report.panicked > 0 {
                    tracing::trace!(?report, "tick finished with device errors");
                }
            }
            tracing::info!(ticks = shared.ticks(), overruns = shared.overruns(), "ticker stopped");
        });

        Self {
            stop,
            handle: Some(handle),
            stats,
        }
    }

    pub fn stats(&self) -> Arc<TickStats> {
        self.stats.clone()
    }

    /// The ticker task ended without being asked to.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub fn signal_stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Stop and wait up to `timeout` for the current tick to finish.
    pub async fn join(mut self, timeout: Duration) -> bool {
        self.signal_stop();
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return true,
        };
        match time::timeout(timeout, handle).await {
            Ok(Ok(())) => true,
            Ok(Err(join_error)) => {
                tracing::error!(%join_error, "ticker task failed");
                false
            }
            Err(_) => {
                tracing::warn!(?timeout, "ticker did not stop in time");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::Blackboard;
    use crate::config::MotorConfig;
    use crate::device::Motor;
    use crate::message::DeviceId;
    use crate::sim::SimEsc;

    #[tokio::test]
    async fn ticks_until_stopped() {
        let mut controller = Controller::new(Arc::new(Blackboard::default()));
        controller
            .add_device(Motor::new(DeviceId::Motor1, SimEsc::default(), MotorConfig::default()))
            .unwrap();
        let controller = Arc::new(controller);

        let ticker = Ticker::spawn(&Handle::current(), controller.clone(), Duration::from_millis(1));
        let stats = ticker.stats();
        time::sleep(Duration::from_millis(50)).await;
        assert!(!ticker.is_finished());
        assert!(ticker.join(Duration::from_secs(1)).await);

        let ticks = controller.ticks();
        assert!(ticks > 0);
        assert_eq!(stats.ticks(), ticks);

        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(controller.ticks(), ticks);
    }

    #[test]
    fn overrun_streaks_are_tracked() {
        let mut load = Load {
            period: Duration::from_millis(1),
            not_achieved: 0,
            all_achieved: 0,
            struggling: false,
        };
        for _ in 0..OVERRUN_WARN_STREAK {
            assert!(load.record(Duration::from_millis(2)));
        }
        assert!(load.struggling);

        for _ in 0..=RECOVERED_AFTER {
            assert!(!load.record(Duration::from_micros(500)));
        }
        assert!(!load.struggling);
    }
}
