use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, TrySendError};
use nalgebra::Vector3;

use crate::device::{Device, DeviceContext, Worker};
use crate::error::DeviceError;
use crate::filter::ComplementaryFilter;
use crate::hal::{ImuSample, InertialSensor};
use crate::message::{join_floats, ActionId, DeviceId, Priority};

const SAMPLE_QUEUE: usize = 32;

/// How long a self test waits for the worker to deliver a good sample.
const SELF_TEST_WAIT: Duration = Duration::from_millis(100);

/// 9-axis inertial unit: publishes gyro rates and the fused orientation.
pub struct GyroMagAcc {
    sensor: Option<Box<dyn InertialSensor>>,
    period: Duration,
    worker: Option<Worker>,
    samples: Option<Receiver<(ImuSample, Instant)>>,
    faults: Arc<AtomicU32>,
    /// Raised by the worker on every good read, lowered by each self test.
    sampled: Arc<AtomicBool>,
    filter: ComplementaryFilter,
    last_sample_at: Option<Instant>,
    gyro: Vector3<f32>,
}

impl GyroMagAcc {
    pub fn new(sensor: impl InertialSensor + 'static) -> Self {
        Self {
            sensor: Some(Box::new(sensor)),
            period: Duration::from_millis(2),
            worker: None,
            samples: None,
            faults: Arc::new(AtomicU32::new(0)),
            sampled: Arc::new(AtomicBool::new(false)),
            filter: ComplementaryFilter::default(),
            last_sample_at: None,
            gyro: Vector3::zeros(),
        }
    }

    /// Builder method to set the sensor polling period and return `self`
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// `(yaw, pitch, roll)` in degrees.
    pub fn orientation(&self) -> Vector3<f32> {
        self.filter.orientation()
    }

    /// Failed sensor reads since init.
    pub fn faults(&self) -> u32 {
        self.faults.load(Ordering::Relaxed)
    }

    fn fold_samples(&mut self) -> bool {
        let samples = match &self.samples {
            Some(samples) => samples,
            None => return false,
        };

        let mut fresh = false;
        for (sample, taken_at) in samples.try_iter() {
            let dt = self
                .last_sample_at
                .map(|last| taken_at.saturating_duration_since(last).as_secs_f32())
                .unwrap_or(0.);
            self.filter.update(&sample, dt);
            self.gyro = sample.gyro;
            self.last_sample_at = Some(taken_at);
            fresh = true;
        }
        fresh
    }
}

impl Device for GyroMagAcc {
    fn id(&self) -> DeviceId {
        DeviceId::GyroMagAcc
    }

    fn init(&mut self, _cx: &DeviceContext) -> Result<(), DeviceError> {
        let mut sensor = self
            .sensor
            .take()
            .ok_or_else(|| DeviceError::Init("sensor already taken".into()))?;
        sensor.reset()?;

        let (tx, rx) = channel::bounded(SAMPLE_QUEUE);
        let faults = self.faults.clone();
        let sampled = self.sampled.clone();
        let period = self.period;

        let worker = Worker::spawn("gyro-mag-acc", move |stop| loop {
            match sensor.read() {
                Ok(sample) => {
                    sampled.store(true, Ordering::Release);
                    match tx.try_send((sample, Instant::now())) {
                        Ok(()) | Err(TrySendError::Full(_)) => {}
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                }
                Err(error) => {
                    faults.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(%error, "imu read failed, resetting");
                    if let Err(error) = sensor.reset() {
                        tracing::error!(%error, "imu reset failed");
                    }
                }
            }
            if !stop.sleep(period) {
                break;
            }
        })?;

        self.samples = Some(rx);
        self.worker = Some(worker);
        Ok(())
    }

    fn update(&mut self, cx: &DeviceContext) -> Result<(), DeviceError> {
        if self.fold_samples() {
            let gyro = join_floats(self.gyro.as_slice(), ':');
            let orientation = join_floats(self.filter.orientation().as_slice(), ':');
            cx.send(
                cx.message(ActionId::Gyro, DeviceId::Pid)
                    .with_content(gyro)
                    .with_priority(Priority::High),
            );
            cx.send(
                cx.message(ActionId::Orient, DeviceId::Pid)
                    .with_content(orientation)
                    .with_priority(Priority::High),
            );
        }

        for message in cx.drain() {
            if message.action_id() == Some(ActionId::GetOrient) {
                let orientation = join_floats(self.filter.orientation().as_slice(), ':');
                if let Some(reply) = message.reply(ActionId::Orient) {
                    cx.send(reply.with_content(orientation));
                }
            }
        }
        Ok(())
    }

    fn alternate(&mut self, _cx: &DeviceContext) -> Result<(), DeviceError> {
        match &self.worker {
            Some(worker) if worker.is_running() => {
                tracing::debug!(faults = self.faults(), "imu healthy");
                Ok(())
            }
            _ => Err(DeviceError::WorkerStopped),
        }
    }

    /// Passes when the worker is alive and has read the sensor successfully
    /// since the previous self test.
    fn self_test(&mut self) -> bool {
        let deadline = Instant::now() + SELF_TEST_WAIT.max(self.period * 2);
        loop {
            if !self.worker.as_ref().map_or(false, Worker::is_running) {
                return false;
            }
            if self.sampled.swap(false, Ordering::AcqRel) {
                return true;
            }
            if Instant::now() >= deadline {
                tracing::warn!(faults = self.faults(), "no good imu sample");
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop(Duration::from_millis(500));
        }
        self.samples = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::Blackboard;
    use crate::message::AclMessage;
    use crate::sim::SimImu;

    fn wait_for_samples(gyro: &mut GyroMagAcc, cx: &DeviceContext, blackboard: &Blackboard) {
        for _ in 0..200 {
            gyro.update(cx).unwrap();
            if blackboard.pending(DeviceId::Pid) > 0 {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("no samples published");
    }

    #[test]
    fn publishes_rates_and_orientation_to_pid() {
        let blackboard = Arc::new(Blackboard::default());
        let cx = DeviceContext::new(DeviceId::GyroMagAcc, blackboard.clone());
        let imu = SimImu::default().with_gyro(Vector3::new(1., 2., 3.));
        let mut gyro = GyroMagAcc::new(imu).with_period(Duration::from_millis(1));
        gyro.init(&cx).unwrap();
        assert!(gyro.self_test());

        wait_for_samples(&mut gyro, &cx, &blackboard);
        let first = blackboard.receive(DeviceId::Pid);
        let second = blackboard.receive(DeviceId::Pid);
        let actions = [first.action_id(), second.action_id()];
        assert!(actions.contains(&Some(ActionId::Gyro)));
        assert!(actions.contains(&Some(ActionId::Orient)));

        let rates = if first.action_id() == Some(ActionId::Gyro) {
            first
        } else {
            second
        };
        assert_eq!(rates.floats::<3>(':').unwrap(), [1., 2., 3.]);
        gyro.shutdown();
    }

    #[test]
    fn read_failures_reset_the_sensor() {
        let blackboard = Arc::new(Blackboard::default());
        let cx = DeviceContext::new(DeviceId::GyroMagAcc, blackboard.clone());
        let imu = SimImu::default().with_failures(3);
        let resets = imu.resets();
        let mut gyro = GyroMagAcc::new(imu).with_period(Duration::from_millis(1));
        gyro.init(&cx).unwrap();

        wait_for_samples(&mut gyro, &cx, &blackboard);
        assert_eq!(gyro.faults(), 3);
        // one reset at init, one per failure
        assert_eq!(resets.load(Ordering::SeqCst), 4);
        gyro.shutdown();
        assert!(!gyro.self_test());
    }

    #[test]
    fn self_test_passes_again_once_reads_recover() {
        let blackboard = Arc::new(Blackboard::default());
        let cx = DeviceContext::new(DeviceId::GyroMagAcc, blackboard);
        let imu = SimImu::default().with_failures(5);
        let mut gyro = GyroMagAcc::new(imu).with_period(Duration::from_millis(1));
        gyro.init(&cx).unwrap();

        assert!(gyro.self_test());
        assert_eq!(gyro.faults(), 5);
        // Each test needs a fresh sample
        assert!(gyro.self_test());
        gyro.shutdown();
    }

    #[test]
    fn self_test_fails_while_every_read_fails() {
        let blackboard = Arc::new(Blackboard::default());
        let cx = DeviceContext::new(DeviceId::GyroMagAcc, blackboard);
        let imu = SimImu::default().with_failures(u32::MAX);
        let mut gyro = GyroMagAcc::new(imu).with_period(Duration::from_millis(1));
        gyro.init(&cx).unwrap();

        assert!(!gyro.self_test());
        assert!(gyro.faults() > 0);
        gyro.shutdown();
    }

    #[test]
    fn orientation_query_gets_a_reply() {
        let blackboard = Arc::new(Blackboard::default());
        let cx = DeviceContext::new(DeviceId::GyroMagAcc, blackboard.clone());
        let mut gyro = GyroMagAcc::new(SimImu::default());
        blackboard.send(AclMessage::new(
            ActionId::GetOrient,
            DeviceId::CommServer,
            DeviceId::GyroMagAcc,
        ));
        gyro.update(&cx).unwrap();

        let reply = blackboard.receive(DeviceId::CommServer);
        assert_eq!(reply.action_id(), Some(ActionId::Orient));
        assert_eq!(reply.floats::<3>(':').unwrap(), [0., 0., 0.]);
    }
}
