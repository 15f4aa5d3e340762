use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::Config;
use crate::controller::Controller;
use crate::monitor::{Lifecycle, StateMonitor};
use crate::scheduler::Ticker;
use crate::state::OnyxState;
use crate::task::{Task, TaskDispatcher};

/// Owns the running aircraft: controller, ticker and task pool.
pub struct ApplicationContext {
    config: Config,
    controller: Arc<Controller>,
    runtime: Handle,
    ticker: Option<Ticker>,
    tasks: TaskDispatcher,
    exit_code: Option<i32>,
}

impl ApplicationContext {
    pub fn new(config: Config, controller: Controller, runtime: Handle) -> Self {
        let tasks = TaskDispatcher::new(controller.blackboard().clone(), runtime.clone());
        Self {
            config,
            controller: Arc::new(controller),
            runtime,
            ticker: None,
            tasks,
            exit_code: None,
        }
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Drive the monitor until it requests an exit, then tear everything
    /// down and return the exit code.
    pub async fn run(mut self, mut monitor: StateMonitor) -> i32 {
        let mut interval = time::interval(self.config.scheduler.monitor_period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let code = loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!(state = %monitor.state(), "interrupted, requesting shutdown");
                    monitor.set_state(OnyxState::Shutdown);
                }
            }

            let ticker_died = self
                .ticker
                .as_ref()
                .map_or(false, |ticker| ticker.is_finished());
            if ticker_died {
                self.ticker = None;
                monitor.fault("ticker stopped unexpectedly");
            }

            monitor.update(&mut self);
            if let Some(code) = self.exit_code {
                break code;
            }
        };

        self.teardown().await;
        tracing::info!(code, "exiting");
        code
    }

    async fn teardown(&mut self) {
        let timeout = self.config.scheduler.shutdown_timeout();
        if let Some(ticker) = self.ticker.take() {
            ticker.join(timeout).await;
        }
        self.controller.shutdown(timeout);
        if !self.tasks.await_all(timeout).await {
            tracing::warn!("abandoned running tasks");
        }
        self.controller.blackboard().shutdown();
    }
}

impl Lifecycle for ApplicationContext {
    fn power_on_self_test(&mut self) -> bool {
        let passed = self.controller.self_test_all();
        tracing::info!(passed, devices = self.controller.len(), "power-on self test");
        passed
    }

    fn start(&mut self) {
        if self.ticker.is_some() {
            return;
        }
        self.ticker = Some(Ticker::spawn(
            &self.runtime,
            self.controller.clone(),
            self.config.scheduler.tick_period(),
        ));
    }

    fn stop(&mut self) {
        if let Some(ticker) = &self.ticker {
            ticker.signal_stop();
        }
    }

    fn dispatch(&mut self, task: Box<dyn Task>) {
        self.tasks.dispatch(task);
    }

    fn exit(&mut self, code: i32) {
        self.exit_code = Some(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::Blackboard;
    use crate::device::{DeviceState, Motor};
    use crate::message::{AclMessage, ActionId, DeviceId};
    use crate::sim::SimEsc;
    use std::time::Duration;

    fn config() -> Config {
        let mut config = Config::default();
        config.scheduler.tick_period_us = 1_000;
        config.scheduler.monitor_period_ms = 5;
        config.scheduler.shutdown_timeout_ms = 500;
        config
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn long_hold_shuts_the_aircraft_down() {
        let config = config();
        let blackboard = Arc::new(Blackboard::default());
        let esc = SimEsc::default();
        let mut controller = Controller::from_config(blackboard.clone(), &config);
        let motor = controller
            .add_device(Motor::new(DeviceId::Motor1, esc.clone(), config.motor.clone()))
            .unwrap();

        let monitor = StateMonitor::new(blackboard.clone(), &config);
        let app = ApplicationContext::new(config, controller, Handle::current());
        let run = tokio::spawn(app.run(monitor));

        time::sleep(Duration::from_millis(50)).await;
        blackboard.send(
            AclMessage::new(ActionId::ButtonHold, DeviceId::RedButton, DeviceId::StateMonitor)
                .with_value(6.),
        );

        let code = time::timeout(Duration::from_secs(5), run)
            .await
            .expect("app did not exit")
            .unwrap();
        assert_eq!(code, 0);
        assert!(esc.is_armed());
        assert_eq!(motor.lock().state(), DeviceState::Shutdown);
        assert!(blackboard.is_shutdown());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failing_self_test_exits_with_failure() {
        struct Broken;

        impl crate::device::Device for Broken {
            fn id(&self) -> DeviceId {
                DeviceId::Camera
            }

            fn init(
                &mut self,
                _cx: &crate::device::DeviceContext,
            ) -> Result<(), crate::error::DeviceError> {
                Err(crate::error::DeviceError::Init("no camera".into()))
            }

            fn update(
                &mut self,
                _cx: &crate::device::DeviceContext,
            ) -> Result<(), crate::error::DeviceError> {
                Ok(())
            }

            fn shutdown(&mut self) {}
        }

        let config = config();
        let blackboard = Arc::new(Blackboard::default());
        let mut controller = Controller::from_config(blackboard.clone(), &config);
        controller.add_device(Broken).unwrap();

        let monitor = StateMonitor::new(blackboard, &config);
        let app = ApplicationContext::new(config, controller, Handle::current());
        let code = time::timeout(Duration::from_secs(5), app.run(monitor))
            .await
            .expect("app did not exit");
        assert_eq!(code, crate::monitor::EXIT_FAILURE);
    }
}
