use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

use onyx_flight::device::{
    CameraDevice, CommBridge, CommRole, GpsDevice, GyroMagAcc, Motor, OledDevice, PidController,
    RedButton,
};
use onyx_flight::hal::MonotonicClock;
use onyx_flight::sim::{SimButton, SimCamera, SimDisplay, SimEsc, SimGps, SimImu, SimLink};
use onyx_flight::{ApplicationContext, Blackboard, Config, Controller, DeviceId, StateMonitor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "onyx.toml".to_owned());
    let config = Config::load(&path).with_context(|| format!("loading config from {path}"))?;

    let blackboard = Arc::new(Blackboard::new(
        config.blackboard.bucket_size,
        config.blackboard.capacity,
    ));
    let mut controller = Controller::from_config(blackboard.clone(), &config);

    for motor in DeviceId::MOTORS {
        controller.add_device(Motor::new(motor, SimEsc::default(), config.motor.clone()))?;
    }
    controller.add_device(GyroMagAcc::new(SimImu::default()))?;
    controller.add_device(PidController::new(
        &config.pid,
        &config.motor,
        MonotonicClock::default(),
    ))?;
    controller.add_device(GpsDevice::new(SimGps::default()).with_period(Duration::from_secs(1)))?;
    controller.add_device(OledDevice::new(SimDisplay::default()))?;
    controller.add_device(RedButton::new(SimButton::default()))?;
    controller.add_device(CameraDevice::new(SimCamera::new(320 * 240)))?;

    // Keep the ground end open for the life of the process
    let (link, _ground) = SimLink::pair();
    controller.add_device(CommBridge::new(CommRole::Server, link))?;

    tracing::info!(devices = controller.len(), path = %path, "starting");
    let monitor = StateMonitor::new(blackboard, &config);
    let app = ApplicationContext::new(config, controller, Handle::current());
    let code = app.run(monitor).await;

    std::process::exit(code);
}
