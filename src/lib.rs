//! # onyx-flight
//! Device coordination and flight control for a quadcopter.
//!
//! # Messaging
//! [`Blackboard`] holds one priority mailbox per [`DeviceId`]. Everything
//! talks through [`AclMessage`]s posted there.
//!
//! # Devices
//! [`Device`](device::Device) is the trait for every piece of hardware or logic on
//! the aircraft. [`Controller`] owns the registry and runs every device once
//! per tick, driven by the [`Ticker`](scheduler::Ticker).
//!
//! [`PidController`](device::PidController) turns gyro rates and setpoints into
//! motor pulse widths (see [`control`] for the control law).
//!
//! # Application
//! [`StateMonitor`] is the global flight-state machine. It drives the
//! [`ApplicationContext`] through the [`Lifecycle`](monitor::Lifecycle) trait
//! and hands one-shot [`Task`](task::Task)s to the task pool.
//!
//! [`hal`] contains the hardware abstraction layer; [`sim`] provides
//! simulated hardware for bench runs.

pub mod app;
pub use app::ApplicationContext;

pub mod blackboard;
pub use blackboard::Blackboard;

pub mod command;
pub use command::NetworkCommand;

pub mod config;
pub use config::Config;

pub mod control;

pub mod controller;
pub use controller::Controller;

pub mod device;

pub mod error;

pub mod filter;

pub mod hal;

pub mod message;
pub use message::{AclMessage, ActionId, DeviceId, MessageType, Priority};

pub mod monitor;
pub use monitor::StateMonitor;

pub mod scheduler;

pub mod sim;

pub mod state;
pub use state::OnyxState;

pub mod task;
