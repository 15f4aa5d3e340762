use core::fmt;
use std::io;

use crate::message::DeviceId;

/// An error raised by a device or its hardware collaborator.
#[derive(Debug)]
pub enum DeviceError {
    /// The collaborator could not be brought up.
    Init(String),
    /// A read or write against the collaborator failed.
    Io(io::Error),
    /// The collaborator reported a fault.
    Hardware(String),
    /// A message payload could not be understood.
    Payload(String),
    /// The device's worker thread is gone.
    WorkerStopped,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Init(reason) => write!(f, "init failed: {reason}"),
            DeviceError::Io(error) => write!(f, "i/o error: {error}"),
            DeviceError::Hardware(reason) => write!(f, "hardware fault: {reason}"),
            DeviceError::Payload(reason) => write!(f, "bad payload: {reason}"),
            DeviceError::WorkerStopped => f.write_str("worker thread stopped"),
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeviceError::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for DeviceError {
    fn from(io_error: io::Error) -> Self {
        DeviceError::Io(io_error)
    }
}

impl From<WireError> for DeviceError {
    fn from(wire_error: WireError) -> Self {
        DeviceError::Payload(wire_error.to_string())
    }
}

/// A device registry error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// A device with this id is already registered.
    DuplicateDevice(DeviceId),
    /// The registry is at capacity.
    RegistryFull { capacity: usize },
    /// No device with this id is registered.
    UnknownDevice(DeviceId),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::DuplicateDevice(id) => write!(f, "device {id} already registered"),
            ControllerError::RegistryFull { capacity } => {
                write!(f, "device registry full ({capacity} devices)")
            }
            ControllerError::UnknownDevice(id) => write!(f, "no device registered as {id}"),
        }
    }
}

impl std::error::Error for ControllerError {}

/// A malformed network command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandError {
    UnknownCommand(String),
    BadArgCount { command: String, expected: usize, found: usize },
    ArgParse { command: String, arg: String },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::UnknownCommand(command) => write!(f, "unknown command `{command}`"),
            CommandError::BadArgCount {
                command,
                expected,
                found,
            } => write!(f, "`{command}` takes {expected} arguments, got {found}"),
            CommandError::ArgParse { command, arg } => {
                write!(f, "`{command}`: cannot parse argument `{arg}`")
            }
        }
    }
}

impl std::error::Error for CommandError {}

/// A framing or decoding error on the message wire.
#[derive(Debug)]
pub enum WireError {
    FrameTooLarge(usize),
    Decode(serde_json::Error),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::FrameTooLarge(len) => write!(f, "frame of {len} bytes exceeds limit"),
            WireError::Decode(error) => write!(f, "cannot decode message: {error}"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<serde_json::Error> for WireError {
    fn from(json_error: serde_json::Error) -> Self {
        WireError::Decode(json_error)
    }
}

/// A failed one-shot task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskError {
    /// The confirm signal never arrived.
    Timeout,
    Aborted(String),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Timeout => f.write_str("timed out waiting for confirmation"),
            TaskError::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

impl std::error::Error for TaskError {}

/// A configuration file that could not be used.
#[derive(Debug)]
pub enum ConfigError {
    Read(io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(error) => write!(f, "cannot read config: {error}"),
            ConfigError::Parse(error) => write!(f, "invalid config: {error}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(io_error: io::Error) -> Self {
        ConfigError::Read(io_error)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(toml_error: toml::de::Error) -> Self {
        ConfigError::Parse(toml_error)
    }
}
