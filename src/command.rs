//! Ground-station command lines.
//!
//! ```text
//! MOTOR-SPD:<n>:<percent>
//! MOTOR-PWM:<n>:<pulse µs>
//! PID-CONTROL:<yaw>,<pitch>,<roll>,<throttle>
//! PID-START:<true|false>
//! DATA-GET:<MOTOR<n>-SPD|ORIENT|POSITION>
//! STATE-SET:<state>
//! ```
//!
//! Arguments may be separated by `:` or `,`.

use std::str::FromStr;

use crate::error::CommandError;
use crate::message::{join_floats, AclMessage, ActionId, DeviceId, Priority};
use crate::state::OnyxState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKey {
    MotorSpeed(DeviceId),
    Orientation,
    Position,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NetworkCommand {
    MotorSpeed { motor: DeviceId, percent: f32 },
    MotorPulse { motor: DeviceId, pulse_us: f32 },
    PidControl {
        yaw: f32,
        pitch: f32,
        roll: f32,
        throttle: f32,
    },
    PidStart(bool),
    DataGet(DataKey),
    StateSet(OnyxState),
}

fn expect_args(command: &str, args: &[&str], expected: usize) -> Result<(), CommandError> {
    if args.len() != expected {
        return Err(CommandError::BadArgCount {
            command: command.to_owned(),
            expected,
            found: args.len(),
        });
    }
    Ok(())
}

fn arg<T: FromStr>(command: &str, arg: &str) -> Result<T, CommandError> {
    arg.trim().parse().map_err(|_| CommandError::ArgParse {
        command: command.to_owned(),
        arg: arg.to_owned(),
    })
}

fn motor(command: &str, number: &str) -> Result<DeviceId, CommandError> {
    DeviceId::motor(arg(command, number)?).ok_or_else(|| CommandError::ArgParse {
        command: command.to_owned(),
        arg: number.to_owned(),
    })
}

fn data_key(command: &str, key: &str) -> Result<DataKey, CommandError> {
    let upper = key.trim().to_ascii_uppercase();
    match upper.as_str() {
        "ORIENT" => Ok(DataKey::Orientation),
        "POSITION" => Ok(DataKey::Position),
        _ => upper
            .strip_suffix("-SPD")
            .and_then(|motor| motor.parse::<DeviceId>().ok())
            .filter(|id| DeviceId::MOTORS.contains(id))
            .map(DataKey::MotorSpeed)
            .ok_or_else(|| CommandError::ArgParse {
                command: command.to_owned(),
                arg: key.to_owned(),
            }),
    }
}

impl FromStr for NetworkCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (name, rest) = line.split_once(':').unwrap_or((line, ""));
        let args: Vec<&str> = if rest.trim().is_empty() {
            Vec::new()
        } else {
            rest.split(|c| c == ':' || c == ',').collect()
        };

        let name = name.trim().to_ascii_uppercase();
        let command = name.as_str();
        match command {
            "MOTOR-SPD" => {
                expect_args(command, &args, 2)?;
                Ok(NetworkCommand::MotorSpeed {
                    motor: motor(command, args[0])?,
                    percent: arg(command, args[1])?,
                })
            }
            "MOTOR-PWM" => {
                expect_args(command, &args, 2)?;
                Ok(NetworkCommand::MotorPulse {
                    motor: motor(command, args[0])?,
                    pulse_us: arg(command, args[1])?,
                })
            }
            "PID-CONTROL" => {
                expect_args(command, &args, 4)?;
                Ok(NetworkCommand::PidControl {
                    yaw: arg(command, args[0])?,
                    pitch: arg(command, args[1])?,
                    roll: arg(command, args[2])?,
                    throttle: arg(command, args[3])?,
                })
            }
            "PID-START" => {
                expect_args(command, &args, 1)?;
                let started = args[0].trim().to_ascii_lowercase();
                Ok(NetworkCommand::PidStart(arg(command, &started)?))
            }
            "DATA-GET" => {
                expect_args(command, &args, 1)?;
                Ok(NetworkCommand::DataGet(data_key(command, args[0])?))
            }
            "STATE-SET" => {
                expect_args(command, &args, 1)?;
                let state = args[0].parse().map_err(|_| CommandError::ArgParse {
                    command: command.to_owned(),
                    arg: args[0].to_owned(),
                })?;
                Ok(NetworkCommand::StateSet(state))
            }
            _ => Err(CommandError::UnknownCommand(name)),
        }
    }
}

impl NetworkCommand {
    /// The blackboard message that carries out this command.
    pub fn to_message(&self, sender: DeviceId) -> AclMessage {
        match *self {
            NetworkCommand::MotorSpeed { motor, percent } => {
                AclMessage::new(ActionId::ChangeMotorSpeed, sender, motor).with_value(percent.into())
            }
            NetworkCommand::MotorPulse { motor, pulse_us } => {
                AclMessage::new(ActionId::ChangePulseWidth, sender, motor).with_value(pulse_us.into())
            }
            NetworkCommand::PidControl {
                yaw,
                pitch,
                roll,
                throttle,
            } => AclMessage::new(ActionId::Control, sender, DeviceId::Pid)
                .with_content(join_floats(&[yaw, pitch, roll, throttle], ','))
                .with_priority(Priority::High),
            NetworkCommand::PidStart(started) => {
                AclMessage::new(ActionId::StartMotors, sender, DeviceId::Pid)
                    .with_content(started.to_string())
                    .with_priority(Priority::Max)
            }
            NetworkCommand::DataGet(DataKey::MotorSpeed(motor)) => {
                AclMessage::new(ActionId::GetMotorSpeed, sender, motor)
            }
            NetworkCommand::DataGet(DataKey::Orientation) => {
                AclMessage::new(ActionId::GetOrient, sender, DeviceId::GyroMagAcc)
            }
            NetworkCommand::DataGet(DataKey::Position) => {
                AclMessage::new(ActionId::GetPosition, sender, DeviceId::GpsDevice)
            }
            NetworkCommand::StateSet(state) => {
                AclMessage::new(ActionId::SetState, sender, DeviceId::StateMonitor)
                    .with_content(state.name())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motor_speed() {
        let command: NetworkCommand = "MOTOR-SPD:3:45.5".parse().unwrap();
        assert_eq!(
            command,
            NetworkCommand::MotorSpeed {
                motor: DeviceId::Motor3,
                percent: 45.5
            }
        );

        let message = command.to_message(DeviceId::CommServer);
        assert_eq!(message.receiver(), Some(DeviceId::Motor3));
        assert_eq!(message.action_id(), Some(ActionId::ChangeMotorSpeed));
        assert_eq!(message.value(), Some(45.5));
    }

    #[test]
    fn pid_control_accepts_commas() {
        let command: NetworkCommand = "pid-control:1,-2.5,0,60".parse().unwrap();
        let message = command.to_message(DeviceId::CommClient);
        assert_eq!(message.receiver(), Some(DeviceId::Pid));
        assert_eq!(message.floats::<4>(',').unwrap(), [1., -2.5, 0., 60.]);
    }

    #[test]
    fn pid_start_and_data_get() {
        assert_eq!(
            "PID-START:TRUE".parse::<NetworkCommand>(),
            Ok(NetworkCommand::PidStart(true))
        );
        assert_eq!(
            "DATA-GET:MOTOR4-SPD".parse::<NetworkCommand>(),
            Ok(NetworkCommand::DataGet(DataKey::MotorSpeed(DeviceId::Motor4)))
        );
        assert_eq!(
            "DATA-GET:orient".parse::<NetworkCommand>(),
            Ok(NetworkCommand::DataGet(DataKey::Orientation))
        );
    }

    #[test]
    fn state_set_targets_the_monitor() {
        let message = "STATE-SET:airborne"
            .parse::<NetworkCommand>()
            .unwrap()
            .to_message(DeviceId::CommServer);
        assert_eq!(message.receiver(), Some(DeviceId::StateMonitor));
        assert_eq!(message.content(), Some("AIRBORNE"));
    }

    #[test]
    fn malformed_commands_are_rejected() {
        assert_eq!(
            "HOVER:1".parse::<NetworkCommand>(),
            Err(CommandError::UnknownCommand("HOVER".into()))
        );
        assert_eq!(
            "MOTOR-SPD:1".parse::<NetworkCommand>(),
            Err(CommandError::BadArgCount {
                command: "MOTOR-SPD".into(),
                expected: 2,
                found: 1
            })
        );
        assert_eq!(
            "MOTOR-SPD:7:50".parse::<NetworkCommand>(),
            Err(CommandError::ArgParse {
                command: "MOTOR-SPD".into(),
                arg: "7".into()
            })
        );
        assert!("PID-START:maybe".parse::<NetworkCommand>().is_err());
        assert!("DATA-GET:GPS_DEVICE-SPD".parse::<NetworkCommand>().is_err());
    }
}
