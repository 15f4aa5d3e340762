//! The ACL message envelope exchanged between devices and its vocabulary.

use core::fmt;
use core::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

pub mod wire;

/// Stable identifier of every mailbox on the blackboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceId {
    Motor1,
    Motor2,
    Motor3,
    Motor4,
    GyroMagAcc,
    Pid,
    CommServer,
    CommClient,
    OledDevice,
    GpsDevice,
    Camera,
    RedButton,
    Controller,
    Blackboard,
    StateMonitor,
    Task,
}

impl DeviceId {
    pub const COUNT: usize = 16;

    pub const ALL: [DeviceId; DeviceId::COUNT] = [
        DeviceId::Motor1,
        DeviceId::Motor2,
        DeviceId::Motor3,
        DeviceId::Motor4,
        DeviceId::GyroMagAcc,
        DeviceId::Pid,
        DeviceId::CommServer,
        DeviceId::CommClient,
        DeviceId::OledDevice,
        DeviceId::GpsDevice,
        DeviceId::Camera,
        DeviceId::RedButton,
        DeviceId::Controller,
        DeviceId::Blackboard,
        DeviceId::StateMonitor,
        DeviceId::Task,
    ];

    /// The four motors in mixer order.
    pub const MOTORS: [DeviceId; 4] = [
        DeviceId::Motor1,
        DeviceId::Motor2,
        DeviceId::Motor3,
        DeviceId::Motor4,
    ];

    /// Look up a motor by its 1-based number.
    pub fn motor(number: u8) -> Option<DeviceId> {
        match number {
            1..=4 => Some(Self::MOTORS[number as usize - 1]),
            _ => None,
        }
    }

    /// Dense index used to address the mailbox array.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            DeviceId::Motor1 => "MOTOR1",
            DeviceId::Motor2 => "MOTOR2",
            DeviceId::Motor3 => "MOTOR3",
            DeviceId::Motor4 => "MOTOR4",
            DeviceId::GyroMagAcc => "GYRO_MAG_ACC",
            DeviceId::Pid => "PID",
            DeviceId::CommServer => "COMM_SERVER",
            DeviceId::CommClient => "COMM_CLIENT",
            DeviceId::OledDevice => "OLED_DEVICE",
            DeviceId::GpsDevice => "GPS_DEVICE",
            DeviceId::Camera => "CAMERA",
            DeviceId::RedButton => "RED_BUTTON",
            DeviceId::Controller => "CONTROLLER",
            DeviceId::Blackboard => "BLACKBOARD",
            DeviceId::StateMonitor => "STATE_MONITOR",
            DeviceId::Task => "TASK",
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.name().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Send,
    Reply,
    Empty,
    Relay,
    Image,
}

/// The verb of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionId {
    GetOrient,
    ChangeMotorSpeed,
    ChangePulseWidth,
    GetMotorSpeed,
    Control,
    StartMotors,
    Gyro,
    Orient,
    Shutdown,
    GetPosition,
    Position,
    DisplayText,
    Capture,
    ButtonHold,
    Confirm,
    SetState,
    TaskComplete,
    Command,
}

/// Delivery priority. Declaration order is delivery order.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Max,
    High,
    #[default]
    Medium,
    Low,
}

static NEXT_UUID: AtomicU64 = AtomicU64::new(1);

fn next_uuid() -> u64 {
    NEXT_UUID.fetch_add(1, Ordering::Relaxed)
}

/// A message on the blackboard.
///
/// Messages are built by value with the `with_*` methods and never change
/// once handed to [`Blackboard::send`](crate::Blackboard::send).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AclMessage {
    message_type: Option<MessageType>,
    action_id: Option<ActionId>,
    content: Option<String>,
    value: Option<f64>,
    sender: Option<DeviceId>,
    receiver: Option<DeviceId>,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    uuid: u64,
}

impl AclMessage {
    /// Create a SEND message at medium priority with a fresh correlation id.
    pub fn new(action_id: ActionId, sender: DeviceId, receiver: DeviceId) -> Self {
        Self {
            message_type: Some(MessageType::Send),
            action_id: Some(action_id),
            content: None,
            value: None,
            sender: Some(sender),
            receiver: Some(receiver),
            priority: Priority::Medium,
            uuid: next_uuid(),
        }
    }

    /// The sentinel returned by an empty mailbox.
    pub fn empty() -> Self {
        Self {
            message_type: Some(MessageType::Empty),
            ..Self::default()
        }
    }

    /// Build a REPLY to this message, correlated by uuid.
    pub fn reply(&self, action_id: ActionId) -> Option<Self> {
        let (sender, receiver) = (self.receiver?, self.sender?);
        Some(Self {
            message_type: Some(MessageType::Reply),
            action_id: Some(action_id),
            content: None,
            value: None,
            sender: Some(sender),
            receiver: Some(receiver),
            priority: self.priority,
            uuid: self.uuid,
        })
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    pub fn with_action(mut self, action_id: ActionId) -> Self {
        self.action_id = Some(action_id);
        self
    }

    pub fn with_sender(mut self, sender: DeviceId) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_receiver(mut self, receiver: DeviceId) -> Self {
        self.receiver = Some(receiver);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_uuid(mut self, uuid: u64) -> Self {
        self.uuid = uuid;
        self
    }

    /// A message is valid if its type, sender, receiver and action are set
    /// and it is not the empty sentinel.
    pub fn is_valid(&self) -> bool {
        matches!(self.message_type, Some(t) if t != MessageType::Empty)
            && self.sender.is_some()
            && self.receiver.is_some()
            && self.action_id.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.message_type == Some(MessageType::Empty)
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.message_type
    }

    pub fn action_id(&self) -> Option<ActionId> {
        self.action_id
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn sender(&self) -> Option<DeviceId> {
        self.sender
    }

    pub fn receiver(&self) -> Option<DeviceId> {
        self.receiver
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn uuid(&self) -> u64 {
        self.uuid
    }

    /// Parse exactly `N` floats out of the content, split on `separator`.
    pub fn floats<const N: usize>(&self, separator: char) -> Result<[f32; N], DeviceError> {
        let content = self
            .content()
            .ok_or_else(|| DeviceError::Payload(format!("{:?} without content", self.action_id)))?;

        let mut out = [0.; N];
        let mut fields = content.split(separator);
        for slot in out.iter_mut() {
            let field = fields
                .next()
                .ok_or_else(|| DeviceError::Payload(format!("too few fields in `{content}`")))?;
            *slot = field
                .trim()
                .parse()
                .map_err(|_| DeviceError::Payload(format!("`{field}` is not a number")))?;
        }
        if fields.next().is_some() {
            return Err(DeviceError::Payload(format!("too many fields in `{content}`")));
        }
        Ok(out)
    }
}

/// Join floats into a delimited content string.
pub fn join_floats(values: &[f32], separator: char) -> String {
    let mut out = String::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(separator);
        }
        out.push_str(&value.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_messages_are_valid() {
        let msg = AclMessage::new(ActionId::Gyro, DeviceId::GyroMagAcc, DeviceId::Pid);
        assert!(msg.is_valid());
        assert_eq!(msg.priority(), Priority::Medium);
    }

    #[test]
    fn missing_fields_make_a_message_invalid() {
        let msg = AclMessage::default()
            .with_type(MessageType::Send)
            .with_sender(DeviceId::Pid);
        assert!(!msg.is_valid());
        assert!(!AclMessage::empty().is_valid());
        assert!(!AclMessage::empty()
            .with_action(ActionId::Control)
            .with_sender(DeviceId::CommServer)
            .with_receiver(DeviceId::Pid)
            .is_valid());
    }

    #[test]
    fn replies_swap_endpoints_and_keep_uuid() {
        let request = AclMessage::new(ActionId::GetMotorSpeed, DeviceId::CommServer, DeviceId::Motor2);
        let reply = request.reply(ActionId::GetMotorSpeed).unwrap();
        assert_eq!(reply.sender(), Some(DeviceId::Motor2));
        assert_eq!(reply.receiver(), Some(DeviceId::CommServer));
        assert_eq!(reply.uuid(), request.uuid());
        assert_eq!(reply.message_type(), Some(MessageType::Reply));
    }

    #[test]
    fn priorities_order_max_first() {
        assert!(Priority::Max < Priority::High);
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
    }

    #[test]
    fn floats_parse_delimited_content() {
        let msg = AclMessage::new(ActionId::Control, DeviceId::CommServer, DeviceId::Pid)
            .with_content("0.0, 1.5,-2,50");
        assert_eq!(msg.floats::<4>(',').unwrap(), [0., 1.5, -2., 50.]);
        assert!(msg.floats::<3>(',').is_err());
        assert!(msg.floats::<5>(',').is_err());
    }

    #[test]
    fn device_ids_round_trip_through_names() {
        for id in DeviceId::ALL {
            assert_eq!(id.name().parse::<DeviceId>(), Ok(id));
            assert_eq!(DeviceId::ALL[id.index()], id);
        }
        assert_eq!(DeviceId::motor(3), Some(DeviceId::Motor3));
        assert_eq!(DeviceId::motor(5), None);
    }
}
