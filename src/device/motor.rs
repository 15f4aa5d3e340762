use crate::config::MotorConfig;
use crate::device::{Device, DeviceContext};
use crate::error::DeviceError;
use crate::hal::Esc;
use crate::message::{AclMessage, ActionId, DeviceId};

/// One rotor, driven through its ESC.
pub struct Motor {
    id: DeviceId,
    esc: Box<dyn Esc>,
    config: MotorConfig,
    pulse_us: f32,
    armed: bool,
}

impl Motor {
    pub fn new(id: DeviceId, esc: impl Esc + 'static, config: MotorConfig) -> Self {
        let pulse_us = config.min_pulse_us;
        Self {
            id,
            esc: Box::new(esc),
            config,
            pulse_us,
            armed: false,
        }
    }

    /// The pulse width last written to the ESC.
    pub fn pulse_width(&self) -> f32 {
        self.pulse_us
    }

    fn set_pulse(&mut self, pulse_us: f32) {
        let pulse_us = pulse_us
            .max(self.config.min_pulse_us)
            .min(self.config.max_pulse_us);
        if pulse_us == self.pulse_us {
            return;
        }
        self.esc.output(pulse_us);
        self.pulse_us = pulse_us;
    }

    fn handle(&mut self, cx: &DeviceContext, message: AclMessage) -> Result<(), DeviceError> {
        let value = || {
            message
                .value()
                .map(|value| value as f32)
                .ok_or_else(|| DeviceError::Payload("missing value".into()))
        };

        match message.action_id() {
            Some(ActionId::ChangePulseWidth) => self.set_pulse(value()?),
            Some(ActionId::ChangeMotorSpeed) => {
                let pulse_us = self.config.pulse_for_percent(value()?);
                self.set_pulse(pulse_us)
            }
            Some(ActionId::GetMotorSpeed) => {
                if let Some(reply) = message.reply(ActionId::GetMotorSpeed) {
                    cx.send(reply.with_value(self.pulse_us.into()));
                }
            }
            Some(ActionId::Shutdown) => self.set_pulse(self.config.min_pulse_us),
            other => tracing::trace!(device = %self.id, action = ?other, "ignored"),
        }
        Ok(())
    }
}

impl Device for Motor {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn init(&mut self, _cx: &DeviceContext) -> Result<(), DeviceError> {
        self.esc.arm();
        self.pulse_us = self.config.min_pulse_us;
        self.esc.output(self.pulse_us);
        self.armed = true;
        Ok(())
    }

    fn update(&mut self, cx: &DeviceContext) -> Result<(), DeviceError> {
        for message in cx.drain() {
            if let Err(error) = self.handle(cx, message) {
                tracing::warn!(device = %self.id, %error, "rejected message");
            }
        }
        Ok(())
    }

    fn self_test(&mut self) -> bool {
        self.armed
    }

    fn shutdown(&mut self) {
        self.esc.output(self.config.min_pulse_us);
        self.pulse_us = self.config.min_pulse_us;
        self.armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::Blackboard;
    use crate::sim::SimEsc;
    use std::sync::Arc;

    fn motor() -> (Motor, SimEsc, DeviceContext, Arc<Blackboard>) {
        let esc = SimEsc::default();
        let blackboard = Arc::new(Blackboard::default());
        let cx = DeviceContext::new(DeviceId::Motor2, blackboard.clone());
        let mut motor = Motor::new(DeviceId::Motor2, esc.clone(), MotorConfig::default());
        motor.init(&cx).unwrap();
        (motor, esc, cx, blackboard)
    }

    fn to_motor(action_id: ActionId, value: f64) -> AclMessage {
        AclMessage::new(action_id, DeviceId::Pid, DeviceId::Motor2).with_value(value)
    }

    #[test]
    fn init_arms_at_minimum_pulse() {
        let (motor, esc, _, _) = motor();
        assert!(esc.is_armed());
        assert_eq!(esc.pulses(), vec![1000.]);
        assert_eq!(motor.pulse_width(), 1000.);
    }

    #[test]
    fn pulse_width_changes_are_clamped_and_deduplicated() {
        let (mut motor, esc, cx, blackboard) = motor();
        blackboard.send(to_motor(ActionId::ChangePulseWidth, 1500.));
        blackboard.send(to_motor(ActionId::ChangePulseWidth, 1500.));
        blackboard.send(to_motor(ActionId::ChangePulseWidth, 2600.));
        motor.update(&cx).unwrap();

        assert_eq!(esc.pulses(), vec![1000., 1500., 2000.]);
    }

    #[test]
    fn speed_percent_maps_onto_pulse_range() {
        let (mut motor, _, cx, blackboard) = motor();
        blackboard.send(to_motor(ActionId::ChangeMotorSpeed, 25.));
        motor.update(&cx).unwrap();
        assert_eq!(motor.pulse_width(), 1250.);
    }

    #[test]
    fn speed_query_is_answered() {
        let (mut motor, _, cx, blackboard) = motor();
        blackboard.send(to_motor(ActionId::ChangePulseWidth, 1400.));
        blackboard.send(AclMessage::new(
            ActionId::GetMotorSpeed,
            DeviceId::CommServer,
            DeviceId::Motor2,
        ));
        motor.update(&cx).unwrap();

        let reply = blackboard.receive(DeviceId::CommServer);
        assert_eq!(reply.sender(), Some(DeviceId::Motor2));
        assert_eq!(reply.value(), Some(1400.));
    }

    #[test]
    fn shutdown_returns_to_minimum() {
        let (mut motor, esc, cx, blackboard) = motor();
        blackboard.send(to_motor(ActionId::ChangePulseWidth, 1700.));
        motor.update(&cx).unwrap();
        motor.shutdown();

        assert_eq!(esc.pulses().last(), Some(&1000.));
        assert!(!motor.self_test());
    }
}
