use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::command::NetworkCommand;
use crate::device::{Device, DeviceContext, Worker};
use crate::error::DeviceError;
use crate::hal::Link;
use crate::message::wire::{self, FrameDecoder};
use crate::message::{AclMessage, ActionId, DeviceId, MessageType};

const READ_CHUNK: usize = 4096;

/// Frames buffered in each direction before new ones are dropped.
const LINK_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommRole {
    Server,
    Client,
}

impl CommRole {
    pub fn id(self) -> DeviceId {
        match self {
            CommRole::Server => DeviceId::CommServer,
            CommRole::Client => DeviceId::CommClient,
        }
    }
}

/// Bridges the blackboard to a ground link.
///
/// Inbound `COMMAND` messages are expanded through the command grammar;
/// everything else is relayed with the bridge as sender. Messages addressed
/// to the bridge go out over the link.
pub struct CommBridge {
    role: CommRole,
    link: Option<Box<dyn Link>>,
    poll: Duration,
    worker: Option<Worker>,
    inbound: Option<Receiver<AclMessage>>,
    outbound: Option<Sender<Vec<u8>>>,
    dropped: u64,
}

impl CommBridge {
    pub fn new(role: CommRole, link: impl Link + 'static) -> Self {
        Self {
            role,
            link: Some(Box::new(link)),
            poll: Duration::from_millis(2),
            worker: None,
            inbound: None,
            outbound: None,
            dropped: 0,
        }
    }

    /// Builder method to set the link polling period and return `self`
    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Outbound messages dropped because the link fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn accept(&self, cx: &DeviceContext, message: AclMessage) {
        if message.action_id() == Some(ActionId::Command) {
            let line = message.content().unwrap_or_default();
            match line.parse::<NetworkCommand>() {
                Ok(command) => cx.send(command.to_message(cx.id())),
                Err(error) => tracing::warn!(device = %cx.id(), %error, "rejected command"),
            }
            return;
        }

        match message.receiver() {
            Some(receiver) if receiver != cx.id() => cx.send(
                message
                    .with_sender(cx.id())
                    .with_type(MessageType::Relay),
            ),
            _ => tracing::debug!(device = %cx.id(), "dropping inbound message without a target"),
        }
    }
}

impl Device for CommBridge {
    fn id(&self) -> DeviceId {
        self.role.id()
    }

    fn init(&mut self, _cx: &DeviceContext) -> Result<(), DeviceError> {
        let mut link = self
            .link
            .take()
            .ok_or_else(|| DeviceError::Init("link already taken".into()))?;

        let (inbound_tx, inbound_rx) = channel::bounded(LINK_QUEUE);
        let (outbound_tx, outbound_rx) = channel::bounded::<Vec<u8>>(LINK_QUEUE);
        let poll = self.poll;
        let name = format!("{}", self.id()).to_lowercase();

        let worker = Worker::spawn(name, move |stop| {
            let mut decoder = FrameDecoder::new();
            let mut chunk = [0; READ_CHUNK];
            while !stop.is_set() {
                let read = match link.recv(&mut chunk) {
                    Ok(read) => read,
                    Err(error) => {
                        tracing::warn!(%error, "link read failed");
                        0
                    }
                };
                decoder.extend(&chunk[..read]);
                loop {
                    match decoder.next_message() {
                        Ok(Some(message)) => match inbound_tx.try_send(message) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                tracing::warn!("inbound queue full, dropping message")
                            }
                            Err(TrySendError::Disconnected(_)) => return,
                        },
                        Ok(None) => break,
                        Err(error) => tracing::warn!(%error, "dropping bad frame"),
                    }
                }

                let mut wrote = false;
                for frame in outbound_rx.try_iter() {
                    wrote = true;
                    if let Err(error) = link.send(&frame) {
                        tracing::warn!(%error, "link write failed");
                    }
                }

                if read == 0 && !wrote && !stop.sleep(poll) {
                    break;
                }
            }
        })?;

        self.inbound = Some(inbound_rx);
        self.outbound = Some(outbound_tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn update(&mut self, cx: &DeviceContext) -> Result<(), DeviceError> {
        if let Some(inbound) = &self.inbound {
            for message in inbound.try_iter() {
                self.accept(cx, message);
            }
        }

        for message in cx.drain() {
            let outbound = self.outbound.as_ref().ok_or(DeviceError::WorkerStopped)?;
            let frame = wire::encode(&message)?;
            match outbound.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped += 1;
                    tracing::warn!(device = %cx.id(), dropped = self.dropped, "link behind, dropping message");
                }
                Err(TrySendError::Disconnected(_)) => return Err(DeviceError::WorkerStopped),
            }
        }
        Ok(())
    }

    fn self_test(&mut self) -> bool {
        self.worker.as_ref().map_or(false, Worker::is_running)
    }

    fn shutdown(&mut self) {
        self.outbound = None;
        if let Some(mut worker) = self.worker.take() {
            worker.stop(Duration::from_millis(500));
        }
        self.inbound = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::Blackboard;
    use crate::sim::SimLink;
    use std::sync::Arc;

    fn pump(bridge: &mut CommBridge, cx: &DeviceContext, done: impl Fn() -> bool) {
        for _ in 0..200 {
            bridge.update(cx).unwrap();
            if done() {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("bridge made no progress");
    }

    #[test]
    fn commands_are_expanded_onto_the_blackboard() {
        let blackboard = Arc::new(Blackboard::default());
        let cx = DeviceContext::new(DeviceId::CommServer, blackboard.clone());
        let (link, ground) = SimLink::pair();
        let mut bridge = CommBridge::new(CommRole::Server, link).with_poll(Duration::from_millis(1));
        bridge.init(&cx).unwrap();

        ground.send(
            &AclMessage::new(ActionId::Command, DeviceId::CommClient, DeviceId::CommServer)
                .with_content("MOTOR-SPD:2:50"),
        );
        pump(&mut bridge, &cx, || blackboard.pending(DeviceId::Motor2) > 0);

        let speed = blackboard.receive(DeviceId::Motor2);
        assert_eq!(speed.sender(), Some(DeviceId::CommServer));
        assert_eq!(speed.action_id(), Some(ActionId::ChangeMotorSpeed));
        assert_eq!(speed.value(), Some(50.));
        bridge.shutdown();
    }

    #[test]
    fn other_messages_are_relayed_with_the_bridge_as_sender() {
        let blackboard = Arc::new(Blackboard::default());
        let cx = DeviceContext::new(DeviceId::CommClient, blackboard.clone());
        let (link, ground) = SimLink::pair();
        let mut bridge = CommBridge::new(CommRole::Client, link).with_poll(Duration::from_millis(1));
        bridge.init(&cx).unwrap();

        ground.send(
            &AclMessage::new(ActionId::Capture, DeviceId::CommServer, DeviceId::Camera),
        );
        pump(&mut bridge, &cx, || blackboard.pending(DeviceId::Camera) > 0);

        let relayed = blackboard.receive(DeviceId::Camera);
        assert_eq!(relayed.sender(), Some(DeviceId::CommClient));
        assert_eq!(relayed.message_type(), Some(MessageType::Relay));
        bridge.shutdown();
    }

    #[test]
    fn mailbox_messages_go_out_over_the_link() {
        let blackboard = Arc::new(Blackboard::default());
        let cx = DeviceContext::new(DeviceId::CommServer, blackboard.clone());
        let (link, ground) = SimLink::pair();
        let mut bridge = CommBridge::new(CommRole::Server, link).with_poll(Duration::from_millis(1));
        bridge.init(&cx).unwrap();

        blackboard.send(
            AclMessage::new(ActionId::GetMotorSpeed, DeviceId::Motor1, DeviceId::CommServer)
                .with_value(1350.),
        );
        bridge.update(&cx).unwrap();

        let reply = ground.recv(Duration::from_secs(1)).unwrap();
        assert_eq!(reply.sender(), Some(DeviceId::Motor1));
        assert_eq!(reply.value(), Some(1350.));
        bridge.shutdown();
    }

    #[test]
    fn bad_commands_are_dropped() {
        let blackboard = Arc::new(Blackboard::default());
        let cx = DeviceContext::new(DeviceId::CommServer, blackboard.clone());
        let bridge = CommBridge::new(CommRole::Server, SimLink::pair().0);

        bridge.accept(
            &cx,
            AclMessage::new(ActionId::Command, DeviceId::CommClient, DeviceId::CommServer)
                .with_content("FLY-AWAY"),
        );
        assert!(blackboard.is_empty());
    }

    /// Never accepts a write until `gate` is dropped.
    struct StalledLink {
        gate: Receiver<()>,
    }

    impl Link for StalledLink {
        fn recv(&mut self, _buf: &mut [u8]) -> Result<usize, DeviceError> {
            Ok(0)
        }

        fn send(&mut self, _bytes: &[u8]) -> Result<(), DeviceError> {
            let _ = self.gate.recv();
            Err(DeviceError::Hardware("link closed".into()))
        }
    }

    #[test]
    fn a_stalled_link_drops_messages_instead_of_queueing_them() {
        let blackboard = Arc::new(Blackboard::default());
        let cx = DeviceContext::new(DeviceId::CommServer, blackboard.clone());
        let (gate_tx, gate) = channel::bounded::<()>(0);
        let mut bridge =
            CommBridge::new(CommRole::Server, StalledLink { gate }).with_poll(Duration::from_millis(1));
        bridge.init(&cx).unwrap();

        let per_update = crate::device::MAX_MESSAGES_PER_UPDATE;
        let rounds = 6;
        for _ in 0..rounds {
            for _ in 0..per_update {
                blackboard.send(
                    AclMessage::new(ActionId::GetMotorSpeed, DeviceId::Motor1, DeviceId::CommServer)
                        .with_value(1200.),
                );
            }
            bridge.update(&cx).unwrap();
        }

        // At most one frame is in the link, the rest fill the queue
        let sent = (rounds * per_update) as u64;
        assert!(bridge.dropped() >= sent - LINK_QUEUE as u64 - 1);
        assert!(bridge.dropped() <= sent - LINK_QUEUE as u64);

        drop(gate_tx);
        bridge.shutdown();
    }
}
