use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::device::{Device, DeviceContext, Worker};
use crate::error::DeviceError;
use crate::hal::FrameSource;
use crate::message::{AclMessage, ActionId, DeviceId, MessageType};

const REQUEST_QUEUE: usize = 4;

struct Request {
    requester: DeviceId,
    uuid: u64,
}

struct Captured {
    requester: DeviceId,
    uuid: u64,
    frame: Result<Vec<u8>, DeviceError>,
}

/// On-board camera. Frames are captured off the tick on request.
pub struct CameraDevice {
    source: Option<Box<dyn FrameSource>>,
    worker: Option<Worker>,
    requests: Option<Sender<Request>>,
    captured: Option<Receiver<Captured>>,
    sequence: u64,
    last_frame: Option<Vec<u8>>,
}

impl CameraDevice {
    pub fn new(source: impl FrameSource + 'static) -> Self {
        Self {
            source: Some(Box::new(source)),
            worker: None,
            requests: None,
            captured: None,
            sequence: 0,
            last_frame: None,
        }
    }

    pub fn last_frame(&self) -> Option<&[u8]> {
        self.last_frame.as_deref()
    }

    fn request(&self, message: &AclMessage) {
        let (requests, requester) = match (&self.requests, message.sender()) {
            (Some(requests), Some(requester)) => (requests, requester),
            _ => return,
        };
        let request = Request {
            requester,
            uuid: message.uuid(),
        };
        match requests.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(device = %self.id(), %requester, "capture queue full, dropping request")
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!(device = %self.id(), "capture worker gone")
            }
        }
    }
}

impl Device for CameraDevice {
    fn id(&self) -> DeviceId {
        DeviceId::Camera
    }

    fn init(&mut self, _cx: &DeviceContext) -> Result<(), DeviceError> {
        let mut source = self
            .source
            .take()
            .ok_or_else(|| DeviceError::Init("camera already taken".into()))?;

        let (request_tx, request_rx) = channel::bounded::<Request>(REQUEST_QUEUE);
        let (captured_tx, captured_rx) = channel::bounded(REQUEST_QUEUE);
        let worker = Worker::spawn("camera", move |stop| {
            while !stop.is_set() {
                let request = match request_rx.recv_timeout(Duration::from_millis(20)) {
                    Ok(request) => request,
                    Err(channel::RecvTimeoutError::Timeout) => continue,
                    Err(channel::RecvTimeoutError::Disconnected) => break,
                };
                let captured = Captured {
                    requester: request.requester,
                    uuid: request.uuid,
                    frame: source.capture(),
                };
                if captured_tx.send(captured).is_err() {
                    break;
                }
            }
        })?;

        self.requests = Some(request_tx);
        self.captured = Some(captured_rx);
        self.worker = Some(worker);
        Ok(())
    }

    fn update(&mut self, cx: &DeviceContext) -> Result<(), DeviceError> {
        for message in cx.drain() {
            if message.action_id() == Some(ActionId::Capture) {
                self.request(&message);
            }
        }

        let captured: Vec<Captured> = match &self.captured {
            Some(captured) => captured.try_iter().collect(),
            None => return Ok(()),
        };
        for Captured {
            requester,
            uuid,
            frame,
        } in captured
        {
            match frame {
                Ok(frame) => {
                    self.sequence += 1;
                    cx.send(
                        cx.message(ActionId::Capture, requester)
                            .with_type(MessageType::Image)
                            .with_uuid(uuid)
                            .with_value(frame.len() as f64)
                            .with_content(self.sequence.to_string()),
                    );
                    self.last_frame = Some(frame);
                }
                Err(error) => tracing::warn!(device = %self.id(), %requester, %error, "capture failed"),
            }
        }
        Ok(())
    }

    fn self_test(&mut self) -> bool {
        self.worker.as_ref().map_or(false, Worker::is_running)
    }

    fn shutdown(&mut self) {
        self.requests = None;
        if let Some(mut worker) = self.worker.take() {
            worker.stop(Duration::from_millis(500));
        }
        self.captured = None;
    }
}
