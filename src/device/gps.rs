use std::time::Duration;

use crossbeam::channel::{self, Receiver, TrySendError};

use crate::device::{Device, DeviceContext, Worker};
use crate::error::DeviceError;
use crate::hal::GpsReceiver;
use crate::message::{ActionId, DeviceId};

const SENTENCE_QUEUE: usize = 16;

/// OLED row used for the position line.
const DISPLAY_ROW: u8 = 2;

/// A position fix from a GGA sentence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    /// Degrees, north positive.
    pub latitude: f64,
    /// Degrees, east positive.
    pub longitude: f64,
    /// Metres above mean sea level.
    pub altitude: f32,
    pub satellites: u8,
}

/// Parse a `$GPGGA`/`$GNGGA` sentence.
///
/// Returns `None` for other sentences, bad checksums, non-ASCII input and
/// sentences without a fix.
pub fn parse_gga(sentence: &str) -> Option<Fix> {
    if !sentence.is_ascii() {
        return None;
    }
    let body = sentence.trim().strip_prefix('$')?;
    let body = match body.split_once('*') {
        Some((body, checksum)) => {
            let expected = u8::from_str_radix(checksum.trim(), 16).ok()?;
            let actual = body.bytes().fold(0, |acc, byte| acc ^ byte);
            if actual != expected {
                return None;
            }
            body
        }
        None => body,
    };

    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() < 10 || !fields[0].ends_with("GGA") {
        return None;
    }

    let quality: u8 = fields[6].parse().ok()?;
    if quality == 0 {
        return None;
    }

    Some(Fix {
        latitude: coordinate(fields[2], 2, fields[3], 'S')?,
        longitude: coordinate(fields[4], 3, fields[5], 'W')?,
        altitude: fields[9].parse().ok()?,
        satellites: fields[7].parse().unwrap_or(0),
    })
}

/// `ddmm.mmmm` (or `dddmm.mmmm`) to signed degrees.
fn coordinate(field: &str, degree_digits: usize, hemisphere: &str, negative: char) -> Option<f64> {
    if field.len() <= degree_digits {
        return None;
    }
    let degrees: f64 = field.get(..degree_digits)?.parse().ok()?;
    let minutes: f64 = field.get(degree_digits..)?.parse().ok()?;
    let value = degrees + minutes / 60.;

    if hemisphere.starts_with(negative) {
        Some(-value)
    } else {
        Some(value)
    }
}

pub struct GpsDevice {
    receiver: Option<Box<dyn GpsReceiver>>,
    period: Duration,
    worker: Option<Worker>,
    sentences: Option<Receiver<String>>,
    fix: Option<Fix>,
}

impl GpsDevice {
    pub fn new(receiver: impl GpsReceiver + 'static) -> Self {
        Self {
            receiver: Some(Box::new(receiver)),
            period: Duration::from_millis(100),
            worker: None,
            sentences: None,
            fix: None,
        }
    }

    /// Builder method to set the receiver polling period and return `self`
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn fix(&self) -> Option<Fix> {
        self.fix
    }

    fn position(&self) -> Option<String> {
        self.fix.map(|fix| {
            format!(
                "{:.6}:{:.6}:{:.1}",
                fix.latitude, fix.longitude, fix.altitude
            )
        })
    }
}

impl Device for GpsDevice {
    fn id(&self) -> DeviceId {
        DeviceId::GpsDevice
    }

    fn init(&mut self, _cx: &DeviceContext) -> Result<(), DeviceError> {
        let mut receiver = self
            .receiver
            .take()
            .ok_or_else(|| DeviceError::Init("receiver already taken".into()))?;

        let (tx, rx) = channel::bounded(SENTENCE_QUEUE);
        let period = self.period;
        let worker = Worker::spawn("gps", move |stop| loop {
            match receiver.read_sentence() {
                Ok(Some(sentence)) => match tx.try_send(sentence) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => break,
                },
                Ok(None) => {}
                Err(error) => tracing::warn!(%error, "gps read failed"),
            }
            if !stop.sleep(period) {
                break;
            }
        })?;

        self.sentences = Some(rx);
        self.worker = Some(worker);
        Ok(())
    }

    fn update(&mut self, cx: &DeviceContext) -> Result<(), DeviceError> {
        if let Some(sentences) = &self.sentences {
            for sentence in sentences.try_iter() {
                if let Some(fix) = parse_gga(&sentence) {
                    self.fix = Some(fix);
                }
            }
        }

        for message in cx.drain() {
            if message.action_id() != Some(ActionId::GetPosition) {
                continue;
            }
            let reply = match message.reply(ActionId::Position) {
                Some(reply) => reply,
                None => continue,
            };
            match self.position() {
                Some(position) => cx.send(reply.with_content(position).with_value(1.)),
                None => cx.send(reply.with_value(0.)),
            }
        }
        Ok(())
    }

    fn alternate(&mut self, cx: &DeviceContext) -> Result<(), DeviceError> {
        let line = match self.fix {
            Some(fix) => format!(
                "{DISPLAY_ROW}:GPS {:.4} {:.4} {}sat",
                fix.latitude, fix.longitude, fix.satellites
            ),
            None => format!("{DISPLAY_ROW}:GPS no fix"),
        };
        cx.send(
            cx.message(ActionId::DisplayText, DeviceId::OledDevice)
                .with_content(line),
        );
        Ok(())
    }

    fn self_test(&mut self) -> bool {
        self.worker.as_ref().map_or(false, Worker::is_running)
    }

    fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop(Duration::from_millis(500));
        }
        self.sentences = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::Blackboard;
    use crate::message::AclMessage;
    use crate::sim::{SimGps, SAMPLE_GGA};
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    #[test]
    fn parses_a_checksummed_gga_sentence() {
        let fix = parse_gga(SAMPLE_GGA).unwrap();
        assert_abs_diff_eq!(fix.latitude, 48. + 7.038 / 60., epsilon = 1e-9);
        assert_abs_diff_eq!(fix.longitude, 11. + 31. / 60., epsilon = 1e-9);
        assert_abs_diff_eq!(fix.altitude, 545.4, epsilon = 1e-4);
        assert_eq!(fix.satellites, 8);
    }

    #[test]
    fn rejects_bad_checksums_and_missing_fixes() {
        let corrupted = SAMPLE_GGA.replace("*47", "*48");
        assert_eq!(parse_gga(&corrupted), None);
        assert_eq!(
            parse_gga("$GPGGA,123519,4807.038,N,01131.000,E,0,00,,,M,,M,,"),
            None
        );
        assert_eq!(parse_gga("$GPRMC,123519,A,4807.038,N"), None);
    }

    #[test]
    fn non_ascii_fields_are_rejected() {
        assert_eq!(parse_gga("$GPGGA,1,a\u{e9}0.00,N,01131.000,E,1,08,0.9,545.4,M,,M,,"), None);
        assert_eq!(coordinate("\u{e9}00.00", 2, "N", 'S'), None);
        assert_eq!(coordinate("4\u{e9}7.038", 2, "N", 'S'), None);
    }

    #[test]
    fn southern_and_western_hemispheres_are_negative() {
        let fix = parse_gga("$GPGGA,0,3356.000,S,15112.000,W,1,05,1.0,10.0,M,,M,,").unwrap();
        assert_abs_diff_eq!(fix.latitude, -(33. + 56. / 60.), epsilon = 1e-9);
        assert_abs_diff_eq!(fix.longitude, -(151. + 12. / 60.), epsilon = 1e-9);
    }

    #[test]
    fn position_queries_are_answered_after_a_fix() {
        let blackboard = Arc::new(Blackboard::default());
        let cx = DeviceContext::new(DeviceId::GpsDevice, blackboard.clone());
        let mut gps = GpsDevice::new(SimGps::default()).with_period(Duration::from_millis(1));
        gps.init(&cx).unwrap();

        for _ in 0..200 {
            gps.update(&cx).unwrap();
            if gps.fix().is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(gps.fix().is_some());

        blackboard.send(AclMessage::new(
            ActionId::GetPosition,
            DeviceId::CommServer,
            DeviceId::GpsDevice,
        ));
        gps.update(&cx).unwrap();
        let reply = blackboard.receive(DeviceId::CommServer);
        assert_eq!(reply.action_id(), Some(ActionId::Position));
        assert_eq!(reply.content(), Some("48.117300:11.516667:545.4"));

        gps.alternate(&cx).unwrap();
        let line = blackboard.receive(DeviceId::OledDevice);
        assert!(line.content().unwrap().starts_with("2:GPS 48.1173"));
        gps.shutdown();
    }
}
