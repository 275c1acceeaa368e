// src/io/serial/reader.rs
//
// MONOSTICK serial session.
// Reads the port on a blocking thread, frames and decodes packets, and pushes
// the results onto the sensor channel in stream order. The channel closes when
// the session ends.

use std::io::{ErrorKind, Read};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use serialport::{DataBits, Parity as SpParity, StopBits};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::framer::{FramerOutput, LineFramer};
use super::parser::parse_packet;
use crate::error::SerialError;
use crate::io::{FailureReason, ParseFailure, SensorEvent, SensorEventSender};
use crate::settings::{MonostickSettings, Parity};

/// Bytes requested per read call
const READ_CHUNK: usize = 256;

/// Pause after an unexpected read error before polling again
const READ_ERROR_PAUSE: Duration = Duration::from_millis(100);

// ============================================================================
// Types
// ============================================================================

/// Why the producer stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// `close()` was requested
    Closed,
    /// The device disappeared or the read failed permanently
    DeviceLost,
    /// The receiving side of the channel was dropped
    ConsumerGone,
}

/// How a failed read affects the stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReadFailure {
    /// Nothing arrived within the read timeout
    NoData,
    /// Unexpected, but the port may still recover
    Transient,
    /// The port is gone
    Fatal,
}

fn classify_read_error(kind: ErrorKind) -> ReadFailure {
    match kind {
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted => {
            ReadFailure::NoData
        }
        ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof
        | ErrorKind::PermissionDenied => ReadFailure::Fatal,
        _ => ReadFailure::Transient,
    }
}

// ============================================================================
// Serial Session
// ============================================================================

/// Running producer side of the bridge. Owns the port and the frame buffer.
pub struct SerialSession {
    name: String,
    cancel_flag: Arc<AtomicBool>,
    task_handle: JoinHandle<StreamEnd>,
}

impl SerialSession {
    /// Open the configured MONOSTICK port and start producing events
    pub fn open(
        settings: &MonostickSettings,
        events: SensorEventSender,
    ) -> Result<Self, SerialError> {
        let port = serialport::new(&settings.device, settings.baud)
            .data_bits(to_serialport_data_bits(settings.data_bits))
            .stop_bits(to_serialport_stop_bits(settings.stop_bits))
            .parity(to_serialport_parity(settings.parity))
            .timeout(settings.read_timeout)
            .open()
            .map_err(|source| SerialError::Open {
                device: settings.device.clone(),
                source,
            })?;

        info!(
            device = %settings.device,
            baud = settings.baud,
            read_timeout = ?settings.read_timeout,
            "Opened MONOSTICK"
        );

        Ok(Self::spawn(
            settings.device.clone(),
            port,
            settings.max_frame_length,
            events,
        ))
    }

    /// Start producing events from any byte source
    pub fn spawn<R>(
        name: String,
        source: R,
        max_frame_length: usize,
        events: SensorEventSender,
    ) -> Self
    where
        R: Read + Send + 'static,
    {
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let flag = cancel_flag.clone();
        let task_name = name.clone();

        let task_handle = tokio::task::spawn_blocking(move || {
            let framer = LineFramer::new(max_frame_length);
            let end = run_serial_stream_blocking(source, framer, &flag, &events);
            info!(device = %task_name, reason = ?end, "Serial stream ended");
            end
        });

        Self {
            name,
            cancel_flag,
            task_handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop reading and wait for the producer to release the port.
    /// Returns after at most one read timeout.
    pub async fn close(self) -> StreamEnd {
        self.cancel_flag.store(true, Ordering::Relaxed);
        match self.task_handle.await {
            Ok(end) => end,
            Err(e) => {
                error!(device = %self.name, error = %e, "Serial task panicked");
                StreamEnd::DeviceLost
            }
        }
    }
}

/// Blocking read loop. Returns when cancelled, when the device is gone, or when
/// nobody is listening; dropping `events` afterwards closes the channel.
fn run_serial_stream_blocking<R: Read>(
    mut source: R,
    mut framer: LineFramer,
    cancel_flag: &AtomicBool,
    events: &SensorEventSender,
) -> StreamEnd {
    let mut buf = [0u8; READ_CHUNK];

    loop {
        if cancel_flag.load(Ordering::Relaxed) {
            return StreamEnd::Closed;
        }

        let n = match source.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(e) => match classify_read_error(e.kind()) {
                ReadFailure::NoData => continue,
                ReadFailure::Transient => {
                    debug!(error = %e, "Serial read failed, retrying");
                    std::thread::sleep(READ_ERROR_PAUSE);
                    continue;
                }
                ReadFailure::Fatal => {
                    warn!(error = %e, "Serial device lost");
                    return StreamEnd::DeviceLost;
                }
            },
        };

        for output in framer.feed(&buf[..n]) {
            let event = match output {
                // The shadow document is JSON, so bytes that are not UTF-8 are
                // replaced with U+FFFD rather than passed through
                FramerOutput::Frame(bytes) => {
                    parse_packet(&String::from_utf8_lossy(&bytes)).into_event()
                }
                FramerOutput::Overflow { discarded } => Some(SensorEvent::ParseFailure(
                    ParseFailure::new(FailureReason::Overflow { discarded }, String::new()),
                )),
            };
            if let Some(event) = event {
                if events.send(event).is_err() {
                    return StreamEnd::ConsumerGone;
                }
            }
        }
    }
}

// ============================================================================
// Port Settings Conversion
// ============================================================================

fn to_serialport_parity(parity: Parity) -> SpParity {
    match parity {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

/// Settings validation limits this to 5..=8
fn to_serialport_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

fn to_serialport_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{sensor_channel, PacketField};
    use std::collections::VecDeque;
    use std::io;

    /// Byte source replaying a fixed script of read results
    struct ScriptedPort {
        script: VecDeque<io::Result<Vec<u8>>>,
    }

    impl ScriptedPort {
        fn new(script: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.script.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(ErrorKind::BrokenPipe, "unplugged")),
            }
        }
    }

    fn chunk(bytes: &[u8]) -> io::Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    #[test]
    fn test_classify_read_error() {
        assert_eq!(classify_read_error(ErrorKind::TimedOut), ReadFailure::NoData);
        assert_eq!(classify_read_error(ErrorKind::Interrupted), ReadFailure::NoData);
        assert_eq!(classify_read_error(ErrorKind::BrokenPipe), ReadFailure::Fatal);
        assert_eq!(classify_read_error(ErrorKind::Other), ReadFailure::Transient);
    }

    #[test]
    fn test_to_serialport_settings() {
        assert!(matches!(to_serialport_parity(Parity::Even), SpParity::Even));
        assert!(matches!(to_serialport_data_bits(7), DataBits::Seven));
        assert!(matches!(to_serialport_data_bits(8), DataBits::Eight));
        assert!(matches!(to_serialport_stop_bits(2), StopBits::Two));
    }

    #[test]
    fn test_stream_emits_events_in_order() {
        let port = ScriptedPort::new(vec![
            chunk(b";1;2;10;9;ABCD1234;3300;1;7;8;9;10;100;-50;60;\r"),
            Err(io::Error::new(ErrorKind::TimedOut, "timeout")),
            chunk(b"\n;;\r\n;1;2;3;"),
            chunk(b""),
            chunk(b"\r\n;1;2;999;9;ABCD1234;3300;1;7;8;9;10;100;-50;60;\r\n"),
        ]);
        let (tx, mut rx) = sensor_channel();
        let cancel = AtomicBool::new(false);

        let end = run_serial_stream_blocking(port, LineFramer::default(), &cancel, &tx);
        assert_eq!(end, StreamEnd::DeviceLost);
        drop(tx);

        match rx.try_recv().unwrap() {
            SensorEvent::Reading(reading) => {
                assert_eq!(reading.lqi, 10);
                assert_eq!(reading.child_id, "ABCD1234");
            }
            other => panic!("expected reading, got {:?}", other),
        }
        // The `;;` frame is suppressed
        match rx.try_recv().unwrap() {
            SensorEvent::ParseFailure(failure) => {
                assert_eq!(failure.reason, FailureReason::FieldCount(3))
            }
            other => panic!("expected failure, got {:?}", other),
        }
        match rx.try_recv().unwrap() {
            SensorEvent::ParseFailure(failure) => assert!(matches!(
                failure.reason,
                FailureReason::InvalidField { field: PacketField::Lqi, .. }
            )),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_invalid_utf8_in_child_id_is_replaced() {
        let port = ScriptedPort::new(vec![chunk(
            b";1;2;10;9;ABCD\xff234;3300;1;7;8;9;10;100;-50;60;\r\n",
        )]);
        let (tx, mut rx) = sensor_channel();
        let cancel = AtomicBool::new(false);

        run_serial_stream_blocking(port, LineFramer::default(), &cancel, &tx);

        match rx.try_recv().unwrap() {
            SensorEvent::Reading(reading) => {
                assert_eq!(reading.child_id, "ABCD\u{FFFD}234");
                assert_eq!(reading.lqi, 10);
            }
            other => panic!("expected reading, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_reports_overflow() {
        let port = ScriptedPort::new(vec![chunk(&[b'x'; 40])]);
        let (tx, mut rx) = sensor_channel();
        let cancel = AtomicBool::new(false);

        run_serial_stream_blocking(port, LineFramer::new(16), &cancel, &tx);

        match rx.try_recv().unwrap() {
            SensorEvent::ParseFailure(failure) => {
                assert_eq!(failure.reason, FailureReason::Overflow { discarded: 40 })
            }
            other => panic!("expected overflow, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_stops_when_consumer_gone() {
        let port = ScriptedPort::new(vec![chunk(b";1;2;3;\r\n")]);
        let (tx, rx) = sensor_channel();
        drop(rx);
        let cancel = AtomicBool::new(false);

        let end = run_serial_stream_blocking(port, LineFramer::default(), &cancel, &tx);
        assert_eq!(end, StreamEnd::ConsumerGone);
    }

    #[test]
    fn test_cancel_flag_stops_stream() {
        let port = ScriptedPort::new(vec![chunk(b";1;2;3;\r\n")]);
        let (tx, mut rx) = sensor_channel();
        let cancel = AtomicBool::new(true);

        let end = run_serial_stream_blocking(port, LineFramer::default(), &cancel, &tx);
        assert_eq!(end, StreamEnd::Closed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_session_closes_channel_when_device_lost() {
        let port = ScriptedPort::new(vec![chunk(b";;\r\n;1;2;3;\r\n")]);
        let (tx, mut rx) = sensor_channel();

        let session = SerialSession::spawn("scripted".to_string(), port, 4096, tx);
        assert_eq!(session.name(), "scripted");

        assert!(matches!(rx.recv().await, Some(SensorEvent::ParseFailure(_))));
        assert!(rx.recv().await.is_none());
        assert_eq!(session.close().await, StreamEnd::DeviceLost);
    }

    #[tokio::test]
    async fn test_session_close_stops_idle_port() {
        // Port that never produces data
        struct IdlePort;
        impl Read for IdlePort {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                std::thread::sleep(Duration::from_millis(5));
                Err(io::Error::new(ErrorKind::TimedOut, "timeout"))
            }
        }

        let (tx, mut rx) = sensor_channel();
        let session = SerialSession::spawn("idle".to_string(), IdlePort, 4096, tx);

        assert_eq!(session.close().await, StreamEnd::Closed);
        assert!(rx.recv().await.is_none());
    }
}
