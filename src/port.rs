use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use crate::connection::{Connection, ConnectionEvent};
use crate::frame::{PacketDecoder, encode_packet};
use crate::proto::MessageType;

pub const DEFAULT_BAUD: u32 = 2_000_000;

#[derive(Debug, Clone)]
pub struct PortConfig {
    pub dev: String,
    pub baud: u32,
    pub rtscts: bool,
    /// How long one `read_message` waits for a packet before failing.
    pub read_timeout: Duration,
}

impl PortConfig {
    pub fn new(dev: impl Into<String>) -> Self {
        Self {
            dev: dev.into(),
            baud: DEFAULT_BAUD,
            rtscts: false,
            read_timeout: Duration::from_millis(1000),
        }
    }
}

pub fn open_port(cfg: &PortConfig) -> Result<Box<dyn SerialPort>> {
    let builder = serialport::new(&cfg.dev, cfg.baud)
        .timeout(Duration::from_millis(100))
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(if cfg.rtscts {
            FlowControl::Hardware
        } else {
            FlowControl::None
        });

    builder
        .open()
        .map_err(|e| anyhow!("open {}: {}", cfg.dev, e))
}

pub fn write_packet<W: Write + ?Sized>(w: &mut W, kind: MessageType, payload: &[u8]) -> Result<()> {
    let pkt = encode_packet(kind, payload);
    w.write_all(&pkt).context("serial write")?;
    Ok(())
}

/// Buffers raw bytes from the port and hands out whole packets.
#[derive(Debug, Default)]
pub struct PacketReader {
    pending: VecDeque<u8>,
    decoder: PacketDecoder,
}

impl PacketReader {
    /// Reads until one packet is complete or `timeout` elapses. PRINT packets
    /// are logged and skipped unless PRINT is what the caller waits for.
    pub fn read_packet<R: Read + ?Sized>(
        &mut self,
        src: &mut R,
        expected: MessageType,
        timeout: Duration,
    ) -> Result<(MessageType, Vec<u8>)> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 512];
        loop {
            while let Some(b) = self.pending.pop_front() {
                match self.decoder.push(b) {
                    None => {}
                    Some(Ok((MessageType::Print, text))) if expected != MessageType::Print => {
                        info!("[battor] {}", String::from_utf8_lossy(&text).trim_end());
                    }
                    Some(Ok(packet)) => return Ok(packet),
                    Some(Err(e)) => return Err(e).context("decoding packet"),
                }
            }
            if Instant::now() >= deadline {
                bail!("timed out waiting for {:?}", expected);
            }
            match src.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => self.pending.extend(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e).context("serial read"),
            }
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.decoder.reset();
    }
}

/// [`Connection`] over a real serial port.
///
/// Each primitive does its port IO synchronously on the calling thread and
/// queues exactly one [`ConnectionEvent`] before returning, so
/// `read_message` blocks for up to [`PortConfig::read_timeout`]. The agent
/// never sees the event from inside the call: it is delivered later by the
/// host loop draining the channel (see [`crate::session::pump`]).
pub struct SerialConnection {
    cfg: PortConfig,
    port: Option<Box<dyn SerialPort>>,
    reader: PacketReader,
    events: Sender<ConnectionEvent>,
}

impl SerialConnection {
    pub fn new(cfg: PortConfig, events: Sender<ConnectionEvent>) -> Self {
        Self {
            cfg,
            port: None,
            reader: PacketReader::default(),
            events,
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            warn!("[port] event receiver dropped");
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| anyhow!("{} is not open", self.cfg.dev))
    }
}

impl Connection for SerialConnection {
    fn open(&mut self) {
        if self.port.is_some() {
            self.emit(ConnectionEvent::Opened(true));
            return;
        }
        let ok = match open_port(&self.cfg) {
            Ok(p) => {
                debug!("[port] opened {} at {} baud", self.cfg.dev, self.cfg.baud);
                self.port = Some(p);
                self.reader.clear();
                true
            }
            Err(e) => {
                warn!("[port] {:#}", e);
                false
            }
        };
        self.emit(ConnectionEvent::Opened(ok));
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("[port] closed {}", self.cfg.dev);
        }
        self.reader.clear();
    }

    fn send_bytes(&mut self, kind: MessageType, bytes: &[u8]) {
        let res = self
            .port()
            .and_then(|port| write_packet(port.as_mut(), kind, bytes));
        if let Err(e) = &res {
            warn!("[port] send {:?}: {:#}", kind, e);
        }
        self.emit(ConnectionEvent::BytesSent(res.is_ok()));
    }

    fn read_message(&mut self, kind: MessageType) {
        let timeout = self.cfg.read_timeout;
        let res = match self.port.as_mut() {
            Some(port) => self.reader.read_packet(port.as_mut(), kind, timeout),
            None => Err(anyhow!("{} is not open", self.cfg.dev)),
        };
        let event = match res {
            Ok((actual, bytes)) => ConnectionEvent::MessageRead {
                success: true,
                kind: actual,
                bytes: Some(bytes),
            },
            Err(e) => {
                debug!("[port] read {:?}: {:#}", kind, e);
                ConnectionEvent::MessageRead {
                    success: false,
                    kind,
                    bytes: None,
                }
            }
        };
        self.emit(event);
    }

    fn flush(&mut self) {
        let Some(port) = self.port.as_mut() else {
            return;
        };
        if let Err(e) = port.flush() {
            warn!("[port] flush: {}", e);
        }
        if let Err(e) = port.clear(ClearBuffer::Input) {
            warn!("[port] clear input: {}", e);
        }
        self.reader.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn reads_one_packet_and_keeps_the_rest() {
        let mut wire = encode_packet(MessageType::ControlAck, &[0, 0]);
        wire.extend(encode_packet(MessageType::Samples, &[1, 2, 3]));
        let mut src = Cursor::new(wire);
        let mut reader = PacketReader::default();

        let (kind, bytes) = reader
            .read_packet(&mut src, MessageType::ControlAck, SHORT)
            .unwrap();
        assert_eq!((kind, bytes), (MessageType::ControlAck, vec![0, 0]));

        let (kind, bytes) = reader
            .read_packet(&mut src, MessageType::Samples, SHORT)
            .unwrap();
        assert_eq!((kind, bytes), (MessageType::Samples, vec![1, 2, 3]));
    }

    #[test]
    fn skips_print_packets() {
        let mut wire = encode_packet(MessageType::Print, b"booting\n");
        wire.extend(encode_packet(MessageType::ControlAck, &[4, 0]));
        let mut reader = PacketReader::default();
        let (kind, _) = reader
            .read_packet(&mut Cursor::new(wire), MessageType::ControlAck, SHORT)
            .unwrap();
        assert_eq!(kind, MessageType::ControlAck);
    }

    #[test]
    fn reports_actual_type_when_it_differs() {
        let wire = encode_packet(MessageType::Samples, &[]);
        let mut reader = PacketReader::default();
        let (kind, bytes) = reader
            .read_packet(&mut Cursor::new(wire), MessageType::ControlAck, SHORT)
            .unwrap();
        assert_eq!(kind, MessageType::Samples);
        assert!(bytes.is_empty());
    }

    #[test]
    fn times_out_without_a_packet() {
        let mut reader = PacketReader::default();
        let err = reader
            .read_packet(&mut Cursor::new(vec![0xAA]), MessageType::Samples, SHORT)
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn write_packet_frames_payload() {
        let mut out = Vec::new();
        write_packet(&mut out, MessageType::Control, &[1, 0, 0, 0, 0]).unwrap();
        assert_eq!(out, encode_packet(MessageType::Control, &[1, 0, 0, 0, 0]));
    }

    #[test]
    fn read_message_queues_its_event_before_returning() {
        let (tx, rx) = mpsc::channel();
        let mut conn = SerialConnection::new(PortConfig::new("/dev/null-battor"), tx);
        conn.read_message(MessageType::Samples);
        assert!(matches!(
            rx.try_recv(),
            Ok(ConnectionEvent::MessageRead { success: false, kind: MessageType::Samples, .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn primitives_without_open_port_fail() {
        let (tx, rx) = mpsc::channel();
        let mut conn = SerialConnection::new(PortConfig::new("/dev/null-battor"), tx);
        conn.send_bytes(MessageType::Control, &[0]);
        conn.read_message(MessageType::ControlAck);
        conn.flush();
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                ConnectionEvent::BytesSent(false),
                ConnectionEvent::MessageRead {
                    success: false,
                    kind: MessageType::ControlAck,
                    bytes: None,
                },
            ]
        );
    }
}
