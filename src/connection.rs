use crate::proto::MessageType;

/// Completion of an asynchronous [`Connection`] primitive, delivered back to
/// the agent by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened(bool),
    BytesSent(bool),
    MessageRead {
        success: bool,
        kind: MessageType,
        bytes: Option<Vec<u8>>,
    },
}

/// Protocol primitives the agent needs from a transport.
///
/// `open`, `send_bytes` and `read_message` complete later through exactly one
/// [`ConnectionEvent`] each. `flush` and `close` are synchronous.
pub trait Connection {
    fn open(&mut self);
    fn close(&mut self);
    fn send_bytes(&mut self, kind: MessageType, bytes: &[u8]);
    fn read_message(&mut self, kind: MessageType);
    fn flush(&mut self);
}
