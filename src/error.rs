use thiserror::Error;

use crate::proto::message::MessageType;

/// Outcome of a failed tracing command, as reported to the listener.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AgentError {
    #[error("failed to open a connection to the BattOr")]
    ConnectionFailed,
    #[error("failed to send a message to the BattOr")]
    SendError,
    #[error("failed to receive a message from the BattOr")]
    ReceiveError,
    #[error("received an unexpected message from the BattOr")]
    UnexpectedMessage,
    #[error("another command is already in progress")]
    Busy,
}

/// Why a received payload could not be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("read succeeded without a payload")]
    MissingPayload,
    #[error("expected message type {expected:?}, got {actual:?}")]
    WrongMessageType {
        expected: MessageType,
        actual: MessageType,
    },
    #[error("{what} must be {expected} bytes, got {actual}")]
    BadSize {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("frame shorter than its header: {0} bytes")]
    TruncatedHeader(usize),
    #[error("frame header declares {declared} payload bytes, {actual} present")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("frame payload of {0} bytes is not a whole number of samples")]
    PartialSample(usize),
    #[error("calibration frame contains no samples")]
    EmptyCalibration,
    #[error("ack for {actual:#04x} while waiting for {expected:#04x}")]
    WrongAck { expected: u8, actual: u8 },
    #[error("EEPROM field {0} is zero or not a number")]
    InvalidEeprom(&'static str),
    #[error("unknown message type byte: {0:#04x}")]
    UnknownMessageType(u8),
}

/// Link-layer packet decode failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("unescaped control byte {0:#04x} inside packet")]
    StrayControlByte(u8),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
