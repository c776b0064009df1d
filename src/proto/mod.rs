//! BattOr message types and their little-endian wire encoding.

pub mod message;
pub mod parser;

pub use message::{
    ControlAck, ControlMessage, ControlMessageType, Eeprom, FrameHeader, Gain, MessageType,
    RawSample, SampleFrame,
};
