use crate::error::ProtocolError;

/// Type byte that leads every packet on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Control = 0,
    ControlAck = 1,
    Samples = 2,
    Print = 3,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        match b {
            0 => Ok(MessageType::Control),
            1 => Ok(MessageType::ControlAck),
            2 => Ok(MessageType::Samples),
            3 => Ok(MessageType::Print),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlMessageType {
    // ---- Setup ----
    Init = 0,
    Reset = 1,
    SelfTest = 2,
    ReadEeprom = 3,
    SetGain = 4,

    // ---- Sampling ----
    StartSamplingSd = 5,
    ReadSdUart = 6,
    StartSamplingUart = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Gain {
    Low = 0,
    High = 1,
}

/// `{type, param1, param2}` request sent with [`MessageType::Control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlMessage {
    pub kind: ControlMessageType,
    pub param1: u16,
    pub param2: u16,
}

impl ControlMessage {
    pub const SIZE: usize = 5;

    pub fn new(kind: ControlMessageType, param1: u16, param2: u16) -> Self {
        Self {
            kind,
            param1,
            param2,
        }
    }
}

/// Device reply to a control message. `acked` is kept as the raw byte so a
/// garbage ack still decodes and fails on the type comparison instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlAck {
    pub acked: u8,
    pub result: u8,
}

impl ControlAck {
    pub const SIZE: usize = 2;

    pub fn new(kind: ControlMessageType, result: u8) -> Self {
        Self {
            acked: kind as u8,
            result,
        }
    }

    pub fn acks(&self, kind: ControlMessageType) -> bool {
        self.acked == kind as u8
    }
}

/// Factory calibration constants stored on the device.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Eeprom {
    pub r1: f32,
    pub r2: f32,
    pub r3: f32,
    pub low_gain: f32,
    pub low_gain_correction_offset: f32,
    pub low_gain_correction_factor: f32,
    pub sd_sample_rate: u32,
}

impl Eeprom {
    pub const SIZE: usize = 28;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeader {
    pub sequence_number: u32,
    /// Payload length in bytes.
    pub length: u16,
}

impl FrameHeader {
    pub const SIZE: usize = 6;
}

/// One reading from the ADC, both channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSample {
    pub voltage_raw: i16,
    pub current_raw: i16,
}

impl RawSample {
    pub const SIZE: usize = 4;

    pub fn new(voltage_raw: i16, current_raw: i16) -> Self {
        Self {
            voltage_raw,
            current_raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleFrame {
    pub header: FrameHeader,
    pub samples: Vec<RawSample>,
}

impl SampleFrame {
    /// A zero-length frame marks the end of the sample stream.
    pub fn is_terminator(&self) -> bool {
        self.header.length == 0
    }
}
