// src/proto/parser.rs
use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;

use super::message::{
    ControlAck, ControlMessage, Eeprom, FrameHeader, MessageType, RawSample, SampleFrame,
};

/// Checks the transport-reported type and unwraps the payload of a
/// successful read.
pub fn expect_payload(
    expected: MessageType,
    actual: MessageType,
    bytes: Option<&[u8]>,
) -> Result<&[u8], ProtocolError> {
    if actual != expected {
        return Err(ProtocolError::WrongMessageType { expected, actual });
    }
    bytes.ok_or(ProtocolError::MissingPayload)
}

pub fn format_control(msg: &ControlMessage) -> [u8; ControlMessage::SIZE] {
    let mut out = [0u8; ControlMessage::SIZE];
    let mut buf = &mut out[..];
    buf.put_u8(msg.kind as u8);
    buf.put_u16_le(msg.param1);
    buf.put_u16_le(msg.param2);
    out
}

pub fn format_ack(ack: &ControlAck) -> [u8; ControlAck::SIZE] {
    [ack.acked, ack.result]
}

pub fn parse_ack(bytes: &[u8]) -> Result<ControlAck, ProtocolError> {
    check_size("control ack", ControlAck::SIZE, bytes)?;
    let mut buf = bytes;
    Ok(ControlAck {
        acked: buf.get_u8(),
        result: buf.get_u8(),
    })
}

pub fn format_eeprom(eeprom: &Eeprom) -> [u8; Eeprom::SIZE] {
    let mut out = [0u8; Eeprom::SIZE];
    let mut buf = &mut out[..];
    buf.put_f32_le(eeprom.r1);
    buf.put_f32_le(eeprom.r2);
    buf.put_f32_le(eeprom.r3);
    buf.put_f32_le(eeprom.low_gain);
    buf.put_f32_le(eeprom.low_gain_correction_offset);
    buf.put_f32_le(eeprom.low_gain_correction_factor);
    buf.put_u32_le(eeprom.sd_sample_rate);
    out
}

/// Decodes the calibration record. Values that would make sample
/// conversion divide by zero are rejected.
pub fn parse_eeprom(bytes: &[u8]) -> Result<Eeprom, ProtocolError> {
    check_size("EEPROM", Eeprom::SIZE, bytes)?;
    let mut buf = bytes;
    let eeprom = Eeprom {
        r1: buf.get_f32_le(),
        r2: buf.get_f32_le(),
        r3: buf.get_f32_le(),
        low_gain: buf.get_f32_le(),
        low_gain_correction_offset: buf.get_f32_le(),
        low_gain_correction_factor: buf.get_f32_le(),
        sd_sample_rate: buf.get_u32_le(),
    };
    if eeprom.sd_sample_rate == 0 {
        return Err(ProtocolError::InvalidEeprom("sd_sample_rate"));
    }
    for (field, value) in [
        ("r1", eeprom.r1),
        ("r3", eeprom.r3),
        ("low_gain", eeprom.low_gain),
        ("low_gain_correction_factor", eeprom.low_gain_correction_factor),
    ] {
        if value == 0.0 || !value.is_finite() {
            return Err(ProtocolError::InvalidEeprom(field));
        }
    }
    Ok(eeprom)
}

/// Serializes a header plus samples. The header is written as given, so a
/// caller can produce frames whose declared length disagrees with the payload.
pub fn format_sample_frame(header: &FrameHeader, samples: &[RawSample]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(FrameHeader::SIZE + samples.len() * RawSample::SIZE);
    out.put_u32_le(header.sequence_number);
    out.put_u16_le(header.length);
    for s in samples {
        out.put_i16_le(s.voltage_raw);
        out.put_i16_le(s.current_raw);
    }
    out.to_vec()
}

pub fn parse_sample_frame(bytes: &[u8]) -> Result<SampleFrame, ProtocolError> {
    if bytes.len() < FrameHeader::SIZE {
        return Err(ProtocolError::TruncatedHeader(bytes.len()));
    }
    let mut buf = bytes;
    let header = FrameHeader {
        sequence_number: buf.get_u32_le(),
        length: buf.get_u16_le(),
    };
    if header.length as usize != buf.remaining() {
        return Err(ProtocolError::LengthMismatch {
            declared: header.length as usize,
            actual: buf.remaining(),
        });
    }
    if buf.remaining() % RawSample::SIZE != 0 {
        return Err(ProtocolError::PartialSample(buf.remaining()));
    }
    let mut samples = Vec::with_capacity(buf.remaining() / RawSample::SIZE);
    while buf.has_remaining() {
        samples.push(RawSample {
            voltage_raw: buf.get_i16_le(),
            current_raw: buf.get_i16_le(),
        });
    }
    Ok(SampleFrame { header, samples })
}

/* ---------- helpers ---------- */

fn check_size(what: &'static str, expected: usize, bytes: &[u8]) -> Result<(), ProtocolError> {
    if bytes.len() != expected {
        return Err(ProtocolError::BadSize {
            what,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

/* ---------- tests ---------- */

#[cfg(test)]
mod tests {
    use super::super::message::*;
    use super::*;

    #[test]
    fn control_message_layout() {
        let msg = ControlMessage::new(ControlMessageType::ReadEeprom, Eeprom::SIZE as u16, 0x0102);
        assert_eq!(format_control(&msg), [3, 28, 0, 0x02, 0x01]);
    }

    #[test]
    fn parse_ack_fields() {
        let ack = parse_ack(&[ControlMessageType::SetGain as u8, 7]).unwrap();
        assert!(ack.acks(ControlMessageType::SetGain));
        assert!(!ack.acks(ControlMessageType::Init));
        assert_eq!(ack.result, 7);
    }

    #[test]
    fn ack_with_wrong_size_is_rejected() {
        assert!(matches!(
            parse_ack(&[0]),
            Err(ProtocolError::BadSize { expected: 2, actual: 1, .. })
        ));
        assert!(matches!(
            parse_ack(&format_eeprom(&Eeprom::default())),
            Err(ProtocolError::BadSize { actual: 28, .. })
        ));
    }

    #[test]
    fn eeprom_field_order() {
        let eeprom = Eeprom {
            r1: 1.0,
            r2: 2.0,
            r3: 3.0,
            low_gain: 4.0,
            low_gain_correction_offset: 5.0,
            low_gain_correction_factor: 6.0,
            sd_sample_rate: 1000,
        };
        let bytes = format_eeprom(&eeprom);
        assert_eq!(&bytes[16..20], &5.0f32.to_le_bytes());
        assert_eq!(&bytes[24..28], &1000u32.to_le_bytes());
        assert_eq!(parse_eeprom(&bytes).unwrap(), eeprom);
    }

    #[test]
    fn eeprom_rejects_values_that_break_conversion() {
        assert!(matches!(
            parse_eeprom(&format_eeprom(&Eeprom::default())),
            Err(ProtocolError::InvalidEeprom("sd_sample_rate"))
        ));
        let eeprom = Eeprom {
            r1: 1.0,
            r2: 1.0,
            r3: 1.0,
            low_gain: 0.0,
            low_gain_correction_offset: 0.0,
            low_gain_correction_factor: 1.0,
            sd_sample_rate: 1000,
        };
        assert!(matches!(
            parse_eeprom(&format_eeprom(&eeprom)),
            Err(ProtocolError::InvalidEeprom("low_gain"))
        ));
        let eeprom = Eeprom {
            low_gain: 1.0,
            r1: f32::NAN,
            ..eeprom
        };
        assert!(matches!(
            parse_eeprom(&format_eeprom(&eeprom)),
            Err(ProtocolError::InvalidEeprom("r1"))
        ));
    }

    #[test]
    fn sample_frame_layout() {
        let header = FrameHeader {
            sequence_number: 0x0403_0201,
            length: RawSample::SIZE as u16,
        };
        assert_eq!(
            format_sample_frame(&header, &[RawSample::new(-2, 0x0102)]),
            vec![1, 2, 3, 4, 4, 0, 0xFE, 0xFF, 0x02, 0x01]
        );
    }

    #[test]
    fn eeprom_rejects_ack_sized_payload() {
        let ack = format_ack(&ControlAck::new(ControlMessageType::Init, 0));
        assert!(matches!(
            parse_eeprom(&ack),
            Err(ProtocolError::BadSize { what: "EEPROM", .. })
        ));
    }

    #[test]
    fn parse_frame_with_samples() {
        let header = FrameHeader {
            sequence_number: 9,
            length: 2 * RawSample::SIZE as u16,
        };
        let bytes = format_sample_frame(&header, &[RawSample::new(1, -1), RawSample::new(-2048, 2047)]);
        let frame = parse_sample_frame(&bytes).unwrap();
        assert_eq!(frame.header.sequence_number, 9);
        assert_eq!(frame.samples, vec![RawSample::new(1, -1), RawSample::new(-2048, 2047)]);
        assert!(!frame.is_terminator());
    }

    #[test]
    fn empty_frame_is_terminator() {
        let bytes = format_sample_frame(&FrameHeader::default(), &[]);
        let frame = parse_sample_frame(&bytes).unwrap();
        assert!(frame.is_terminator());
        assert!(frame.samples.is_empty());
    }

    #[test]
    fn frame_error_cases() {
        // Header declares one sample, two present
        let header = FrameHeader {
            sequence_number: 0,
            length: RawSample::SIZE as u16,
        };
        let two = [RawSample::new(1, 1), RawSample::new(2, 2)];
        assert!(matches!(
            parse_sample_frame(&format_sample_frame(&header, &two)),
            Err(ProtocolError::LengthMismatch { declared: 4, actual: 8 })
        ));

        // Payload one byte short
        let header = FrameHeader {
            sequence_number: 0,
            length: 2 * RawSample::SIZE as u16,
        };
        let mut bytes = format_sample_frame(&header, &two);
        bytes.pop();
        assert!(matches!(
            parse_sample_frame(&bytes),
            Err(ProtocolError::LengthMismatch { declared: 8, actual: 7 })
        ));

        // Consistent length but not sample-aligned
        let header = FrameHeader {
            sequence_number: 0,
            length: 3,
        };
        let mut bytes = format_sample_frame(&header, &[RawSample::new(1, 1)]);
        bytes.pop();
        assert!(matches!(
            parse_sample_frame(&bytes),
            Err(ProtocolError::PartialSample(3))
        ));

        // Not even a header
        assert!(matches!(
            parse_sample_frame(&[0, 0, 0]),
            Err(ProtocolError::TruncatedHeader(3))
        ));
    }

    #[test]
    fn expect_payload_checks_type_and_presence() {
        let bytes = [1u8, 2];
        assert_eq!(
            expect_payload(MessageType::ControlAck, MessageType::ControlAck, Some(&bytes)).unwrap(),
            &bytes
        );
        assert!(matches!(
            expect_payload(MessageType::Samples, MessageType::ControlAck, Some(&bytes)),
            Err(ProtocolError::WrongMessageType { .. })
        ));
        assert!(matches!(
            expect_payload(MessageType::Samples, MessageType::Samples, None),
            Err(ProtocolError::MissingPayload)
        ));
    }
}
