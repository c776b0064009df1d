use crate::error::FrameError;
use crate::proto::MessageType;

pub const START: u8 = 0x00;
pub const END: u8 = 0x01;
pub const ESCAPE: u8 = 0x02;

fn is_control(b: u8) -> bool {
    matches!(b, START | END | ESCAPE)
}

/// Wraps one typed message as `START type payload.. END`, escaping any
/// payload byte that collides with a control byte. The type byte is
/// positional and never escaped.
pub fn encode_packet(kind: MessageType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 3);
    out.push(START);
    out.push(kind as u8);
    for &b in payload {
        if is_control(b) {
            out.push(ESCAPE);
        }
        out.push(b);
    }
    out.push(END);
    out
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum State {
    #[default]
    Idle,
    Type,
    Body,
    Escaped,
}

/// Incremental decoder fed one byte at a time from the serial port.
/// Bytes before a start byte are discarded.
#[derive(Debug, Default)]
pub struct PacketDecoder {
    state: State,
    kind: u8,
    buf: Vec<u8>,
}

impl PacketDecoder {
    pub fn push(&mut self, b: u8) -> Option<Result<(MessageType, Vec<u8>), FrameError>> {
        match self.state {
            State::Idle => {
                if b == START {
                    self.buf.clear();
                    self.state = State::Type;
                }
                None
            }
            State::Type => {
                self.kind = b;
                self.state = State::Body;
                None
            }
            State::Escaped => {
                self.buf.push(b);
                self.state = State::Body;
                None
            }
            State::Body => match b {
                ESCAPE => {
                    self.state = State::Escaped;
                    None
                }
                END => {
                    self.state = State::Idle;
                    let payload = std::mem::take(&mut self.buf);
                    Some(
                        MessageType::try_from(self.kind)
                            .map(|kind| (kind, payload))
                            .map_err(FrameError::from),
                    )
                }
                START => {
                    // Start of a new packet while one is open: report and resync on it.
                    self.buf.clear();
                    self.state = State::Type;
                    Some(Err(FrameError::StrayControlByte(START)))
                }
                _ => {
                    self.buf.push(b);
                    None
                }
            },
        }
    }

    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.buf.clear();
    }
}
