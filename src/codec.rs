/*!
 * Framing of the serial protocol between host and adapter firmware.
 *
 * Every frame starts with [MSG_START] and runs until the next [MSG_START].
 * Payload bytes that collide with the two reserved values are escaped as
 * `MSG_ESC, byte ^ ESC_OFFSET`. The first payload byte of a frame is an
 * [AdapterMessageCode].
 */

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Frame boundary on the wire.
pub const MSG_START: u8 = 0xFF;
/// Escape prefix for payload bytes equal to [MSG_START] or [MSG_ESC].
pub const MSG_ESC: u8 = 0xFD;
/// XORed onto an escaped byte.
pub const ESC_OFFSET: u8 = 0xEC;

/// Message codes of the adapter firmware (revision 1).
///
/// `Ping` through `Transmit` go host → adapter. The rest come back:
/// `FrameData`/`FrameEom` carry a CEC message one byte per frame, the
/// others answer the most recent host command.
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Clone, Copy)]
#[repr(u8)]
pub enum AdapterMessageCode {
    /// Liveness probe, answered with [AdapterMessageCode::CommandAccepted].
    Ping = 0x01,
    /// Drop to the bootloader for flashing. The link is unusable afterwards
    /// until the device is re-plugged.
    StartBootloader = 0x02,
    /// Program which logical addresses the firmware acks on the bus.
    /// __Payload:__ 16-bit mask, low byte first.
    SetAckMask = 0x03,
    /// Put a CEC frame on the bus.
    /// __Payload:__ the raw CEC bytes.
    Transmit = 0x04,

    /// One byte of an incoming CEC frame.
    FrameData = 0x10,
    /// The CEC frame is complete.
    FrameEom = 0x11,
    /// The firmware took the last host command.
    CommandAccepted = 0x20,
    /// The firmware refused the last host command.
    CommandRejected = 0x21,
    /// The destination acked a transmitted CEC frame.
    TransmitAck = 0x22,
    /// No ack from the destination, or the bus was lost.
    TransmitFailed = 0x23,
}

/// Append `byte` to `dst`, escaping it if it collides with a reserved value.
pub fn escape_into(dst: &mut Vec<u8>, byte: u8) {
    if byte == MSG_START || byte == MSG_ESC {
        dst.push(MSG_ESC);
        dst.push(byte ^ ESC_OFFSET);
    } else {
        dst.push(byte);
    }
}

/// What [FrameDecoder::consume_byte] found.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum FrameEvent {
    /// A payload byte, already unescaped.
    Byte(u8),
    /// The frame is complete. May fire with nothing accumulated
    /// (back-to-back start bytes); callers skip empty frames.
    Complete,
    /// A start byte arrived in the middle of an escape sequence.
    /// Whatever was accumulated belongs to no valid frame.
    Invalid,
}

#[derive(Debug, Clone, Copy, Default)]
enum State {
    /// waiting for the first start byte
    #[default]
    Idle,
    InFrame,
    /// the next byte is escaped
    EscapeNext,
}

/// Reassembles adapter frames from the raw serial byte stream.
///
/// The caller owns the payload buffer: it appends on [FrameEvent::Byte]
/// and takes the buffer on [FrameEvent::Complete].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    state: State,
}

impl FrameDecoder {
    pub fn new() -> FrameDecoder {
        FrameDecoder::default()
    }

    pub fn consume_byte(&mut self, byte: u8) -> Option<FrameEvent> {
        match (self.state, byte) {
            (State::Idle, MSG_START) => {
                self.state = State::InFrame;
                None
            }
            // noise between frames
            (State::Idle, _) => None,
            (State::InFrame, MSG_START) => Some(FrameEvent::Complete),
            (State::InFrame, MSG_ESC) => {
                self.state = State::EscapeNext;
                None
            }
            (State::InFrame, b) => Some(FrameEvent::Byte(b)),
            (State::EscapeNext, MSG_START) => {
                self.state = State::InFrame;
                Some(FrameEvent::Invalid)
            }
            (State::EscapeNext, b) => {
                self.state = State::InFrame;
                Some(FrameEvent::Byte(b ^ ESC_OFFSET))
            }
        }
    }
}
