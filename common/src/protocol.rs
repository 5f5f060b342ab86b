//! Binary frame codec shared by the oven and the platform.
//!
//! Wire format, all integers little-endian:
//! ```text
//! ┌──────────────┬──────────────────┬─────────────────┬──────────┐
//! │ msg_type (1) │ payload_size (2) │ payload (size)  │ crc (2)  │
//! └──────────────┴──────────────────┴─────────────────┴──────────┘
//! ```
//! The CRC (CRC-16/USB) covers msg_type, payload_size and payload.
//!
//! Command payload: action (u8), temperature (i16), duration (i16).
//! Event payload: state (u8), current_temperature, remaining_time,
//! programmed_duration, programmed_temperature (all i16, -1 when not
//! applicable).

use std::fmt::Write as _;

use thiserror::Error;

use crate::{
    crc::crc16_usb,
    types::{from_wire, to_wire, Action, Command, Event, OvenState},
};

pub const MSG_TYPE_COMMAND: u8 = 0x01;
pub const MSG_TYPE_EVENT: u8 = 0x02;

const HEADER_LEN: usize = 3;
const CRC_LEN: usize = 2;

pub const COMMAND_PAYLOAD_LEN: usize = 5;
pub const EVENT_PAYLOAD_LEN: usize = 9;
pub const COMMAND_FRAME_LEN: usize = HEADER_LEN + COMMAND_PAYLOAD_LEN + CRC_LEN;
pub const EVENT_FRAME_LEN: usize = HEADER_LEN + EVENT_PAYLOAD_LEN + CRC_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame too short: {len} bytes (minimum {min})")]
    TooShort { len: usize, min: usize },
    #[error("invalid message type: 0x{found:02X} (expected 0x{expected:02X})")]
    UnexpectedMessageType { found: u8, expected: u8 },
    #[error("invalid payload size: {found} (expected {expected})")]
    PayloadSize { found: u16, expected: u16 },
    #[error("frame truncated: {len} bytes (expected {expected})")]
    Truncated { len: usize, expected: usize },
    #[error("CRC mismatch: received 0x{received:04X}, calculated 0x{calculated:04X}")]
    CrcMismatch { received: u16, calculated: u16 },
    #[error("buffer too small: {len} bytes (need {needed})")]
    BufferTooSmall { len: usize, needed: usize },
    #[error("unknown oven state code: {0}")]
    UnknownState(u8),
}

/// Validates header and CRC, returning the payload slice.
fn open_frame(data: &[u8], msg_type: u8, payload_len: usize) -> Result<&[u8], FrameError> {
    let min = HEADER_LEN + payload_len + CRC_LEN;
    if data.len() < min {
        return Err(FrameError::TooShort {
            len: data.len(),
            min,
        });
    }

    if data[0] != msg_type {
        return Err(FrameError::UnexpectedMessageType {
            found: data[0],
            expected: msg_type,
        });
    }

    let declared = u16::from_le_bytes([data[1], data[2]]);
    if usize::from(declared) != payload_len {
        return Err(FrameError::PayloadSize {
            found: declared,
            expected: payload_len as u16,
        });
    }

    let expected = HEADER_LEN + usize::from(declared) + CRC_LEN;
    if data.len() < expected {
        return Err(FrameError::Truncated {
            len: data.len(),
            expected,
        });
    }

    let body_end = HEADER_LEN + payload_len;
    let received = u16::from_le_bytes([data[body_end], data[body_end + 1]]);
    let calculated = crc16_usb(&data[..body_end]);
    if received != calculated {
        return Err(FrameError::CrcMismatch {
            received,
            calculated,
        });
    }

    Ok(&data[HEADER_LEN..body_end])
}

/// Checks that `buf` holds a whole frame, then writes it.
fn seal_frame(
    buf: &mut [u8],
    msg_type: u8,
    payload_len: usize,
    fill: impl FnOnce(&mut [u8]),
) -> Result<usize, FrameError> {
    let needed = HEADER_LEN + payload_len + CRC_LEN;
    if buf.len() < needed {
        return Err(FrameError::BufferTooSmall {
            len: buf.len(),
            needed,
        });
    }

    Ok(write_frame(&mut buf[..needed], msg_type, fill))
}

/// Writes the header, lets `fill` write the payload, then appends the CRC.
/// `frame` must be exactly one frame long.
fn write_frame(frame: &mut [u8], msg_type: u8, fill: impl FnOnce(&mut [u8])) -> usize {
    let body_end = frame.len() - CRC_LEN;
    let payload_len = body_end - HEADER_LEN;

    frame[0] = msg_type;
    frame[1..HEADER_LEN].copy_from_slice(&(payload_len as u16).to_le_bytes());
    fill(&mut frame[HEADER_LEN..body_end]);

    let crc = crc16_usb(&frame[..body_end]);
    frame[body_end..].copy_from_slice(&crc.to_le_bytes());

    frame.len()
}

fn write_event_payload(event: &Event, payload: &mut [u8]) {
    payload[0] = event.state.code();
    write_i16(payload, 1, event.current_temperature);
    write_i16(payload, 3, to_wire(event.remaining_time));
    write_i16(payload, 5, to_wire(event.programmed_duration));
    write_i16(payload, 7, to_wire(event.programmed_temperature));
}

fn write_command_payload(command: &Command, payload: &mut [u8]) {
    payload[0] = command.action.code();
    write_i16(payload, 1, command.temperature);
    write_i16(payload, 3, command.duration);
}

fn read_i16(bytes: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn write_i16(bytes: &mut [u8], offset: usize, value: i16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn decode_command(data: &[u8]) -> Result<Command, FrameError> {
    let payload = open_frame(data, MSG_TYPE_COMMAND, COMMAND_PAYLOAD_LEN)?;

    Ok(Command {
        action: Action::from_code(payload[0]),
        temperature: read_i16(payload, 1),
        duration: read_i16(payload, 3),
    })
}

/// Encodes `event` into `buf`, returning the frame length.
pub fn encode_event(event: &Event, buf: &mut [u8]) -> Result<usize, FrameError> {
    seal_frame(buf, MSG_TYPE_EVENT, EVENT_PAYLOAD_LEN, |payload| {
        write_event_payload(event, payload)
    })
}

pub fn encode_command(command: &Command, buf: &mut [u8]) -> Result<usize, FrameError> {
    seal_frame(buf, MSG_TYPE_COMMAND, COMMAND_PAYLOAD_LEN, |payload| {
        write_command_payload(command, payload)
    })
}

pub fn decode_event(data: &[u8]) -> Result<Event, FrameError> {
    let payload = open_frame(data, MSG_TYPE_EVENT, EVENT_PAYLOAD_LEN)?;
    let state = OvenState::from_code(payload[0]).ok_or(FrameError::UnknownState(payload[0]))?;

    Ok(Event {
        state,
        current_temperature: read_i16(payload, 1),
        remaining_time: from_wire(read_i16(payload, 3)),
        programmed_duration: from_wire(read_i16(payload, 5)),
        programmed_temperature: from_wire(read_i16(payload, 7)),
    })
}

pub fn encode_event_frame(event: &Event) -> [u8; EVENT_FRAME_LEN] {
    let mut frame = [0u8; EVENT_FRAME_LEN];
    write_frame(&mut frame, MSG_TYPE_EVENT, |payload| write_event_payload(event, payload));
    frame
}

pub fn encode_command_frame(command: &Command) -> [u8; COMMAND_FRAME_LEN] {
    let mut frame = [0u8; COMMAND_FRAME_LEN];
    write_frame(&mut frame, MSG_TYPE_COMMAND, |payload| write_command_payload(command, payload));
    frame
}

/// Upper-case hex rendering for frame dumps in logs.
pub fn frame_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        let _ = write!(out, "{byte:02X}");
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample_event() -> Event {
        Event {
            state: OvenState::Baking,
            current_temperature: 180,
            remaining_time: Some(42),
            programmed_duration: Some(60),
            programmed_temperature: Some(180),
        }
    }

    #[test]
    fn decodes_valid_command() {
        let frame = encode_command_frame(&Command::start(180, 60));
        assert_eq!(frame.len(), 10);
        assert_eq!(&frame[..8], &[0x01, 0x05, 0x00, 0x01, 0xB4, 0x00, 0x3C, 0x00]);

        let command = decode_command(&frame).unwrap();
        assert_eq!(command, Command::start(180, 60));
    }

    #[test]
    fn decodes_negative_values() {
        let frame = encode_command_frame(&Command::start(-300, -1));
        let command = decode_command(&frame).unwrap();
        assert_eq!(command.temperature, -300);
        assert_eq!(command.duration, -1);
    }

    #[test]
    fn tolerates_trailing_bytes() {
        let mut data = encode_command_frame(&Command::stop()).to_vec();
        data.extend_from_slice(&[0xAA, 0xBB]);
        assert_eq!(decode_command(&data).unwrap(), Command::stop());
    }

    #[test]
    fn rejects_short_input() {
        let frame = encode_command_frame(&Command::stop());
        assert_eq!(
            decode_command(&frame[..9]),
            Err(FrameError::TooShort { len: 9, min: 10 })
        );
        assert_eq!(
            decode_command(&[]),
            Err(FrameError::TooShort { len: 0, min: 10 })
        );
    }

    #[test]
    fn rejects_wrong_message_type() {
        let mut frame = encode_command_frame(&Command::stop());
        frame[0] = MSG_TYPE_EVENT;
        assert_eq!(
            decode_command(&frame),
            Err(FrameError::UnexpectedMessageType {
                found: 0x02,
                expected: 0x01,
            })
        );
    }

    #[test]
    fn rejects_wrong_payload_size() {
        let mut frame = encode_command_frame(&Command::stop());
        frame[1] = 0x06;
        assert_eq!(
            decode_command(&frame),
            Err(FrameError::PayloadSize {
                found: 6,
                expected: 5,
            })
        );
    }

    #[test]
    fn rejects_flipped_crc_bits() {
        let frame = encode_command_frame(&Command::start(200, 90));
        for index in [8, 9] {
            for bit in 0..8 {
                let mut corrupted = frame;
                corrupted[index] ^= 1 << bit;
                assert!(matches!(
                    decode_command(&corrupted),
                    Err(FrameError::CrcMismatch { .. })
                ));
            }
        }
    }

    #[test]
    fn rejects_corrupted_payload() {
        let mut frame = encode_command_frame(&Command::start(200, 90));
        frame[4] ^= 0x10;
        assert!(matches!(
            decode_command(&frame),
            Err(FrameError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn encodes_event_layout() {
        let mut buf = [0u8; 64];
        let len = encode_event(&sample_event(), &mut buf).unwrap();
        assert_eq!(len, EVENT_FRAME_LEN);
        assert_eq!(len, 14);

        assert_eq!(
            &buf[..12],
            &[0x02, 0x09, 0x00, 0x02, 0xB4, 0x00, 0x2A, 0x00, 0x3C, 0x00, 0xB4, 0x00]
        );
        let crc = crc16_usb(&buf[..12]);
        assert_eq!(&buf[12..14], &crc.to_le_bytes());
    }

    #[test]
    fn encodes_absent_fields_as_sentinel() {
        let event = Event {
            state: OvenState::Idle,
            current_temperature: 25,
            remaining_time: None,
            programmed_duration: None,
            programmed_temperature: None,
        };
        let frame = encode_event_frame(&event);
        assert_eq!(&frame[3..12], &[0x00, 0x19, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn rejects_small_destination() {
        let mut buf = [0u8; 13];
        assert_eq!(
            encode_event(&sample_event(), &mut buf),
            Err(FrameError::BufferTooSmall { len: 13, needed: 14 })
        );

        let mut buf = [0u8; 9];
        assert_eq!(
            encode_command(&Command::stop(), &mut buf),
            Err(FrameError::BufferTooSmall { len: 9, needed: 10 })
        );
    }

    #[test]
    fn fixed_size_encoders_match_buffer_encoders() {
        let mut buf = [0u8; 32];
        let len = encode_event(&sample_event(), &mut buf).unwrap();
        assert_eq!(&encode_event_frame(&sample_event())[..], &buf[..len]);

        let command = Command::start(-40, 1200);
        let len = encode_command(&command, &mut buf).unwrap();
        assert_eq!(len, COMMAND_FRAME_LEN);
        assert_eq!(&encode_command_frame(&command)[..], &buf[..len]);
        assert_eq!(decode_command(&encode_command_frame(&command)), Ok(command));
    }

    #[test]
    fn event_round_trip() {
        let frame = encode_event_frame(&sample_event());
        assert_eq!(decode_event(&frame).unwrap(), sample_event());
    }

    #[test]
    fn decode_event_rejects_unknown_state() {
        let mut frame = encode_event_frame(&sample_event());
        frame[3] = 7;
        let crc = crc16_usb(&frame[..12]);
        frame[12..].copy_from_slice(&crc.to_le_bytes());

        assert_eq!(decode_event(&frame), Err(FrameError::UnknownState(7)));
    }

    #[test]
    fn decode_event_rejects_command_frame() {
        let mut data = encode_command_frame(&Command::stop()).to_vec();
        data.resize(EVENT_FRAME_LEN, 0);
        assert_eq!(
            decode_event(&data),
            Err(FrameError::UnexpectedMessageType {
                found: 0x01,
                expected: 0x02,
            })
        );
    }

    #[test]
    fn errors_render_cause() {
        let err = FrameError::CrcMismatch {
            received: 0x1234,
            calculated: 0xABCD,
        };
        assert_eq!(
            err.to_string(),
            "CRC mismatch: received 0x1234, calculated 0xABCD"
        );
    }

    #[test]
    fn hex_dump() {
        assert_eq!(frame_hex(&[0x01, 0xAB, 0x00]), "01AB00");
        assert_eq!(frame_hex(&[]), "");
    }
}
