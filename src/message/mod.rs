//! Wire codec for the battery's register protocol.
//!
//! Commands and responses travel as short frames over a pair of GATT
//! characteristics. Everything except the head and trailer is scrambled
//! byte-by-byte through a fixed substitution cipher. A response frame
//! looks like:
//!
//! | bytes          | content                                         |
//! |----------------|-------------------------------------------------|
//! | `0..4`         | head, raw device/command marker (not decoded)   |
//! | `4..6`         | register id, scrambled                          |
//! | `6..len-2`     | value, scrambled, 2, 4 or 6 bytes               |
//! | `len-2..len`   | trailer, raw, `14 13` when the frame is good    |

mod scramble;

pub use scramble::{decode_integer, descramble, encode_integer};

/// Fixed preamble of every command frame.
pub const COMMAND_HEAD: [u8; 4] = [0x32, 0x4B, 0x28, 0x2F];

/// Trailer of a well-formed response frame.
pub const RESPONSE_TAIL: [u8; 2] = [0x14, 0x13];

/// Errors produced while decoding scrambled messages.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    /// A scrambled byte was not one of the 16 substitution-table entries.
    #[error("byte {0:#04x} is not a valid cipher byte")]
    InvalidCipherByte(u8),
    /// A response buffer was shorter than the minimal 8-byte frame.
    #[error("response frame too short: {0} bytes")]
    FrameTooShort(usize),
    /// A scrambled field must hold a whole number of nibble pairs.
    #[error("scrambled field has odd length {0}")]
    OddLengthInput(usize),
}

/// One decoded response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw 4-byte device/command marker, kept as received.
    pub head: [u8; 4],
    /// Register id the value belongs to.
    pub register: u8,
    /// Decoded register value.
    pub value: u64,
    /// Packed value bytes the frame carried (1 to 3 on a healthy link).
    pub payload_len: usize,
    /// Raw trailer bytes.
    pub tail: [u8; 2],
}

impl Frame {
    /// Split a raw notification buffer and descramble its fields.
    pub fn decode(raw: &[u8]) -> Result<Self, MessageError> {
        if raw.len() < 8 {
            return Err(MessageError::FrameTooShort(raw.len()));
        }
        let value_field = &raw[6..raw.len() - 2];
        Ok(Self {
            head: [raw[0], raw[1], raw[2], raw[3]],
            register: decode_integer(&raw[4..6])? as u8,
            value: decode_integer(value_field)?,
            payload_len: value_field.len() / 2,
            tail: [raw[raw.len() - 2], raw[raw.len() - 1]],
        })
    }

    /// Whether the trailer marks this frame as good. A frame failing this
    /// check must be discarded whole, never partially applied.
    pub fn is_valid(&self) -> bool {
        self.tail == RESPONSE_TAIL
    }
}

/// Build the 8-byte command frame asking the battery to report one register.
///
/// `payload_len` tells the device how many packed value bytes to answer
/// with: the catalog's declared length for named registers, 2 for the
/// cell-voltage registers.
pub fn read_command(register: u8, payload_len: u8) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.extend_from_slice(&COMMAND_HEAD);
    frame.extend_from_slice(&encode_integer(u64::from(register)));
    frame.extend_from_slice(&encode_integer(u64::from(payload_len)));
    frame
}

#[test]
fn test_decode_soc_response() {
    // Regression fixture from observed traffic: state of charge at 89%.
    let raw = hex::decode("324b5d35295d2c201413").unwrap();
    let frame = Frame::decode(&raw).unwrap();
    assert!(frame.is_valid());
    assert_eq!(frame.head, [0x32, 0x4B, 0x5D, 0x35]);
    assert_eq!(frame.register, 13);
    assert_eq!(frame.value, 89);
    assert_eq!(frame.payload_len, 1);
}

#[test]
fn test_decode_voltage_response() {
    // 13277mv pack voltage, two packed bytes.
    let raw = hex::decode("324b5d3529205d5d2a2a1413").unwrap();
    let frame = Frame::decode(&raw).unwrap();
    assert!(frame.is_valid());
    assert_eq!(frame.register, 9);
    assert_eq!(frame.value, 13277);
    assert_eq!(frame.payload_len, 2);
}

#[test]
fn test_decode_current_response() {
    // A small discharge current: 65516 in the folded 16-bit encoding.
    let raw = hex::decode("324b5d3529585c5a5f5f1413").unwrap();
    let frame = Frame::decode(&raw).unwrap();
    assert!(frame.is_valid());
    assert_eq!(frame.register, 10);
    assert_eq!(frame.value, 65516);
}

#[test]
fn test_decode_rejects_short_frame() {
    assert_eq!(
        Frame::decode(&[0x32, 0x4B]),
        Err(MessageError::FrameTooShort(2))
    );
}

#[test]
fn test_bad_trailer_invalidates_frame() {
    let raw = hex::decode("324b5d35295d2c201414").unwrap();
    let frame = Frame::decode(&raw).unwrap();
    assert!(!frame.is_valid());
}

#[test]
fn test_read_command_layout() {
    assert_eq!(
        read_command(13, 1),
        hex::decode("324b282f295d2928").unwrap()
    );
    assert_eq!(
        read_command(63, 2),
        hex::decode("324b282f2a5f292b").unwrap()
    );
}
