//! RFC 6455 frame codec.
//!
//! Reads and writes single WebSocket frames over any `Read`/`Write` stream.
//! The server side enforces the client-to-server masking rule, rejects
//! reserved bits and unknown opcodes, and bounds payload size before
//! allocating.

use std::io::{Read, Write};

use bytes::Bytes;

use crate::error::{Result, WsError};

/// Control frame payloads are limited to 125 bytes by the protocol.
const MAX_CONTROL_PAYLOAD: usize = 125;

/// WebSocket frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Decode the 4-bit opcode field. Reserved opcodes map to `None`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Wire value of this opcode.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// Whether this opcode denotes a control frame.
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// A single decoded WebSocket frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Bytes,
}

/// Read one frame from `reader`, enforcing server-side protocol rules.
///
/// Client frames must be masked; the payload is unmasked in place. Control
/// frames must be final and carry at most 125 bytes. Payloads larger than
/// `max_payload` are rejected before any allocation takes place.
pub fn read_frame<R: Read>(reader: &mut R, max_payload: usize) -> Result<Frame> {
    let mut header = [0_u8; 2];
    reader.read_exact(&mut header)?;

    let fin = header[0] & 0x80 != 0;
    if header[0] & 0x70 != 0 {
        return Err(WsError::invalid_frame("reserved bits set"));
    }
    let opcode = OpCode::from_u8(header[0] & 0x0F)
        .ok_or_else(|| WsError::invalid_frame(format!("unknown opcode {:#x}", header[0] & 0x0F)))?;

    let masked = header[1] & 0x80 != 0;
    if !masked {
        return Err(WsError::invalid_frame("client frame is not masked"));
    }

    let len = match header[1] & 0x7F {
        126 => {
            let mut ext = [0_u8; 2];
            reader.read_exact(&mut ext)?;
            u64::from(u16::from_be_bytes(ext))
        }
        127 => {
            let mut ext = [0_u8; 8];
            reader.read_exact(&mut ext)?;
            u64::from_be_bytes(ext)
        }
        n => u64::from(n),
    };

    if opcode.is_control() {
        if !fin {
            return Err(WsError::invalid_frame("fragmented control frame"));
        }
        if len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(WsError::invalid_frame("oversized control frame"));
        }
    }

    if len > max_payload as u64 {
        return Err(WsError::MessageTooLarge {
            size: len as usize,
            max: max_payload,
        });
    }
    let len = len as usize;

    let mut mask = [0_u8; 4];
    reader.read_exact(&mut mask)?;

    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload)?;
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }

    Ok(Frame {
        fin,
        opcode,
        payload: Bytes::from(payload),
    })
}

/// Write one server frame. Server frames are never masked and always final.
pub fn write_frame<W: Write>(writer: &mut W, opcode: OpCode, payload: &[u8]) -> Result<()> {
    let mut header = Vec::with_capacity(10);
    header.push(0x80 | opcode.as_u8());

    let len = payload.len();
    if len <= 125 {
        header.push(len as u8);
    } else if len <= usize::from(u16::MAX) {
        header.push(126);
        header.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        header.push(127);
        header.extend_from_slice(&(len as u64).to_be_bytes());
    }

    writer.write_all(&header)?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Encode a masked client frame the way a browser would.
    fn client_frame(fin: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mask = [0x11_u8, 0x22, 0x33, 0x44];
        let mut out = Vec::new();
        out.push(if fin { 0x80 } else { 0x00 } | opcode);

        let len = payload.len();
        if len <= 125 {
            out.push(0x80 | len as u8);
        } else if len <= usize::from(u16::MAX) {
            out.push(0x80 | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(0x80 | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        out.extend_from_slice(&mask);
        out.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        out
    }

    #[test]
    fn test_read_masked_text_frame() {
        let bytes = client_frame(true, 0x1, b"hello");
        let frame = read_frame(&mut Cursor::new(bytes), 1024).unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(&frame.payload[..], b"hello");
    }

    #[test]
    fn test_read_extended_length() {
        let payload = vec![0xAB_u8; 300];
        let bytes = client_frame(true, 0x2, &payload);
        let frame = read_frame(&mut Cursor::new(bytes), 1024).unwrap();
        assert_eq!(frame.opcode, OpCode::Binary);
        assert_eq!(frame.payload.len(), 300);
        assert!(frame.payload.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_unmasked_frame_rejected() {
        // Unmasked text frame "hi".
        let bytes = vec![0x81, 0x02, b'h', b'i'];
        let err = read_frame(&mut Cursor::new(bytes), 1024).unwrap_err();
        assert!(matches!(err, WsError::InvalidFrame(_)));
    }

    #[test]
    fn test_reserved_bits_rejected() {
        let mut bytes = client_frame(true, 0x1, b"x");
        bytes[0] |= 0x40;
        let err = read_frame(&mut Cursor::new(bytes), 1024).unwrap_err();
        assert!(matches!(err, WsError::InvalidFrame(_)));
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let bytes = client_frame(true, 0x3, b"");
        let err = read_frame(&mut Cursor::new(bytes), 1024).unwrap_err();
        assert!(matches!(err, WsError::InvalidFrame(_)));
    }

    #[test]
    fn test_fragmented_control_frame_rejected() {
        let bytes = client_frame(false, 0x9, b"ping");
        let err = read_frame(&mut Cursor::new(bytes), 1024).unwrap_err();
        assert!(matches!(err, WsError::InvalidFrame(_)));
    }

    #[test]
    fn test_oversized_payload_rejected_before_read() {
        let bytes = client_frame(true, 0x2, &vec![0_u8; 200]);
        let err = read_frame(&mut Cursor::new(bytes), 100).unwrap_err();
        assert!(matches!(
            err,
            WsError::MessageTooLarge { size: 200, max: 100 }
        ));
    }

    #[test]
    fn test_write_server_frame_unmasked() {
        let mut out = Vec::new();
        write_frame(&mut out, OpCode::Text, b"hey").unwrap();
        assert_eq!(out, vec![0x81, 0x03, b'h', b'e', b'y']);
    }

    #[test]
    fn test_write_extended_length_header() {
        let mut out = Vec::new();
        write_frame(&mut out, OpCode::Binary, &vec![0_u8; 200]).unwrap();
        assert_eq!(out[0], 0x82);
        assert_eq!(out[1], 126);
        assert_eq!(u16::from_be_bytes([out[2], out[3]]), 200);
    }
}
