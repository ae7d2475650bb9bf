//! ABCD bus frame codec.
//!
//! Wire format:
//! ```text
//! dest(2 BE) | src(2 BE) | length(1) | reserved(2) | op(1) | data(length) | crc(2 LE)
//! ```
//!
//! The CRC is CRC-16/XMODEM (CCITT polynomial, zero seed) over every byte
//! preceding the CRC field.

use std::fmt;

/// Fixed header bytes before the payload.
pub const HEADER_LEN: usize = 8;
/// Trailing CRC bytes.
pub const CRC_LEN: usize = 2;
/// The `length` field is a single byte.
pub const MAX_PAYLOAD: usize = 255;

/// Compute the bus CRC over `bytes`.
pub fn crc16(bytes: &[u8]) -> u16 {
    crc16::State::<crc16::XMODEM>::calculate(bytes)
}

/// Frame operation byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    ReadRequest,
    ReadResponse,
    WriteRequest,
    WriteResponse,
    Ack,
    Nack,
    Alarm,
    /// Tolerated but not interpreted; the raw byte is retained.
    Unknown(u8),
}

impl Op {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x0b => Op::ReadRequest,
            0x06 => Op::ReadResponse,
            0x0c => Op::WriteRequest,
            0x0d => Op::WriteResponse,
            0x0e => Op::Ack,
            0x15 => Op::Nack,
            0x1e => Op::Alarm,
            other => Op::Unknown(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Op::ReadRequest => 0x0b,
            Op::ReadResponse => 0x06,
            Op::WriteRequest => 0x0c,
            Op::WriteResponse => 0x0d,
            Op::Ack => 0x0e,
            Op::Nack => 0x15,
            Op::Alarm => 0x1e,
            Op::Unknown(b) => b,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::ReadRequest => write!(f, "READ"),
            Op::ReadResponse => write!(f, "RDRESP"),
            Op::WriteRequest => write!(f, "WRITE"),
            Op::WriteResponse => write!(f, "WRRESP"),
            Op::Ack => write!(f, "ACK"),
            Op::Nack => write!(f, "NACK"),
            Op::Alarm => write!(f, "ALARM"),
            Op::Unknown(b) => write!(f, "OP{b:02x}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("frame too short: have {have}, need {need}")]
    ShortFrame { have: usize, need: usize },

    #[error("crc mismatch: computed {computed:#06x}, received {received:#06x}")]
    BadCrc { computed: u16, received: u16 },
}

/// One on-wire unit. Immutable once constructed; the codec only produces
/// frames whose CRC verified.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub dest: u16,
    pub src: u16,
    /// Header bytes 5–6; always zero in traffic we originate, preserved
    /// verbatim from traffic we parse.
    pub reserved: [u8; 2],
    pub op: Op,
    pub data: Vec<u8>,
}

impl Frame {
    /// Panics if `data` exceeds [`MAX_PAYLOAD`]; the wire `length` field is
    /// a single byte.
    pub fn new(dest: u16, src: u16, op: Op, data: Vec<u8>) -> Self {
        assert!(
            data.len() <= MAX_PAYLOAD,
            "frame payload exceeds {MAX_PAYLOAD} bytes"
        );
        Self {
            dest,
            src,
            reserved: [0x00, 0x00],
            op,
            data,
        }
    }

    /// Serialize to wire bytes, appending the CRC.
    ///
    /// Panics if the payload exceeds [`MAX_PAYLOAD`]; truncating the length
    /// byte would put a corrupt frame on the wire.
    pub fn encode(&self) -> Vec<u8> {
        assert!(
            self.data.len() <= MAX_PAYLOAD,
            "frame payload exceeds {MAX_PAYLOAD} bytes"
        );
        let mut wire = Vec::with_capacity(HEADER_LEN + self.data.len() + CRC_LEN);
        wire.extend_from_slice(&self.dest.to_be_bytes());
        wire.extend_from_slice(&self.src.to_be_bytes());
        wire.push(self.data.len() as u8);
        wire.extend_from_slice(&self.reserved);
        wire.push(self.op.to_byte());
        wire.extend_from_slice(&self.data);
        let crc = crc16(&wire);
        wire.extend_from_slice(&crc.to_le_bytes());
        wire
    }

    /// Parse exactly one complete wire frame.
    pub fn decode(wire: &[u8]) -> Result<Self, ParseError> {
        if wire.len() < HEADER_LEN + CRC_LEN {
            return Err(ParseError::ShortFrame {
                have: wire.len(),
                need: HEADER_LEN + CRC_LEN,
            });
        }

        let need = HEADER_LEN + wire[4] as usize + CRC_LEN;
        if wire.len() != need {
            return Err(ParseError::ShortFrame {
                have: wire.len(),
                need,
            });
        }

        let computed = crc16(&wire[..need - CRC_LEN]);
        let received = u16::from_le_bytes([wire[need - 2], wire[need - 1]]);
        if computed != received {
            return Err(ParseError::BadCrc { computed, received });
        }

        Ok(Frame {
            dest: u16::from_be_bytes([wire[0], wire[1]]),
            src: u16::from_be_bytes([wire[2], wire[3]]),
            reserved: [wire[5], wire[6]],
            op: Op::from_byte(wire[7]),
            data: wire[HEADER_LEN..need - CRC_LEN].to_vec(),
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x} -> {:04x} {} [{}]",
            self.src,
            self.dest,
            self.op,
            hex_string(&self.data)
        )
    }
}

/// Lowercase hex rendering of a byte string, no separators.
pub fn hex_string(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Event produced by the incremental parser.
#[derive(Debug)]
pub enum ParseEvent {
    Frame(Frame),
    /// A CRC failure; one byte was dropped to resynchronize.
    CrcError,
}

/// Incremental frame parser.
///
/// Accepts arbitrary byte chunks and yields complete frames. After a CRC
/// failure it drops a single byte and retries, so line noise shifts the
/// window instead of wedging the decoder.
#[derive(Default)]
pub struct FrameParser {
    buf: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pull the next event out of the buffer, or `None` if a frame is still
    /// incomplete.
    pub fn next_event(&mut self) -> Option<ParseEvent> {
        if self.buf.len() < HEADER_LEN + CRC_LEN {
            return None;
        }

        let need = HEADER_LEN + self.buf[4] as usize + CRC_LEN;
        if self.buf.len() < need {
            return None;
        }

        match Frame::decode(&self.buf[..need]) {
            Ok(frame) => {
                self.buf.drain(..need);
                Some(ParseEvent::Frame(frame))
            }
            Err(_) => {
                self.buf.remove(0);
                Some(ParseEvent::CrcError)
            }
        }
    }

    /// True when no partial frame is buffered, i.e. the line is quiet.
    pub fn is_idle(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        Frame::new(0x2001, 0x3001, Op::ReadRequest, vec![0x00, 0x3b, 0x02])
    }

    #[test]
    fn crc_known_vector() {
        // CRC-16/XMODEM check value
        assert_eq!(crc16(b"123456789"), 0x31c3);
    }

    #[test]
    fn round_trip() {
        let frame = sample_frame();
        let wire = frame.encode();
        let parsed = Frame::decode(&wire).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(parsed.encode(), wire);
    }

    #[test]
    fn round_trip_preserves_reserved_bytes() {
        let mut wire = sample_frame().encode();
        wire[5] = 0xaa;
        wire[6] = 0x55;
        let crc = crc16(&wire[..wire.len() - CRC_LEN]).to_le_bytes();
        let n = wire.len();
        wire[n - 2..].copy_from_slice(&crc);

        let parsed = Frame::decode(&wire).unwrap();
        assert_eq!(parsed.reserved, [0xaa, 0x55]);
        assert_eq!(parsed.encode(), wire);
    }

    #[test]
    fn accepted_frame_has_valid_crc() {
        let wire = sample_frame().encode();
        let body = &wire[..wire.len() - CRC_LEN];
        let tail = u16::from_le_bytes([wire[wire.len() - 2], wire[wire.len() - 1]]);
        assert_eq!(crc16(body), tail);
    }

    #[test]
    fn too_short() {
        assert!(matches!(
            Frame::decode(&[0x20, 0x01, 0x30]),
            Err(ParseError::ShortFrame { .. })
        ));
    }

    #[test]
    fn bad_crc() {
        let mut wire = sample_frame().encode();
        let last = wire.len() - 1;
        wire[last] ^= 0xff;
        assert!(matches!(
            Frame::decode(&wire),
            Err(ParseError::BadCrc { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "payload exceeds")]
    fn oversized_payload_rejected() {
        Frame::new(0x2001, 0x3001, Op::ReadRequest, vec![0; MAX_PAYLOAD + 1]);
    }

    #[test]
    #[should_panic(expected = "payload exceeds")]
    fn oversized_payload_rejected_at_encode() {
        let mut frame = sample_frame();
        frame.data = vec![0; MAX_PAYLOAD + 1];
        frame.encode();
    }

    #[test]
    fn unknown_op_retained() {
        let frame = Frame::new(0x2001, 0x3001, Op::Unknown(0x77), vec![0x01]);
        let parsed = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(parsed.op, Op::Unknown(0x77));
        assert_eq!(parsed.op.to_byte(), 0x77);
    }

    #[test]
    fn parser_chunked_input() {
        let wire = sample_frame().encode();
        let mut parser = FrameParser::new();

        parser.feed(&wire[..5]);
        assert!(parser.next_event().is_none());

        parser.feed(&wire[5..]);
        match parser.next_event() {
            Some(ParseEvent::Frame(f)) => assert_eq!(f, sample_frame()),
            other => panic!("expected frame, got {other:?}"),
        }
        assert!(parser.is_idle());
    }

    #[test]
    fn parser_back_to_back_frames() {
        let a = sample_frame().encode();
        let b = Frame::new(0x3001, 0x2001, Op::ReadResponse, vec![0x00, 0x3b, 0x02, 0x42]).encode();
        let mut wire = a.clone();
        wire.extend_from_slice(&b);

        let mut parser = FrameParser::new();
        parser.feed(&wire);

        let mut frames = Vec::new();
        while let Some(ev) = parser.next_event() {
            match ev {
                ParseEvent::Frame(f) => frames.push(f),
                ParseEvent::CrcError => panic!("unexpected crc error"),
            }
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].data, vec![0x00, 0x3b, 0x02, 0x42]);
    }

    #[test]
    fn parser_resyncs_after_noise_byte() {
        // One inserted noise byte at the head; the misaligned parse fails CRC,
        // the parser drops a single byte, and the real frame decodes cleanly.
        let wire = sample_frame().encode();
        let mut noisy = vec![0xf5];
        noisy.extend_from_slice(&wire);

        let mut parser = FrameParser::new();
        parser.feed(&noisy);

        let mut crc_errors = 0;
        let mut frames = Vec::new();
        while let Some(ev) = parser.next_event() {
            match ev {
                ParseEvent::Frame(f) => frames.push(f),
                ParseEvent::CrcError => crc_errors += 1,
            }
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], sample_frame());
        assert_eq!(crc_errors, 1);
    }

    #[test]
    fn display_form() {
        let s = sample_frame().to_string();
        assert_eq!(s, "3001 -> 2001 READ [003b02]");
    }
}
