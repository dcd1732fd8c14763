//! Two-level frame headers
//!
//! Every frame is an L1 word, an L2 word and the payload padded to a word
//! boundary. Both headers use platform-native endianness.
//!
//! ```text
//! L1: [31:28] frame type | [27:20] sequence | [19:0] following bytes (payload + 4)
//! L2: [31:24] channel    | [23:20] zero     | [19:0] payload bytes
//! ```

use crate::region::WORD_SIZE;

/// Words taken by the L1 and L2 headers
pub const HEADER_WORDS: u32 = 2;

/// Length field mask shared by both headers
pub const LEN_MASK: u32 = 0x000F_FFFF;

/// Frame type carried in the L1 header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    BootRequest = 1,
    BootResponse = 2,
    Data = 3,
}

impl FrameType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(FrameType::BootRequest),
            2 => Some(FrameType::BootResponse),
            3 => Some(FrameType::Data),
            _ => None,
        }
    }
}

/// First framing word
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct L1Header {
    /// Raw type nibble; unknown values are kept so they can be reported
    pub kind: u8,
    pub seq: u8,
    /// Bytes following the L1 word (L2 header + payload, unpadded)
    pub len: u32,
}

impl L1Header {
    pub fn new(frame_type: FrameType, seq: u8, payload_len: usize) -> Self {
        Self {
            kind: frame_type as u8,
            seq,
            len: payload_len as u32 + WORD_SIZE as u32,
        }
    }

    #[inline]
    pub fn encode(&self) -> u32 {
        ((self.kind as u32 & 0xF) << 28) | ((self.seq as u32) << 20) | (self.len & LEN_MASK)
    }

    #[inline]
    pub fn decode(word: u32) -> Self {
        Self {
            kind: (word >> 28) as u8,
            seq: ((word >> 20) & 0xFF) as u8,
            len: word & LEN_MASK,
        }
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_raw(self.kind)
    }
}

/// Second framing word
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct L2Header {
    pub channel: u8,
    pub len: u32,
}

impl L2Header {
    pub fn new(channel: u8, payload_len: usize) -> Self {
        Self {
            channel,
            len: payload_len as u32,
        }
    }

    #[inline]
    pub fn encode(&self) -> u32 {
        ((self.channel as u32) << 24) | (self.len & LEN_MASK)
    }

    #[inline]
    pub fn decode(word: u32) -> Self {
        Self {
            channel: (word >> 24) as u8,
            len: word & LEN_MASK,
        }
    }
}

/// Words needed to carry a payload of `len` bytes including both headers
#[inline]
pub fn required_words(len: usize) -> u32 {
    HEADER_WORDS + payload_words(len)
}

/// Words needed for a payload of `len` bytes
#[inline]
pub fn payload_words(len: usize) -> u32 {
    ((len + WORD_SIZE - 1) / WORD_SIZE) as u32
}
