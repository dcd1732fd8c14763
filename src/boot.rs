//! Boot handshake state
//!
//! The requester sends (config code, protocol version) in a boot-request
//! frame, the responder echoes both in a boot-response. The responder is done
//! once the requester confirms it consumed the response.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{LinkError, Result};
use crate::layout::Side;

/// Protocol version spoken by this implementation
pub const PROTOCOL_VERSION: u32 = 1;

/// Default configuration code
pub const DEFAULT_CONFIG_CODE: u32 = 0;

/// Payload size of boot frames
pub const BOOT_PAYLOAD_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum BootState {
    Init = 0,
    InfoSync = 1,
    Done = 2,
}

impl BootState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => BootState::Init,
            1 => BootState::InfoSync,
            _ => BootState::Done,
        }
    }
}

/// Which end drives the handshake
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Waits for the boot request and echoes it
    Responder,
    /// Raises the wake request and sends the boot request
    Requester,
}

impl Role {
    /// The AP answers, the CP asks
    pub fn for_side(side: Side) -> Self {
        match side {
            Side::Ap => Role::Responder,
            Side::Cp => Role::Requester,
        }
    }
}

/// Boot frame payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootInfo {
    pub config: u32,
    pub version: u32,
}

impl Default for BootInfo {
    fn default() -> Self {
        Self {
            config: DEFAULT_CONFIG_CODE,
            version: PROTOCOL_VERSION,
        }
    }
}

impl BootInfo {
    pub fn encode(&self) -> [u8; BOOT_PAYLOAD_LEN] {
        let mut out = [0u8; BOOT_PAYLOAD_LEN];
        out[..4].copy_from_slice(&self.config.to_ne_bytes());
        out[4..].copy_from_slice(&self.version.to_ne_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != BOOT_PAYLOAD_LEN {
            return Err(LinkError::BadBootPayload { len: bytes.len() });
        }
        let word = |i: usize| u32::from_ne_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Ok(Self {
            config: word(0),
            version: word(4),
        })
    }
}

/// Boot state shared by both FIFO groups
///
/// Written only under the common group lock; read from anywhere.
pub struct BootCell(AtomicU8);

impl BootCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(BootState::Init as u8))
    }

    #[inline]
    pub fn get(&self) -> BootState {
        BootState::from_raw(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.get() == BootState::Done
    }

    /// Move exactly one step forward
    pub fn advance(&self, to: BootState) -> Result<()> {
        let from = self.get();
        if to as u8 != from as u8 + 1 {
            return Err(LinkError::BootOrder { from, to });
        }
        self.0.store(to as u8, Ordering::Release);
        tracing::debug!(?from, ?to, "boot state advanced");
        Ok(())
    }
}

impl Default for BootCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_states_strictly_increase() {
        let cell = BootCell::new();
        assert_eq!(cell.get(), BootState::Init);
        assert!(matches!(
            cell.advance(BootState::Done),
            Err(LinkError::BootOrder {
                from: BootState::Init,
                to: BootState::Done
            })
        ));
        cell.advance(BootState::InfoSync).unwrap();
        assert!(cell.advance(BootState::InfoSync).is_err());
        cell.advance(BootState::Done).unwrap();
        assert!(cell.is_done());
        assert!(cell.advance(BootState::Init).is_err());
    }

    #[test]
    fn test_boot_info_payload() {
        let info = BootInfo {
            config: 0x11,
            version: 7,
        };
        let bytes = info.encode();
        assert_eq!(BootInfo::decode(&bytes).unwrap(), info);
        assert!(matches!(
            BootInfo::decode(&bytes[..5]),
            Err(LinkError::BadBootPayload { len: 5 })
        ));
    }
}
