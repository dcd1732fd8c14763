//! Link configuration

use std::time::Duration;

use crate::boot::{BootInfo, Role};
use crate::error::{LinkError, Result};
use crate::layout::Group;
use crate::region::WORD_SIZE;

/// Default common FIFO size per direction (128KB)
pub const DEFAULT_COMMON_FIFO_SIZE: usize = 128 * 1024;

/// Default audio FIFO size per direction (4KB)
pub const DEFAULT_AUDIO_FIFO_SIZE: usize = 4 * 1024;

/// Default idle timeout before both paths of a group go to sleep
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(100);

/// Smallest FIFO able to hold a header pair plus one payload word
pub const MIN_FIFO_SIZE: usize = 4 * WORD_SIZE;

/// Largest FIFO whose lengths always fit the 20-bit header fields
pub const MAX_FIFO_SIZE: usize = 1 << 20;

/// Link configuration
#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// Size of each common FIFO in bytes
    pub common_fifo_size: usize,
    /// Size of each audio FIFO in bytes
    pub audio_fifo_size: usize,
    /// How long both paths of a group must stay idle before sleeping
    pub idle_timeout: Duration,
    /// Configuration code and protocol version exchanged at boot
    pub boot: BootInfo,
    /// Boot role; derived from the side when unset
    pub role: Option<Role>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            common_fifo_size: DEFAULT_COMMON_FIFO_SIZE,
            audio_fifo_size: DEFAULT_AUDIO_FIFO_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            boot: BootInfo::default(),
            role: None,
        }
    }
}

impl LinkConfig {
    /// FIFO size in bytes for a group
    pub fn fifo_size(&self, group: Group) -> usize {
        match group {
            Group::Common => self.common_fifo_size,
            Group::Audio => self.audio_fifo_size,
        }
    }

    /// Reject FIFO sizes the framing cannot describe
    pub fn validate(&self) -> Result<()> {
        for group in Group::ALL {
            let bytes = self.fifo_size(group);
            if bytes % WORD_SIZE != 0 || !(MIN_FIFO_SIZE..=MAX_FIFO_SIZE).contains(&bytes) {
                return Err(LinkError::InvalidFifoSize {
                    bytes,
                    min: MIN_FIFO_SIZE,
                    max: MAX_FIFO_SIZE,
                });
            }
        }
        Ok(())
    }
}
