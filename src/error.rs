//! Error types for the modem link

use std::io;
use thiserror::Error;

use crate::boot::{BootInfo, BootState, Role};
use crate::frame::FrameType;

/// Result type for link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors that can occur on a link
#[derive(Debug, Error)]
pub enum LinkError {
    /// Failed to create shared memory
    #[error("Failed to create shared memory '{name}': {source}")]
    ShmCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to open shared memory
    #[error("Failed to open shared memory '{name}': {source}")]
    ShmOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to map memory
    #[error("Failed to map memory: {0}")]
    Mmap(#[source] io::Error),

    /// Failed to truncate shared memory
    #[error("Failed to set shared memory size: {0}")]
    Truncate(#[source] io::Error),

    /// Namespace too long
    #[error("Namespace too long: max {max} chars, got {got}")]
    NamespaceTooLong { max: usize, got: usize },

    /// Region cannot hold the FIFO layout
    #[error("Shared region too small: need {needed} bytes, got {got} bytes")]
    RegionTooSmall { needed: usize, got: usize },

    /// FIFO size rejected by configuration
    #[error("Invalid FIFO size {bytes} bytes: must be a multiple of 4 between {min} and {max}")]
    InvalidFifoSize { bytes: usize, min: usize, max: usize },

    /// Ordinary traffic attempted before the boot handshake completed
    #[error("Link not ready: boot state is {0:?}")]
    NotReady(BootState),

    /// Frame does not fit in the free space of the FIFO
    #[error("FIFO overflow: frame needs {required} words, {available} available")]
    Overflow { required: u32, available: u32 },

    /// L1 header carried an unexpected frame type
    #[error("Unexpected frame type: expected {expected:?}, got {got}")]
    UnexpectedFrame { expected: FrameType, got: u8 },

    /// L1 and L2 headers disagree on the payload length
    #[error("Frame length mismatch: L1 says {l1} bytes, L2 says {l2} bytes")]
    LengthMismatch { l1: u32, l2: u32 },

    /// Word access or peer offset outside the region/FIFO
    #[error("Offset {index} out of bounds (limit {limit})")]
    OutOfBounds { index: usize, limit: usize },

    /// Boot response did not echo the request
    #[error("Boot echo mismatch: sent {sent:?}, peer answered {echoed:?}")]
    BootMismatch { sent: BootInfo, echoed: BootInfo },

    /// Boot frame payload has the wrong size
    #[error("Malformed boot payload: {len} bytes")]
    BadBootPayload { len: usize },

    /// Boot state machine asked to move backwards or skip a state
    #[error("Out-of-order boot transition {from:?} -> {to:?}")]
    BootOrder { from: BootState, to: BootState },

    /// Operation reserved for the other boot role
    #[error("Operation not available to the {0:?} role")]
    WrongRole(Role),

    /// Failed to start a deferred-work thread
    #[error("Failed to spawn worker: {0}")]
    Worker(#[source] io::Error),

    /// Link was shut down by an earlier fatal error
    #[error("Link aborted after a fatal error")]
    Aborted,
}

impl LinkError {
    /// Whether the error means both cores have lost agreement on the FIFO
    /// layout. The link cannot continue after one of these.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LinkError::Overflow { .. }
                | LinkError::UnexpectedFrame { .. }
                | LinkError::LengthMismatch { .. }
                | LinkError::OutOfBounds { .. }
                | LinkError::BootMismatch { .. }
                | LinkError::BadBootPayload { .. }
                | LinkError::BootOrder { .. }
                | LinkError::Aborted
        )
    }
}
