//! Fixed placement of the FIFOs inside the shared region
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Pointer block: per FIFO, read word | write   │
//! │ word, each on its own 64-byte line           │
//! ├──────────────────────────────────────────────┤
//! │ common AP→CP data                            │
//! ├──────────────────────────────────────────────┤
//! │ common CP→AP data                            │
//! ├──────────────────────────────────────────────┤
//! │ audio AP→CP data                             │
//! ├──────────────────────────────────────────────┤
//! │ audio CP→AP data                             │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! All offsets are in words.

use crate::config::LinkConfig;
use crate::region::WORD_SIZE;

/// Cache line size
const CACHE_LINE_SIZE: usize = 64;

const CACHE_LINE_WORDS: usize = CACHE_LINE_SIZE / WORD_SIZE;

/// FIFO group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Group {
    /// Signaling, RPC and security traffic
    Common,
    /// Audio control traffic
    Audio,
}

impl Group {
    pub const ALL: [Group; 2] = [Group::Common, Group::Audio];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Group::Common => 0,
            Group::Audio => 1,
        }
    }
}

/// Which processor a link end runs on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Ap,
    Cp,
}

impl Side {
    /// Direction this side produces into
    pub fn tx_direction(self) -> Direction {
        match self {
            Side::Ap => Direction::ApToCp,
            Side::Cp => Direction::CpToAp,
        }
    }

    /// Direction this side consumes from
    pub fn rx_direction(self) -> Direction {
        match self {
            Side::Ap => Direction::CpToAp,
            Side::Cp => Direction::ApToCp,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    ApToCp,
    CpToAp,
}

/// Placement of one FIFO
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FifoGeometry {
    /// First data word
    pub base: usize,
    /// Data area size in words
    pub capacity: u32,
    /// Shared read-offset word, owned by the consumer
    pub read_word: usize,
    /// Shared write-offset word, owned by the producer
    pub write_word: usize,
}

/// Placement of all four FIFOs
#[derive(Clone, Debug)]
pub struct Layout {
    fifos: [FifoGeometry; 4],
    total_words: usize,
}

fn slot(group: Group, direction: Direction) -> usize {
    let dir = match direction {
        Direction::ApToCp => 0,
        Direction::CpToAp => 1,
    };
    group.index() * 2 + dir
}

fn align_words(words: usize) -> usize {
    (words + CACHE_LINE_WORDS - 1) & !(CACHE_LINE_WORDS - 1)
}

impl Layout {
    /// Compute the layout for a validated configuration
    pub fn new(config: &LinkConfig) -> Self {
        let pointer_block = 4 * 2 * CACHE_LINE_WORDS;
        let mut next = pointer_block;
        let mut fifos = [FifoGeometry {
            base: 0,
            capacity: 0,
            read_word: 0,
            write_word: 0,
        }; 4];

        for group in Group::ALL {
            for direction in [Direction::ApToCp, Direction::CpToAp] {
                let i = slot(group, direction);
                let capacity = config.fifo_size(group) / WORD_SIZE;
                fifos[i] = FifoGeometry {
                    base: next,
                    capacity: capacity as u32,
                    read_word: i * 2 * CACHE_LINE_WORDS,
                    write_word: (i * 2 + 1) * CACHE_LINE_WORDS,
                };
                next += align_words(capacity);
            }
        }

        Self {
            fifos,
            total_words: next,
        }
    }

    pub fn fifo(&self, group: Group, direction: Direction) -> FifoGeometry {
        self.fifos[slot(group, direction)]
    }

    /// Bytes the region must provide
    pub fn size(&self) -> usize {
        self.total_words * WORD_SIZE
    }
}
