//! Ring buffer engine
//!
//! A [`Fifo`] is one side's view of one circular word buffer: the producer
//! owns the write offset, the consumer owns the read offset, and each keeps a
//! copy of the other's offset as last seen in the pointer-exchange words.
//! Offsets are word indices in `0..capacity`; wraparound is modulo capacity.
//!
//! A frame never fills the buffer completely (`required < available`), so
//! `read == write` always means empty.

use crate::error::{LinkError, Result};
use crate::frame::{payload_words, required_words, FrameType, L1Header, L2Header, LEN_MASK};
use crate::layout::FifoGeometry;
use crate::region::{SharedRegion, WORD_SIZE};

/// Result of pulling one frame out of a FIFO
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dequeued {
    pub channel: u8,
    pub seq: u8,
    /// Payload bytes copied into the caller's buffer
    pub len: usize,
    /// Whether more frames are already buffered behind this one
    pub more: bool,
}

/// FIFO descriptor
#[derive(Clone, Debug)]
pub struct Fifo {
    geometry: FifoGeometry,
    write: u32,
    read: u32,
    shared: u32,
    available: u32,
}

impl Fifo {
    pub fn new(geometry: FifoGeometry) -> Self {
        Self {
            geometry,
            write: 0,
            read: 0,
            shared: 0,
            available: geometry.capacity,
        }
    }

    /// Forget all offsets
    pub fn reset(&mut self) {
        self.write = 0;
        self.read = 0;
        self.shared = 0;
        self.available = self.geometry.capacity;
    }

    #[inline]
    pub fn geometry(&self) -> &FifoGeometry {
        &self.geometry
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.geometry.capacity
    }

    #[inline]
    pub fn write_offset(&self) -> u32 {
        self.write
    }

    #[inline]
    pub fn read_offset(&self) -> u32 {
        self.read
    }

    /// Last peer offset read from the pointer-exchange words
    #[inline]
    pub fn shared_offset(&self) -> u32 {
        self.shared
    }

    /// Free words
    #[inline]
    pub fn available(&self) -> u32 {
        self.available
    }

    /// Words between read and write
    #[inline]
    pub fn occupied(&self) -> u32 {
        let cap = self.capacity();
        (self.write + cap - self.read) % cap
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    #[inline]
    fn advance(&self, offset: u32, words: u32) -> u32 {
        ((offset as u64 + words as u64) % self.capacity() as u64) as u32
    }

    #[inline]
    fn index(&self, offset: u32) -> usize {
        self.geometry.base + offset as usize
    }

    /// Frame `bytes` and place them at the local write offset
    ///
    /// Returns the number of words consumed. Fails without touching any state
    /// if the frame does not fit. The peer is not notified.
    pub fn enqueue(
        &mut self,
        region: &SharedRegion,
        frame_type: FrameType,
        seq: u8,
        channel: u8,
        bytes: &[u8],
    ) -> Result<u32> {
        if bytes.len() + WORD_SIZE > LEN_MASK as usize {
            return Err(LinkError::Overflow {
                required: u32::MAX,
                available: self.available,
            });
        }
        let required = required_words(bytes.len());
        if required >= self.available {
            return Err(LinkError::Overflow {
                required,
                available: self.available,
            });
        }

        let start = self.write;
        let l1 = L1Header::new(frame_type, seq, bytes.len());
        let l2 = L2Header::new(channel, bytes.len());
        region.write_word(self.index(start), l1.encode())?;
        region.write_word(self.index(self.advance(start, 1)), l2.encode())?;
        self.write_payload(region, self.advance(start, 2), bytes)?;

        self.write = self.advance(start, required);
        self.available -= required;
        debug_assert_eq!(self.available + self.occupied(), self.capacity());

        tracing::trace!(
            ?frame_type,
            seq,
            channel,
            len = bytes.len(),
            write = self.write,
            available = self.available,
            "frame enqueued"
        );
        Ok(required)
    }

    fn write_payload(&self, region: &SharedRegion, start: u32, bytes: &[u8]) -> Result<()> {
        let words = payload_words(bytes.len());
        let contiguous = self.capacity() - start;
        if words <= contiguous {
            region.write_bytes(self.index(start), bytes)
        } else {
            let split = contiguous as usize * WORD_SIZE;
            region.write_bytes(self.index(start), &bytes[..split])?;
            region.write_bytes(self.geometry.base, &bytes[split..])
        }
    }

    fn read_payload(&self, region: &SharedRegion, start: u32, out: &mut [u8]) -> Result<()> {
        let words = payload_words(out.len());
        let contiguous = self.capacity() - start;
        if words <= contiguous {
            region.read_bytes(self.index(start), out)
        } else {
            let split = contiguous as usize * WORD_SIZE;
            let (head, tail) = out.split_at_mut(split);
            region.read_bytes(self.index(start), head)?;
            region.read_bytes(self.geometry.base, tail)
        }
    }

    /// Pull the frame at the local read offset into `out`
    ///
    /// Returns `None` when the FIFO is empty. A frame whose type is not
    /// `expected` is fatal.
    pub fn dequeue(
        &mut self,
        region: &SharedRegion,
        expected: FrameType,
        out: &mut [u8],
    ) -> Result<Option<Dequeued>> {
        if self.is_empty() {
            return Ok(None);
        }

        let start = self.read;
        let l1 = L1Header::decode(region.read_word(self.index(start))?);
        if l1.frame_type() != Some(expected) {
            return Err(LinkError::UnexpectedFrame {
                expected,
                got: l1.kind,
            });
        }
        let l2 = L2Header::decode(region.read_word(self.index(self.advance(start, 1)))?);
        if l1.len != l2.len + WORD_SIZE as u32 {
            return Err(LinkError::LengthMismatch {
                l1: l1.len,
                l2: l2.len,
            });
        }

        let len = l2.len as usize;
        let required = required_words(len);
        if required > self.occupied() {
            return Err(LinkError::OutOfBounds {
                index: required as usize,
                limit: self.occupied() as usize,
            });
        }
        if len > out.len() {
            return Err(LinkError::OutOfBounds {
                index: len,
                limit: out.len(),
            });
        }

        self.read_payload(region, self.advance(start, 2), &mut out[..len])?;
        self.read = self.advance(start, required);
        self.available = self.capacity() - self.occupied();

        tracing::trace!(
            channel = l2.channel,
            seq = l1.seq,
            len,
            read = self.read,
            "frame dequeued"
        );
        Ok(Some(Dequeued {
            channel: l2.channel,
            seq: l1.seq,
            len,
            more: !self.is_empty(),
        }))
    }

    fn load_peer(&self, region: &SharedRegion, word: usize) -> Result<u32> {
        let offset = region.load(word)?;
        if offset >= self.capacity() {
            return Err(LinkError::OutOfBounds {
                index: offset as usize,
                limit: self.capacity() as usize,
            });
        }
        Ok(offset)
    }

    /// Producer side: pick up the consumer's read offset and reclaim space
    ///
    /// Returns the number of words reclaimed.
    pub fn resync_peer_read(&mut self, region: &SharedRegion) -> Result<u32> {
        let peer = self.load_peer(region, self.geometry.read_word)?;
        let before = self.available;
        self.shared = peer;
        self.read = peer;
        self.available = self.capacity() - self.occupied();
        Ok(self.available.saturating_sub(before))
    }

    /// Consumer side: pick up the producer's write offset
    ///
    /// Returns whether new frames appeared.
    pub fn resync_peer_write(&mut self, region: &SharedRegion) -> Result<bool> {
        let peer = self.load_peer(region, self.geometry.write_word)?;
        let changed = peer != self.write;
        self.shared = peer;
        self.write = peer;
        self.available = self.capacity() - self.occupied();
        Ok(changed)
    }

    /// Producer side: make everything written so far visible to the peer
    pub fn publish_write(&self, region: &SharedRegion) -> Result<()> {
        region.store(self.geometry.write_word, self.write)
    }

    /// Producer side: whether frames were written since the last publish
    pub fn has_unpublished(&self, region: &SharedRegion) -> Result<bool> {
        Ok(region.load(self.geometry.write_word)? != self.write)
    }

    /// Consumer side: hand consumed space back to the peer
    ///
    /// Returns `false` when the shared word already holds the local offset.
    pub fn publish_read(&self, region: &SharedRegion) -> Result<bool> {
        if region.load(self.geometry.read_word)? == self.read {
            return Ok(false);
        }
        region.store(self.geometry.read_word, self.read)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: u32 = 16;

    fn setup(capacity: u32) -> (SharedRegion, Fifo, Fifo) {
        let geometry = FifoGeometry {
            base: 32,
            capacity,
            read_word: 0,
            write_word: 16,
        };
        let region = SharedRegion::anonymous((32 + capacity as usize) * WORD_SIZE);
        (region, Fifo::new(geometry), Fifo::new(geometry))
    }

    /// Move a frame from producer to consumer and hand the space back
    fn transfer(region: &SharedRegion, tx: &mut Fifo, rx: &mut Fifo, payload: &[u8]) -> Vec<u8> {
        tx.enqueue(region, FrameType::Data, 0, 1, payload).unwrap();
        tx.publish_write(region).unwrap();
        assert!(rx.resync_peer_write(region).unwrap());

        let mut out = vec![0u8; 4096];
        let got = rx.dequeue(region, FrameType::Data, &mut out).unwrap().unwrap();
        assert_eq!(got.channel, 1);
        out.truncate(got.len);

        rx.publish_read(region).unwrap();
        tx.resync_peer_read(region).unwrap();
        assert_eq!(tx.available(), tx.capacity());
        out
    }

    /// Park both sides at `offset` with an empty FIFO
    fn park_at(region: &SharedRegion, tx: &mut Fifo, rx: &mut Fifo, offset: u32) {
        assert!(offset >= 2 && offset < tx.capacity());
        let filler = vec![0x11u8; (offset as usize - 2) * WORD_SIZE];
        transfer(region, tx, rx, &filler);
        assert_eq!(tx.write_offset(), offset);
        assert_eq!(rx.read_offset(), offset);
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_scenario_hundred_words() {
        let (region, mut tx, mut rx) = setup(100);

        let payload = [0xAAu8; 10];
        let words = tx.enqueue(&region, FrameType::Data, 0, 0, &payload).unwrap();
        assert_eq!(words, 5);
        assert_eq!(tx.write_offset(), 5);
        assert_eq!(tx.available(), 95);

        tx.publish_write(&region).unwrap();
        rx.resync_peer_write(&region).unwrap();
        let mut out = [0u8; 64];
        let got = rx.dequeue(&region, FrameType::Data, &mut out).unwrap().unwrap();
        assert_eq!(got.channel, 0);
        assert_eq!(got.len, 10);
        assert!(!got.more);
        assert_eq!(&out[..10], &payload);
    }

    #[test]
    fn test_wrap_with_one_word_left() {
        let (region, mut tx, mut rx) = setup(CAP);
        park_at(&region, &mut tx, &mut rx, CAP - 1);

        // L1 at the last word, L2 at offset 0, payload from offset 1
        let payload = pattern(37);
        assert_eq!(transfer(&region, &mut tx, &mut rx, &payload), payload);
        assert_eq!(tx.write_offset(), (CAP - 1 + 2 + 10) % CAP);
    }

    #[test]
    fn test_wrap_with_two_words_left() {
        let (region, mut tx, mut rx) = setup(CAP);
        park_at(&region, &mut tx, &mut rx, CAP - 2);

        let payload = pattern(40);
        assert_eq!(transfer(&region, &mut tx, &mut rx, &payload), payload);
        assert_eq!(tx.write_offset(), 10);
    }

    #[test]
    fn test_wrap_inside_payload() {
        let (region, mut tx, mut rx) = setup(CAP);
        park_at(&region, &mut tx, &mut rx, 10);

        // Headers at 10 and 11, four payload words before the end, rest from 0
        let payload = pattern(45);
        assert_eq!(transfer(&region, &mut tx, &mut rx, &payload), payload);
        assert_eq!(tx.write_offset(), (10 + 2 + 12) % CAP);
    }

    #[test]
    fn test_overflow_leaves_state_untouched() {
        let (region, mut tx, _rx) = setup(CAP);
        tx.enqueue(&region, FrameType::Data, 0, 0, &[0u8; 20]).unwrap();
        assert_eq!(tx.available(), 9);

        // 2 + 7 words == available: must not fill the ring
        let err = tx
            .enqueue(&region, FrameType::Data, 1, 0, &[0u8; 28])
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::Overflow {
                required: 9,
                available: 9
            }
        ));
        assert_eq!(tx.write_offset(), 7);
        assert_eq!(tx.available(), 9);
        assert_eq!(tx.available() + tx.occupied(), tx.capacity());

        tx.enqueue(&region, FrameType::Data, 1, 0, &[0u8; 24]).unwrap();
        assert_eq!(tx.available(), 1);
    }

    #[test]
    fn test_capacity_accounting() {
        let (region, mut tx, mut rx) = setup(64);
        let sizes = [0usize, 1, 4, 9, 30];
        let mut used = 0;
        for (i, len) in sizes.iter().enumerate() {
            used += tx
                .enqueue(&region, FrameType::Data, i as u8, 2, &vec![i as u8; *len])
                .unwrap();
            assert_eq!(tx.available(), 64 - used);
        }
        tx.publish_write(&region).unwrap();

        rx.resync_peer_write(&region).unwrap();
        let mut out = [0u8; 64];
        let mut seen = 0;
        while let Some(got) = rx.dequeue(&region, FrameType::Data, &mut out).unwrap() {
            assert_eq!(got.len, sizes[seen]);
            assert_eq!(got.seq, seen as u8);
            seen += 1;
            assert_eq!(got.more, seen < sizes.len());
        }
        assert_eq!(seen, sizes.len());

        assert!(rx.publish_read(&region).unwrap());
        assert!(!rx.publish_read(&region).unwrap());
        assert_eq!(tx.resync_peer_read(&region).unwrap(), used);
        assert_eq!(tx.available(), 64);
    }

    #[test]
    fn test_unexpected_frame_type() {
        let (region, mut tx, mut rx) = setup(CAP);
        tx.enqueue(&region, FrameType::BootRequest, 0, 0, &[0u8; 8])
            .unwrap();
        tx.publish_write(&region).unwrap();
        rx.resync_peer_write(&region).unwrap();

        let mut out = [0u8; 16];
        assert!(matches!(
            rx.dequeue(&region, FrameType::Data, &mut out),
            Err(LinkError::UnexpectedFrame {
                expected: FrameType::Data,
                got: 1
            })
        ));
        assert_eq!(rx.read_offset(), 0);
    }

    #[test]
    fn test_unknown_frame_type() {
        let (region, mut tx, mut rx) = setup(CAP);
        tx.enqueue(&region, FrameType::Data, 0, 0, &[0u8; 4]).unwrap();
        tx.publish_write(&region).unwrap();
        // Type nibble 0xF decodes to no frame type
        let l1 = region.read_word(32).unwrap();
        region.write_word(32, l1 | 0xF000_0000).unwrap();

        rx.resync_peer_write(&region).unwrap();
        let mut out = [0u8; 16];
        assert!(matches!(
            rx.dequeue(&region, FrameType::Data, &mut out),
            Err(LinkError::UnexpectedFrame {
                expected: FrameType::Data,
                got: 0xF
            })
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let (region, mut tx, mut rx) = setup(CAP);
        tx.enqueue(&region, FrameType::Data, 0, 0, &[0u8; 8]).unwrap();
        tx.publish_write(&region).unwrap();
        // Corrupt the L2 length
        region
            .write_word(32 + 1, L2Header::new(0, 4).encode())
            .unwrap();

        rx.resync_peer_write(&region).unwrap();
        let mut out = [0u8; 16];
        assert!(matches!(
            rx.dequeue(&region, FrameType::Data, &mut out),
            Err(LinkError::LengthMismatch { l1: 12, l2: 4 })
        ));
    }

    #[test]
    fn test_peer_offset_out_of_range() {
        let (region, mut tx, _rx) = setup(CAP);
        region.store(0, CAP).unwrap();
        assert!(matches!(
            tx.resync_peer_read(&region),
            Err(LinkError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_empty_dequeue() {
        let (region, _tx, mut rx) = setup(CAP);
        let mut out = [0u8; 4];
        assert_eq!(rx.dequeue(&region, FrameType::Data, &mut out).unwrap(), None);
    }
}
