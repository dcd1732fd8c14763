//! Signal lines between the two processors
//!
//! The interrupt controller is only seen through [`InterruptController`]:
//! named bits that can be set, cleared and toggled. Setting a bit that is
//! already pending does not produce a new edge at the peer; the receiver
//! clears the bit to acknowledge it.
//!
//! Incoming edges land in [`IrqSink::raise`], the top half. It only records
//! the event in the queue of the FIFO group it belongs to; the group's single
//! consumer does the rest in order.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::layout::Group;

/// Number of named signal bits
pub const IRQ_COUNT: usize = 6;

/// Named signal bits
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Irq {
    /// Peer asks this side to wake and resynchronize
    WakeRequest,
    /// Answer to a wake request
    WakeAck,
    /// Peer published new frames in the group
    MsgPending(Group),
    /// Peer consumed frames in the group
    ReadDone(Group),
}

impl Irq {
    pub const ALL: [Irq; IRQ_COUNT] = [
        Irq::WakeRequest,
        Irq::WakeAck,
        Irq::MsgPending(Group::Common),
        Irq::MsgPending(Group::Audio),
        Irq::ReadDone(Group::Common),
        Irq::ReadDone(Group::Audio),
    ];

    /// Bit position in the controller register
    pub fn bit(self) -> u32 {
        match self {
            Irq::WakeRequest => 0,
            Irq::WakeAck => 1,
            Irq::MsgPending(group) => 2 + group.index() as u32,
            Irq::ReadDone(group) => 4 + group.index() as u32,
        }
    }

    #[inline]
    pub fn mask(self) -> u32 {
        1 << self.bit()
    }

    /// Group whose deferred context handles the signal. Wake traffic is
    /// serialized with the common group, which also owns the boot state.
    pub fn group(self) -> Group {
        match self {
            Irq::WakeRequest | Irq::WakeAck => Group::Common,
            Irq::MsgPending(group) | Irq::ReadDone(group) => group,
        }
    }
}

/// Interrupt controller capability
pub trait InterruptController: Send + Sync {
    fn set(&self, irq: Irq);
    fn clear(&self, irq: Irq);
    fn toggle(&self, irq: Irq);
    fn is_set(&self, irq: Irq) -> bool;
}

/// Work item for a group's deferred handler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    Irq(Irq),
    Shutdown,
}

/// Top-half entry point for incoming signals
#[derive(Clone)]
pub struct IrqSink {
    queues: [Sender<Event>; 2],
}

impl IrqSink {
    /// Record an incoming edge
    #[inline]
    pub fn raise(&self, irq: Irq) {
        let _ = self.queues[irq.group().index()].send(Event::Irq(irq));
    }

    pub(crate) fn shutdown(&self) {
        for queue in &self.queues {
            let _ = queue.send(Event::Shutdown);
        }
    }
}

/// Consumer ends of the per-group event queues
pub struct EventQueues {
    queues: [Receiver<Event>; 2],
}

impl EventQueues {
    pub(crate) fn receiver(&self, group: Group) -> &Receiver<Event> {
        &self.queues[group.index()]
    }

    /// Events waiting for a group
    pub fn pending(&self, group: Group) -> usize {
        self.queues[group.index()].len()
    }
}

/// Create the queues for one link end
pub fn event_queues() -> (IrqSink, EventQueues) {
    let (common_tx, common_rx) = unbounded();
    let (audio_tx, audio_rx) = unbounded();
    (
        IrqSink {
            queues: [common_tx, audio_tx],
        },
        EventQueues {
            queues: [common_rx, audio_rx],
        },
    )
}

/// One direction of an in-process interrupt register
///
/// Bits set here are delivered as edges to the peer's [`IrqSink`].
pub struct Mailbox {
    bits: AtomicU32,
    edges: [AtomicU64; IRQ_COUNT],
    peer: IrqSink,
}

impl Mailbox {
    pub fn new(peer: IrqSink) -> Self {
        Self {
            bits: AtomicU32::new(0),
            edges: Default::default(),
            peer,
        }
    }

    /// Edges delivered to the peer for a bit so far
    pub fn edges(&self, irq: Irq) -> u64 {
        self.edges[irq.bit() as usize].load(Ordering::Relaxed)
    }

    fn deliver(&self, irq: Irq) {
        self.edges[irq.bit() as usize].fetch_add(1, Ordering::Relaxed);
        self.peer.raise(irq);
    }
}

impl InterruptController for Mailbox {
    fn set(&self, irq: Irq) {
        let prev = self.bits.fetch_or(irq.mask(), Ordering::AcqRel);
        if prev & irq.mask() == 0 {
            self.deliver(irq);
        }
    }

    fn clear(&self, irq: Irq) {
        self.bits.fetch_and(!irq.mask(), Ordering::AcqRel);
    }

    fn toggle(&self, irq: Irq) {
        self.bits.fetch_xor(irq.mask(), Ordering::AcqRel);
        self.deliver(irq);
    }

    fn is_set(&self, irq: Irq) -> bool {
        self.bits.load(Ordering::Acquire) & irq.mask() != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_are_distinct() {
        let mut seen = 0u32;
        for irq in Irq::ALL {
            assert_eq!(seen & irq.mask(), 0);
            seen |= irq.mask();
        }
        assert_eq!(seen, 0b11_1111);
    }

    #[test]
    fn test_set_is_level_triggered() {
        let (sink, queues) = event_queues();
        let mailbox = Mailbox::new(sink);
        let irq = Irq::MsgPending(Group::Audio);

        mailbox.set(irq);
        mailbox.set(irq);
        assert!(mailbox.is_set(irq));
        assert_eq!(mailbox.edges(irq), 1);
        assert_eq!(queues.pending(Group::Audio), 1);
        assert_eq!(queues.pending(Group::Common), 0);

        mailbox.clear(irq);
        assert!(!mailbox.is_set(irq));
        mailbox.set(irq);
        assert_eq!(mailbox.edges(irq), 2);
    }

    #[test]
    fn test_toggle_always_delivers() {
        let (sink, queues) = event_queues();
        let mailbox = Mailbox::new(sink);

        mailbox.toggle(Irq::WakeAck);
        mailbox.toggle(Irq::WakeAck);
        assert!(!mailbox.is_set(Irq::WakeAck));
        assert_eq!(queues.pending(Group::Common), 2);
        assert_eq!(
            queues.receiver(Group::Common).try_recv().unwrap(),
            Event::Irq(Irq::WakeAck)
        );
    }
}
