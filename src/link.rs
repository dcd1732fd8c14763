//! Link context and notification state machine
//!
//! One [`Link`] exists per physical link end. It owns both FIFO groups, the
//! boot state and the dispatchers, and is threaded through every operation.
//!
//! Signals are handled in two halves: [`IrqSink::raise`] only queues the
//! event, and [`Link::handle`] (driven by [`Link::poll`] or a
//! [`Workers`](crate::worker::Workers) thread) does the deferred work. Each
//! group has its own queue and its own lock, so the groups progress
//! independently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::boot::{BootCell, BootInfo, BootState, Role};
use crate::config::LinkConfig;
use crate::dispatch::Dispatcher;
use crate::error::{LinkError, Result};
use crate::fifo::Fifo;
use crate::frame::FrameType;
use crate::irq::{Event, EventQueues, InterruptController, Irq, IrqSink};
use crate::layout::{Group, Layout, Side};
use crate::region::{SharedRegion, WORD_SIZE};

/// Power/notification state of one direction of a group
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathState {
    Sleep,
    /// Awake, nothing published and unconfirmed
    PtrFree,
    /// Published, waiting for the peer
    PtrBusy,
    Idle,
}

/// Snapshot of a FIFO descriptor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FifoStats {
    pub capacity: u32,
    pub available: u32,
    pub write: u32,
    pub read: u32,
    pub shared: u32,
}

impl From<&Fifo> for FifoStats {
    fn from(fifo: &Fifo) -> Self {
        Self {
            capacity: fifo.capacity(),
            available: fifo.available(),
            write: fifo.write_offset(),
            read: fifo.read_offset(),
            shared: fifo.shared_offset(),
        }
    }
}

/// Signal plumbing handed to [`Link::attach`]
pub struct Signals {
    /// Register this end sets bits in to signal the peer
    pub outbound: Arc<dyn InterruptController>,
    /// Register the peer signals this end through; cleared to acknowledge
    pub inbound: Arc<dyn InterruptController>,
    /// Top half feeding `events`
    pub sink: IrqSink,
    pub events: EventQueues,
}

struct GroupState {
    tx: Fifo,
    rx: Fifo,
    tx_seq: u8,
    rx_seq: Option<u8>,
    tx_state: PathState,
    rx_state: PathState,
    /// Inbound MSG_PENDING already cleared for the batch being handled
    msg_acked: bool,
    /// Read offset already handed back; nothing new consumed since
    read_ack_suppressed: bool,
    idle_deadline: Option<Instant>,
    scratch: Vec<u8>,
}

impl GroupState {
    fn new(tx: Fifo, rx: Fifo) -> Self {
        let scratch = vec![0u8; rx.capacity() as usize * WORD_SIZE];
        Self {
            tx,
            rx,
            tx_seq: 0,
            rx_seq: None,
            tx_state: PathState::Sleep,
            rx_state: PathState::Sleep,
            msg_acked: false,
            read_ack_suppressed: false,
            idle_deadline: None,
            scratch,
        }
    }

    fn reset(&mut self, region: &SharedRegion) -> Result<()> {
        self.tx.reset();
        self.rx.reset();
        self.tx_seq = 0;
        self.rx_seq = None;
        self.msg_acked = false;
        self.read_ack_suppressed = false;
        region.store(self.tx.geometry().write_word, 0)?;
        region.store(self.rx.geometry().read_word, 0)
    }

    fn resync_rx(&mut self, region: &SharedRegion) -> Result<bool> {
        let changed = self.rx.resync_peer_write(region)?;
        if changed {
            self.read_ack_suppressed = false;
        }
        Ok(changed)
    }

    fn track_seq(&mut self, group: Group, seq: u8) {
        if let Some(expected) = self.rx_seq {
            if expected != seq {
                tracing::warn!(?group, expected, got = seq, "sequence gap");
            }
        }
        self.rx_seq = Some(seq.wrapping_add(1));
    }
}

/// One end of an AP/CP shared-memory link
pub struct Link {
    side: Side,
    role: Role,
    config: LinkConfig,
    region: Arc<SharedRegion>,
    groups: [Mutex<GroupState>; 2],
    dispatchers: [Dispatcher; 2],
    boot: BootCell,
    faulted: AtomicBool,
    outbound: Arc<dyn InterruptController>,
    inbound: Arc<dyn InterruptController>,
    sink: IrqSink,
    events: EventQueues,
}

impl Link {
    /// Attach to a shared region
    ///
    /// Descriptors start at zero and the boot state at INIT.
    pub fn attach(
        side: Side,
        region: Arc<SharedRegion>,
        config: LinkConfig,
        signals: Signals,
    ) -> Result<Self> {
        config.validate()?;
        let layout = Layout::new(&config);
        if layout.size() > region.size() {
            return Err(LinkError::RegionTooSmall {
                needed: layout.size(),
                got: region.size(),
            });
        }

        let group_state = |group: Group| {
            Mutex::new(GroupState::new(
                Fifo::new(layout.fifo(group, side.tx_direction())),
                Fifo::new(layout.fifo(group, side.rx_direction())),
            ))
        };
        let role = config.role.unwrap_or(Role::for_side(side));

        tracing::debug!(?side, ?role, size = layout.size(), "link attached");

        Ok(Self {
            side,
            role,
            region,
            groups: [group_state(Group::Common), group_state(Group::Audio)],
            dispatchers: [Dispatcher::new(Group::Common), Dispatcher::new(Group::Audio)],
            boot: BootCell::new(),
            faulted: AtomicBool::new(false),
            outbound: signals.outbound,
            inbound: signals.inbound,
            sink: signals.sink,
            events: signals.events,
            config,
        })
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    #[inline]
    pub fn boot_state(&self) -> BootState {
        self.boot.get()
    }

    /// Whether a fatal error shut the link down
    #[inline]
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    /// Top-half entry point for platform interrupt glue
    pub fn interrupt_sink(&self) -> IrqSink {
        self.sink.clone()
    }

    pub(crate) fn events(&self) -> &EventQueues {
        &self.events
    }

    /// `(rx, tx)` path states of a group
    pub fn path_states(&self, group: Group) -> (PathState, PathState) {
        let g = self.group(group).lock();
        (g.rx_state, g.tx_state)
    }

    pub fn tx_stats(&self, group: Group) -> FifoStats {
        FifoStats::from(&self.group(group).lock().tx)
    }

    pub fn rx_stats(&self, group: Group) -> FifoStats {
        FifoStats::from(&self.group(group).lock().rx)
    }

    /// When the group's idle timer fires, if armed
    pub fn idle_deadline(&self, group: Group) -> Option<Instant> {
        self.group(group).lock().idle_deadline
    }

    #[inline]
    fn group(&self, group: Group) -> &Mutex<GroupState> {
        &self.groups[group.index()]
    }

    fn check_alive(&self) -> Result<()> {
        if self.is_faulted() {
            return Err(LinkError::Aborted);
        }
        Ok(())
    }

    /// Latch fatal errors: once the two cores disagree on the FIFO layout no
    /// further traffic is allowed
    fn guard<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() && !self.faulted.swap(true, Ordering::AcqRel) {
                tracing::error!(side = ?self.side, error = %err, "fatal link error, link aborted");
            }
        }
        result
    }

    fn arm_idle(&self, g: &mut GroupState) {
        g.idle_deadline = Some(Instant::now() + self.config.idle_timeout);
    }

    /// Install the receive handler of a group
    ///
    /// The handler runs in the group's deferred context. It may call
    /// [`send`](Self::send) or replace itself through this method, but must
    /// not call [`drain`](Self::drain) on its own group.
    pub fn register_receive_handler<F>(&self, group: Group, handler: F)
    where
        F: FnMut(u8, &[u8]) + Send + 'static,
    {
        self.dispatchers[group.index()].register(Box::new(handler));
    }

    /// Messages dropped by a group's dispatcher
    pub fn dropped(&self, group: Group) -> u64 {
        self.dispatchers[group.index()].dropped()
    }

    /// Frame and enqueue a payload, publishing it unless the peer has not yet
    /// confirmed the previous publish
    pub fn send(&self, group: Group, channel: u8, bytes: &[u8]) -> Result<()> {
        self.check_alive()?;
        let state = self.boot.get();
        if state != BootState::Done {
            return Err(LinkError::NotReady(state));
        }
        let result = {
            let mut g = self.group(group).lock();
            self.send_locked(&mut g, group, FrameType::Data, channel, bytes)
        };
        self.guard(result)
    }

    fn send_locked(
        &self,
        g: &mut GroupState,
        group: Group,
        frame_type: FrameType,
        channel: u8,
        bytes: &[u8],
    ) -> Result<()> {
        let seq = g.tx_seq;
        g.tx.enqueue(&self.region, frame_type, seq, channel, bytes)?;
        g.tx_seq = seq.wrapping_add(1);

        if g.tx_state == PathState::PtrBusy {
            tracing::trace!(?group, "peer busy, publish deferred");
            return Ok(());
        }
        self.publish(g, group)
    }

    fn publish(&self, g: &mut GroupState, group: Group) -> Result<()> {
        g.tx.publish_write(&self.region)?;
        g.tx_state = PathState::PtrBusy;
        self.outbound.set(Irq::MsgPending(group));
        tracing::trace!(?group, write = g.tx.write_offset(), "write offset published");
        Ok(())
    }

    /// Requester: wake the peer and send the boot request
    pub fn start_boot(&self) -> Result<()> {
        self.check_alive()?;
        if self.role != Role::Requester {
            return Err(LinkError::WrongRole(self.role));
        }
        let result = (|| {
            let mut g = self.group(Group::Common).lock();
            if self.boot.get() != BootState::Init {
                return Err(LinkError::BootOrder {
                    from: self.boot.get(),
                    to: BootState::InfoSync,
                });
            }
            g.reset(&self.region)?;
            self.boot.advance(BootState::InfoSync)?;

            self.outbound.set(Irq::WakeRequest);
            let info = self.config.boot;
            tracing::debug!(config = info.config, version = info.version, "sending boot request");
            self.send_locked(&mut g, Group::Common, FrameType::BootRequest, 0, &info.encode())
        })();
        self.guard(result)
    }

    /// Run the deferred handler for one signal
    pub fn handle(&self, irq: Irq) -> Result<()> {
        self.check_alive()?;
        tracing::trace!(side = ?self.side, ?irq, "signal");
        let result = match irq {
            Irq::WakeRequest => self.on_wake_request(),
            Irq::WakeAck => self.on_wake_ack(),
            Irq::MsgPending(group) => self.on_msg_pending(group),
            Irq::ReadDone(group) => self.on_read_done(group),
        };
        self.guard(result)
    }

    /// Handle every event queued for a group, in order
    ///
    /// Only one consumer may drive a group at a time: either call this or run
    /// [`Workers`](crate::worker::Workers), not both.
    pub fn poll(&self, group: Group) -> Result<usize> {
        let mut handled = 0;
        while let Ok(event) = self.events.receiver(group).try_recv() {
            if let Event::Irq(irq) = event {
                self.handle(irq)?;
                handled += 1;
            }
        }
        Ok(handled)
    }

    /// Poll both groups
    pub fn poll_all(&self) -> Result<usize> {
        Ok(self.poll(Group::Common)? + self.poll(Group::Audio)?)
    }

    fn on_wake_request(&self) -> Result<()> {
        self.inbound.clear(Irq::WakeRequest);
        let reset = self.boot.get() == BootState::Init;
        let mut woke = false;

        for group in Group::ALL {
            let pending = {
                let mut guard = self.group(group).lock();
                let g = &mut *guard;
                if reset {
                    g.reset(&self.region)?;
                }
                // The peer may have reset its view across a low-power transition
                g.tx.resync_peer_read(&self.region)?;
                g.resync_rx(&self.region)?;

                if g.tx_state == PathState::Sleep {
                    woke = true;
                    g.tx_state = PathState::PtrFree;
                    g.rx_state = PathState::PtrFree;
                }
                if g.tx_state != PathState::PtrBusy && g.tx.has_unpublished(&self.region)? {
                    self.publish(g, group)?;
                }
                !g.rx.is_empty()
            };
            if pending && self.boot.is_done() {
                // Drained by the group's own consumer
                self.sink.raise(Irq::MsgPending(group));
            }
        }

        if woke {
            tracing::debug!(side = ?self.side, "woken by peer");
            self.outbound.toggle(Irq::WakeAck);
        }
        Ok(())
    }

    fn on_wake_ack(&self) -> Result<()> {
        tracing::debug!(side = ?self.side, "wake acknowledged");
        for group in Group::ALL {
            let mut g = self.group(group).lock();
            if g.tx_state == PathState::Sleep {
                g.tx_state = PathState::PtrFree;
            }
        }
        Ok(())
    }

    fn on_msg_pending(&self, group: Group) -> Result<()> {
        if self.boot.is_done() {
            self.drain_group(group)?;
            return Ok(());
        }
        if group != Group::Common {
            // Picked up once the handshake completes
            tracing::debug!(?group, "traffic before boot completion deferred");
            return Ok(());
        }
        self.on_boot_frame()?;
        if self.boot.is_done() {
            self.drain_group(Group::Common)?;
            self.sink.raise(Irq::MsgPending(Group::Audio));
        }
        Ok(())
    }

    fn on_boot_frame(&self) -> Result<()> {
        let mut guard = self.group(Group::Common).lock();
        let g = &mut *guard;
        self.inbound.clear(Irq::MsgPending(Group::Common));
        g.resync_rx(&self.region)?;

        let state = self.boot.get();
        let expected = match (self.role, state) {
            (Role::Responder, BootState::Init) => FrameType::BootRequest,
            (Role::Requester, BootState::InfoSync) => FrameType::BootResponse,
            (Role::Responder, _) => {
                return Err(LinkError::BootOrder {
                    from: state,
                    to: BootState::InfoSync,
                })
            }
            (Role::Requester, _) => {
                return Err(LinkError::BootOrder {
                    from: state,
                    to: BootState::Done,
                })
            }
        };

        let Some(frame) = g.rx.dequeue(&self.region, expected, &mut g.scratch)? else {
            return Ok(());
        };
        g.track_seq(Group::Common, frame.seq);
        let info = BootInfo::decode(&g.scratch[..frame.len])?;

        if g.rx.publish_read(&self.region)? {
            self.outbound.set(Irq::ReadDone(Group::Common));
        }
        g.read_ack_suppressed = true;
        g.rx_state = PathState::Idle;

        match self.role {
            Role::Responder => {
                tracing::info!(config = info.config, version = info.version, "boot request received");
                self.boot.advance(BootState::InfoSync)?;
                self.send_locked(g, Group::Common, FrameType::BootResponse, 0, &info.encode())?;
            }
            Role::Requester => {
                let sent = self.config.boot;
                if info != sent {
                    return Err(LinkError::BootMismatch { sent, echoed: info });
                }
                self.boot.advance(BootState::Done)?;
                tracing::info!(config = info.config, version = info.version, "boot handshake complete");
            }
        }
        self.arm_idle(g);
        Ok(())
    }

    /// Pull every buffered frame of a group and dispatch it
    ///
    /// Returns the number of frames delivered to the dispatcher.
    pub fn drain(&self, group: Group) -> Result<usize> {
        self.check_alive()?;
        let state = self.boot.get();
        if state != BootState::Done {
            return Err(LinkError::NotReady(state));
        }
        let result = self.drain_group(group);
        self.guard(result)
    }

    fn drain_group(&self, group: Group) -> Result<usize> {
        let mut batch = Vec::new();
        {
            let mut guard = self.group(group).lock();
            let g = &mut *guard;
            if !g.msg_acked {
                self.inbound.clear(Irq::MsgPending(group));
                g.msg_acked = true;
            }
            g.resync_rx(&self.region)?;
            g.rx_state = PathState::PtrBusy;

            while let Some(frame) = g.rx.dequeue(&self.region, FrameType::Data, &mut g.scratch)? {
                g.track_seq(group, frame.seq);
                batch.push((frame.channel, g.scratch[..frame.len].to_vec()));
            }
        }

        let count = batch.len();
        let dispatcher = &self.dispatchers[group.index()];
        for (channel, bytes) in &batch {
            dispatcher.dispatch(*channel, bytes);
        }

        self.finish_read(group)?;
        if count > 0 {
            tracing::trace!(?group, count, "frames dispatched");
        }
        Ok(count)
    }

    /// Hand consumed space back to the peer
    ///
    /// Publishes the read offset and raises READ_DONE only if something was
    /// consumed since the last acknowledgement. Returns whether the peer was
    /// signaled.
    pub fn acknowledge_read(&self, group: Group) -> Result<bool> {
        self.check_alive()?;
        let result = (|| {
            let mut g = self.group(group).lock();
            self.ack_read_locked(&mut g, group)
        })();
        self.guard(result)
    }

    fn ack_read_locked(&self, g: &mut GroupState, group: Group) -> Result<bool> {
        if g.read_ack_suppressed {
            return Ok(false);
        }
        let published = g.rx.publish_read(&self.region)?;
        if published {
            self.outbound.set(Irq::ReadDone(group));
        }
        g.read_ack_suppressed = true;
        Ok(published)
    }

    fn finish_read(&self, group: Group) -> Result<()> {
        let mut g = self.group(group).lock();
        self.ack_read_locked(&mut g, group)?;
        g.msg_acked = false;
        g.rx_state = PathState::Idle;
        self.arm_idle(&mut g);
        Ok(())
    }

    fn on_read_done(&self, group: Group) -> Result<()> {
        let boot_completed = {
            let mut guard = self.group(group).lock();
            let g = &mut *guard;
            self.inbound.clear(Irq::ReadDone(group));
            let reclaimed = g.tx.resync_peer_read(&self.region)?;
            tracing::trace!(?group, reclaimed, available = g.tx.available(), "peer read");

            let mut boot_completed = false;
            if group == Group::Common
                && self.role == Role::Responder
                && self.boot.get() == BootState::InfoSync
            {
                self.boot.advance(BootState::Done)?;
                tracing::info!(side = ?self.side, "boot handshake complete");
                boot_completed = true;
            }

            if !boot_completed && g.tx.has_unpublished(&self.region)? {
                self.publish(g, group)?;
            } else {
                g.tx_state = PathState::Idle;
                self.arm_idle(g);
            }
            boot_completed
        };

        if boot_completed {
            // Audio traffic that arrived before completion was left in place
            self.sink.raise(Irq::MsgPending(Group::Audio));
        }
        Ok(())
    }

    /// Idle timer expiry: put the group to sleep once both paths are idle
    pub fn on_idle_timeout(&self, group: Group) {
        let mut g = self.group(group).lock();
        g.idle_deadline = None;
        if g.rx_state == PathState::Idle && g.tx_state == PathState::Idle {
            g.rx_state = PathState::Sleep;
            g.tx_state = PathState::Sleep;
            tracing::debug!(side = ?self.side, ?group, "group idle, sleeping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irq::{event_queues, Mailbox};
    use crate::layout::Direction;

    /// AP end with a hand-driven CP peer
    struct Harness {
        ap: Link,
        region: Arc<SharedRegion>,
        layout: Layout,
        ap_to_cp: Arc<Mailbox>,
        cp_to_ap: Arc<Mailbox>,
        cp_events: EventQueues,
    }

    fn harness(config: LinkConfig) -> Harness {
        let layout = Layout::new(&config);
        let region = Arc::new(SharedRegion::anonymous(layout.size()));
        let (ap_sink, ap_events) = event_queues();
        let (cp_sink, cp_events) = event_queues();
        let ap_to_cp = Arc::new(Mailbox::new(cp_sink));
        let cp_to_ap = Arc::new(Mailbox::new(ap_sink.clone()));
        let ap = Link::attach(
            Side::Ap,
            region.clone(),
            config,
            Signals {
                outbound: ap_to_cp.clone(),
                inbound: cp_to_ap.clone(),
                sink: ap_sink,
                events: ap_events,
            },
        )
        .unwrap();
        Harness {
            ap,
            region,
            layout,
            ap_to_cp,
            cp_to_ap,
            cp_events,
        }
    }

    impl Harness {
        fn peer_fifo(&self, direction: Direction) -> Fifo {
            Fifo::new(self.layout.fifo(Group::Common, direction))
        }

        /// Run the CP half of the handshake; returns the CP's common (tx, rx)
        fn boot(&self) -> (Fifo, Fifo) {
            let info = self.ap.config().boot;
            let mut cp_tx = self.peer_fifo(Direction::CpToAp);
            let mut cp_rx = self.peer_fifo(Direction::ApToCp);
            self.cp_to_ap.set(Irq::WakeRequest);
            cp_tx
                .enqueue(&self.region, FrameType::BootRequest, 0, 0, &info.encode())
                .unwrap();
            cp_tx.publish_write(&self.region).unwrap();
            self.cp_to_ap.set(Irq::MsgPending(Group::Common));
            self.ap.poll_all().unwrap();

            cp_rx.resync_peer_write(&self.region).unwrap();
            let mut buf = [0u8; 16];
            cp_rx
                .dequeue(&self.region, FrameType::BootResponse, &mut buf)
                .unwrap()
                .unwrap();
            cp_rx.publish_read(&self.region).unwrap();
            cp_tx.resync_peer_read(&self.region).unwrap();
            self.cp_to_ap.set(Irq::ReadDone(Group::Common));
            self.ap.poll_all().unwrap();
            assert_eq!(self.ap.boot_state(), BootState::Done);
            (cp_tx, cp_rx)
        }
    }

    #[test]
    fn test_boot_handshake_as_responder() {
        let info = BootInfo {
            config: 0xC0,
            version: 9,
        };
        let h = harness(LinkConfig {
            boot: info,
            ..LinkConfig::default()
        });
        assert_eq!(h.ap.role(), Role::Responder);

        // CP: wake, boot request, publish
        let mut cp_tx = h.peer_fifo(Direction::CpToAp);
        h.cp_to_ap.set(Irq::WakeRequest);
        cp_tx
            .enqueue(&h.region, FrameType::BootRequest, 0, 0, &info.encode())
            .unwrap();
        cp_tx.publish_write(&h.region).unwrap();
        h.cp_to_ap.set(Irq::MsgPending(Group::Common));

        h.ap.poll_all().unwrap();
        assert_eq!(h.ap.boot_state(), BootState::InfoSync);
        assert!(matches!(
            h.ap.send(Group::Common, 0, b"early"),
            Err(LinkError::NotReady(BootState::InfoSync))
        ));

        // Exactly one outbound frame, echoing the request
        let mut cp_rx = h.peer_fifo(Direction::ApToCp);
        assert!(cp_rx.resync_peer_write(&h.region).unwrap());
        let mut buf = [0u8; 16];
        let frame = cp_rx
            .dequeue(&h.region, FrameType::BootResponse, &mut buf)
            .unwrap()
            .unwrap();
        assert_eq!(BootInfo::decode(&buf[..frame.len]).unwrap(), info);
        assert!(!frame.more);
        assert_eq!(h.ap_to_cp.edges(Irq::MsgPending(Group::Common)), 1);
        assert_eq!(h.ap_to_cp.edges(Irq::WakeAck), 1);
        assert_eq!(h.ap_to_cp.edges(Irq::ReadDone(Group::Common)), 1);

        // CP confirms it read the response
        cp_rx.publish_read(&h.region).unwrap();
        h.cp_to_ap.set(Irq::ReadDone(Group::Common));
        h.ap.poll_all().unwrap();

        assert_eq!(h.ap.boot_state(), BootState::Done);
        assert_eq!(h.ap.tx_stats(Group::Common).available, 32 * 1024);
        assert!(h.cp_events.pending(Group::Common) > 0);
    }

    #[test]
    fn test_data_before_boot_is_fatal() {
        let h = harness(LinkConfig::default());
        let mut cp_tx = h.peer_fifo(Direction::CpToAp);
        cp_tx
            .enqueue(&h.region, FrameType::Data, 0, 0, b"hello")
            .unwrap();
        cp_tx.publish_write(&h.region).unwrap();
        h.cp_to_ap.set(Irq::MsgPending(Group::Common));

        let err = h.ap.poll_all().unwrap_err();
        assert!(matches!(
            err,
            LinkError::UnexpectedFrame {
                expected: FrameType::BootRequest,
                got: 3
            }
        ));
        assert!(h.ap.is_faulted());
        assert!(matches!(h.ap.handle(Irq::WakeRequest), Err(LinkError::Aborted)));
    }

    #[test]
    fn test_start_boot_is_requester_only() {
        let h = harness(LinkConfig::default());
        assert!(matches!(
            h.ap.start_boot(),
            Err(LinkError::WrongRole(Role::Responder))
        ));
        assert!(!h.ap.is_faulted());
    }

    #[test]
    fn test_region_too_small() {
        let (sink, events) = event_queues();
        let mailbox = Arc::new(Mailbox::new(sink.clone()));
        let result = Link::attach(
            Side::Ap,
            Arc::new(SharedRegion::anonymous(1024)),
            LinkConfig::default(),
            Signals {
                outbound: mailbox.clone(),
                inbound: mailbox,
                sink,
                events,
            },
        );
        assert!(matches!(result, Err(LinkError::RegionTooSmall { got: 1024, .. })));
    }

    #[test]
    fn test_wake_request_follows_silent_peer_offsets() {
        let h = harness(LinkConfig::default());
        let (mut cp_tx, mut cp_rx) = h.boot();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        h.ap.register_receive_handler(Group::Common, move |_, bytes| {
            sink.lock().push(bytes.to_vec())
        });

        h.ap.send(Group::Common, 0, b"outbound").unwrap();
        let capacity = h.ap.tx_stats(Group::Common).capacity;
        assert!(h.ap.tx_stats(Group::Common).available < capacity);

        // CP consumes and produces without raising READ_DONE or MSG_PENDING
        let mut buf = [0u8; 16];
        cp_rx.resync_peer_write(&h.region).unwrap();
        cp_rx
            .dequeue(&h.region, FrameType::Data, &mut buf)
            .unwrap()
            .unwrap();
        cp_rx.publish_read(&h.region).unwrap();
        cp_tx
            .enqueue(&h.region, FrameType::Data, 1, 0, b"inbound")
            .unwrap();
        cp_tx.publish_write(&h.region).unwrap();

        h.cp_to_ap.set(Irq::WakeRequest);
        h.ap.poll(Group::Common).unwrap();

        assert_eq!(h.ap.tx_stats(Group::Common).available, capacity);
        assert_eq!(h.ap.rx_stats(Group::Common).write, cp_tx.write_offset());
        assert_eq!(*received.lock(), vec![b"inbound".to_vec()]);
    }

    #[test]
    fn test_wake_request_leaves_audio_to_its_own_queue() {
        let h = harness(LinkConfig::default());
        h.boot();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        h.ap.register_receive_handler(Group::Audio, move |_, bytes| {
            sink.lock().push(bytes.to_vec())
        });

        // Audio data published without MSG_PENDING
        let mut cp_audio = Fifo::new(h.layout.fifo(Group::Audio, Direction::CpToAp));
        cp_audio
            .enqueue(&h.region, FrameType::Data, 0, 0, b"tone")
            .unwrap();
        cp_audio.publish_write(&h.region).unwrap();

        h.cp_to_ap.set(Irq::WakeRequest);
        h.ap.poll(Group::Common).unwrap();
        assert!(received.lock().is_empty());

        assert_eq!(h.ap.poll(Group::Audio).unwrap(), 1);
        assert_eq!(*received.lock(), vec![b"tone".to_vec()]);
    }
}
