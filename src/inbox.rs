//! Receive queue for link clients
//!
//! Stands where a character device would sit: the dispatcher pushes
//! payloads in, clients pop them per channel. Each channel keeps its unread
//! payload bytes in one pool; each queued message is a [`QueueElement`]
//! locating it in that channel's byte stream. Popping a message releases its
//! bytes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// One queued message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueElement {
    /// Start of the payload in the channel's byte stream
    pub offset: usize,
    pub size: usize,
    /// Arrival order across all channels of the inbox
    pub seq: u32,
}

#[derive(Default)]
struct ChannelQueue {
    elements: VecDeque<QueueElement>,
    /// Unread bytes, front aligned with `elements[0]`
    pool: VecDeque<u8>,
    next_offset: usize,
}

#[derive(Default)]
struct InboxState {
    channels: HashMap<u8, ChannelQueue>,
    queued: usize,
    next_seq: u32,
}

/// Per-channel message queues fed by a link's dispatcher
#[derive(Clone, Default)]
pub struct Inbox {
    state: Arc<(Mutex<InboxState>, Condvar)>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a payload
    pub fn push(&self, channel: u8, bytes: &[u8]) {
        let (lock, ready) = &*self.state;
        let mut state = lock.lock();
        let seq = state.next_seq;
        state.next_seq = seq.wrapping_add(1);
        state.queued += 1;

        let queue = state.channels.entry(channel).or_default();
        queue.elements.push_back(QueueElement {
            offset: queue.next_offset,
            size: bytes.len(),
            seq,
        });
        queue.next_offset += bytes.len();
        queue.pool.extend(bytes);
        ready.notify_all();
    }

    /// Handler suitable for [`Link::register_receive_handler`](crate::Link::register_receive_handler)
    pub fn handler(&self) -> impl FnMut(u8, &[u8]) + Send + 'static {
        let inbox = self.clone();
        move |channel, bytes| inbox.push(channel, bytes)
    }

    /// Pop the oldest message of a channel
    pub fn try_recv(&self, channel: u8) -> Option<(QueueElement, Vec<u8>)> {
        let mut state = self.state.0.lock();
        Self::pop(&mut state, channel)
    }

    /// Pop the oldest message of a channel, waiting up to `timeout`
    pub fn recv_timeout(&self, channel: u8, timeout: Duration) -> Option<(QueueElement, Vec<u8>)> {
        let deadline = Instant::now() + timeout;
        let (lock, ready) = &*self.state;
        let mut state = lock.lock();
        loop {
            if let Some(message) = Self::pop(&mut state, channel) {
                return Some(message);
            }
            if ready.wait_until(&mut state, deadline).timed_out() {
                return Self::pop(&mut state, channel);
            }
        }
    }

    /// Messages waiting on a channel
    pub fn len(&self, channel: u8) -> usize {
        self.state
            .0
            .lock()
            .channels
            .get(&channel)
            .map_or(0, |queue| queue.elements.len())
    }

    pub fn is_empty(&self) -> bool {
        self.state.0.lock().queued == 0
    }

    /// Payload bytes held for unread messages across all channels
    pub fn buffered_bytes(&self) -> usize {
        self.state
            .0
            .lock()
            .channels
            .values()
            .map(|queue| queue.pool.len())
            .sum()
    }

    fn pop(state: &mut InboxState, channel: u8) -> Option<(QueueElement, Vec<u8>)> {
        let queue = state.channels.get_mut(&channel)?;
        let element = queue.elements.pop_front()?;
        let bytes: Vec<u8> = queue.pool.drain(..element.size).collect();
        state.queued -= 1;
        Some((element, bytes))
    }
}
