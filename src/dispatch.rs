//! Routing of received payloads to the registered handler of their group

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::layout::Group;

/// Logical channel tags
pub mod channel {
    /// Common group: signaling
    pub const IPC: u8 = 0;
    /// Common group: RPC-like calls
    pub const RPC: u8 = 1;
    /// Common group: security
    pub const SECURITY: u8 = 2;
    /// Audio group: audio control
    pub const AUDIO: u8 = 0;
}

/// Channel tags carried by a group
pub fn known_channels(group: Group) -> &'static [u8] {
    match group {
        Group::Common => &[channel::IPC, channel::RPC, channel::SECURITY],
        Group::Audio => &[channel::AUDIO],
    }
}

/// Callback receiving `(channel_tag, payload)`
pub type ReceiveHandler = Box<dyn FnMut(u8, &[u8]) + Send>;

/// Per-group dispatcher
///
/// Runs inside the group's serialized deferred context. The handler slot is
/// only locked long enough to fetch the handler, so a handler may replace
/// itself while it runs.
pub struct Dispatcher {
    group: Group,
    handler: Mutex<Option<Arc<Mutex<ReceiveHandler>>>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Dispatcher {
    pub fn new(group: Group) -> Self {
        Self {
            group,
            handler: Mutex::new(None),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Install the group's handler, replacing any previous one
    pub fn register(&self, handler: ReceiveHandler) {
        *self.handler.lock() = Some(Arc::new(Mutex::new(handler)));
    }

    /// Hand a payload to the handler. Unknown tags are dropped.
    pub fn dispatch(&self, channel: u8, bytes: &[u8]) -> bool {
        if !known_channels(self.group).contains(&channel) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(group = ?self.group, channel, len = bytes.len(), "unknown channel, message dropped");
            return false;
        }
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => {
                let mut callback = handler.lock();
                (*callback)(channel, bytes);
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(group = ?self.group, channel, "no receive handler, message dropped");
                false
            }
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
