//! Deferred-work threads
//!
//! One thread per FIFO group consumes that group's event queue in order and
//! fires the group's idle timer. The two threads never share a lock for
//! longer than a bookkeeping update, so the groups run concurrently.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::RecvTimeoutError;

use crate::error::{LinkError, Result};
use crate::irq::{Event, IrqSink};
use crate::layout::Group;
use crate::link::Link;

/// Running deferred-work threads of one link end
///
/// Dropping the handle stops and joins the threads.
pub struct Workers {
    sink: IrqSink,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Start one worker per group
    pub fn spawn(link: Arc<Link>) -> Result<Self> {
        let sink = link.interrupt_sink();
        let mut workers = Self {
            sink,
            handles: Vec::with_capacity(Group::ALL.len()),
        };

        for group in Group::ALL {
            let link = link.clone();
            let handle = thread::Builder::new()
                .name(format!("mdmlink-{:?}-{:?}", link.side(), group).to_lowercase())
                .spawn(move || run(&link, group))
                .map_err(LinkError::Worker)?;
            workers.handles.push(handle);
        }
        Ok(workers)
    }

    /// Stop both workers after the events already queued
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        self.sink.shutdown();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn run(link: &Link, group: Group) {
    let queue = link.events().receiver(group);
    loop {
        let event = match link.idle_deadline(group) {
            Some(deadline) => match queue.recv_deadline(deadline) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => {
                    link.on_idle_timeout(group);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match queue.recv() {
                Ok(event) => event,
                Err(_) => break,
            },
        };

        match event {
            Event::Shutdown => break,
            Event::Irq(irq) => {
                if let Err(err) = link.handle(irq) {
                    if err.is_fatal() {
                        break;
                    }
                    tracing::warn!(?group, ?irq, error = %err, "signal handling failed");
                }
            }
        }
    }
    tracing::debug!(side = ?link.side(), ?group, "worker stopped");
}
