//! Two link ends wired back to back in one process
//!
//! Both ends share one heap region and signal each other through a pair of
//! [`Mailbox`] registers. Used to run the full protocol without a modem.

use std::sync::Arc;

use crate::config::LinkConfig;
use crate::error::Result;
use crate::irq::{event_queues, Mailbox};
use crate::layout::{Layout, Side};
use crate::link::{Link, Signals};
use crate::region::SharedRegion;

pub struct Loopback {
    pub ap: Arc<Link>,
    pub cp: Arc<Link>,
    /// Register the AP signals the CP through
    pub ap_to_cp: Arc<Mailbox>,
    /// Register the CP signals the AP through
    pub cp_to_ap: Arc<Mailbox>,
}

impl Loopback {
    /// Build an AP/CP pair. Roles follow the sides; `config.role` is ignored.
    pub fn new(config: LinkConfig) -> Result<Self> {
        config.validate()?;
        let config = LinkConfig {
            role: None,
            ..config
        };
        let region = Arc::new(SharedRegion::anonymous(Layout::new(&config).size()));

        let (ap_sink, ap_events) = event_queues();
        let (cp_sink, cp_events) = event_queues();
        let ap_to_cp = Arc::new(Mailbox::new(cp_sink.clone()));
        let cp_to_ap = Arc::new(Mailbox::new(ap_sink.clone()));

        let ap = Link::attach(
            Side::Ap,
            region.clone(),
            config.clone(),
            Signals {
                outbound: ap_to_cp.clone(),
                inbound: cp_to_ap.clone(),
                sink: ap_sink,
                events: ap_events,
            },
        )?;
        let cp = Link::attach(
            Side::Cp,
            region,
            config,
            Signals {
                outbound: cp_to_ap.clone(),
                inbound: ap_to_cp.clone(),
                sink: cp_sink,
                events: cp_events,
            },
        )?;

        Ok(Self {
            ap: Arc::new(ap),
            cp: Arc::new(cp),
            ap_to_cp,
            cp_to_ap,
        })
    }

    /// Poll both ends until neither has queued events
    ///
    /// Returns the number of events handled.
    pub fn settle(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let handled = self.ap.poll_all()? + self.cp.poll_all()?;
            if handled == 0 {
                return Ok(total);
            }
            total += handled;
        }
    }

    /// Run the boot handshake to completion on both ends
    pub fn boot(&self) -> Result<()> {
        self.cp.start_boot()?;
        self.settle()?;
        Ok(())
    }
}
