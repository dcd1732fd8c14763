//! modem_link - shared-memory transport between an application processor
//! and a modem processor
//!
//! Both processors see one fixed memory region but share no OS and no cache
//! coherency. The region holds two FIFO groups (common, audio), each with one
//! ring per direction. Payloads are framed with two header words and placed
//! in the rings; the only cross-core synchronization is the pair of
//! pointer-exchange words next to each ring plus four signal lines.
//!
//! # Architecture
//!
//! - **Ring buffer engine** ([`fifo`]): framing, wraparound, capacity accounting
//! - **Notification state machine** ([`link`]): pointer resync, publish, idle
//! - **Boot handshake** ([`boot`]): config/version exchange gating traffic
//! - **Dispatcher** ([`dispatch`]): per-group routing of received payloads
//!
//! # Quick start
//! ```
//! use modem_link::{Group, Inbox, LinkConfig, Loopback};
//!
//! let pair = Loopback::new(LinkConfig::default()).unwrap();
//! let inbox = Inbox::new();
//! pair.ap.register_receive_handler(Group::Common, inbox.handler());
//! pair.boot().unwrap();
//!
//! pair.cp.send(Group::Common, 0, b"ping").unwrap();
//! pair.settle().unwrap();
//! assert_eq!(inbox.try_recv(0).unwrap().1, b"ping");
//! ```

pub mod boot;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fifo;
pub mod frame;
pub mod inbox;
pub mod irq;
pub mod layout;
pub mod link;
pub mod loopback;
pub mod region;
pub mod worker;

pub use boot::{BootInfo, BootState, Role};
pub use config::LinkConfig;
pub use error::{LinkError, Result};
pub use inbox::{Inbox, QueueElement};
pub use irq::{InterruptController, Irq, IrqSink, Mailbox};
pub use layout::{Group, Side};
pub use link::{FifoStats, Link, PathState, Signals};
pub use loopback::Loopback;
pub use region::SharedRegion;
pub use worker::Workers;
