//! An embeddable, single-threaded asynchronous I/O reactor for POSIX
//! byte-stream sockets.
//!
//! An application registers [`Atom`]s (a file descriptor plus read/write
//! callbacks) with a [`Reactor`], then drives the loop itself:
//!
//! ```no_run
//! use ioreactor::{backend_mask, Atom, Interest, Reactor};
//! use std::net::{Ipv4Addr, SocketAddrV4};
//!
//! let mut reactor = Reactor::new(backend_mask::EPOLL | backend_mask::POLL | backend_mask::SELECT)
//!     .unwrap();
//!
//! let addr = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 0);
//! let mut listener = Atom::new().on_read(|reactor, listener| {
//!     let mut conn = Box::new(Atom::new().on_read(|reactor, conn| {
//!         let mut buf = [0u8; 1024];
//!         match reactor.read(conn, &mut buf) {
//!             Ok(_n) => {}
//!             Err(_) => { let _ = reactor.close(conn); }
//!         }
//!     }));
//!     if let Ok(_remote) = reactor.accept(listener, &mut *conn) {
//!         Box::leak(conn);
//!     }
//! });
//! reactor.listen(addr, &mut listener).unwrap();
//!
//! loop {
//!     reactor.wait(1000).unwrap();
//!     reactor.dispatch();
//!     break; // real applications loop forever
//! }
//! ```
//!
//! Four backends implement the same contract: a readiness-set scan
//! (`select(2)`), a descriptor array (`poll(2)`), an edge-triggered kernel
//! queue (`epoll(7)`), and a scripted, fully deterministic mock used for
//! tests. [`Reactor::new`] picks the first the caller's bitmask allows, in
//! that priority order.

mod addr;
mod atom;
mod backend;
mod error;
mod reactor;
mod socket;
mod sys;

pub use addr::{format_addr, parse_addr};
pub use atom::{Atom, Callback, Interest};
pub use backend::{backend_mask, MockEvent, MockEventKind, MockEventSet, MockPayload, MAX_EVENTS_PER_SET};
pub use error::ReactorError;
pub use reactor::Reactor;
