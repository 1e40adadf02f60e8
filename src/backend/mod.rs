//! Pluggable backend layer. Every backend implements the same contract:
//! register/deregister atoms, wait for readiness, and drain it into a plain
//! list the reactor then dispatches against the application's callbacks.

mod epoll_backend;
mod mock;
mod poll_backend;
mod select_backend;

pub use epoll_backend::EpollBackend;
pub use mock::{MockBackend, MockEvent, MockEventKind, MockEventSet, MockPayload, MAX_EVENTS_PER_SET};
pub use poll_backend::PollBackend;
pub use select_backend::SelectBackend;

use std::net::SocketAddrV4;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;

use crate::atom::{Atom, Interest};
use crate::error::ReactorError;

pub mod backend_mask {
    pub const SELECT: u8 = 1 << 0;
    pub const POLL: u8 = 1 << 1;
    pub const EPOLL: u8 = 1 << 2;
    pub const MOCK: u8 = 1 << 3;
}

/// Which direction fired. Surfaced by `drain_ready` so dispatch can stay
/// agnostic of how each backend recognized readiness.
#[derive(Debug, Clone, Copy)]
pub struct ReadyAtom {
    pub atom: NonNull<Atom>,
    pub readable: bool,
    pub writable: bool,
}

/// Contract every concrete backend satisfies. Socket ops are part of the
/// trait because the mock backend must intercept them instead of touching
/// a real fd.
pub(crate) trait RawBackend {
    fn add(&mut self, atom: NonNull<Atom>, interest: Interest) -> Result<(), ReactorError>;
    fn remove(&mut self, fd: RawFd) -> Result<(), ReactorError>;
    fn set(&mut self, fd: RawFd, interest: Interest) -> Result<(), ReactorError>;

    /// Blocks up to `timeout_ms` (`u32::MAX` means forever) and returns the
    /// number of ready conditions queued for the next `drain_ready`.
    fn wait(&mut self, timeout_ms: u32) -> Result<usize, ReactorError>;

    /// Drains whatever `wait` queued into an owned list. Must not borrow
    /// `self` past the call so the reactor is free to hand out `&mut self`
    /// to callbacks afterwards.
    fn drain_ready(&mut self) -> Vec<ReadyAtom>;

    fn fd_check(&self) -> usize;

    fn listen(&mut self, addr: SocketAddrV4, atom: &mut Atom) -> Result<(), ReactorError>;
    fn connect(&mut self, addr: SocketAddrV4, atom: &mut Atom) -> Result<(), ReactorError>;
    fn accept(
        &mut self,
        listener: &mut Atom,
        atom: &mut Atom,
    ) -> Result<SocketAddrV4, ReactorError>;
    fn read(&mut self, atom: &mut Atom, buf: &mut [u8]) -> Result<usize, ReactorError>;
    fn write(&mut self, atom: &mut Atom, buf: &[u8]) -> Result<usize, ReactorError>;
    fn close(&mut self, atom: &mut Atom) -> Result<(), ReactorError>;
}

/// Shared by every real backend: open a listening socket, then register the
/// atom for readability so incoming connections wake `accept`.
pub(crate) fn real_listen<B: RawBackend>(
    backend: &mut B,
    addr: SocketAddrV4,
    atom: &mut Atom,
) -> Result<(), ReactorError> {
    let fd = crate::socket::listen(addr)?;
    atom.fd = fd;
    atom.is_listener = true;
    atom.interest = Interest::READ;
    backend.add(NonNull::from(&mut *atom), Interest::READ)
}

pub(crate) fn real_connect<B: RawBackend>(
    backend: &mut B,
    addr: SocketAddrV4,
    atom: &mut Atom,
) -> Result<(), ReactorError> {
    let fd = crate::socket::connect(addr)?;
    atom.fd = fd;
    atom.interest = Interest::WRITE;
    backend.add(NonNull::from(&mut *atom), Interest::WRITE)
}

pub(crate) fn real_accept<B: RawBackend>(
    backend: &mut B,
    listener: &mut Atom,
    atom: &mut Atom,
) -> Result<SocketAddrV4, ReactorError> {
    let (fd, remote) = crate::socket::accept(listener.fd())?;
    atom.fd = fd;
    atom.interest = Interest::READ;
    backend.add(NonNull::from(&mut *atom), Interest::READ)?;
    Ok(remote)
}

pub(crate) fn real_close<B: RawBackend>(
    backend: &mut B,
    atom: &mut Atom,
) -> Result<(), ReactorError> {
    if atom.fd() >= 0 {
        let fd = atom.fd();
        let _ = backend.remove(fd);
        crate::socket::close(fd)?;
        atom.fd = -1;
    }
    Ok(())
}
