//! The facade applications hold: picks a backend at construction and
//! exposes registration, waiting, dispatch, and the socket ops uniformly
//! over whichever one was picked.

use std::net::SocketAddrV4;
use std::ptr::NonNull;

use log::{debug, trace};

use crate::atom::{Atom, Interest};
use crate::backend::{
    backend_mask, EpollBackend, MockBackend, MockEventSet, PollBackend, RawBackend, ReadyAtom,
    SelectBackend,
};
use crate::error::ReactorError;

enum Backend {
    Select(SelectBackend),
    Poll(PollBackend),
    Epoll(EpollBackend),
    Mock(MockBackend),
}

impl Backend {
    fn as_raw(&mut self) -> &mut dyn RawBackend {
        match self {
            Backend::Select(b) => b,
            Backend::Poll(b) => b,
            Backend::Epoll(b) => b,
            Backend::Mock(b) => b,
        }
    }
}

/// A single-threaded event loop over registered [`Atom`]s.
///
/// Not `Send`/`Sync`: one reactor serves exactly one thread, and callbacks
/// run synchronously inside [`Reactor::dispatch`].
pub struct Reactor {
    backend: Backend,
}

impl Reactor {
    /// `mask` is a bitwise-or of [`backend_mask`] constants. The first
    /// acceptable backend wins, checked in priority order: kernel-queue,
    /// descriptor-array, readiness-set, mock. Mock is never chosen unless
    /// its bit is set explicitly.
    pub fn new(mask: u8) -> Result<Reactor, ReactorError> {
        if mask & backend_mask::EPOLL != 0 {
            if let Ok(b) = EpollBackend::new() {
                debug!("reactor: selected epoll backend");
                return Ok(Reactor { backend: Backend::Epoll(b) });
            }
        }
        if mask & backend_mask::POLL != 0 {
            debug!("reactor: selected poll backend");
            return Ok(Reactor { backend: Backend::Poll(PollBackend::new()) });
        }
        if mask & backend_mask::SELECT != 0 {
            debug!("reactor: selected select backend");
            return Ok(Reactor { backend: Backend::Select(SelectBackend::new()) });
        }
        if mask & backend_mask::MOCK != 0 {
            debug!("reactor: selected mock backend");
            return Ok(Reactor { backend: Backend::Mock(MockBackend::new(&[])) });
        }
        Err(ReactorError::NoBackend)
    }

    /// Constructs a reactor pinned to the mock backend driven by `script`.
    pub fn new_mock(script: &'static [MockEventSet]) -> Reactor {
        Reactor { backend: Backend::Mock(MockBackend::new(script)) }
    }

    /// Releases backend-internal resources (kernel queue handle, scratch
    /// buffers). Remaining registered atoms are left untouched; the
    /// application is still responsible for them.
    pub fn dispose(self) {}

    pub fn fd_check(&self) -> usize {
        match &self.backend {
            Backend::Select(b) => b.fd_check(),
            Backend::Poll(b) => b.fd_check(),
            Backend::Epoll(b) => b.fd_check(),
            Backend::Mock(b) => b.fd_check(),
        }
    }

    /// Registers `atom` for `interest`. `atom` must outlive its removal;
    /// the reactor keeps a non-owning pointer to it.
    pub fn add(&mut self, atom: &mut Atom, interest: Interest) -> Result<(), ReactorError> {
        let ptr = NonNull::from(&mut *atom);
        self.backend.as_raw().add(ptr, interest)?;
        atom.interest = interest;
        Ok(())
    }

    pub fn remove(&mut self, atom: &mut Atom) -> Result<(), ReactorError> {
        let fd = atom.fd();
        self.backend.as_raw().remove(fd)?;
        atom.fd = -1;
        Ok(())
    }

    pub fn set(&mut self, atom: &mut Atom, interest: Interest) -> Result<(), ReactorError> {
        self.backend.as_raw().set(atom.fd(), interest)?;
        atom.interest = interest;
        Ok(())
    }

    /// Blocks until at least one registered condition is ready, a signal
    /// interrupts the wait (returns `0`), or `timeout_ms` elapses
    /// (`u32::MAX` waits forever).
    pub fn wait(&mut self, timeout_ms: u32) -> Result<usize, ReactorError> {
        trace!("reactor: wait({timeout_ms})");
        self.backend.as_raw().wait(timeout_ms)
    }

    /// Delivers callbacks for whatever the last [`Reactor::wait`] found
    /// ready. An atom removed by an earlier callback in this same pass
    /// receives no further callbacks.
    pub fn dispatch(&mut self) {
        let ready: Vec<ReadyAtom> = self.backend.as_raw().drain_ready();
        for entry in ready {
            // Safety: non-owning pointer into application-owned storage,
            // guaranteed live by the registration contract on `add`.
            let atom: &mut Atom = unsafe { &mut *entry.atom.as_ptr() };
            if atom.fd() < 0 {
                continue;
            }
            if entry.readable {
                if let Some(mut cb) = atom.on_read.take() {
                    cb(self, atom);
                    // Atom may have been moved out from under us by a
                    // removal inside the callback; re-fetch before storing.
                    let atom: &mut Atom = unsafe { &mut *entry.atom.as_ptr() };
                    if atom.on_read.is_none() {
                        atom.on_read = Some(cb);
                    }
                }
            }
            let atom: &mut Atom = unsafe { &mut *entry.atom.as_ptr() };
            if atom.fd() < 0 {
                continue;
            }
            if entry.writable {
                if let Some(mut cb) = atom.on_write.take() {
                    cb(self, atom);
                    let atom: &mut Atom = unsafe { &mut *entry.atom.as_ptr() };
                    if atom.on_write.is_none() {
                        atom.on_write = Some(cb);
                    }
                }
            }
        }
    }

    pub fn listen(&mut self, addr: SocketAddrV4, atom: &mut Atom) -> Result<(), ReactorError> {
        self.backend.as_raw().listen(addr, atom)
    }

    pub fn connect(&mut self, addr: SocketAddrV4, atom: &mut Atom) -> Result<(), ReactorError> {
        self.backend.as_raw().connect(addr, atom)
    }

    pub fn accept(
        &mut self,
        listener: &mut Atom,
        atom: &mut Atom,
    ) -> Result<SocketAddrV4, ReactorError> {
        self.backend.as_raw().accept(listener, atom)
    }

    pub fn read(&mut self, atom: &mut Atom, buf: &mut [u8]) -> Result<usize, ReactorError> {
        self.backend.as_raw().read(atom, buf)
    }

    pub fn write(&mut self, atom: &mut Atom, buf: &[u8]) -> Result<usize, ReactorError> {
        self.backend.as_raw().write(atom, buf)
    }

    pub fn close(&mut self, atom: &mut Atom) -> Result<(), ReactorError> {
        self.backend.as_raw().close(atom)
    }
}
