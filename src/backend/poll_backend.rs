//! Descriptor-array backend built on `poll(2)`.
//!
//! Grounded on the original reactor's `poll` poller: a growable array of
//! `pollfd`-shaped slots, each paired with the registered atom. Removal
//! marks a slot `fd = -1` instead of compacting the array so outstanding
//! indices stay valid; `add` reuses the first such slot before growing.

use std::net::SocketAddrV4;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;

use super::{RawBackend, ReadyAtom};
use crate::atom::{Atom, Interest};
use crate::error::ReactorError;
use crate::sys::syscall;

/// Matches the original poll poller's `IO_POLL_MAX_FDS`.
pub const MAX_POLL_FDS: usize = 1024;

struct Slot {
    fd: RawFd,
    events: libc::c_short,
    revents: libc::c_short,
    atom: Option<NonNull<Atom>>,
}

pub struct PollBackend {
    slots: Vec<Slot>,
    registered: usize,
}

impl PollBackend {
    pub fn new() -> PollBackend {
        PollBackend { slots: Vec::new(), registered: 0 }
    }

    fn find_fd(&self, fd: RawFd) -> Option<usize> {
        self.slots.iter().position(|s| s.fd == fd)
    }

    fn find_free(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.fd == -1)
    }
}

fn to_events(interest: Interest) -> libc::c_short {
    let mut e = 0;
    if interest.read {
        e |= libc::POLLIN;
    }
    if interest.write {
        e |= libc::POLLOUT;
    }
    e as libc::c_short
}

impl RawBackend for PollBackend {
    fn add(&mut self, atom: NonNull<Atom>, interest: Interest) -> Result<(), ReactorError> {
        let fd = unsafe { atom.as_ref().fd() };
        if fd < 0 {
            return Err(ReactorError::Range { fd });
        }
        if self.find_fd(fd).is_some() {
            return Err(ReactorError::AlreadyRegistered { fd });
        }
        if self.find_free().is_none() && self.slots.len() >= MAX_POLL_FDS {
            return Err(ReactorError::Range { fd });
        }

        let slot = Slot { fd, events: to_events(interest), revents: 0, atom: Some(atom) };
        if let Some(idx) = self.find_free() {
            self.slots[idx] = slot;
        } else {
            self.slots.push(slot);
        }
        self.registered += 1;
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> Result<(), ReactorError> {
        match self.find_fd(fd) {
            Some(idx) => {
                self.slots[idx].fd = -1;
                self.slots[idx].atom = None;
                self.slots[idx].revents = 0;
                self.registered -= 1;
                Ok(())
            }
            None => Err(ReactorError::NotRegistered { fd }),
        }
    }

    fn set(&mut self, fd: RawFd, interest: Interest) -> Result<(), ReactorError> {
        match self.find_fd(fd) {
            Some(idx) => {
                self.slots[idx].events = to_events(interest);
                Ok(())
            }
            None => Err(ReactorError::NotRegistered { fd }),
        }
    }

    fn wait(&mut self, timeout_ms: u32) -> Result<usize, ReactorError> {
        let mut pollfds: Vec<libc::pollfd> = self
            .slots
            .iter()
            .map(|s| libc::pollfd { fd: s.fd, events: s.events, revents: 0 })
            .collect();

        let timeout = if timeout_ms == u32::MAX {
            -1
        } else {
            timeout_ms.min(libc::c_int::MAX as u32) as libc::c_int
        };

        let ret = match syscall!(poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout)) {
            Ok(n) => n,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => 0,
            Err(e) => return Err(ReactorError::from_io(-1, e)),
        };

        for (slot, pfd) in self.slots.iter_mut().zip(pollfds.iter()) {
            slot.revents = pfd.revents;
        }

        Ok(ret as usize)
    }

    fn drain_ready(&mut self) -> Vec<ReadyAtom> {
        let mut ready = Vec::new();
        for slot in self.slots.iter_mut() {
            if slot.fd == -1 || slot.revents == 0 {
                continue;
            }
            let readable = slot.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0;
            let writable = slot.revents & libc::POLLOUT != 0;
            slot.revents = 0;
            if let Some(atom) = slot.atom {
                if readable || writable {
                    ready.push(ReadyAtom { atom, readable, writable });
                }
            }
        }
        ready
    }

    fn fd_check(&self) -> usize {
        self.registered
    }

    fn listen(&mut self, addr: SocketAddrV4, atom: &mut Atom) -> Result<(), ReactorError> {
        super::real_listen(self, addr, atom)
    }

    fn connect(&mut self, addr: SocketAddrV4, atom: &mut Atom) -> Result<(), ReactorError> {
        super::real_connect(self, addr, atom)
    }

    fn accept(
        &mut self,
        listener: &mut Atom,
        atom: &mut Atom,
    ) -> Result<SocketAddrV4, ReactorError> {
        super::real_accept(self, listener, atom)
    }

    fn read(&mut self, atom: &mut Atom, buf: &mut [u8]) -> Result<usize, ReactorError> {
        crate::socket::read(atom.fd(), buf)
    }

    fn write(&mut self, atom: &mut Atom, buf: &[u8]) -> Result<usize, ReactorError> {
        crate::socket::write(atom.fd(), buf)
    }

    fn close(&mut self, atom: &mut Atom) -> Result<(), ReactorError> {
        super::real_close(self, atom)
    }
}
