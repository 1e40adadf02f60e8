//! Edge-triggered backend built on `epoll(7)`.
//!
//! Grounded on the original reactor's `epoll` poller: every registration is
//! edge-triggered (`EPOLLET` is always OR'd in, as the original's
//! `get_events()` does), the atom pointer travels in `epoll_event.u64`
//! instead of a lookup table, and ready events come back as a flat array
//! sized by a fixed scratch capacity.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;

use super::{RawBackend, ReadyAtom};
use crate::atom::{Atom, Interest};
use crate::error::ReactorError;
use crate::sys::syscall;

const MAX_READY_EVENTS: usize = 256;

fn to_epoll_events(interest: Interest) -> u32 {
    let mut e = libc::EPOLLET as u32;
    if interest.read {
        e |= libc::EPOLLIN as u32;
    }
    if interest.write {
        e |= libc::EPOLLOUT as u32;
    }
    e
}

pub struct EpollBackend {
    epfd: RawFd,
    table: HashMap<RawFd, NonNull<Atom>>,
    events: Vec<libc::epoll_event>,
    ready_count: usize,
}

impl EpollBackend {
    pub fn new() -> Result<EpollBackend, ReactorError> {
        let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))
            .map_err(|e| ReactorError::from_io(-1, e))?;
        Ok(EpollBackend {
            epfd,
            table: HashMap::new(),
            events: vec![unsafe { std::mem::zeroed() }; MAX_READY_EVENTS],
            ready_count: 0,
        })
    }
}

impl Drop for EpollBackend {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

impl RawBackend for EpollBackend {
    fn add(&mut self, atom: NonNull<Atom>, interest: Interest) -> Result<(), ReactorError> {
        let fd = unsafe { atom.as_ref().fd() };
        if fd < 0 {
            return Err(ReactorError::Range { fd });
        }
        if self.table.contains_key(&fd) {
            return Err(ReactorError::AlreadyRegistered { fd });
        }

        let mut event = libc::epoll_event {
            events: to_epoll_events(interest),
            u64: atom.as_ptr() as u64,
        };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut event))
            .map_err(|e| ReactorError::from_io(fd, e))?;

        self.table.insert(fd, atom);
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> Result<(), ReactorError> {
        if self.table.remove(&fd).is_none() {
            return Err(ReactorError::NotRegistered { fd });
        }
        let mut event = libc::epoll_event { events: 0, u64: 0 };
        let _ = syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut event));
        Ok(())
    }

    fn set(&mut self, fd: RawFd, interest: Interest) -> Result<(), ReactorError> {
        let atom = *self.table.get(&fd).ok_or(ReactorError::NotRegistered { fd })?;
        let mut event = libc::epoll_event {
            events: to_epoll_events(interest),
            u64: atom.as_ptr() as u64,
        };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut event))
            .map_err(|e| ReactorError::from_io(fd, e))?;
        Ok(())
    }

    fn wait(&mut self, timeout_ms: u32) -> Result<usize, ReactorError> {
        let timeout = if timeout_ms == u32::MAX {
            -1
        } else {
            timeout_ms.min(libc::c_int::MAX as u32) as libc::c_int
        };

        let ret = match syscall!(epoll_wait(
            self.epfd,
            self.events.as_mut_ptr(),
            self.events.len() as libc::c_int,
            timeout
        )) {
            Ok(n) => n,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => 0,
            Err(e) => return Err(ReactorError::from_io(-1, e)),
        };

        self.ready_count = ret as usize;
        Ok(self.ready_count)
    }

    fn drain_ready(&mut self) -> Vec<ReadyAtom> {
        let mut ready = Vec::with_capacity(self.ready_count);
        for event in &self.events[..self.ready_count] {
            let events = event.events;
            let ptr = event.u64 as *mut Atom;
            let atom = match NonNull::new(ptr) {
                Some(a) => a,
                None => continue,
            };
            let readable = events & (libc::EPOLLIN as u32) != 0;
            let writable = events & (libc::EPOLLOUT as u32) != 0;
            ready.push(ReadyAtom { atom, readable, writable });
        }
        self.ready_count = 0;
        ready
    }

    fn fd_check(&self) -> usize {
        self.table.len()
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

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_fds() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn fd_check_tracks_add_and_remove() {
        let mut backend = EpollBackend::new().unwrap();
        let (r, w) = pipe_fds();
        let mut atom = Atom::new();
        atom.fd = r;
        backend.add(NonNull::from(&mut atom), Interest::READ).unwrap();
        assert_eq!(backend.fd_check(), 1);
        backend.remove(r).unwrap();
        assert_eq!(backend.fd_check(), 0);
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn write_end_wakes_the_read_end() {
        let mut backend = EpollBackend::new().unwrap();
        let (r, w) = pipe_fds();
        let mut atom = Atom::new();
        atom.fd = r;
        backend.add(NonNull::from(&mut atom), Interest::READ).unwrap();

        assert_eq!(unsafe { libc::write(w, b"x".as_ptr() as *const _, 1) }, 1);
        assert_eq!(backend.wait(1000).unwrap(), 1);
        let ready = backend.drain_ready();
        assert_eq!(ready.len(), 1);
        assert!(ready[0].readable);
        assert!(!ready[0].writable);

        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }
}
