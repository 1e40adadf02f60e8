//! Readiness-set backend built on `select(2)`.
//!
//! Grounded on the original reactor's `select` poller: a bounded table of
//! registered atoms plus read/write interest bitmaps, and a pair of
//! "working" bitmaps materialized fresh for each `wait` call. `max_fd`
//! tracks the highest registered descriptor and is recomputed on removal so
//! dispatch never scans past it.

use std::collections::HashMap;
use std::mem;
use std::net::SocketAddrV4;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;

use libc::{fd_set, FD_CLR, FD_ISSET, FD_SET, FD_ZERO};

use super::{RawBackend, ReadyAtom};
use crate::atom::{Atom, Interest};
use crate::error::ReactorError;
use crate::sys::syscall;

/// Matches the platform's `fd_set` capacity (`FD_SETSIZE`); `select(2)`
/// cannot address a descriptor past this.
const FD_CAPACITY: RawFd = 1024;

fn empty_set() -> fd_set {
    unsafe {
        let mut set: fd_set = mem::zeroed();
        FD_ZERO(&mut set);
        set
    }
}

pub struct SelectBackend {
    table: HashMap<RawFd, NonNull<Atom>>,
    read_interest: fd_set,
    write_interest: fd_set,
    max_fd: RawFd,
    working_read: fd_set,
    working_write: fd_set,
}

impl SelectBackend {
    pub fn new() -> SelectBackend {
        SelectBackend {
            table: HashMap::new(),
            read_interest: empty_set(),
            write_interest: empty_set(),
            max_fd: -1,
            working_read: empty_set(),
            working_write: empty_set(),
        }
    }

    fn recompute_max_fd(&mut self) {
        self.max_fd = self.table.keys().copied().max().unwrap_or(-1);
    }
}

impl RawBackend for SelectBackend {
    fn add(&mut self, atom: NonNull<Atom>, interest: Interest) -> Result<(), ReactorError> {
        let fd = unsafe { atom.as_ref().fd() };
        if fd < 0 || fd >= FD_CAPACITY {
            return Err(ReactorError::Range { fd });
        }
        if self.table.contains_key(&fd) {
            return Err(ReactorError::AlreadyRegistered { fd });
        }

        self.table.insert(fd, atom);
        self.set(fd, interest)?;
        if fd > self.max_fd {
            self.max_fd = fd;
        }
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> Result<(), ReactorError> {
        if self.table.remove(&fd).is_none() {
            return Err(ReactorError::NotRegistered { fd });
        }
        unsafe {
            FD_CLR(fd, &mut self.read_interest);
            FD_CLR(fd, &mut self.write_interest);
            // Clear the in-flight working copies too so a removal during
            // dispatch can't leave a stale callback queued for this fd.
            FD_CLR(fd, &mut self.working_read);
            FD_CLR(fd, &mut self.working_write);
        }
        self.recompute_max_fd();
        Ok(())
    }

    fn set(&mut self, fd: RawFd, interest: Interest) -> Result<(), ReactorError> {
        if !self.table.contains_key(&fd) {
            return Err(ReactorError::NotRegistered { fd });
        }
        unsafe {
            if interest.read {
                FD_SET(fd, &mut self.read_interest);
            } else {
                FD_CLR(fd, &mut self.read_interest);
            }
            if interest.write {
                FD_SET(fd, &mut self.write_interest);
            } else {
                FD_CLR(fd, &mut self.write_interest);
            }
        }
        Ok(())
    }

    fn wait(&mut self, timeout_ms: u32) -> Result<usize, ReactorError> {
        self.working_read = self.read_interest;
        self.working_write = self.write_interest;

        let mut timeout = libc::timeval {
            tv_sec: (timeout_ms / 1000) as libc::time_t,
            tv_usec: ((timeout_ms % 1000) * 1000) as libc::suseconds_t,
        };
        let timeout_ptr = if timeout_ms == u32::MAX {
            std::ptr::null_mut()
        } else {
            &mut timeout as *mut _
        };

        let ret = match syscall!(select(
            self.max_fd + 1,
            &mut self.working_read,
            &mut self.working_write,
            std::ptr::null_mut(),
            timeout_ptr
        )) {
            Ok(n) => n,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => 0,
            Err(e) => return Err(ReactorError::from_io(-1, e)),
        };

        Ok(ret as usize)
    }

    fn drain_ready(&mut self) -> Vec<ReadyAtom> {
        let mut ready = Vec::new();
        // max_fd can only grow via `add`, never mid-dispatch (adds during
        // dispatch apply to the *next* wait), so it's safe to snapshot here.
        for fd in 0..=self.max_fd {
            let readable = unsafe { FD_ISSET(fd, &self.working_read) };
            let writable = unsafe { FD_ISSET(fd, &self.working_write) };
            if !readable && !writable {
                continue;
            }
            if let Some(atom) = self.table.get(&fd) {
                ready.push(ReadyAtom { atom: *atom, readable, writable });
            }
        }
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
        let mut backend = SelectBackend::new();
        let mut atom = Atom::new();
        atom.fd = 7;
        backend.add(NonNull::from(&mut atom), Interest::READ).unwrap();
        assert_eq!(backend.fd_check(), 1);
        backend.remove(7).unwrap();
        assert_eq!(backend.fd_check(), 0);
    }

    #[test]
    fn removed_fd_can_be_reused_by_a_different_atom() {
        let mut backend = SelectBackend::new();
        let mut first = Atom::new();
        first.fd = 7;
        backend.add(NonNull::from(&mut first), Interest::READ).unwrap();
        backend.remove(7).unwrap();

        let mut second = Atom::new();
        second.fd = 7;
        backend.add(NonNull::from(&mut second), Interest::READ).unwrap();
        assert_eq!(backend.fd_check(), 1);
        assert_eq!(backend.table.get(&7).unwrap().as_ptr(), &mut second as *mut Atom);
    }

    #[test]
    fn read_only_interest_never_reports_writable() {
        let (r, w) = pipe_fds();
        let mut backend = SelectBackend::new();
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

    #[test]
    fn write_only_interest_never_reports_readable() {
        let (r, w) = pipe_fds();
        let mut backend = SelectBackend::new();
        let mut atom = Atom::new();
        atom.fd = w;
        backend.add(NonNull::from(&mut atom), Interest::WRITE).unwrap();

        assert_eq!(backend.wait(1000).unwrap(), 1); // a pipe's write end is immediately writable
        let ready = backend.drain_ready();
        assert_eq!(ready.len(), 1);
        assert!(ready[0].writable);
        assert!(!ready[0].readable);

        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn add_past_fd_capacity_is_rejected() {
        let mut backend = SelectBackend::new();
        let mut atom = Atom::new();
        atom.fd = FD_CAPACITY;
        let err = backend.add(NonNull::from(&mut atom), Interest::READ).unwrap_err();
        assert!(matches!(err, ReactorError::Range { .. }));
    }
}
