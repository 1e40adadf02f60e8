//! Deterministic mock backend.
//!
//! Drives the exact same application code as the real backends from a
//! scripted, compile-time event queue instead of the kernel. Grounded on
//! the original reactor's mock poller data model (`mock.h`) and on its
//! actual behavioral driver, the handshake test program that scripts a
//! listener accepting one connection and exchanging one line.
//!
//! A script is an ordered sequence of **event sets**, one per `wait` step.
//! `Listen`/`Connect`/`Accept`/`Read`/`Write`/`Close` are *expected calls*:
//! the application must make exactly that call, in whichever order it
//! likes within the set, for the event to be consumed. `EventRead`/
//! `EventWrite` are *dispatched* events: they drive `dispatch` instead of
//! being satisfied by a call. `Nop` pads a set; `Finished` must be the sole
//! entry of the final set.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;

use super::{RawBackend, ReadyAtom};
use crate::atom::{Atom, Interest};
use crate::error::ReactorError;

/// Matches the original mock poller's `MAX_EVENTS_PER_SET`.
pub const MAX_EVENTS_PER_SET: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockEventKind {
    Nop,
    Listen,
    Connect,
    Accept,
    Read,
    Write,
    EventRead,
    EventWrite,
    Close,
    Finished,
}

#[derive(Debug, Clone, Copy)]
pub enum MockPayload {
    None,
    Bytes(&'static [u8]),
    Addr(SocketAddrV4),
    /// `ERROR(errno)` in the original mock macros.
    Errno(i32),
}

#[derive(Debug, Clone, Copy)]
pub struct MockEvent {
    pub kind: MockEventKind,
    pub handle: Option<&'static str>,
    pub payload: MockPayload,
    pub file: &'static str,
    pub line: u32,
}

pub struct MockEventSet {
    pub events: &'static [MockEvent],
}

/// Builds a [`MockEvent`] stamped with the call site, mirroring the
/// original `EVENT` macro's use of `__FILE__`/`__LINE__`.
#[macro_export]
macro_rules! mock_event {
    ($kind:expr, $handle:expr, $payload:expr) => {
        $crate::MockEvent {
            kind: $kind,
            handle: $handle,
            payload: $payload,
            file: file!(),
            line: line!(),
        }
    };
}

struct MockConn {
    atom: NonNull<Atom>,
    #[allow(dead_code)]
    addr: Option<SocketAddrV4>,
}

/// The mock backend's own state: the script, the current set's completion
/// bitmap, the fd-keyed connection table, and a diagnostic in-flight stack
/// (which op is currently running, for nested-call error messages).
pub struct MockBackend {
    sets: &'static [MockEventSet],
    current_set: i64,
    used: Vec<bool>,
    by_fd: HashMap<RawFd, MockConn>,
    by_handle: HashMap<&'static str, RawFd>,
    next_fd: RawFd,
    in_flight: Vec<&'static str>,
    finished: bool,
}

impl MockBackend {
    pub fn new(sets: &'static [MockEventSet]) -> MockBackend {
        let (current_set, used) = match sets.first() {
            Some(set) => (0, vec![false; set.events.len()]),
            None => (-1, Vec::new()),
        };
        MockBackend {
            sets,
            current_set,
            used,
            by_fd: HashMap::new(),
            by_handle: HashMap::new(),
            // Starts well past any real fd so a stray leak into a real
            // backend table is obvious in diagnostics.
            next_fd: 10_000,
            in_flight: Vec::new(),
            finished: false,
        }
    }

    fn current_events(&self) -> &'static [MockEvent] {
        if self.current_set < 0 {
            return &[];
        }
        self.sets[self.current_set as usize].events
    }

    fn verify_consumed(&self) {
        let mut unconsumed = Vec::new();
        for (i, e) in self.current_events().iter().enumerate() {
            if !matches!(e.kind, MockEventKind::Nop | MockEventKind::Finished) && !self.used[i] {
                unconsumed.push(format!("#{} {:?} ({}:{})", i, e.kind, e.file, e.line));
            }
        }
        if !unconsumed.is_empty() {
            panic!(
                "mock script step {}: unconsumed events before next wait(): {}",
                self.current_set,
                unconsumed.join(", ")
            );
        }
    }

    fn find_unused(&self, kind: MockEventKind, pred: impl Fn(&MockEvent) -> bool) -> Option<usize> {
        self.current_events()
            .iter()
            .enumerate()
            .find_map(|(i, e)| if !self.used[i] && e.kind == kind && pred(e) { Some(i) } else { None })
    }

    fn mismatch(&self, op: &str, handle: Option<&str>) -> ReactorError {
        ReactorError::mock_mismatch(format!(
            "no unused '{}' event for {:?} at script step {} (in-flight: {:?})",
            op, handle, self.current_set, self.in_flight
        ))
    }

    fn errno_result(fd: RawFd, errno: i32) -> Result<usize, ReactorError> {
        if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK {
            Ok(0)
        } else if errno == libc::EPIPE || errno == libc::ECONNRESET {
            Err(ReactorError::Closed { fd })
        } else {
            Err(ReactorError::from_io(fd, std::io::Error::from_raw_os_error(errno)))
        }
    }
}

impl RawBackend for MockBackend {
    fn add(&mut self, atom: NonNull<Atom>, interest: Interest) -> Result<(), ReactorError> {
        let handle = unsafe { atom.as_ref().handle }
            .ok_or_else(|| ReactorError::mock_mismatch("add: atom has no handle; required by the mock backend"))?;
        let fd = unsafe { atom.as_ref().fd() };
        let fd = if fd >= 0 {
            fd
        } else {
            let assigned = self.next_fd;
            self.next_fd += 1;
            unsafe { (*atom.as_ptr()).fd = assigned };
            assigned
        };
        if self.by_fd.contains_key(&fd) {
            return Err(ReactorError::AlreadyRegistered { fd });
        }
        unsafe { (*atom.as_ptr()).interest = interest };
        self.by_fd.insert(fd, MockConn { atom, addr: None });
        self.by_handle.insert(handle, fd);
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> Result<(), ReactorError> {
        match self.by_fd.remove(&fd) {
            Some(_) => {
                self.by_handle.retain(|_, v| *v != fd);
                Ok(())
            }
            None => Err(ReactorError::NotRegistered { fd }),
        }
    }

    fn set(&mut self, fd: RawFd, interest: Interest) -> Result<(), ReactorError> {
        let conn = self.by_fd.get(&fd).ok_or(ReactorError::NotRegistered { fd })?;
        unsafe { (*conn.atom.as_ptr()).interest = interest };
        Ok(())
    }

    fn wait(&mut self, _timeout_ms: u32) -> Result<usize, ReactorError> {
        if self.finished {
            return Err(ReactorError::mock_mismatch("wait() called after the script finished"));
        }
        if self.current_set >= 0 {
            self.verify_consumed();
        }
        self.current_set += 1;
        if self.current_set as usize >= self.sets.len() {
            return Err(ReactorError::mock_mismatch("script exhausted without a `Finished` marker"));
        }

        let events = self.sets[self.current_set as usize].events;
        if events.first().map(|e| e.kind) == Some(MockEventKind::Finished) {
            self.finished = true;
            self.used = Vec::new();
            return Ok(0);
        }

        self.used = vec![false; events.len()];
        let dispatched = events
            .iter()
            .filter(|e| matches!(e.kind, MockEventKind::EventRead | MockEventKind::EventWrite))
            .count();
        Ok(dispatched)
    }

    fn drain_ready(&mut self) -> Vec<ReadyAtom> {
        let mut ready = Vec::new();
        for (i, e) in self.current_events().iter().enumerate() {
            if self.used[i] {
                continue;
            }
            let (is_read, is_write) = match e.kind {
                MockEventKind::EventRead => (true, false),
                MockEventKind::EventWrite => (false, true),
                _ => continue,
            };
            let handle = match e.handle {
                Some(h) => h,
                None => continue,
            };
            let fd = match self.by_handle.get(handle) {
                Some(f) => *f,
                None => continue,
            };
            let conn = match self.by_fd.get(&fd) {
                Some(c) => c,
                None => continue,
            };
            let interest = unsafe { conn.atom.as_ref().interest() };
            if (is_read && !interest.read) || (is_write && !interest.write) {
                continue;
            }
            self.used[i] = true;
            ready.push(ReadyAtom { atom: conn.atom, readable: is_read, writable: is_write });
        }
        ready
    }

    fn fd_check(&self) -> usize {
        self.by_fd.len()
    }

    fn listen(&mut self, addr: SocketAddrV4, atom: &mut Atom) -> Result<(), ReactorError> {
        self.in_flight.push("listen");
        let result = (|| {
            let handle = atom
                .handle
                .ok_or_else(|| ReactorError::mock_mismatch("listen: atom has no handle"))?;
            if atom.source_address != Some(addr) {
                return Err(ReactorError::mock_mismatch(format!(
                    "listen: atom's source address {:?} does not equal the listen address {}",
                    atom.source_address, addr
                )));
            }
            let idx = self
                .find_unused(MockEventKind::Listen, |e| {
                    e.handle == Some(handle) && matches!(e.payload, MockPayload::Addr(a) if a == addr)
                })
                .ok_or_else(|| self.mismatch("listen", Some(handle)))?;
            self.used[idx] = true;

            let fd = self.next_fd;
            self.next_fd += 1;
            atom.fd = fd;
            atom.is_listener = true;
            atom.interest = Interest::READ;

            self.by_fd.insert(fd, MockConn { atom: NonNull::from(&mut *atom), addr: Some(addr) });
            self.by_handle.insert(handle, fd);
            Ok(())
        })();
        self.in_flight.pop();
        result
    }

    fn connect(&mut self, addr: SocketAddrV4, atom: &mut Atom) -> Result<(), ReactorError> {
        self.in_flight.push("connect");
        let result = (|| {
            let handle = atom
                .handle
                .ok_or_else(|| ReactorError::mock_mismatch("connect: atom has no handle"))?;
            if atom.source_address == Some(addr) {
                return Err(ReactorError::mock_mismatch(format!(
                    "connect: atom's source address {} must differ from the destination",
                    addr
                )));
            }
            let idx = self
                .find_unused(MockEventKind::Connect, |e| {
                    e.handle == Some(handle) && matches!(e.payload, MockPayload::Addr(a) if a == addr)
                })
                .ok_or_else(|| self.mismatch("connect", Some(handle)))?;
            self.used[idx] = true;

            let fd = self.next_fd;
            self.next_fd += 1;
            atom.fd = fd;
            atom.interest = Interest::WRITE;

            self.by_fd.insert(fd, MockConn { atom: NonNull::from(&mut *atom), addr: Some(addr) });
            self.by_handle.insert(handle, fd);
            Ok(())
        })();
        self.in_flight.pop();
        result
    }

    fn accept(&mut self, listener: &mut Atom, atom: &mut Atom) -> Result<SocketAddrV4, ReactorError> {
        self.in_flight.push("accept");
        let result = (|| {
            if !listener.is_listener {
                return Err(ReactorError::mock_mismatch("accept: atom is not a listener"));
            }
            let listener_handle = listener
                .handle
                .ok_or_else(|| ReactorError::mock_mismatch("accept: listener has no handle"))?;
            let idx = self
                .find_unused(MockEventKind::Accept, |e| e.handle == Some(listener_handle))
                .ok_or_else(|| self.mismatch("accept", Some(listener_handle)))?;
            let remote = match self.current_events()[idx].payload {
                MockPayload::Addr(a) => a,
                _ => return Err(ReactorError::mock_mismatch("accept: scripted event carries no remote address")),
            };
            self.used[idx] = true;

            let handle = atom
                .handle
                .ok_or_else(|| ReactorError::mock_mismatch("accept: new connection atom has no handle"))?;
            let fd = self.next_fd;
            self.next_fd += 1;
            atom.fd = fd;
            // Both directions: an accepted connection is expected to echo,
            // which means writing back without a separate `set` call.
            atom.interest = Interest::BOTH;
            self.by_fd.insert(fd, MockConn { atom: NonNull::from(&mut *atom), addr: Some(remote) });
            self.by_handle.insert(handle, fd);
            Ok(remote)
        })();
        self.in_flight.pop();
        result
    }

    fn read(&mut self, atom: &mut Atom, buf: &mut [u8]) -> Result<usize, ReactorError> {
        self.in_flight.push("read");
        let result = (|| {
            let handle = atom.handle.ok_or_else(|| ReactorError::mock_mismatch("read: atom has no handle"))?;
            if !atom.interest().read {
                return Err(ReactorError::mock_mismatch(format!(
                    "read: atom {:?} has no read interest registered",
                    handle
                )));
            }
            let idx = self
                .find_unused(MockEventKind::Read, |e| e.handle == Some(handle))
                .ok_or_else(|| self.mismatch("read", Some(handle)))?;
            let payload = self.current_events()[idx].payload;
            self.used[idx] = true;
            match payload {
                MockPayload::Errno(errno) => Self::errno_result(atom.fd(), errno),
                MockPayload::Bytes(data) if data.is_empty() => Err(ReactorError::Closed { fd: atom.fd() }),
                MockPayload::Bytes(data) => {
                    if data.len() > buf.len() {
                        return Err(ReactorError::mock_mismatch(format!(
                            "read: caller buffer ({} bytes) too small for scripted payload ({} bytes)",
                            buf.len(),
                            data.len()
                        )));
                    }
                    buf[..data.len()].copy_from_slice(data);
                    Ok(data.len())
                }
                MockPayload::None | MockPayload::Addr(_) => Ok(0),
            }
        })();
        self.in_flight.pop();
        result
    }

    fn write(&mut self, atom: &mut Atom, buf: &[u8]) -> Result<usize, ReactorError> {
        self.in_flight.push("write");
        let result = (|| {
            let handle = atom.handle.ok_or_else(|| ReactorError::mock_mismatch("write: atom has no handle"))?;
            if !atom.interest().write {
                return Err(ReactorError::mock_mismatch(format!(
                    "write: atom {:?} has no write interest registered",
                    handle
                )));
            }
            let idx = self
                .find_unused(MockEventKind::Write, |e| e.handle == Some(handle))
                .ok_or_else(|| self.mismatch("write", Some(handle)))?;
            let payload = self.current_events()[idx].payload;
            self.used[idx] = true;
            match payload {
                MockPayload::Errno(errno) => Self::errno_result(atom.fd(), errno),
                MockPayload::Bytes(expected) => {
                    if buf.len() > expected.len() || buf != &expected[..buf.len()] {
                        return Err(ReactorError::mock_mismatch(
                            "write: bytes did not match the scripted payload".to_string(),
                        ));
                    }
                    Ok(buf.len())
                }
                MockPayload::None | MockPayload::Addr(_) => Ok(buf.len()),
            }
        })();
        self.in_flight.pop();
        result
    }

    fn close(&mut self, atom: &mut Atom) -> Result<(), ReactorError> {
        self.in_flight.push("close");
        let result = (|| {
            if atom.fd() < 0 {
                return Ok(());
            }
            let handle = atom.handle.ok_or_else(|| ReactorError::mock_mismatch("close: atom has no handle"))?;
            let idx = self
                .find_unused(MockEventKind::Close, |e| e.handle == Some(handle))
                .ok_or_else(|| self.mismatch("close", Some(handle)))?;
            self.used[idx] = true;
            let fd = atom.fd();
            self.by_fd.remove(&fd);
            self.by_handle.remove(handle);
            atom.fd = -1;
            Ok(())
        })();
        self.in_flight.pop();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn listen_addr() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 9000)
    }

    #[test]
    fn listen_rejects_mismatched_source_address() {
        static EVENTS: &[MockEventSet] = &[MockEventSet {
            events: &[mock_event!(
                MockEventKind::Listen,
                Some("s"),
                MockPayload::Addr(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 9000))
            )],
        }];
        let mut backend = MockBackend::new(EVENTS);
        let mut atom = Atom::with_handle("s"); // no source address set at all
        let err = backend.listen(listen_addr(), &mut atom).unwrap_err();
        assert!(matches!(err, ReactorError::MockMismatch(_)));
    }

    #[test]
    fn listen_accepts_matching_source_address() {
        static EVENTS: &[MockEventSet] = &[MockEventSet {
            events: &[mock_event!(
                MockEventKind::Listen,
                Some("s"),
                MockPayload::Addr(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 9000))
            )],
        }];
        let mut backend = MockBackend::new(EVENTS);
        let mut atom = Atom::with_handle_and_source("s", listen_addr());
        backend.listen(listen_addr(), &mut atom).unwrap();
        assert!(atom.is_registered());
    }

    #[test]
    fn connect_rejects_source_address_equal_to_destination() {
        static EVENTS: &[MockEventSet] = &[MockEventSet {
            events: &[mock_event!(
                MockEventKind::Connect,
                Some("c"),
                MockPayload::Addr(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 9000))
            )],
        }];
        let mut backend = MockBackend::new(EVENTS);
        let mut atom = Atom::with_handle_and_source("c", listen_addr());
        let err = backend.connect(listen_addr(), &mut atom).unwrap_err();
        assert!(matches!(err, ReactorError::MockMismatch(_)));
    }

    #[test]
    fn connect_accepts_distinct_source_address() {
        static EVENTS: &[MockEventSet] = &[MockEventSet {
            events: &[mock_event!(
                MockEventKind::Connect,
                Some("c"),
                MockPayload::Addr(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 9000))
            )],
        }];
        let mut backend = MockBackend::new(EVENTS);
        let mut atom =
            Atom::with_handle_and_source("c", SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 5000));
        backend.connect(listen_addr(), &mut atom).unwrap();
        assert!(atom.is_registered());
    }

    #[test]
    fn read_requires_read_interest() {
        static EVENTS: &[MockEventSet] = &[
            MockEventSet { events: &[] },
            MockEventSet { events: &[mock_event!(MockEventKind::Read, Some("c"), MockPayload::None)] },
        ];
        let mut backend = MockBackend::new(EVENTS);
        let mut atom = Atom::with_handle("c");
        backend.add(NonNull::from(&mut atom), Interest::WRITE).unwrap();
        backend.wait(0).unwrap();
        let mut buf = [0u8; 8];
        let err = backend.read(&mut atom, &mut buf).unwrap_err();
        assert!(matches!(err, ReactorError::MockMismatch(_)));
    }

    #[test]
    fn write_requires_write_interest() {
        static EVENTS: &[MockEventSet] = &[
            MockEventSet { events: &[] },
            MockEventSet { events: &[mock_event!(MockEventKind::Write, Some("c"), MockPayload::None)] },
        ];
        let mut backend = MockBackend::new(EVENTS);
        let mut atom = Atom::with_handle("c");
        backend.add(NonNull::from(&mut atom), Interest::READ).unwrap();
        backend.wait(0).unwrap();
        let err = backend.write(&mut atom, b"x").unwrap_err();
        assert!(matches!(err, ReactorError::MockMismatch(_)));
    }

    #[test]
    #[should_panic(expected = "unconsumed events")]
    fn wait_panics_when_a_scripted_event_was_never_consumed() {
        static EVENTS: &[MockEventSet] = &[
            MockEventSet { events: &[] },
            MockEventSet { events: &[mock_event!(MockEventKind::EventRead, Some("s"), MockPayload::None)] },
        ];
        let mut backend = MockBackend::new(EVENTS);
        // First wait() advances past the empty leading set; the EventRead
        // scheduled in the set it lands on is never drained, so the second
        // wait() must refuse to move past it.
        backend.wait(0).unwrap();
        backend.wait(0).unwrap();
    }
}
