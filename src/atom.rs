//! The value type bound to each registered file descriptor.

use std::net::SocketAddrV4;
use std::os::unix::io::RawFd;

use crate::reactor::Reactor;

/// Interest flags. There is no exceptional-condition flag; OOB data is out
/// of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const NONE: Interest = Interest { read: false, write: false };
    pub const READ: Interest = Interest { read: true, write: false };
    pub const WRITE: Interest = Interest { read: false, write: true };
    pub const BOTH: Interest = Interest { read: true, write: true };

    pub fn is_empty(&self) -> bool {
        !self.read && !self.write
    }
}

pub type Callback = Box<dyn FnMut(&mut Reactor, &mut Atom)>;

/// A registered file descriptor plus the callbacks fired on readiness.
///
/// The reactor keeps a non-owning reference to an `Atom`; the application
/// owns the storage and must keep it alive from `add` until `remove` (or
/// `close`, which removes and closes atomically). Moving or dropping an
/// `Atom` while it is registered is a programming error.
pub struct Atom {
    pub(crate) fd: RawFd,
    pub(crate) interest: Interest,
    pub(crate) is_listener: bool,
    pub on_read: Option<Callback>,
    pub on_write: Option<Callback>,
    /// Test-only identity used by the mock backend to match scripted events
    /// and calls to this atom. Ignored by every real backend.
    pub handle: Option<&'static str>,
    /// Test-only fixed address of the connection's own end, mirroring the
    /// original mock poller's `mock_connection.source_address`. A listener's
    /// source address must equal the address it listens on; a connector's
    /// must differ from the address it connects to. Ignored by every real
    /// backend.
    pub source_address: Option<SocketAddrV4>,
}

impl Atom {
    pub fn new() -> Atom {
        Atom {
            fd: -1,
            interest: Interest::NONE,
            is_listener: false,
            on_read: None,
            on_write: None,
            handle: None,
            source_address: None,
        }
    }

    pub fn with_handle(handle: &'static str) -> Atom {
        let mut atom = Atom::new();
        atom.handle = Some(handle);
        atom
    }

    /// Like [`Atom::with_handle`], but also pins the connection's own
    /// address for the mock backend's source-address sanity checks.
    pub fn with_handle_and_source(handle: &'static str, source: SocketAddrV4) -> Atom {
        let mut atom = Atom::with_handle(handle);
        atom.source_address = Some(source);
        atom
    }

    pub fn on_read(mut self, f: impl FnMut(&mut Reactor, &mut Atom) + 'static) -> Atom {
        self.on_read = Some(Box::new(f));
        self
    }

    pub fn on_write(mut self, f: impl FnMut(&mut Reactor, &mut Atom) + 'static) -> Atom {
        self.on_write = Some(Box::new(f));
        self
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn is_registered(&self) -> bool {
        self.fd >= 0
    }
}

impl Default for Atom {
    fn default() -> Atom {
        Atom::new()
    }
}
