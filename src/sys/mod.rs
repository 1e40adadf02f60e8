//! Thin syscall wrappers shared by every real backend.
//!
//! Every function here translates the raw OS return value at the boundary;
//! nothing above this module ever inspects `errno` directly.

use std::io;
use std::os::unix::io::RawFd;

/// Runs a libc call, retrying on `EINTR` is the caller's job; this just
/// turns a `-1` return into `io::Error::last_os_error()`.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub(crate) use syscall;

/// Sets `fd` non-blocking via `ioctl(FIONBIO)`, falling back to the
/// `fcntl(F_GETFL)`/`fcntl(F_SETFL, O_NONBLOCK)` pair when the ioctl itself
/// is refused (some descriptor kinds don't support `FIONBIO`).
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let mut on: libc::c_int = 1;
    match syscall!(ioctl(fd, libc::FIONBIO, &mut on as *mut libc::c_int)) {
        Ok(_) => Ok(()),
        Err(_) => {
            let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
            syscall!(fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK))?;
            Ok(())
        }
    }
}

/// Retries a syscall closure across `EINTR`, mapping everything else through
/// unchanged. Used by read/write/accept where the original retries in a loop.
pub fn retry_eintr<T>(mut f: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match f() {
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}
