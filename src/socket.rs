//! Non-blocking socket primitives used by the real backends.
//!
//! Mirrors the original reactor's `socket.c`: non-blocking mode is forced
//! with the `ioctl(FIONBIO)`/`fcntl` fallback from [`crate::sys`], EOF and
//! reset-by-peer both collapse into [`ReactorError::Closed`], and
//! interrupted syscalls are retried here so callers never see `EINTR`.

use std::mem;
use std::net::SocketAddrV4;
use std::os::unix::io::RawFd;

use crate::error::ReactorError;
use crate::sys::{retry_eintr, set_nonblocking, syscall};

pub const STD_LISTEN_BACKLOG: libc::c_int = 128;

fn v4_to_sockaddr(addr: &SocketAddrV4) -> (libc::sockaddr_in, libc::socklen_t) {
    let sin = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
    };
    (sin, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
}

fn sockaddr_to_v4(sin: &libc::sockaddr_in) -> SocketAddrV4 {
    let ip = std::net::Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
    SocketAddrV4::new(ip, u16::from_be(sin.sin_port))
}

fn new_stream_socket() -> Result<RawFd, ReactorError> {
    let fd = syscall!(socket(libc::AF_INET, libc::SOCK_STREAM, 0))
        .map_err(|e| ReactorError::from_io(-1, e))?;
    set_nonblocking(fd).map_err(|e| ReactorError::from_io(fd, e))?;
    Ok(fd)
}

pub fn listen(addr: SocketAddrV4) -> Result<RawFd, ReactorError> {
    let fd = new_stream_socket()?;
    let (sin, len) = v4_to_sockaddr(&addr);

    let reuse: libc::c_int = 1;
    let _ = syscall!(setsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_REUSEADDR,
        &reuse as *const _ as *const libc::c_void,
        mem::size_of::<libc::c_int>() as libc::socklen_t
    ));

    syscall!(bind(fd, &sin as *const _ as *const libc::sockaddr, len))
        .map_err(|e| close_on_err(fd, e))?;
    syscall!(listen(fd, STD_LISTEN_BACKLOG)).map_err(|e| close_on_err(fd, e))?;

    Ok(fd)
}

pub fn connect(addr: SocketAddrV4) -> Result<RawFd, ReactorError> {
    let fd = new_stream_socket()?;
    let (sin, len) = v4_to_sockaddr(&addr);

    match syscall!(connect(fd, &sin as *const _ as *const libc::sockaddr, len)) {
        Ok(_) => Ok(fd),
        Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(fd),
        Err(e) => Err(close_on_err(fd, e)),
    }
}

pub fn accept(listener_fd: RawFd) -> Result<(RawFd, SocketAddrV4), ReactorError> {
    let mut storage: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

    let res = retry_eintr(|| {
        syscall!(accept(
            listener_fd,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len
        ))
    });

    let fd = match res {
        Ok(fd) => fd,
        Err(e) => return Err(ReactorError::from_io(listener_fd, e)),
    };

    if let Err(e) = set_nonblocking(fd) {
        let _ = close(fd);
        return Err(ReactorError::from_io(fd, e));
    }

    Ok((fd, sockaddr_to_v4(&storage)))
}

/// Reads into `buf`. EOF and ECONNRESET both surface as
/// [`ReactorError::Closed`]; a would-block read succeeds with `0`.
pub fn read(fd: RawFd, buf: &mut [u8]) -> Result<usize, ReactorError> {
    let res = retry_eintr(|| {
        syscall!(read(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len()
        ))
    });

    match res {
        Ok(0) => Err(ReactorError::Closed { fd }),
        Ok(n) => Ok(n as usize),
        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
        Err(ref e) if e.raw_os_error() == Some(libc::ECONNRESET) => {
            Err(ReactorError::Closed { fd })
        }
        Err(e) => Err(ReactorError::from_io(fd, e)),
    }
}

pub fn write(fd: RawFd, buf: &[u8]) -> Result<usize, ReactorError> {
    let res = retry_eintr(|| {
        syscall!(write(fd, buf.as_ptr() as *const libc::c_void, buf.len()))
    });

    match res {
        Ok(n) => Ok(n as usize),
        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
        Err(ref e) if e.raw_os_error() == Some(libc::EPIPE) => Err(ReactorError::Closed { fd }),
        Err(ref e) if e.raw_os_error() == Some(libc::ECONNRESET) => {
            Err(ReactorError::Closed { fd })
        }
        Err(e) => Err(ReactorError::from_io(fd, e)),
    }
}

pub fn close(fd: RawFd) -> Result<(), ReactorError> {
    syscall!(close(fd))
        .map(|_| ())
        .map_err(|e| ReactorError::from_io(fd, e))
}

fn close_on_err(fd: RawFd, e: std::io::Error) -> ReactorError {
    unsafe {
        libc::close(fd);
    }
    ReactorError::from_io(fd, e)
}
