//! Scenario S5: a signal delivered mid-`wait` must not be mistaken for an
//! error or for lost readiness. `wait` reports `0` for the interrupted call,
//! and a later `wait` still observes whatever becomes ready afterwards.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::thread;
use std::time::Duration;

use ioreactor::{backend_mask, Atom, Reactor};

extern "C" fn noop_handler(_: libc::c_int) {}

fn local_port(listener: &Atom) -> u16 {
    unsafe {
        let mut storage: libc::sockaddr_in = std::mem::zeroed();
        let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let ret = libc::getsockname(
            listener.fd(),
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
        );
        assert_eq!(ret, 0);
        u16::from_be(storage.sin_port)
    }
}

#[test]
fn interrupted_wait_returns_zero_then_a_later_wait_sees_real_readiness() {
    // `signal(2)` on glibc installs BSD-style "reliable" signals, which
    // restart an interrupted syscall by default (`SA_RESTART`). Installing
    // the handler through `sigaction` directly, with `sa_flags = 0`, is
    // what actually forces `select` to come back with `EINTR`.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = noop_handler as usize;
        sa.sa_flags = 0;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGALRM, &sa, std::ptr::null_mut());
    }

    let mut reactor = Reactor::new(backend_mask::SELECT).unwrap();

    // Nothing registered yet, so this exercises only the EINTR-to-zero
    // mapping, not readiness delivery.
    let main_thread = unsafe { libc::pthread_self() };
    let signaller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        unsafe {
            libc::pthread_kill(main_thread, libc::SIGALRM);
        }
    });

    let interrupted = reactor.wait(5000).unwrap();
    assert_eq!(interrupted, 0);
    signaller.join().unwrap();

    // A real connection registered afterward is still observed normally:
    // the interrupted wait left no stale state behind.
    let mut listener = Atom::new();
    reactor
        .listen(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 0), &mut listener)
        .unwrap();
    let port = local_port(&listener);

    let mut client = Box::new(Atom::new());
    reactor
        .connect(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), port), &mut client)
        .unwrap();

    let mut n = 0;
    for _ in 0..50 {
        n = reactor.wait(200).unwrap();
        if n > 0 {
            break;
        }
    }
    assert!(n > 0, "expected the listener to become readable after the interrupted wait");
}
