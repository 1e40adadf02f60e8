//! Scenario S1: a real listener accepts one connection over loopback, the
//! client writes a line, the server echoes it back, and the client
//! observes the echo.

use std::cell::RefCell;
use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;

use ioreactor::{backend_mask, Atom, Interest, Reactor};

fn local_port(listener: &Atom) -> u16 {
    unsafe {
        let mut storage: libc::sockaddr_in = mem::zeroed();
        let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
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
fn echoes_one_line_over_loopback() {
    let mut reactor =
        Reactor::new(backend_mask::EPOLL | backend_mask::POLL | backend_mask::SELECT).unwrap();

    // Keeps every accepted/connecting atom alive for the whole test; the
    // reactor only ever holds a non-owning pointer into these boxes.
    let keepalive: Rc<RefCell<Vec<Box<Atom>>>> = Rc::new(RefCell::new(Vec::new()));
    let echoed: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));

    let mut listener = Atom::new();
    reactor
        .listen(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 0), &mut listener)
        .unwrap();
    let port = local_port(&listener);

    {
        let keepalive = keepalive.clone();
        listener.on_read = Some(Box::new(move |reactor, listener| {
            let mut conn = Box::new(Atom::new().on_read(|reactor, atom| {
                let mut buf = [0u8; 256];
                if let Ok(n) = reactor.read(atom, &mut buf) {
                    if n > 0 {
                        let _ = reactor.write(atom, &buf[..n]);
                    }
                }
            }));
            if reactor.accept(listener, &mut conn).is_ok() {
                keepalive.borrow_mut().push(conn);
            }
        }));
    }

    let mut client = Box::new(Atom::new());
    reactor
        .connect(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), port), &mut client)
        .unwrap();
    {
        let echoed = echoed.clone();
        client.on_write = Some(Box::new(|reactor, atom| {
            let _ = reactor.write(atom, b"hi\n");
            let _ = reactor.set(atom, Interest::READ);
        }));
        client.on_read = Some(Box::new(move |reactor, atom| {
            let mut buf = [0u8; 256];
            if let Ok(n) = reactor.read(atom, &mut buf) {
                echoed.borrow_mut().extend_from_slice(&buf[..n]);
            }
        }));
    }
    reactor.set(&mut client, Interest::WRITE).unwrap();
    keepalive.borrow_mut().push(client);

    for _ in 0..50 {
        if echoed.borrow().as_slice() == b"hi\n" {
            break;
        }
        reactor.wait(200).unwrap();
        reactor.dispatch();
    }

    assert_eq!(echoed.borrow().as_slice(), b"hi\n");
}
