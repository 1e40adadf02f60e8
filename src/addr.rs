//! IPv4 socket address type and the `HOST:PORT` string grammar.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4, ToSocketAddrs};
use std::str::FromStr;

use crate::error::ReactorError;

/// Parses `spec` against the grammar:
///
/// ```text
/// spec := host ':' port | host | port
/// host := dotted-quad | dns-name
/// port := decimal integer in [0, 65535]
/// ```
///
/// A bare decimal token is always a port, never a hostname. Whichever side
/// is omitted is filled in from `default`.
pub fn parse_addr(spec: &str, default: SocketAddrV4) -> Result<SocketAddrV4, ReactorError> {
    if spec.is_empty() {
        return Err(ReactorError::InvalidAddress {
            input: spec.to_string(),
            reason: "empty address",
        });
    }

    let (host_part, port_part) = match spec.rfind(':') {
        Some(idx) => (&spec[..idx], &spec[idx + 1..]),
        None => {
            if is_plain_port(spec) {
                ("", spec)
            } else {
                (spec, "")
            }
        }
    };

    let ip = if host_part.is_empty() {
        *default.ip()
    } else {
        resolve_host(host_part)?
    };

    let port = if port_part.is_empty() {
        default.port()
    } else {
        safe_atoi_port(port_part).ok_or(ReactorError::InvalidAddress {
            input: spec.to_string(),
            reason: "port must be a decimal integer in [0, 65535]",
        })?
    };

    Ok(SocketAddrV4::new(ip, port))
}

fn is_plain_port(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn safe_atoi_port(s: &str) -> Option<u16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u16>().ok()
}

fn resolve_host(host: &str) -> Result<Ipv4Addr, ReactorError> {
    if let Ok(ip) = Ipv4Addr::from_str(host) {
        return Ok(ip);
    }

    (host, 0u16)
        .to_socket_addrs()
        .ok()
        .and_then(|mut it| {
            it.find_map(|a| match a {
                std::net::SocketAddr::V4(v4) => Some(*v4.ip()),
                std::net::SocketAddr::V6(_) => None,
            })
        })
        .ok_or(ReactorError::InvalidAddress {
            input: host.to_string(),
            reason: "hostname did not resolve to an IPv4 address",
        })
}

/// Renders an address back to the `HOST:PORT` form accepted by [`parse_addr`].
pub fn format_addr(addr: &SocketAddrV4) -> String {
    addr.to_string()
}
