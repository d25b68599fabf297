use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};

/// Consecutive ports tried when a bind collides.
pub const BIND_ATTEMPTS: u16 = 20;

/// Local addresses sockets are bound to: the multihome address when one is
/// configured, otherwise the wildcard address of each enabled family.
pub fn local_bind_addresses(multihome: Option<IpAddr>, use_ipv6: bool) -> Vec<IpAddr> {
    if let Some(addr) = multihome {
        return vec![addr];
    }
    let mut addrs = Vec::with_capacity(2);
    if use_ipv6 {
        addrs.push(IpAddr::V6(Ipv6Addr::UNSPECIFIED));
    }
    addrs.push(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    addrs
}

/// Binds `socket` to `addr`, walking up from its port on collisions.
/// Port 0 picks an ephemeral port in a single attempt.
pub fn bind_port(socket: &Socket, addr: SocketAddr, attempts: u16) -> io::Result<SocketAddr> {
    let mut port = addr.port();
    let mut last_error = None;

    for _ in 0..attempts.max(1) {
        let candidate = SocketAddr::new(addr.ip(), port);
        match socket.bind(&candidate.into()) {
            Ok(()) => {
                return socket.local_addr()?.as_socket().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::AddrNotAvailable, "bound to a non-IP address")
                });
            }
            Err(e) => {
                log::debug!("bind to {} failed: {}", candidate, e);
                last_error = Some(e);
            }
        }
        if port == 0 || port == u16::MAX {
            break;
        }
        port += 1;
    }

    Err(last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrInUse)))
}

/// A TCP socket bound to a local address of `remote`'s family, ready to connect.
pub fn bind_stream_for(remote: SocketAddr, multihome: Option<IpAddr>) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(remote), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;

    let mut last_error = None;
    for ip in local_bind_addresses(multihome, remote.is_ipv6()) {
        if ip.is_ipv6() != remote.is_ipv6() {
            continue;
        }
        match bind_port(&socket, SocketAddr::new(ip, 0), BIND_ATTEMPTS) {
            Ok(_) => return Ok(socket),
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no local address to reach {}", remote),
        )
    }))
}
