use std::io;
use std::net::{SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

use super::bind::bind_port;
use super::socket::{DatagramSocket, RecvOutcome};
use crate::NetError;

const CLIENT_BUFFER_SIZE: usize = 0x8000;
const SERVER_BUFFER_SIZE: usize = 0x25000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketRole {
    Client,
    Server,
}

impl SocketRole {
    fn buffer_size(self) -> usize {
        match self {
            SocketRole::Client => CLIENT_BUFFER_SIZE,
            SocketRole::Server => SERVER_BUFFER_SIZE,
        }
    }
}

pub struct UdpEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpEndpoint {
    pub fn bind(addr: SocketAddr, role: SocketRole, attempts: u16) -> Result<Self, NetError> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        if addr.is_ipv6() {
            socket.set_only_v6(true)?;
        }
        socket.set_reuse_address(true)?;
        if addr.is_ipv4() {
            socket.set_broadcast(true)?;
        }
        // Buffer sizes are advisory; the OS may clamp them.
        if let Err(e) = socket.set_recv_buffer_size(role.buffer_size()) {
            log::debug!("set_recv_buffer_size failed: {}", e);
        }
        if let Err(e) = socket.set_send_buffer_size(role.buffer_size()) {
            log::debug!("set_send_buffer_size failed: {}", e);
        }

        let local_addr = bind_port(&socket, addr, attempts)
            .map_err(|source| NetError::Bind { addr, source })?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket: socket.into(),
            local_addr,
        })
    }
}

impl DatagramSocket for UdpEndpoint {
    fn recv_from(&self, buf: &mut [u8]) -> RecvOutcome {
        RecvOutcome::from_result(self.socket.recv_from(buf))
    }

    fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, addr)
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    fn recv_blocking(endpoint: &UdpEndpoint, buf: &mut [u8]) -> (usize, SocketAddr) {
        let start = Instant::now();
        loop {
            match endpoint.recv_from(buf) {
                RecvOutcome::Data { len, from } => return (len, from),
                RecvOutcome::WouldBlock => {
                    assert!(start.elapsed() < Duration::from_secs(2), "nothing received");
                    thread::sleep(Duration::from_millis(1));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_endpoint_round_trip() {
        let loopback: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = UdpEndpoint::bind(loopback, SocketRole::Server, 1).unwrap();
        let client = UdpEndpoint::bind(loopback, SocketRole::Client, 1).unwrap();
        assert_ne!(server.local_addr().port(), 0);

        client.send_to(b"ping", server.local_addr()).unwrap();
        let mut buf = [0u8; 64];
        let (len, from) = recv_blocking(&server, &mut buf);
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(from, client.local_addr());
    }

    #[test]
    fn test_empty_socket_would_block() {
        let endpoint =
            UdpEndpoint::bind("127.0.0.1:0".parse().unwrap(), SocketRole::Client, 1).unwrap();
        let mut buf = [0u8; 8];
        assert!(matches!(endpoint.recv_from(&mut buf), RecvOutcome::WouldBlock));
    }
}
