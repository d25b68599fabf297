use std::io;
use std::net::SocketAddr;

#[derive(Debug)]
pub enum RecvOutcome {
    Data { len: usize, from: SocketAddr },
    /// ICMP port unreachable. Real sockets cannot say which peer it came from.
    Unreachable { from: Option<SocketAddr> },
    WouldBlock,
    Error(io::Error),
}

impl RecvOutcome {
    pub fn from_result(result: io::Result<(usize, SocketAddr)>) -> Self {
        match result {
            Ok((len, from)) => RecvOutcome::Data { len, from },
            Err(e) => match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => RecvOutcome::WouldBlock,
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused => {
                    RecvOutcome::Unreachable { from: None }
                }
                _ => RecvOutcome::Error(e),
            },
        }
    }
}

/// Non-blocking datagram socket polled by the dispatcher.
pub trait DatagramSocket {
    fn recv_from(&self, buf: &mut [u8]) -> RecvOutcome;
    fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize>;
    fn local_addr(&self) -> SocketAddr;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_mapping() {
        let from: SocketAddr = "10.0.0.1:7777".parse().unwrap();
        assert!(matches!(
            RecvOutcome::from_result(Ok((12, from))),
            RecvOutcome::Data { len: 12, .. }
        ));
        assert!(matches!(
            RecvOutcome::from_result(Err(io::ErrorKind::WouldBlock.into())),
            RecvOutcome::WouldBlock
        ));
        assert!(matches!(
            RecvOutcome::from_result(Err(io::ErrorKind::ConnectionRefused.into())),
            RecvOutcome::Unreachable { from: None }
        ));
        assert!(matches!(
            RecvOutcome::from_result(Err(io::ErrorKind::PermissionDenied.into())),
            RecvOutcome::Error(_)
        ));
    }
}
