use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use super::bind::{BIND_ATTEMPTS, local_bind_addresses};
use super::connection::{Connection, ConnectionId, ConnectionSet, ConnectionState};
use super::endpoint::{SocketRole, UdpEndpoint};
use super::socket::{DatagramSocket, RecvOutcome};
use super::stats::NetworkStats;
use super::{DEFAULT_PORT, MAX_PACKET_SIZE};
use crate::NetError;
use crate::config::DriverConfig;
use crate::resolve::{HostResolver, ResolvePoll, parse_numeric};

/// Receive attempts per socket per tick, per known connection.
const RECV_BUDGET_PER_CONNECTION: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptPolicy {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PortUnreachable,
    Evicted,
}

/// Callbacks from [`UdpDriver::tick_dispatch`] to the layer above.
pub trait NetworkNotify {
    fn accepting(&mut self) -> AcceptPolicy {
        AcceptPolicy::Accept
    }

    fn accepted(&mut self, _connection: &Connection) {}

    fn received(&mut self, connection: &Connection, payload: &[u8]);

    fn closed(&mut self, _connection: &Connection, _reason: CloseReason) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Primary,
    Accepted(ConnectionId),
}

pub struct UdpDriver<S: DatagramSocket = UdpEndpoint> {
    config: DriverConfig,
    sockets: Vec<S>,
    primary: Option<Connection>,
    connections: ConnectionSet,
    stats: NetworkStats,
    recv_buffer: [u8; MAX_PACKET_SIZE],
    recv_error_logged: bool,
}

impl UdpDriver<UdpEndpoint> {
    /// Binds one server socket per local address, starting at `port`.
    pub fn listen(config: DriverConfig, port: u16) -> Result<Self, NetError> {
        let sockets = bind_all(&config, port, SocketRole::Server)?;
        for socket in &sockets {
            log::info!("Listening on {}", socket.local_addr());
        }
        Ok(Self::with_sockets(config, sockets))
    }

    /// Binds client sockets and opens the primary connection to `host:port`.
    pub fn connect(config: DriverConfig, host: &str, port: u16) -> Result<Self, NetError> {
        let sockets = bind_all(&config, 0, SocketRole::Client)?;
        let mut driver = Self::with_sockets(config, sockets);
        driver.open_primary(host, port);
        Ok(driver)
    }
}

fn bind_all(
    config: &DriverConfig,
    port: u16,
    role: SocketRole,
) -> Result<Vec<UdpEndpoint>, NetError> {
    let mut sockets = Vec::new();
    let mut last_error = None;
    for ip in local_bind_addresses(config.multihome, config.use_ipv6) {
        match UdpEndpoint::bind(SocketAddr::new(ip, port), role, BIND_ATTEMPTS) {
            Ok(socket) => sockets.push(socket),
            Err(e) => {
                log::warn!("{}", e);
                last_error = Some(e);
            }
        }
    }

    if sockets.is_empty() {
        return Err(last_error.unwrap_or(NetError::NoLocalAddress));
    }
    Ok(sockets)
}

/// First socket bound to the same address family as `addr`.
fn socket_for<S: DatagramSocket>(sockets: &[S], addr: SocketAddr) -> usize {
    sockets
        .iter()
        .position(|s| s.local_addr().is_ipv6() == addr.is_ipv6())
        .unwrap_or(0)
}

impl<S: DatagramSocket> UdpDriver<S> {
    pub fn with_sockets(config: DriverConfig, sockets: Vec<S>) -> Self {
        Self {
            config: config.clamped(),
            sockets,
            primary: None,
            connections: ConnectionSet::new(),
            stats: NetworkStats::default(),
            recv_buffer: [0u8; MAX_PACKET_SIZE],
            recv_error_logged: false,
        }
    }

    /// Opens the outgoing connection. Hostnames resolve in the background;
    /// sends are dropped until they do.
    pub fn open_primary(&mut self, host: &str, port: u16) -> ConnectionId {
        let port = if port == 0 { DEFAULT_PORT } else { port };

        let connection = match parse_numeric(host) {
            Some(ip) => {
                let addr = SocketAddr::new(ip, port);
                Connection::new(
                    ConnectionId::PRIMARY,
                    addr,
                    ConnectionState::Pending,
                    socket_for(&self.sockets, addr),
                )
            }
            None => {
                let mut connection = Connection::new(
                    ConnectionId::PRIMARY,
                    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
                    ConnectionState::Pending,
                    0,
                );
                connection.resolver = Some(HostResolver::begin_with(host, self.config.use_ipv6));
                connection
            }
        };
        log::info!("Opening connection to {}:{}", host, port);
        self.primary = Some(connection);
        ConnectionId::PRIMARY
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.sockets.iter().map(DatagramSocket::local_addr).collect()
    }

    pub fn primary(&self) -> Option<&Connection> {
        self.primary.as_ref()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        if id == ConnectionId::PRIMARY {
            return self.primary.as_ref();
        }
        self.connections.get(id)
    }

    fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        if id == ConnectionId::PRIMARY {
            return self.primary.as_mut();
        }
        self.connections.get_mut(id)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    /// Accepted connections; the primary connection is not counted.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn mark_established(&mut self, id: ConnectionId) -> bool {
        match self.connection_mut(id) {
            Some(connection) => {
                connection.established = true;
                true
            }
            None => false,
        }
    }

    pub fn set_state(&mut self, id: ConnectionId, state: ConnectionState) -> bool {
        match self.connection_mut(id) {
            Some(connection) => {
                connection.state = state;
                true
            }
            None => false,
        }
    }

    pub fn close(&mut self, id: ConnectionId) -> Option<Connection> {
        let mut connection = if id == ConnectionId::PRIMARY {
            self.primary.take()
        } else {
            self.connections.remove(id)
        }?;
        log::debug!("Closing connection {} to {}", id, connection.addr);
        connection.state = ConnectionState::Closed;
        Some(connection)
    }

    /// Sends one datagram. Returns `Ok(0)` while the primary connection is
    /// still resolving its host.
    pub fn send(&mut self, id: ConnectionId, data: &[u8]) -> io::Result<usize> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Packet exceeds MTU",
            ));
        }

        let connection = if id == ConnectionId::PRIMARY {
            self.primary.as_mut()
        } else {
            self.connections.get_mut(id)
        };
        let Some(connection) = connection else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("No connection {}", id),
            ));
        };

        if let Some(resolver) = connection.resolver.as_mut() {
            match resolver.poll() {
                ResolvePoll::Pending => return Ok(0),
                ResolvePoll::Resolved(ip) => {
                    log::info!("Resolved {} ({})", resolver.hostname(), ip);
                    connection.addr.set_ip(ip);
                    connection.socket_index = socket_for(&self.sockets, connection.addr);
                    connection.resolver = None;
                }
                ResolvePoll::Failed(reason) => {
                    log::warn!("{}", reason);
                    connection.resolver = None;
                    connection.state = ConnectionState::Closed;
                    return Err(io::Error::new(io::ErrorKind::NotConnected, reason));
                }
            }
        }

        if connection.state == ConnectionState::Closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("Connection {} is closed", id),
            ));
        }

        let addr = connection.addr;
        let socket = self
            .sockets
            .get(connection.socket_index)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "No socket bound"))?;
        let bytes = socket.send_to(data, addr)?;

        connection.record_send(bytes);
        self.stats.record_sent(bytes);
        Ok(bytes)
    }

    /// Drains every socket and routes what arrived.
    pub fn tick_dispatch(&mut self, notify: &mut dyn NetworkNotify) {
        for index in 0..self.sockets.len() {
            let mut budget = (1 + self.connections.len()) * RECV_BUDGET_PER_CONNECTION;
            loop {
                if budget == 0 {
                    log::debug!("Receive budget spent on {}", self.sockets[index].local_addr());
                    break;
                }
                budget -= 1;

                match self.sockets[index].recv_from(&mut self.recv_buffer) {
                    RecvOutcome::WouldBlock => break,
                    RecvOutcome::Error(e) => {
                        if !self.recv_error_logged {
                            log::warn!(
                                "recvfrom on {} failed: {}",
                                self.sockets[index].local_addr(),
                                e
                            );
                            self.recv_error_logged = true;
                        }
                        break;
                    }
                    RecvOutcome::Unreachable { from } => self.handle_unreachable(from, notify),
                    RecvOutcome::Data { len, from } => {
                        self.handle_datagram(index, from, len.min(MAX_PACKET_SIZE), notify)
                    }
                }
            }
        }
    }

    fn find(&self, addr: SocketAddr) -> Option<Target> {
        if self.primary.as_ref().is_some_and(|c| c.addr == addr) {
            return Some(Target::Primary);
        }
        self.connections
            .get_by_addr(&addr)
            .map(|c| Target::Accepted(c.id))
    }

    fn handle_unreachable(&mut self, from: Option<SocketAddr>, notify: &mut dyn NetworkNotify) {
        self.stats.unreachable += 1;
        let log_unreach = self.config.log_port_unreach;

        let closed = match from.and_then(|addr| self.find(addr)) {
            Some(Target::Primary) => self.primary.take(),
            Some(Target::Accepted(id)) if !self.config.allow_port_unreach => {
                self.connections.remove(id)
            }
            Some(Target::Accepted(id)) => {
                if log_unreach {
                    log::info!("Received ICMP port unreachable for connection {}, keeping it", id);
                }
                None
            }
            None => {
                if log_unreach {
                    match from {
                        Some(addr) => log::info!(
                            "Received ICMP port unreachable from {}. No matching connection found.",
                            addr
                        ),
                        None => log::info!("Received ICMP port unreachable from an unknown peer"),
                    }
                }
                None
            }
        };

        if let Some(mut connection) = closed {
            if log_unreach {
                log::info!(
                    "Received ICMP port unreachable from {}, destroying connection {}",
                    connection.addr,
                    connection.id
                );
            }
            connection.state = ConnectionState::Closed;
            notify.closed(&connection, CloseReason::PortUnreachable);
        }
    }

    fn handle_datagram(
        &mut self,
        socket_index: usize,
        from: SocketAddr,
        len: usize,
        notify: &mut dyn NetworkNotify,
    ) {
        self.stats.record_received(len);
        let payload = &self.recv_buffer[..len];

        if let Some(primary) = self.primary.as_mut().filter(|c| c.addr == from) {
            primary.record_receive(len);
            notify.received(primary, payload);
            return;
        }
        if let Some(connection) = self.connections.get_by_addr_mut(&from) {
            connection.record_receive(len);
            notify.received(connection, payload);
            return;
        }

        if notify.accepting() != AcceptPolicy::Accept {
            log::debug!("Not accepting connections, ignoring datagram from {}", from);
            return;
        }

        let limit = self.config.connection_limit;
        if self.connections.len() >= limit {
            let evicted = self.connections.evict_stale();
            if !evicted.is_empty() {
                log::info!("Connection limit reached, evicted {} stale connections", evicted.len());
            }
            for mut connection in evicted {
                self.stats.evicted += 1;
                connection.state = ConnectionState::Closed;
                notify.closed(&connection, CloseReason::Evicted);
            }
        }
        if self.connections.len() >= limit {
            self.stats.dropped += 1;
            log::debug!("Connection limit reached, dropping datagram from {}", from);
            return;
        }

        let connection = self.connections.insert(from, socket_index);
        connection.record_receive(len);
        log::info!("Accepted connection {} from {}", connection.id, from);
        notify.accepted(connection);
        notify.received(connection, payload);
    }
}
