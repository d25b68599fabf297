use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::resolve::HostResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    /// The connection a client opens to its server.
    pub const PRIMARY: ConnectionId = ConnectionId(0);
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Open,
    Closed,
}

#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub state: ConnectionState,
    pub socket_index: usize,
    /// Set by the layer above once the peer completed its handshake.
    pub established: bool,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_receive_time: Instant,
    pub(crate) resolver: Option<HostResolver>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        addr: SocketAddr,
        state: ConnectionState,
        socket_index: usize,
    ) -> Self {
        Self {
            id,
            addr,
            state,
            socket_index,
            established: false,
            packets_sent: 0,
            packets_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
            last_receive_time: Instant::now(),
            resolver: None,
        }
    }

    pub fn is_resolving(&self) -> bool {
        self.resolver.is_some()
    }

    pub fn record_receive(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
        self.last_receive_time = Instant::now();
    }

    pub fn record_send(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }
}

/// Connections accepted from remote peers, indexed by id and by endpoint.
#[derive(Debug, Default)]
pub struct ConnectionSet {
    by_addr: HashMap<SocketAddr, ConnectionId>,
    connections: HashMap<ConnectionId, Connection>,
    next_id: u32,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    /// Registers an open connection for `addr`, replacing any existing one.
    pub fn insert(&mut self, addr: SocketAddr, socket_index: usize) -> &mut Connection {
        self.remove_by_addr(&addr);
        let id = ConnectionId(self.next_id.max(1));
        self.next_id = id.0.wrapping_add(1);

        self.by_addr.insert(addr, id);
        self.connections
            .entry(id)
            .insert_entry(Connection::new(id, addr, ConnectionState::Open, socket_index))
            .into_mut()
    }

    pub fn get_by_addr(&self, addr: &SocketAddr) -> Option<&Connection> {
        self.by_addr.get(addr).and_then(|id| self.connections.get(id))
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut Connection> {
        let id = self.by_addr.get(addr)?;
        self.connections.get_mut(id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        self.by_addr.remove(&connection.addr);
        Some(connection)
    }

    pub fn remove_by_addr(&mut self, addr: &SocketAddr) -> Option<Connection> {
        let id = self.by_addr.remove(addr)?;
        self.connections.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Removes every connection the layer above never marked established.
    pub fn evict_stale(&mut self) -> Vec<Connection> {
        let stale: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| !c.established)
            .map(|c| c.id)
            .collect();

        stale.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut set = ConnectionSet::new();
        let id = set.insert(addr(1000), 0).id;
        assert_ne!(id, ConnectionId::PRIMARY);
        assert_eq!(set.get_by_addr(&addr(1000)).unwrap().id, id);
        assert_eq!(set.get(id).unwrap().state, ConnectionState::Open);
        assert!(set.get_by_addr(&addr(1001)).is_none());
    }

    #[test]
    fn test_remove_clears_both_indexes() {
        let mut set = ConnectionSet::new();
        let id = set.insert(addr(1000), 0).id;
        set.insert(addr(1001), 0);

        assert!(set.remove(id).is_some());
        assert!(set.get_by_addr(&addr(1000)).is_none());
        assert!(set.remove_by_addr(&addr(1001)).is_some());
        assert!(set.is_empty());
    }

    #[test]
    fn test_evict_stale_keeps_established() {
        let mut set = ConnectionSet::new();
        set.insert(addr(1000), 0).established = true;
        set.insert(addr(1001), 0);
        set.insert(addr(1002), 0);

        let evicted = set.evict_stale();
        assert_eq!(evicted.len(), 2);
        assert_eq!(set.len(), 1);
        assert!(set.get_by_addr(&addr(1000)).is_some());
    }
}
