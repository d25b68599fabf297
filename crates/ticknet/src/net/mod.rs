mod bind;
mod connection;
mod driver;
mod endpoint;
mod socket;
mod stats;

pub const MAX_PACKET_SIZE: usize = 576;
pub const DEFAULT_PORT: u16 = 7777;

pub use bind::{BIND_ATTEMPTS, bind_port, bind_stream_for, local_bind_addresses};
pub use connection::{Connection, ConnectionId, ConnectionSet, ConnectionState};
pub use driver::{AcceptPolicy, CloseReason, NetworkNotify, UdpDriver};
pub use endpoint::{SocketRole, UdpEndpoint};
pub use socket::{DatagramSocket, RecvOutcome};
pub use stats::NetworkStats;
