pub mod config;
pub mod download;
pub mod error;
pub mod http;
pub mod net;
pub mod resolve;
pub mod task;

pub use config::{DEFAULT_CONNECTION_LIMIT, DEFAULT_REDIRECT_LIMIT, DownloadConfig, DriverConfig};
pub use download::{
    Collaborators, DirSpool, DownloadPhase, DownloadSession, FileRequest, HttpDownload,
    LogProgress, NoSecureTransfer, PayloadFormat, ProgressNotify, SecureSink, SecureTransfer,
    SecureTransferError, SpoolFactory,
};
pub use error::{CONNECTION_FAILED, Error, NetError, RedirectFailure, TaskError};
pub use http::{CompressionTier, DownloadUrl, HttpRequest, HttpResponse, StatusAction};
pub use net::{
    AcceptPolicy, CloseReason, Connection, ConnectionId, ConnectionState, DEFAULT_PORT,
    DatagramSocket, MAX_PACKET_SIZE, NetworkNotify, NetworkStats, RecvOutcome, UdpDriver,
    UdpEndpoint,
};
pub use resolve::{HostResolver, ResolvePoll};
pub use task::{BackgroundTask, SessionHandle, TaskContext, TaskRuntime, Worker};
