use std::io;
use std::net::SocketAddr;

pub const CONNECTION_FAILED: &str = "Connection failed";

/// Terminal failure of a download session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("Failed to resolve {host}: {reason}")]
    Resolution { host: String, reason: String },
    #[error("Connection failed: {detail}")]
    Connect { detail: String, timed_out: bool },
    #[error("Connection failed: send failed ({0})")]
    Send(String),
    #[error("Connection failed: receive timed out")]
    ReceiveTimeout,
    #[error("Socket error: {0}")]
    Socket(String),
    #[error("Bad HTTP response: {0}")]
    MalformedResponse(String),
    #[error("{0}")]
    Redirect(RedirectFailure),
    #[error("File not found at {url}")]
    ResourceNotFound { url: String, status: u16 },
    #[error("Failed to write {path}: {reason}")]
    SpoolWrite { path: String, reason: String },
    #[error("Server sent an empty body for {0}")]
    EmptyBody(String),
    #[error("Secure transfer failed: {0}")]
    SecureTransport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RedirectFailure {
    #[error("Bad redirection")]
    MissingLocation,
    #[error("Too many redirections")]
    TooMany,
}

impl Error {
    pub fn connect(detail: impl Into<String>) -> Self {
        Error::Connect {
            detail: detail.into(),
            timed_out: false,
        }
    }

    pub fn connect_timeout() -> Self {
        Error::Connect {
            detail: "connection timed out".to_string(),
            timed_out: true,
        }
    }

    /// Failures after which the remote should not be retried by this session.
    pub fn disables_retry(&self) -> bool {
        matches!(
            self,
            Error::Connect {
                timed_out: true,
                ..
            } | Error::InvalidUrl(_)
                | Error::UnsupportedScheme(_)
                | Error::Resolution { .. }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("No local IP address available")]
    NoLocalAddress,
    #[error("Binding to {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Socket setup failed: {0}")]
    Socket(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("session is no longer registered")]
    NotLive,
    #[error("session already has a task in flight")]
    Busy,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_messages_share_prefix() {
        assert!(Error::connect("refused").to_string().starts_with(CONNECTION_FAILED));
        assert!(Error::ReceiveTimeout.to_string().starts_with(CONNECTION_FAILED));
        assert!(Error::Send("broken pipe".into()).to_string().starts_with(CONNECTION_FAILED));
    }

    #[test]
    fn test_timeout_disables_retry() {
        assert!(Error::connect_timeout().disables_retry());
        assert!(!Error::connect("refused").disables_retry());
        assert!(!Error::Redirect(RedirectFailure::TooMany).disables_retry());
    }
}
