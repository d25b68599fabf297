use std::net::IpAddr;
use std::time::Duration;

pub const MIN_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_REDIRECT_LIMIT: u32 = 5;
pub const DEFAULT_CONNECTION_LIMIT: usize = 128;

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub proxy_host: Option<String>,
    pub proxy_port: u16,
    pub timeout: Duration,
    pub use_compression: bool,
    pub redirect_limit: u32,
    /// Pause before connecting so a previous session's socket can finish closing.
    pub connect_delay: Duration,
    pub user_agent: String,
    pub multihome: Option<IpAddr>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            proxy_host: None,
            proxy_port: 0,
            timeout: Duration::from_secs(4),
            use_compression: true,
            redirect_limit: DEFAULT_REDIRECT_LIMIT,
            connect_delay: Duration::from_millis(200),
            user_agent: "ticknet".to_string(),
            multihome: None,
        }
    }
}

impl DownloadConfig {
    /// Configured timeout with the floor applied.
    pub fn effective_timeout(&self) -> Duration {
        self.timeout.max(MIN_DOWNLOAD_TIMEOUT)
    }
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Keep accepted connections alive when an ICMP port-unreachable arrives for them.
    pub allow_port_unreach: bool,
    pub log_port_unreach: bool,
    pub connection_limit: usize,
    pub use_ipv6: bool,
    pub multihome: Option<IpAddr>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            allow_port_unreach: false,
            log_port_unreach: false,
            connection_limit: DEFAULT_CONNECTION_LIMIT,
            use_ipv6: false,
            multihome: None,
        }
    }
}

impl DriverConfig {
    pub fn clamped(mut self) -> Self {
        self.connection_limit = self.connection_limit.clamp(2, 1000);
        self
    }
}
