use std::io;
use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;

use crate::task::Worker;

const POLL_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvePoll {
    Pending,
    Resolved(IpAddr),
    Failed(String),
}

/// Non-blocking hostname resolution backed by a worker thread.
#[derive(Debug)]
pub struct HostResolver {
    hostname: String,
    worker: Option<Worker<Result<IpAddr, String>>>,
    outcome: Option<Result<IpAddr, String>>,
}

impl HostResolver {
    pub fn begin(hostname: &str) -> Self {
        Self::begin_with(hostname, false)
    }

    pub fn begin_with(hostname: &str, prefer_ipv6: bool) -> Self {
        log::debug!("Resolving {}...", hostname);

        let host = hostname.to_string();
        match Worker::spawn("ticknet-resolve", move || {
            resolve_hostname(&host, prefer_ipv6).map_err(|e| e.to_string())
        }) {
            Ok(worker) => Self {
                hostname: hostname.to_string(),
                worker: Some(worker),
                outcome: None,
            },
            Err(e) => Self {
                hostname: hostname.to_string(),
                worker: None,
                outcome: Some(Err(format!("Failed to start resolver: {}", e))),
            },
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn poll(&mut self) -> ResolvePoll {
        if self.outcome.is_none() {
            let Some(worker) = self.worker.as_mut() else {
                return ResolvePoll::Failed(format!("Resolver for {} was lost", self.hostname));
            };
            if worker.poll(POLL_WAIT).is_none() {
                if !worker.is_finished() {
                    return ResolvePoll::Pending;
                }
                self.outcome = Some(Err(format!("Resolver for {} aborted", self.hostname)));
            } else if let Some(worker) = self.worker.take() {
                self.outcome = worker.into_result();
            }
        }

        match &self.outcome {
            Some(Ok(addr)) => ResolvePoll::Resolved(*addr),
            Some(Err(message)) => ResolvePoll::Failed(message.clone()),
            None => ResolvePoll::Pending,
        }
    }

    pub fn is_resolved(&mut self) -> bool {
        !matches!(self.poll(), ResolvePoll::Pending)
    }

    /// Returns `None` while pending or when resolution succeeded.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Some(Err(message)) => Some(message),
            _ => None,
        }
    }

    pub fn address(&self) -> Option<IpAddr> {
        match &self.outcome {
            Some(Ok(addr)) => Some(*addr),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Failed to resolve {host}: {source}")]
    Lookup {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to resolve {0}: no address returned")]
    NoAddress(String),
    #[error("Failed to resolve {0}: resolved to a wildcard address")]
    Wildcard(String),
}

/// Literal addresses resolve without touching the system resolver.
pub fn parse_numeric(host: &str) -> Option<IpAddr> {
    let trimmed = host.trim_start_matches('[').trim_end_matches(']');
    trimmed.parse().ok()
}

/// Blocking lookup. Picks the first address of the preferred family when present.
pub fn resolve_hostname(host: &str, prefer_ipv6: bool) -> Result<IpAddr, ResolveError> {
    let addrs: Vec<IpAddr> = (host, 0)
        .to_socket_addrs()
        .map_err(|source| ResolveError::Lookup {
            host: host.to_string(),
            source,
        })?
        .map(|addr| addr.ip())
        .collect();

    let chosen = addrs
        .iter()
        .find(|ip| ip.is_ipv6() == prefer_ipv6)
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| ResolveError::NoAddress(host.to_string()))?;

    if chosen.is_unspecified() {
        return Err(ResolveError::Wildcard(host.to_string()));
    }

    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Instant;

    fn wait(resolver: &mut HostResolver) -> ResolvePoll {
        let start = Instant::now();
        loop {
            match resolver.poll() {
                ResolvePoll::Pending => {
                    assert!(start.elapsed() < Duration::from_secs(30), "resolver hung")
                }
                outcome => return outcome,
            }
        }
    }

    #[test]
    fn test_numeric_fast_path() {
        assert_eq!(
            parse_numeric("127.0.0.1"),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
        assert!(parse_numeric("[::1]").is_some());
        assert_eq!(parse_numeric("files.example.com"), None);
    }

    #[test]
    fn test_resolve_literal_address() {
        let mut resolver = HostResolver::begin("127.0.0.1");
        assert_eq!(
            wait(&mut resolver),
            ResolvePoll::Resolved(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
        assert!(resolver.error().is_none());
        assert_eq!(resolver.address(), Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn test_wildcard_is_failure() {
        let mut resolver = HostResolver::begin("0.0.0.0");
        assert!(matches!(wait(&mut resolver), ResolvePoll::Failed(_)));
        assert!(resolver.error().unwrap().contains("wildcard"));
    }

    #[test]
    fn test_outcome_is_sticky() {
        let mut resolver = HostResolver::begin("127.0.0.1");
        let first = wait(&mut resolver);
        assert_eq!(resolver.poll(), first);
        assert!(resolver.is_resolved());
    }
}
