use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use super::notify::ProgressNotify;
use super::secure::{NoSecureTransfer, SecureTransfer, run_secure_transfer};
use super::session::{DownloadSession, FileRequest, PayloadFormat, TransferStage};
use super::spool::SpoolFactory;
use super::transfer::{TransferParams, run_transfer};
use crate::Error;
use crate::config::DownloadConfig;
use crate::http::{DownloadUrl, Scheme};
use crate::resolve::{HostResolver, ResolvePoll, parse_numeric};
use crate::task::{BackgroundTask, SessionHandle, TaskRuntime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    Idle,
    ResolvingHost,
    Connecting,
    Receiving,
    Finished,
    Invalid,
}

/// Services a download needs from its host application.
#[derive(Clone)]
pub struct Collaborators {
    pub spool: Arc<dyn SpoolFactory>,
    pub secure: Arc<dyn SecureTransfer>,
}

impl Collaborators {
    pub fn new(spool: Arc<dyn SpoolFactory>) -> Self {
        Self {
            spool,
            secure: Arc::new(NoSecureTransfer),
        }
    }

    pub fn with_secure(mut self, secure: Arc<dyn SecureTransfer>) -> Self {
        self.secure = secure;
        self
    }
}

enum NextStep {
    Wait,
    Resolve { host: String, port: u16 },
    Transfer,
    Secure,
}

/// Foreground side of one file download, advanced by [`HttpDownload::tick`].
pub struct HttpDownload {
    runtime: Arc<TaskRuntime<DownloadSession>>,
    handle: Option<SessionHandle>,
    rejected: Option<Error>,
    resource: String,
    resolver: Option<HostResolver>,
    secure: Arc<dyn SecureTransfer>,
    params: TransferParams,
    last_reported: Option<u64>,
}

impl HttpDownload {
    pub fn start(
        runtime: &Arc<TaskRuntime<DownloadSession>>,
        request: FileRequest,
        config: &DownloadConfig,
        collaborators: Collaborators,
    ) -> Self {
        let mut download = Self {
            runtime: Arc::clone(runtime),
            handle: None,
            rejected: None,
            resource: request.resource.clone(),
            resolver: None,
            secure: collaborators.secure,
            params: TransferParams {
                timeout: config.effective_timeout(),
                connect_delay: config.connect_delay,
                multihome: config.multihome,
            },
            last_reported: None,
        };

        let session = DownloadSession::new(&request, config, collaborators.spool).and_then(|s| {
            if s.current_url().scheme() == Scheme::Https && !download.secure.is_available() {
                return Err(no_secure_backend(s.current_url()));
            }
            Ok(s)
        });

        match session {
            Ok(session) => {
                log::info!("Downloading {}", session.current_url());
                download.handle = Some(runtime.insert(session));
            }
            Err(e) => {
                log::warn!("Cannot download {}: {}", request.resource, e);
                download.rejected = Some(e);
            }
        }
        download
    }

    pub fn tick(&mut self, notify: &mut dyn ProgressNotify) {
        let Some(handle) = self.handle else {
            return;
        };
        if !self.runtime.is_busy(handle) {
            self.advance(handle);
        }
        self.report(notify);
    }

    fn advance(&mut self, handle: SessionHandle) {
        let runtime = Arc::clone(&self.runtime);
        let secure_available = self.secure.is_available();
        let next = runtime.with(handle, |s| {
            if s.is_finished() {
                return NextStep::Wait;
            }
            if s.current_url().scheme() == Scheme::Https {
                if !secure_available {
                    s.fail(no_secure_backend(s.current_url()));
                    return NextStep::Wait;
                }
                return NextStep::Secure;
            }
            let (host, port) = s.sync_remote_host();
            if s.remote().is_none() {
                match parse_numeric(&host) {
                    Some(ip) => s.set_remote(SocketAddr::new(ip, port)),
                    None => return NextStep::Resolve { host, port },
                }
            }
            if s.prepare_exchange() {
                NextStep::Transfer
            } else {
                NextStep::Wait
            }
        });

        match next {
            None | Some(NextStep::Wait) => {}
            Some(NextStep::Resolve { host, port }) => self.poll_resolver(handle, host, port),
            Some(NextStep::Transfer) => {
                let params = self.params.clone();
                self.spawn(handle, "ticknet-http", move |ctx| run_transfer(ctx, params));
            }
            Some(NextStep::Secure) => {
                let backend = Arc::clone(&self.secure);
                let timeout = self.params.timeout;
                self.spawn(handle, "ticknet-https", move |ctx| {
                    run_secure_transfer(ctx, backend, timeout)
                });
            }
        }
    }

    fn poll_resolver(&mut self, handle: SessionHandle, host: String, port: u16) {
        if self.resolver.as_ref().is_none_or(|r| r.hostname() != host) {
            self.resolver = Some(HostResolver::begin(&host));
        }
        let Some(resolver) = self.resolver.as_mut() else {
            return;
        };

        match resolver.poll() {
            ResolvePoll::Pending => {}
            ResolvePoll::Resolved(ip) => {
                self.resolver = None;
                log::debug!("Resolved {} ({})", host, ip);
                self.runtime
                    .with(handle, |s| s.set_remote(SocketAddr::new(ip, port)));
            }
            ResolvePoll::Failed(reason) => {
                self.resolver = None;
                self.runtime
                    .with(handle, |s| s.fail(Error::Resolution { host, reason }));
            }
        }
    }

    fn spawn<F>(&self, handle: SessionHandle, name: &str, work: F)
    where
        F: FnOnce(crate::task::TaskContext<DownloadSession>) + Send + 'static,
    {
        if let Err(e) = BackgroundTask::spawn(&self.runtime, handle, name, work) {
            log::warn!("Failed to start transfer of {}: {}", self.resource, e);
            self.runtime
                .with(handle, |s| s.fail(Error::Socket(e.to_string())));
        }
    }

    fn report(&mut self, notify: &mut dyn ProgressNotify) {
        let Some((transferred, expected)) = self.read(|s| (s.transferred(), s.expected_size()))
        else {
            return;
        };
        if self.last_reported == Some(transferred) {
            return;
        }
        self.last_reported = Some(transferred);

        let fraction = match expected {
            Some(expected) if expected > 0 => (transferred as f64 / expected as f64).min(1.0),
            _ => 0.0,
        };
        notify.progress(fraction as f32, &format!("Receiving {}", self.resource));
    }

    fn read<R>(&self, f: impl FnOnce(&DownloadSession) -> R) -> Option<R> {
        let handle = self.handle?;
        self.runtime.with(handle, |s| f(s))
    }

    pub fn phase(&self) -> DownloadPhase {
        let resolving = self.resolver.is_some();
        self.read(|s| {
            if s.is_invalid() {
                DownloadPhase::Invalid
            } else if s.is_finished() {
                DownloadPhase::Finished
            } else {
                match s.stage() {
                    TransferStage::Connecting => DownloadPhase::Connecting,
                    TransferStage::Receiving => DownloadPhase::Receiving,
                    TransferStage::Idle if resolving => DownloadPhase::ResolvingHost,
                    TransferStage::Idle => DownloadPhase::Idle,
                }
            }
        })
        .unwrap_or(DownloadPhase::Invalid)
    }

    pub fn is_finished(&self) -> bool {
        self.read(DownloadSession::is_finished).unwrap_or(true)
    }

    pub fn is_invalid(&self) -> bool {
        self.read(DownloadSession::is_invalid).unwrap_or(true)
    }

    pub fn is_complete(&self) -> bool {
        self.read(DownloadSession::is_complete).unwrap_or(false)
    }

    /// True while a background transfer owns the session.
    pub fn is_busy(&self) -> bool {
        self.handle.is_some_and(|h| self.runtime.is_busy(h))
    }

    pub fn error(&self) -> Option<Error> {
        match &self.rejected {
            Some(e) => Some(e.clone()),
            None => self.read(|s| s.error().cloned()).flatten(),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn transferred(&self) -> u64 {
        self.read(DownloadSession::transferred).unwrap_or(0)
    }

    pub fn expected_size(&self) -> Option<u64> {
        self.read(DownloadSession::expected_size).flatten()
    }

    pub fn payload_format(&self) -> PayloadFormat {
        self.read(DownloadSession::payload_format)
            .unwrap_or_default()
    }

    pub fn spool_path(&self) -> Option<PathBuf> {
        self.read(|s| s.spool_path().map(PathBuf::from)).flatten()
    }

    pub fn current_url(&self) -> Option<DownloadUrl> {
        self.read(|s| s.current_url().clone())
    }
}

fn no_secure_backend(url: &DownloadUrl) -> Error {
    Error::SecureTransport(format!("no secure transfer backend available for {}", url))
}

impl Drop for HttpDownload {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.runtime.remove(handle);
        }
    }
}
