use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::spool::{SpoolFactory, SpoolWriter};
use crate::config::DownloadConfig;
use crate::http::{CompressionTier, DownloadUrl, HttpRequest, HttpResponse, Proxy, StatusAction};
use crate::{Error, RedirectFailure};

const LZMA_SIZE_OFFSET: usize = 5;
const SIGNATURE_LEN: usize = 13;
const UZ_SIGNATURES: [i32; 2] = [1234, 5678];

/// What the caller wants downloaded: `<base_url><resource><tier extension>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequest {
    pub base_url: String,
    pub resource: String,
    /// Uncompressed size announced by the game server, used when the HTTP
    /// response carries no Content-Length.
    pub announced_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    #[default]
    Uncompressed,
    Uz,
    Lzma,
}

impl PayloadFormat {
    /// Recognizes a compressed payload from its first bytes.
    pub fn detect(chunk: &[u8], announced_size: u64) -> Self {
        if chunk.len() < SIGNATURE_LEN {
            return PayloadFormat::Uncompressed;
        }
        let lzma_size = chunk[LZMA_SIZE_OFFSET..SIGNATURE_LEN]
            .try_into()
            .ok()
            .map(u64::from_le_bytes);
        if lzma_size == Some(announced_size) {
            return PayloadFormat::Lzma;
        }
        let tag = chunk[..4].try_into().ok().map(i32::from_le_bytes);
        match tag {
            Some(tag) if UZ_SIGNATURES.contains(&tag) => PayloadFormat::Uz,
            _ => PayloadFormat::Uncompressed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferStage {
    Idle,
    Connecting,
    Receiving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReceiveStep {
    Continue,
    /// The exchange ended without a result; the next tick sends a new request.
    Restart,
    Done,
}

/// State shared between an `HttpDownload` and its background transfer.
pub struct DownloadSession {
    resource: String,
    announced_size: u64,
    origin: DownloadUrl,
    current: DownloadUrl,
    request: HttpRequest,
    redirects_left: u32,
    remote_host: String,
    remote: Option<SocketAddr>,
    response: HttpResponse,
    transferred: u64,
    real_size: Option<u64>,
    spool_factory: Arc<dyn SpoolFactory>,
    spool: Option<SpoolWriter>,
    spool_path: Option<PathBuf>,
    payload: PayloadFormat,
    stage: TransferStage,
    invalid: bool,
    finished: bool,
    completed: bool,
    error: Option<Error>,
}

impl DownloadSession {
    pub(crate) fn new(
        request: &FileRequest,
        config: &DownloadConfig,
        spool_factory: Arc<dyn SpoolFactory>,
    ) -> Result<Self, Error> {
        let tier = if config.use_compression {
            CompressionTier::Lzma
        } else {
            CompressionTier::None
        };
        let proxy = config
            .proxy_host
            .as_ref()
            .filter(|host| !host.is_empty())
            .map(|host| Proxy {
                host: host.clone(),
                port: config.proxy_port,
            });
        let origin = DownloadUrl::new(&request.base_url, &request.resource)?
            .with_tier(tier)
            .with_proxy(proxy);

        let http = HttpRequest::get(origin.host(), &origin.request_path(), &config.user_agent);
        Ok(Self {
            resource: request.resource.clone(),
            announced_size: request.announced_size,
            current: origin.clone(),
            remote_host: origin.connect_host().to_string(),
            origin,
            request: http,
            redirects_left: config.redirect_limit,
            remote: None,
            response: HttpResponse::new(),
            transferred: 0,
            real_size: None,
            spool_factory,
            spool: None,
            spool_path: None,
            payload: PayloadFormat::Uncompressed,
            stage: TransferStage::Idle,
            invalid: false,
            finished: false,
            completed: false,
            error: None,
        })
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn current_url(&self) -> &DownloadUrl {
        &self.current
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Content-Length when the server sent one, else the announced size.
    /// `None` when neither is known.
    pub fn expected_size(&self) -> Option<u64> {
        self.real_size
            .or((self.announced_size > 0).then_some(self.announced_size))
    }

    pub fn payload_format(&self) -> PayloadFormat {
        self.payload
    }

    pub fn spool_path(&self) -> Option<&Path> {
        self.spool_path.as_deref()
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub(crate) fn stage(&self) -> TransferStage {
        self.stage
    }

    pub(crate) fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub(crate) fn set_remote(&mut self, remote: SocketAddr) {
        self.remote = Some(remote);
    }

    /// Host and port the next connection goes to. Forgets the cached address
    /// when a redirect moved the session to another host.
    pub(crate) fn sync_remote_host(&mut self) -> (String, u16) {
        let host = self.current.connect_host();
        if host != self.remote_host {
            log::debug!("Remote host changed from {} to {}", self.remote_host, host);
            self.remote_host = host.to_string();
            self.remote = None;
        }
        self.request.hostname = self.current.host().to_string();
        (self.remote_host.clone(), self.current.connect_port())
    }

    /// Resets per-exchange state. Returns false when there is nothing to request.
    pub(crate) fn prepare_exchange(&mut self) -> bool {
        self.request.path = self.current.request_path();
        self.response = HttpResponse::new();
        !self.request.path.is_empty()
    }

    /// Stage 1 of a transfer: everything the task needs before it lets go of the session.
    pub(crate) fn begin_transfer(&mut self) -> Option<(SocketAddr, String)> {
        let remote = self.remote?;
        self.stage = TransferStage::Connecting;
        log::debug!("Requesting {} from {}", self.current, remote);
        Some((remote, self.request.to_wire()))
    }

    pub(crate) fn mark_receiving(&mut self) {
        self.stage = TransferStage::Receiving;
    }

    pub(crate) fn end_transfer(&mut self) {
        self.close_spool();
        self.stage = TransferStage::Idle;
    }

    /// Records the first failure and ends the session.
    pub fn fail(&mut self, error: Error) {
        if self.finished {
            log::debug!("Ignoring {} after session ended", error);
            return;
        }
        log::warn!("Download of {} failed: {}", self.current, error);
        self.invalid |= error.disables_retry();
        self.finished = true;
        self.error = Some(error);
        self.close_spool();
    }

    pub(crate) fn mark_invalid(&mut self) {
        self.invalid = true;
    }

    /// Feeds received bytes. `shutdown` is set when the peer closed the connection.
    pub(crate) fn process_incoming(&mut self, data: &[u8], shutdown: bool) -> ReceiveStep {
        if self.finished {
            return ReceiveStep::Done;
        }
        self.response.feed(data);

        if !self.response.headers_complete() {
            match self.response.parse_headers() {
                Ok(true) => {}
                Ok(false) if shutdown => {
                    self.fail(Error::MalformedResponse(
                        "connection closed before the header block ended".into(),
                    ));
                    return ReceiveStep::Done;
                }
                Ok(false) => return ReceiveStep::Continue,
                Err(e) => {
                    self.fail(e);
                    return ReceiveStep::Done;
                }
            }

            let step = self.apply_status();
            if step != ReceiveStep::Continue {
                return step;
            }
        }

        let body = self.response.take_body();
        self.receive_body(&body);
        if self.finished {
            return ReceiveStep::Done;
        }

        let reached = self
            .expected_size()
            .is_some_and(|expected| self.transferred >= expected);
        if reached || shutdown {
            if shutdown && !reached {
                if let Some(expected) = self.expected_size() {
                    log::warn!(
                        "Connection closed after {} of {} bytes of {}",
                        self.transferred,
                        expected,
                        self.current
                    );
                }
            }
            self.finalize_spool();
            return ReceiveStep::Done;
        }
        ReceiveStep::Continue
    }

    fn apply_status(&mut self) -> ReceiveStep {
        match self.response.classify() {
            StatusAction::Accept {
                content_length,
                cookie,
            } => {
                if let Some(cookie) = cookie {
                    self.request.set_header("Cookie", &cookie);
                }
                if content_length.is_some() {
                    self.real_size = content_length;
                }
                ReceiveStep::Continue
            }
            StatusAction::Redirect {
                status,
                location,
                force_get,
            } => {
                if force_get {
                    self.request.method = "GET".to_string();
                }
                let Some(location) = location else {
                    self.fail(Error::Redirect(RedirectFailure::MissingLocation));
                    return ReceiveStep::Done;
                };
                log::debug!("Redirected ({}) to {}", status, location);
                if self.redirects_left == 0 {
                    self.fail(Error::Redirect(RedirectFailure::TooMany));
                    return ReceiveStep::Done;
                }
                self.redirects_left -= 1;
                if let Err(e) = self.current.redirect(&location) {
                    self.fail(e);
                    return ReceiveStep::Done;
                }
                ReceiveStep::Restart
            }
            StatusAction::NotFound => {
                if self.retry_lower_tier() {
                    ReceiveStep::Restart
                } else {
                    self.fail(Error::ResourceNotFound {
                        url: self.current.to_string(),
                        status: self.response.status(),
                    });
                    ReceiveStep::Done
                }
            }
            StatusAction::Rejected(status) => {
                self.fail(Error::ResourceNotFound {
                    url: self.current.to_string(),
                    status,
                });
                ReceiveStep::Done
            }
        }
    }

    /// Falls back to the next compression tier of the origin URL, dropping any redirect.
    pub(crate) fn retry_lower_tier(&mut self) -> bool {
        let Some(tier) = self.origin.tier().lower() else {
            return false;
        };
        self.origin.set_tier(tier);
        log::debug!("{} not found, trying {}", self.current, self.origin);
        self.current = self.origin.clone();
        self.close_spool();
        self.spool_path = None;
        self.transferred = 0;
        true
    }

    pub(crate) fn set_real_size(&mut self, size: u64) {
        if size > 0 {
            self.real_size = Some(size);
        }
    }

    /// Appends body bytes to the spool, opening it on the first chunk.
    pub(crate) fn receive_body(&mut self, data: &[u8]) {
        if self.finished || data.is_empty() {
            return;
        }
        let count = match self.expected_size() {
            Some(expected) => {
                let remaining = expected.saturating_sub(self.transferred);
                data.len().min(usize::try_from(remaining).unwrap_or(usize::MAX))
            }
            None => data.len(),
        };
        if count == 0 {
            return;
        }
        let chunk = &data[..count];

        if self.spool.is_none() {
            if self.spool_path.is_some() {
                return;
            }
            let name = format!("{}{}", self.resource, self.origin.tier().extension());
            match self.spool_factory.create(&name) {
                Ok((writer, path)) => {
                    log::debug!("Spooling {} to {}", self.current, path.display());
                    self.spool = Some(writer);
                    self.spool_path = Some(path);
                }
                Err(e) => {
                    self.fail(Error::SpoolWrite {
                        path: name,
                        reason: e.to_string(),
                    });
                    return;
                }
            }
            self.payload = PayloadFormat::detect(chunk, self.announced_size);
        }

        if let Some(writer) = self.spool.as_mut() {
            if let Err(e) = writer.write_all(chunk) {
                let path = self.spool_display();
                self.fail(Error::SpoolWrite {
                    path,
                    reason: e.to_string(),
                });
                return;
            }
        }
        self.transferred += count as u64;
    }

    /// Closes the spool once and marks the session complete.
    pub(crate) fn finalize_spool(&mut self) {
        if self.finished {
            return;
        }
        let Some(mut writer) = self.spool.take() else {
            self.fail(Error::EmptyBody(self.current.to_string()));
            return;
        };
        if let Err(e) = writer.flush() {
            let path = self.spool_display();
            self.fail(Error::SpoolWrite {
                path,
                reason: e.to_string(),
            });
            return;
        }
        log::info!(
            "Received {} ({} bytes, {:?})",
            self.current,
            self.transferred,
            self.payload
        );
        self.completed = true;
        self.finished = true;
    }

    fn close_spool(&mut self) {
        if let Some(mut writer) = self.spool.take() {
            let _ = writer.flush();
        }
    }

    fn spool_display(&self) -> String {
        self.spool_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| self.resource.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io;

    use crate::download::DirSpool;

    fn session(dir: &Path, base: &str, compression: bool) -> DownloadSession {
        let request = FileRequest {
            base_url: base.into(),
            resource: "Maps.pkg".into(),
            announced_size: 10,
        };
        let config = DownloadConfig {
            use_compression: compression,
            redirect_limit: 2,
            ..Default::default()
        };
        DownloadSession::new(&request, &config, Arc::new(DirSpool::new(dir))).unwrap()
    }

    fn exchange(session: &mut DownloadSession, response: &[u8]) -> ReceiveStep {
        assert!(session.prepare_exchange());
        session.process_incoming(response, true)
    }

    #[test]
    fn test_detects_payload_format() {
        let mut lzma = vec![0u8; 16];
        lzma[5..13].copy_from_slice(&42u64.to_le_bytes());
        assert_eq!(PayloadFormat::detect(&lzma, 42), PayloadFormat::Lzma);

        let mut uz = vec![0u8; 16];
        uz[..4].copy_from_slice(&5678i32.to_le_bytes());
        assert_eq!(PayloadFormat::detect(&uz, 42), PayloadFormat::Uz);

        assert_eq!(PayloadFormat::detect(&uz[..12], 42), PayloadFormat::Uncompressed);
        assert_eq!(PayloadFormat::detect(b"plain payload", 42), PayloadFormat::Uncompressed);
    }

    #[test]
    fn test_starts_at_highest_tier_when_compressed() {
        let temp = tempfile::tempdir().unwrap();
        let mut compressed = session(temp.path(), "http://h.example/f", true);
        compressed.prepare_exchange();
        assert_eq!(compressed.request().path, "/f/Maps.pkg.lzma");

        let mut plain = session(temp.path(), "http://h.example/f", false);
        plain.prepare_exchange();
        assert_eq!(plain.request().path, "/f/Maps.pkg");
    }

    #[test]
    fn test_not_found_walks_down_tiers() {
        let temp = tempfile::tempdir().unwrap();
        let mut session = session(temp.path(), "http://h.example/", true);
        let not_found = b"HTTP/1.1 404 Not Found\r\n\r\n";

        let mut requested = Vec::new();
        loop {
            session.prepare_exchange();
            requested.push(session.request().path.clone());
            if session.process_incoming(not_found, true) != ReceiveStep::Restart {
                break;
            }
        }

        assert_eq!(requested, ["/Maps.pkg.lzma", "/Maps.pkg.uz", "/Maps.pkg"]);
        assert!(matches!(
            session.error(),
            Some(Error::ResourceNotFound { status: 404, .. })
        ));
        assert!(session.is_finished());
        assert!(!session.is_invalid());
    }

    #[test]
    fn test_redirect_budget() {
        let temp = tempfile::tempdir().unwrap();
        let mut session = session(temp.path(), "http://h.example/", false);
        let redirect = b"HTTP/1.1 302 Found\r\nLocation: /next\r\n\r\n";

        assert_eq!(exchange(&mut session, redirect), ReceiveStep::Restart);
        assert_eq!(exchange(&mut session, redirect), ReceiveStep::Restart);
        assert_eq!(session.request().path, "/next");
        assert_eq!(exchange(&mut session, redirect), ReceiveStep::Done);
        assert_eq!(
            session.error(),
            Some(&Error::Redirect(RedirectFailure::TooMany))
        );
    }

    #[test]
    fn test_redirect_without_location() {
        let temp = tempfile::tempdir().unwrap();
        let mut session = session(temp.path(), "http://h.example/", false);
        let step = exchange(&mut session, b"HTTP/1.1 301 Moved\r\nServer: x\r\n\r\n");
        assert_eq!(step, ReceiveStep::Done);
        assert_eq!(
            session.error(),
            Some(&Error::Redirect(RedirectFailure::MissingLocation))
        );
    }

    #[test]
    fn test_redirect_to_other_host_drops_address() {
        let temp = tempfile::tempdir().unwrap();
        let mut session = session(temp.path(), "http://h.example/", false);
        session.set_remote("127.0.0.1:80".parse().unwrap());
        exchange(
            &mut session,
            b"HTTP/1.1 307 Temporary\r\nLocation: http://mirror.example:8080/x\r\n\r\n",
        );

        assert_eq!(session.sync_remote_host(), ("mirror.example".to_string(), 8080));
        assert_eq!(session.remote(), None);
        assert_eq!(session.request().hostname, "mirror.example");
    }

    #[test]
    fn test_body_spooled_and_truncated_to_length() {
        let temp = tempfile::tempdir().unwrap();
        let mut session = session(temp.path(), "http://h.example/", false);
        session.prepare_exchange();

        let step = session.process_incoming(
            b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\nSet-Cookie: k=v\r\n\r\nab",
            false,
        );
        assert_eq!(step, ReceiveStep::Continue);
        assert_eq!(session.expected_size(), Some(4));

        let step = session.process_incoming(b"cdEXCESS", false);
        assert_eq!(step, ReceiveStep::Done);
        assert!(session.is_complete());
        assert_eq!(session.transferred(), 4);
        assert_eq!(session.request().header("Cookie"), Some("k=v"));

        let path = session.spool_path().unwrap().to_path_buf();
        assert_eq!(path, temp.path().join("Maps.pkg"));
        assert_eq!(fs::read(path).unwrap(), b"abcd");
    }

    #[test]
    fn test_shutdown_before_headers_is_malformed() {
        let temp = tempfile::tempdir().unwrap();
        let mut session = session(temp.path(), "http://h.example/", false);
        session.prepare_exchange();
        session.process_incoming(b"HTTP/1.1 200", true);
        assert!(matches!(session.error(), Some(Error::MalformedResponse(_))));
    }

    #[test]
    fn test_ok_without_body_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        let mut session = session(temp.path(), "http://h.example/", false);
        exchange(&mut session, b"HTTP/1.1 200 OK\r\nServer: x\r\n\r\n");
        assert!(matches!(session.error(), Some(Error::EmptyBody(_))));
        assert!(!session.is_complete());
    }

    #[derive(Clone, Copy)]
    enum Fault {
        Create,
        Write,
        Flush,
    }

    struct FaultySpool(Fault);

    struct FaultyWriter(Fault);

    impl Write for FaultyWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.0 {
                Fault::Write => Err(io::Error::other("disk full")),
                _ => Ok(buf.len()),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            match self.0 {
                Fault::Flush => Err(io::Error::other("disk full")),
                _ => Ok(()),
            }
        }
    }

    impl SpoolFactory for FaultySpool {
        fn create(&self, _name: &str) -> io::Result<(SpoolWriter, PathBuf)> {
            match self.0 {
                Fault::Create => Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only")),
                fault => Ok((Box::new(FaultyWriter(fault)), PathBuf::from("spool/Maps.pkg"))),
            }
        }
    }

    fn faulty_session(fault: Fault) -> DownloadSession {
        let request = FileRequest {
            base_url: "http://h.example/".into(),
            resource: "Maps.pkg".into(),
            announced_size: 0,
        };
        let config = DownloadConfig {
            use_compression: false,
            ..Default::default()
        };
        DownloadSession::new(&request, &config, Arc::new(FaultySpool(fault))).unwrap()
    }

    #[test]
    fn test_spool_failures_end_session() {
        let ok = b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nabcd";
        for (fault, path) in [
            (Fault::Create, "Maps.pkg"),
            (Fault::Write, "spool/Maps.pkg"),
            (Fault::Flush, "spool/Maps.pkg"),
        ] {
            let mut session = faulty_session(fault);
            assert_eq!(exchange(&mut session, ok), ReceiveStep::Done);

            match session.error() {
                Some(Error::SpoolWrite { path: failed, .. }) => assert_eq!(failed, path),
                other => panic!("expected a spool failure, got {:?}", other),
            }
            assert!(session.is_finished());
            assert!(!session.is_complete());
            assert!(!session.is_invalid());
        }
    }

    #[test]
    fn test_connect_timeout_during_transfer_invalidates() {
        let temp = tempfile::tempdir().unwrap();
        let mut session = session(temp.path(), "http://h.example/", false);
        session.set_remote("127.0.0.1:80".parse().unwrap());
        assert!(session.prepare_exchange());

        let (remote, request) = session.begin_transfer().unwrap();
        assert_eq!(remote, "127.0.0.1:80".parse().unwrap());
        assert!(request.starts_with("GET /Maps.pkg HTTP/1.1"));
        assert_eq!(session.stage(), TransferStage::Connecting);

        session.fail(Error::connect_timeout());
        session.end_transfer();

        assert!(session.is_invalid());
        assert!(session.is_finished());
        assert!(!session.is_complete());
        assert_eq!(session.stage(), TransferStage::Idle);
        assert!(session.spool_path().is_none());
    }

    #[test]
    fn test_first_failure_wins() {
        let temp = tempfile::tempdir().unwrap();
        let mut session = session(temp.path(), "http://h.example/", false);
        session.fail(Error::connect_timeout());
        session.fail(Error::ReceiveTimeout);
        assert_eq!(session.error(), Some(&Error::connect_timeout()));
        assert!(session.is_invalid());
    }
}
