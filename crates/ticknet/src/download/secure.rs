use std::sync::Arc;
use std::time::Duration;

use super::session::DownloadSession;
use crate::Error;
use crate::task::TaskContext;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecureTransferError {
    #[error("timed out")]
    TimedOut,
    #[error("{0}")]
    Failed(String),
}

/// Receives what a secure transfer produces.
pub trait SecureSink {
    fn content_length(&mut self, length: u64);
    /// Returns false to abort the transfer.
    fn write(&mut self, data: &[u8]) -> bool;
}

/// Fetches `https` URLs. The crate carries no TLS stack of its own.
pub trait SecureTransfer: Send + Sync {
    fn is_available(&self) -> bool;

    fn transfer(
        &self,
        url: &str,
        timeout: Duration,
        sink: &mut dyn SecureSink,
    ) -> Result<(), SecureTransferError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecureTransfer;

impl SecureTransfer for NoSecureTransfer {
    fn is_available(&self) -> bool {
        false
    }

    fn transfer(
        &self,
        url: &str,
        _timeout: Duration,
        _sink: &mut dyn SecureSink,
    ) -> Result<(), SecureTransferError> {
        Err(SecureTransferError::Failed(format!(
            "no secure transfer backend for {}",
            url
        )))
    }
}

struct SessionSink<'a> {
    ctx: &'a TaskContext<DownloadSession>,
}

impl SecureSink for SessionSink<'_> {
    fn content_length(&mut self, length: u64) {
        self.ctx.with_live(|s| s.set_real_size(length));
    }

    fn write(&mut self, data: &[u8]) -> bool {
        self.ctx
            .with_live(|s| {
                s.receive_body(data);
                !s.is_finished()
            })
            .unwrap_or(false)
    }
}

pub(crate) fn run_secure_transfer(
    mut ctx: TaskContext<DownloadSession>,
    backend: Arc<dyn SecureTransfer>,
    timeout: Duration,
) {
    let Some(url) = ctx.setup(|s| {
        s.prepare_exchange();
        s.current_url().to_string()
    }) else {
        return;
    };
    ctx.detach();

    log::debug!("Fetching {} over a secure transfer", url);
    let result = backend.transfer(&url, timeout, &mut SessionSink { ctx: &ctx });

    ctx.with_live(|s| {
        match result {
            Ok(()) => s.finalize_spool(),
            Err(SecureTransferError::TimedOut) => {
                s.mark_invalid();
                s.fail(Error::connect_timeout());
            }
            Err(SecureTransferError::Failed(_)) if s.is_finished() => {}
            Err(SecureTransferError::Failed(reason)) => {
                log::debug!("Secure transfer of {} failed: {}", url, reason);
                if !s.retry_lower_tier() {
                    s.fail(Error::ResourceNotFound {
                        url: url.clone(),
                        status: 0,
                    });
                }
            }
        }
        s.end_transfer();
    });
}
