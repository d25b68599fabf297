mod driver;
mod notify;
mod secure;
mod session;
mod spool;
mod transfer;

pub use driver::{Collaborators, DownloadPhase, HttpDownload};
pub use notify::{LogProgress, ProgressNotify};
pub use secure::{NoSecureTransfer, SecureSink, SecureTransfer, SecureTransferError};
pub use session::{DownloadSession, FileRequest, PayloadFormat};
pub use spool::{DirSpool, SpoolFactory, SpoolWriter};
