mod locator;
mod request;
mod response;

pub use locator::{CompressionTier, DownloadUrl, HTTP_PORT, HTTPS_PORT, Proxy, Scheme};
pub use request::HttpRequest;
pub use response::{HttpResponse, STATUS_NOT_FOUND, STATUS_OK, StatusAction};
