use std::collections::HashMap;

use crate::Error;

pub const STATUS_OK: u16 = 200;
pub const STATUS_NOT_FOUND: u16 = 404;

/// What a completed header block asks the session to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusAction {
    Accept {
        content_length: Option<u64>,
        cookie: Option<String>,
    },
    Redirect {
        status: u16,
        location: Option<String>,
        force_get: bool,
    },
    NotFound,
    Rejected(u16),
}

/// Incremental parser for one HTTP exchange.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    status: u16,
    version: String,
    header_lines: Vec<String>,
    headers: HashMap<String, String>,
    received: Vec<u8>,
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero until the header block is complete.
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn headers_complete(&self) -> bool {
        self.status != 0
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.received.extend_from_slice(data);
    }

    /// Bytes received after the header block.
    pub fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.received)
    }

    /// Extracts complete header lines. Returns `Ok(true)` once the status is known.
    pub fn parse_headers(&mut self) -> Result<bool, Error> {
        if self.status != 0 {
            return Ok(true);
        }

        let mut terminated = false;
        let mut start = 0;
        while let Some(offset) = find_crlf(&self.received[start..]) {
            let line = &self.received[start..start + offset];
            start += offset + 2;
            if line.is_empty() {
                terminated = true;
                break;
            }
            let line = String::from_utf8_lossy(line).into_owned();
            log::trace!("HTTP header received: {}", line);
            self.header_lines.push(line);
        }
        self.received.drain(..start);

        if !terminated {
            return Ok(false);
        }

        let mut lines = std::mem::take(&mut self.header_lines).into_iter();
        let status_line = lines
            .next()
            .ok_or_else(|| Error::MalformedResponse("missing status line".into()))?;

        let mut tokens = status_line.split_whitespace();
        self.version = tokens.next().unwrap_or_default().to_string();
        self.status = tokens
            .next()
            .and_then(|code| code.parse().ok())
            .filter(|&code| code != 0)
            .ok_or_else(|| Error::MalformedResponse(format!("bad status line '{}'", status_line)))?;

        for line in lines {
            let (key, value) = match line.split_once(':') {
                Some((key, value)) => (key, value),
                None => (line.as_str(), ""),
            };
            self.headers.insert(
                key.trim().to_ascii_lowercase(),
                value.trim_start_matches(' ').to_string(),
            );
        }

        Ok(true)
    }

    /// Decides how to proceed with a completed header block.
    pub fn classify(&self) -> StatusAction {
        let mut status = self.status;
        loop {
            match status {
                STATUS_OK => {
                    let content_length = self.header("Content-Length").map(parse_length);
                    // An empty declared body means the file is not really there.
                    if content_length == Some(0) {
                        status = STATUS_NOT_FOUND;
                        continue;
                    }
                    return StatusAction::Accept {
                        content_length,
                        cookie: self.header("Set-Cookie").map(str::to_string),
                    };
                }
                301 | 302 | 303 | 307 => {
                    return StatusAction::Redirect {
                        status,
                        location: self
                            .header("Location")
                            .filter(|l| !l.is_empty())
                            .map(str::to_string),
                        force_get: status == 303,
                    };
                }
                STATUS_NOT_FOUND => return StatusAction::NotFound,
                other => return StatusAction::Rejected(other),
            }
        }
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

/// Leading decimal digits, zero when there are none.
fn parse_length(value: &str) -> u64 {
    let digits: String = value
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
        Server: test\r\n\
        Content-Length: 5\r\n\
        Set-Cookie: id=abc\r\n\
        X-Dup: first\r\n\
        X-Dup:  second\r\n\
        \r\n\
        hello";

    fn parse_all(chunks: &[&[u8]]) -> HttpResponse {
        let mut response = HttpResponse::new();
        for chunk in chunks {
            response.feed(chunk);
            response.parse_headers().unwrap();
        }
        response
    }

    #[test]
    fn test_parse_single_chunk() {
        let mut response = parse_all(&[RESPONSE]);
        assert_eq!(response.status(), 200);
        assert_eq!(response.version(), "HTTP/1.1");
        assert_eq!(response.header("content-length"), Some("5"));
        assert_eq!(response.header("X-DUP"), Some("second"));
        assert_eq!(response.take_body(), b"hello");
    }

    #[test]
    fn test_incomplete_headers_wait() {
        let mut response = HttpResponse::new();
        response.feed(b"HTTP/1.1 200 OK\r\nContent-Len");
        assert!(!response.parse_headers().unwrap());
        assert_eq!(response.status(), 0);
        response.feed(b"gth: 3\r\n\r\nabc");
        assert!(response.parse_headers().unwrap());
        assert_eq!(response.header("Content-Length"), Some("3"));
    }

    #[test]
    fn test_missing_status_line_is_malformed() {
        let mut response = HttpResponse::new();
        response.feed(b"\r\n");
        assert!(matches!(
            response.parse_headers(),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_non_numeric_status_is_malformed() {
        let mut response = HttpResponse::new();
        response.feed(b"HTTP/1.1 OK\r\nServer: x\r\n\r\n");
        assert!(matches!(
            response.parse_headers(),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_zero_length_reclassified_as_not_found() {
        let response = parse_all(&[b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"]);
        assert_eq!(response.classify(), StatusAction::NotFound);
    }

    #[test]
    fn test_accept_captures_cookie_and_length() {
        let response = parse_all(&[RESPONSE]);
        assert_eq!(
            response.classify(),
            StatusAction::Accept {
                content_length: Some(5),
                cookie: Some("id=abc".into()),
            }
        );
    }

    #[test]
    fn test_redirect_classification() {
        let see_other = parse_all(&[b"HTTP/1.1 303 See Other\r\nLocation: /x\r\n\r\n"]);
        assert_eq!(
            see_other.classify(),
            StatusAction::Redirect {
                status: 303,
                location: Some("/x".into()),
                force_get: true,
            }
        );

        let empty = parse_all(&[b"HTTP/1.1 302 Found\r\nLocation:\r\n\r\n"]);
        assert_eq!(
            empty.classify(),
            StatusAction::Redirect {
                status: 302,
                location: None,
                force_get: false,
            }
        );
    }

    #[test]
    fn test_other_status_rejected() {
        let response = parse_all(&[b"HTTP/1.0 500 Oops\r\nServer: x\r\n\r\n"]);
        assert_eq!(response.classify(), StatusAction::Rejected(500));
    }

    proptest! {
        #[test]
        fn test_chunk_boundaries_do_not_matter(
            cuts in proptest::collection::vec(0..RESPONSE.len(), 0..12)
        ) {
            let mut cuts = cuts;
            cuts.sort_unstable();
            cuts.dedup();

            let mut chunks = Vec::new();
            let mut last = 0;
            for cut in cuts {
                chunks.push(&RESPONSE[last..cut]);
                last = cut;
            }
            chunks.push(&RESPONSE[last..]);

            let mut split = parse_all(&chunks);
            let mut whole = parse_all(&[RESPONSE]);
            prop_assert_eq!(split.status(), whole.status());
            prop_assert_eq!(split.headers(), whole.headers());
            prop_assert_eq!(split.take_body(), whole.take_body());
        }
    }
}
