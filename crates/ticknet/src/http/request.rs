#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub hostname: String,
    pub path: String,
    headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(hostname: &str, path: &str, user_agent: &str) -> Self {
        let mut request = Self {
            method: "GET".to_string(),
            hostname: hostname.to_string(),
            path: path.to_string(),
            headers: Vec::new(),
        };
        request.set_header("User-Agent", user_agent);
        request.set_header("Accept", "*/*");
        // Proxies with auth require Proxy-Connection instead; not supported.
        request.set_header("Connection", "close");
        request
    }

    /// Replaces an existing header of the same name, keeping its position.
    pub fn set_header(&mut self, key: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            Some((_, v)) => *v = value.to_string(),
            None => self.headers.push((key.to_string(), value.to_string())),
        }
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn to_wire(&self) -> String {
        let mut wire = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\n",
            self.method, self.path, self.hostname
        );
        for (key, value) in &self.headers {
            wire.push_str(key);
            wire.push_str(": ");
            wire.push_str(value);
            wire.push_str("\r\n");
        }
        wire.push_str("\r\n");
        wire
    }
}
