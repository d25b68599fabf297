use std::fmt;

use url::Url;

use crate::Error;

pub const HTTP_PORT: u16 = 80;
pub const HTTPS_PORT: u16 = 443;

/// Compression formats tried in decreasing order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum CompressionTier {
    #[default]
    None = 0,
    Uz = 1,
    Lzma = 2,
}

impl CompressionTier {
    pub fn extension(self) -> &'static str {
        match self {
            CompressionTier::None => "",
            CompressionTier::Uz => ".uz",
            CompressionTier::Lzma => ".lzma",
        }
    }

    pub fn lower(self) -> Option<Self> {
        match self {
            CompressionTier::Lzma => Some(CompressionTier::Uz),
            CompressionTier::Uz => Some(CompressionTier::None),
            CompressionTier::None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// Location of a requested resource: a base URL, the resource name and the
/// compression tier selecting its extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadUrl {
    base: Url,
    resource: Option<String>,
    tier: CompressionTier,
    proxy: Option<Proxy>,
}

impl DownloadUrl {
    pub fn new(base: &str, resource: &str) -> Result<Self, Error> {
        let mut base =
            Url::parse(base).map_err(|e| Error::InvalidUrl(format!("{} ({})", base, e)))?;
        if base.host_str().is_none_or(str::is_empty) {
            return Err(Error::InvalidUrl(base.to_string()));
        }
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::UnsupportedScheme(base.scheme().to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let resource = (!resource.is_empty()).then(|| resource.to_string());
        Ok(Self {
            base,
            resource,
            tier: CompressionTier::None,
            proxy: None,
        })
    }

    pub fn with_tier(mut self, tier: CompressionTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<Proxy>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn scheme(&self) -> Scheme {
        if self.base.scheme() == "https" {
            Scheme::Https
        } else {
            Scheme::Http
        }
    }

    pub fn host(&self) -> &str {
        self.base.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.base.port_or_known_default().unwrap_or(HTTP_PORT)
    }

    pub fn tier(&self) -> CompressionTier {
        self.tier
    }

    pub fn set_tier(&mut self, tier: CompressionTier) {
        self.tier = tier;
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    pub fn connect_host(&self) -> &str {
        match &self.proxy {
            Some(proxy) => &proxy.host,
            None => self.host(),
        }
    }

    pub fn connect_port(&self) -> u16 {
        match &self.proxy {
            Some(proxy) => proxy.port,
            None => self.port(),
        }
    }

    /// Full URL of the resource at the current tier.
    pub fn full(&self) -> Url {
        let mut url = self.base.clone();
        if let Some(resource) = &self.resource {
            let path = format!("{}{}{}", url.path(), resource, self.tier.extension());
            url.set_path(&path);
        }
        url
    }

    /// Request target: origin-form, or absolute-form when going through a proxy.
    pub fn request_path(&self) -> String {
        let url = self.full();
        if self.proxy.is_some() {
            return url.to_string();
        }
        match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        }
    }

    /// Folds the resource into the path and resolves `location` against it.
    pub fn redirect(&mut self, location: &str) -> Result<(), Error> {
        let current = self.full();
        let target = current
            .join(location)
            .map_err(|e| Error::InvalidUrl(format!("{} ({})", location, e)))?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(Error::UnsupportedScheme(target.scheme().to_string()));
        }
        self.base = target;
        self.resource = None;
        self.tier = CompressionTier::None;
        Ok(())
    }
}

impl fmt::Display for DownloadUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_path_per_tier() {
        let url = DownloadUrl::new("http://files.example.com/redirect", "Maps.pkg").unwrap();
        assert_eq!(url.request_path(), "/redirect/Maps.pkg");
        assert_eq!(
            url.clone().with_tier(CompressionTier::Uz).request_path(),
            "/redirect/Maps.pkg.uz"
        );
        assert_eq!(
            url.with_tier(CompressionTier::Lzma).request_path(),
            "/redirect/Maps.pkg.lzma"
        );
    }

    #[test]
    fn test_tier_lowering_is_strict() {
        let mut tier = CompressionTier::Lzma;
        let mut seen = vec![tier];
        while let Some(next) = tier.lower() {
            assert!(next < tier);
            tier = next;
            seen.push(tier);
        }
        assert_eq!(
            seen,
            vec![
                CompressionTier::Lzma,
                CompressionTier::Uz,
                CompressionTier::None
            ]
        );
    }

    #[test]
    fn test_redirect_forms() {
        let base = DownloadUrl::new("http://a.example/dir/", "Pkg.u")
            .unwrap()
            .with_tier(CompressionTier::Uz);

        let mut absolute_path = base.clone();
        absolute_path.redirect("/new/path").unwrap();
        assert_eq!(absolute_path.to_string(), "http://a.example/new/path");
        assert_eq!(absolute_path.tier(), CompressionTier::None);
        assert_eq!(absolute_path.resource(), None);

        let mut relative = base.clone();
        relative.redirect("mirror/Pkg.u.uz").unwrap();
        assert_eq!(relative.to_string(), "http://a.example/dir/mirror/Pkg.u.uz");

        let mut absolute = base.clone();
        absolute.redirect("http://b.example:8080/x").unwrap();
        assert_eq!(absolute.host(), "b.example");
        assert_eq!(absolute.port(), 8080);

        let mut scheme_relative = base;
        scheme_relative.redirect("//c.example/y").unwrap();
        assert_eq!(scheme_relative.to_string(), "http://c.example/y");
    }

    #[test]
    fn test_proxy_uses_absolute_form() {
        let url = DownloadUrl::new("http://a.example/", "Pkg.u")
            .unwrap()
            .with_proxy(Some(Proxy {
                host: "proxy.local".into(),
                port: 3128,
            }));
        assert_eq!(url.connect_host(), "proxy.local");
        assert_eq!(url.connect_port(), 3128);
        assert_eq!(url.request_path(), "http://a.example/Pkg.u");
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(matches!(
            DownloadUrl::new("ftp://a.example/", "x"),
            Err(Error::UnsupportedScheme(_))
        ));
        assert!(matches!(
            DownloadUrl::new("not a url", "x"),
            Err(Error::InvalidUrl(_))
        ));
        assert_eq!(
            DownloadUrl::new("https://a.example/", "x").unwrap().port(),
            HTTPS_PORT
        );
    }
}
