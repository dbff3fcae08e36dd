//! Resolution of proxy paths such as `example.com/8080/status` into the
//! upstream URL a request is forwarded to.

use crate::error::ProxyError;
use hyper::Uri;
use std::fmt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    /// `/proxy/<host>/...`: forward as-is, API-style CORS headers.
    Plain,
    /// `/proxyport/<host>/<port>/...`
    WithPort,
    /// `/webproxy/<host>/...`: HTML responses get their links rewritten.
    Web,
}

impl ProxyMode {
    pub fn is_web(&self) -> bool {
        matches!(self, ProxyMode::Web)
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyMode::Plain => write!(f, "plain"),
            ProxyMode::WithPort => write!(f, "with-port"),
            ProxyMode::Web => write!(f, "web"),
        }
    }
}

/// Fully qualified upstream location derived from one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub scheme: Scheme,
    pub host: String,
    pub port: Option<u16>,
    /// Path without its leading slash; empty when the bare host was requested.
    pub path: String,
    /// Inbound query string including the leading `?`, or empty.
    pub query: String,
    url: Url,
}

impl ResolvedTarget {
    /// `host[:port]` as sent in the `Host` header. A port equal to the
    /// scheme default is omitted.
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or(&self.host);
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme, self.authority())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn uri(&self) -> Result<Uri, ProxyError> {
        self.url
            .as_str()
            .parse::<Uri>()
            .map_err(|e| ProxyError::BadRequest(format!("Invalid target URL: {}", e)))
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Splits the path that follows a route prefix into host, optional port and
/// target path, and appends the inbound query string.
pub fn resolve(
    path_after_prefix: &str,
    query: Option<&str>,
    mode: ProxyMode,
    scheme: Scheme,
) -> Result<ResolvedTarget, ProxyError> {
    let parts: Vec<&str> = path_after_prefix.split('/').collect();

    let (host, port, rest) = match mode {
        ProxyMode::Plain | ProxyMode::Web => {
            let host = parts[0];
            if host.is_empty() {
                return Err(ProxyError::BadRequest("Missing host parameter".to_string()));
            }
            (host, None, &parts[1..])
        }
        ProxyMode::WithPort => {
            if parts.len() < 2 || parts[0].is_empty() {
                return Err(ProxyError::BadRequest(
                    "Missing host or port parameter".to_string(),
                ));
            }
            let port = parse_port(parts[1])?;
            (parts[0], Some(port), &parts[2..])
        }
    };

    let path = rest.join("/");
    let query = match query {
        Some(q) if !q.is_empty() => format!("?{}", q),
        _ => String::new(),
    };

    let authority = match port {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let raw = format!("{}://{}/{}{}", scheme, authority, path, query);
    let url = Url::parse(&raw)
        .map_err(|e| ProxyError::BadRequest(format!("Invalid target URL: {} ({})", raw, e)))?;

    Ok(ResolvedTarget {
        scheme,
        host: host.to_string(),
        port,
        path,
        query,
        url,
    })
}

fn parse_port(raw: &str) -> Result<u16, ProxyError> {
    match raw.parse::<u16>() {
        Ok(port) if port >= 1 => Ok(port),
        _ => Err(ProxyError::BadRequest(format!("Invalid port: {}", raw))),
    }
}
