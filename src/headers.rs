//! Header allow-lists applied in both directions across the proxy boundary.

use crate::error::ProxyError;
use crate::target::ResolvedTarget;
use hyper::header::{
    ACCEPT_ENCODING, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, HOST, HeaderMap, HeaderName, HeaderValue,
    SET_COOKIE, USER_AGENT,
};
use log::debug;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Content codings the HTML rewriter can inflate.
pub const REWRITABLE_ENCODINGS: &str = "gzip, deflate";

/// Request headers copied from the client to the upstream.
pub const REQUEST_ALLOW_LIST: &[&str] = &[
    "accept",
    "accept-encoding",
    "accept-language",
    "authorization",
    "content-type",
    "user-agent",
    "cache-control",
    "pragma",
    "content-length",
    "origin",
    "referer",
    "cookie",
    "x-requested-with",
];

/// Response headers copied from the upstream to the client. `location` is
/// deliberately absent.
pub const RESPONSE_ALLOW_LIST: &[&str] = &[
    "content-type",
    "content-encoding",
    "content-length",
    "cache-control",
    "etag",
    "last-modified",
];

const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS, HEAD, PATCH";
const CORS_MAX_AGE: &str = "86400";

#[derive(Debug, Clone)]
pub struct HeaderPolicy {
    fallback_user_agent: HeaderValue,
}

impl Default for HeaderPolicy {
    fn default() -> Self {
        Self {
            fallback_user_agent: HeaderValue::from_static(DEFAULT_USER_AGENT),
        }
    }
}

impl HeaderPolicy {
    pub fn new(fallback_user_agent: &str) -> Result<Self, ProxyError> {
        let fallback_user_agent = HeaderValue::from_str(fallback_user_agent)
            .map_err(|e| ProxyError::Config(format!("Invalid fallback user agent: {}", e)))?;
        Ok(Self { fallback_user_agent })
    }

    /// Outbound header set: allow-listed client headers, a `Host` pinned to
    /// the target and a browser `User-Agent` when the client sent none.
    /// Nothing identifying the client or the proxy is added.
    pub fn build_request_headers(
        &self,
        original: &HeaderMap,
        target: &ResolvedTarget,
    ) -> Result<HeaderMap, ProxyError> {
        let mut headers = copy_allowed(original, REQUEST_ALLOW_LIST);

        let host = HeaderValue::from_str(&target.authority())
            .map_err(|e| ProxyError::BadRequest(format!("Invalid target host: {}", e)))?;
        headers.insert(HOST, host);

        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, self.fallback_user_agent.clone());
        }

        debug!(
            "Outbound headers for {}: {} forwarded of {} received",
            target,
            headers.len(),
            original.len()
        );
        Ok(headers)
    }

    /// Inbound header set returned to the client. Web mode keeps cookies so
    /// sessions work through the rewritten pages; the API-style modes drop
    /// them and advertise permissive CORS instead.
    pub fn build_response_headers(&self, upstream: &HeaderMap, is_web_mode: bool) -> HeaderMap {
        let mut headers = copy_allowed(upstream, RESPONSE_ALLOW_LIST);

        if is_web_mode {
            for value in upstream.get_all(SET_COOKIE) {
                headers.append(SET_COOKIE, value.clone());
            }
        } else {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
            headers.insert(
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(CORS_ALLOW_METHODS),
            );
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
            headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(CORS_MAX_AGE));
        }

        headers
    }
}

/// Narrows a forwarded `accept-encoding` to [`REWRITABLE_ENCODINGS`] so a
/// page fetched for rewriting never comes back as `br` or `zstd`. A request
/// without the header is left alone and gets an identity response.
pub fn restrict_accept_encoding(headers: &mut HeaderMap) {
    if headers.contains_key(ACCEPT_ENCODING) {
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(REWRITABLE_ENCODINGS));
    }
}

fn copy_allowed(source: &HeaderMap, allow_list: &[&str]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in source.iter() {
        if is_allowed(name, allow_list) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

fn is_allowed(name: &HeaderName, allow_list: &[&str]) -> bool {
    allow_list.iter().any(|allowed| name.as_str().eq_ignore_ascii_case(allowed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{ProxyMode, Scheme, resolve};
    use hyper::header::{CONTENT_TYPE, COOKIE, LOCATION};

    fn target(path: &str, mode: ProxyMode) -> ResolvedTarget {
        resolve(path, None, mode, Scheme::Https).unwrap()
    }

    #[test]
    fn test_request_headers_drop_unknown_names() {
        let mut original = HeaderMap::new();
        original.insert("x-custom", HeaderValue::from_static("1"));
        original.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        original.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let headers = HeaderPolicy::default()
            .build_request_headers(&original, &target("example.com", ProxyMode::Plain))
            .unwrap();

        assert!(!headers.contains_key("x-custom"));
        assert!(!headers.contains_key("x-forwarded-for"));
        assert_eq!(headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_request_host_overrides_inbound() {
        let mut original = HeaderMap::new();
        original.insert(HOST, HeaderValue::from_static("proxy.local"));

        let policy = HeaderPolicy::default();
        let headers = policy
            .build_request_headers(&original, &target("example.com/8080/x", ProxyMode::WithPort))
            .unwrap();
        assert_eq!(headers[HOST], "example.com:8080");
        assert_eq!(headers.get_all(HOST).iter().count(), 1);

        let headers = policy
            .build_request_headers(&original, &target("example.com/x", ProxyMode::Plain))
            .unwrap();
        assert_eq!(headers[HOST], "example.com");
    }

    #[test]
    fn test_user_agent_fallback_only_when_missing() {
        let policy = HeaderPolicy::new("TestAgent/1.0").unwrap();
        let t = target("example.com", ProxyMode::Plain);

        let headers = policy.build_request_headers(&HeaderMap::new(), &t).unwrap();
        assert_eq!(headers[USER_AGENT], "TestAgent/1.0");

        let mut original = HeaderMap::new();
        original.insert(USER_AGENT, HeaderValue::from_static("curl/8.0"));
        let headers = policy.build_request_headers(&original, &t).unwrap();
        assert_eq!(headers[USER_AGENT], "curl/8.0");
    }

    #[test]
    fn test_request_keeps_every_cookie_value() {
        let mut original = HeaderMap::new();
        original.append(COOKIE, HeaderValue::from_static("a=1"));
        original.append(COOKIE, HeaderValue::from_static("b=2"));

        let headers = HeaderPolicy::default()
            .build_request_headers(&original, &target("example.com", ProxyMode::Web))
            .unwrap();
        let cookies: Vec<_> = headers.get_all(COOKIE).iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_location_never_forwarded() {
        let mut upstream = HeaderMap::new();
        upstream.insert(LOCATION, HeaderValue::from_static("http://evil.example/"));

        let policy = HeaderPolicy::default();
        assert!(!policy.build_response_headers(&upstream, true).contains_key(LOCATION));
        assert!(!policy.build_response_headers(&upstream, false).contains_key(LOCATION));
    }

    #[test]
    fn test_set_cookie_only_in_web_mode() {
        let mut upstream = HeaderMap::new();
        upstream.append(SET_COOKIE, HeaderValue::from_static("sid=1"));
        upstream.append(SET_COOKIE, HeaderValue::from_static("theme=dark"));

        let policy = HeaderPolicy::default();
        let web = policy.build_response_headers(&upstream, true);
        assert_eq!(web.get_all(SET_COOKIE).iter().count(), 2);

        let plain = policy.build_response_headers(&upstream, false);
        assert!(!plain.contains_key(SET_COOKIE));
    }

    #[test]
    fn test_cors_headers_only_outside_web_mode() {
        let policy = HeaderPolicy::default();
        let plain = policy.build_response_headers(&HeaderMap::new(), false);
        assert_eq!(plain[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(plain[ACCESS_CONTROL_ALLOW_METHODS], CORS_ALLOW_METHODS);
        assert_eq!(plain[ACCESS_CONTROL_ALLOW_HEADERS], "*");
        assert_eq!(plain[ACCESS_CONTROL_MAX_AGE], "86400");

        let web = policy.build_response_headers(&HeaderMap::new(), true);
        assert!(!web.contains_key(ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[test]
    fn test_accept_encoding_narrowed_to_rewritable_codings() {
        let mut headers = HeaderMap::new();
        restrict_accept_encoding(&mut headers);
        assert!(!headers.contains_key(ACCEPT_ENCODING));

        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br, zstd"));
        restrict_accept_encoding(&mut headers);
        assert_eq!(headers[ACCEPT_ENCODING], "gzip, deflate");
        assert_eq!(headers.get_all(ACCEPT_ENCODING).iter().count(), 1);
    }

    #[test]
    fn test_response_drops_server_identity() {
        let mut upstream = HeaderMap::new();
        upstream.insert("server", HeaderValue::from_static("nginx"));
        upstream.insert("etag", HeaderValue::from_static("\"abc\""));

        let headers = HeaderPolicy::default().build_response_headers(&upstream, true);
        assert!(!headers.contains_key("server"));
        assert_eq!(headers["etag"], "\"abc\"");
    }

    #[test]
    fn test_invalid_fallback_user_agent_rejected() {
        assert!(matches!(HeaderPolicy::new("bad\nagent"), Err(ProxyError::Config(_))));
    }
}
