//! One proxy cycle: outbound request, single upstream fetch, filtered
//! response, optional HTML rewrite.

use crate::common::{HTML_CONTENT_TYPE, ProxyBody, empty, full};
use crate::config::Config;
use crate::error::ProxyError;
use crate::headers::{HeaderPolicy, restrict_accept_encoding};
use crate::rewrite::RewriteContext;
use crate::target::{ProxyMode, ResolvedTarget};
use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use http_body_util::BodyExt;
use hyper::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue};
use hyper::{Method, Request, Response};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use log::{debug, warn};
use std::io::Read;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};

pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, ProxyBody>;

/// Pooled client reaching both `http://` and `https://` targets.
pub fn build_client(config: &Config) -> UpstreamClient {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(config.connect_timeout()));

    Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(config.pool_max_idle_per_host())
        .pool_idle_timeout(config.pool_idle_timeout())
        .build(HttpsConnector::new_with_connector(http))
}

pub struct ProxyExecutor {
    client: UpstreamClient,
    policy: HeaderPolicy,
    request_timeout: Duration,
}

impl ProxyExecutor {
    pub fn new(client: UpstreamClient, policy: HeaderPolicy, request_timeout: Duration) -> Self {
        Self {
            client,
            policy,
            request_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ProxyError> {
        let policy = HeaderPolicy::new(config.fallback_user_agent())?;
        Ok(Self::new(build_client(config), policy, config.request_timeout()))
    }

    /// Forwards `inbound` to `target` exactly once. Passing a rewrite
    /// context turns on HTML rewriting for `text/html` responses. The
    /// upstream status code is returned unchanged; only transport failures
    /// become errors.
    ///
    /// The request timeout bounds the fetch and, for rewritten pages, the
    /// buffering of the body as well. Streamed bodies are not bounded.
    pub async fn execute(
        &self,
        inbound: Request<ProxyBody>,
        target: &ResolvedTarget,
        mode: ProxyMode,
        rewrite: Option<&RewriteContext>,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let (parts, body) = inbound.into_parts();

        let mut headers = self.policy.build_request_headers(&parts.headers, target)?;
        if rewrite.is_some() {
            restrict_accept_encoding(&mut headers);
        }
        let body = if parts.method == Method::GET || parts.method == Method::HEAD {
            headers.remove(CONTENT_LENGTH);
            empty()
        } else {
            body
        };

        let mut outbound = Request::new(body);
        *outbound.method_mut() = parts.method.clone();
        *outbound.uri_mut() = target.uri()?;
        *outbound.headers_mut() = headers;

        debug!("Proxying {} {}", parts.method, target);

        let deadline = Instant::now() + self.request_timeout;
        let upstream = match timeout_at(deadline, self.client.request(outbound)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(self.connect_failure(target, mode, &describe(&e))),
            Err(_) => return Err(self.timed_out(target, mode)),
        };

        let (upstream_parts, upstream_body) = upstream.into_parts();
        let mut response_headers = self
            .policy
            .build_response_headers(&upstream_parts.headers, mode.is_web());

        let body = match rewrite {
            Some(ctx) if is_html(&upstream_parts.headers) => {
                let raw = match timeout_at(deadline, upstream_body.collect()).await {
                    Ok(Ok(collected)) => collected.to_bytes(),
                    Ok(Err(e)) => {
                        warn!("Failed to read HTML body from {}: {}", target, e);
                        return Err(ProxyError::Upstream(format!(
                            "Failed to read response from target: {}",
                            e
                        )));
                    }
                    Err(_) => return Err(self.timed_out(target, mode)),
                };
                rewrite_html_body(raw, ctx, &mut response_headers)
            }
            _ => upstream_body.boxed_unsync(),
        };

        let mut response = Response::new(body);
        *response.status_mut() = upstream_parts.status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }

    fn timed_out(&self, target: &ResolvedTarget, mode: ProxyMode) -> ProxyError {
        let reason = format!("request timed out after {}s", self.request_timeout.as_secs());
        self.connect_failure(target, mode, &reason)
    }

    fn connect_failure(
        &self,
        target: &ResolvedTarget,
        mode: ProxyMode,
        reason: &str,
    ) -> ProxyError {
        warn!("Proxy error for {}: {}", target, reason);
        match (mode, target.port) {
            (ProxyMode::WithPort, Some(port)) => ProxyError::Upstream(format!(
                "Failed to connect to {}:{} - {}",
                target.host, port, reason
            )),
            _ => ProxyError::Upstream(format!("Failed to connect to target: {}", reason)),
        }
    }
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/html"))
}

/// Rewrites a buffered HTML body. Compressed bodies are inflated first; an
/// encoding that cannot be decoded is passed through untouched.
fn rewrite_html_body(raw: Bytes, ctx: &RewriteContext, headers: &mut HeaderMap) -> ProxyBody {
    let encoding = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase());

    let decoded = match decode(&raw, encoding.as_deref()) {
        Some(decoded) => decoded,
        None => {
            debug!("Skipping HTML rewrite for content-encoding {:?}", encoding);
            return full(raw);
        }
    };

    let html = String::from_utf8_lossy(&decoded);
    let rewritten = ctx.rewrite(&html);

    headers.insert(CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE));
    headers.remove(CONTENT_LENGTH);
    headers.remove(CONTENT_ENCODING);
    full(rewritten)
}

fn decode(raw: &[u8], encoding: Option<&str>) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len() * 2);
    match encoding {
        None | Some("") | Some("identity") => return Some(raw.to_vec()),
        Some("gzip") | Some("x-gzip") => GzDecoder::new(raw).read_to_end(&mut out).ok()?,
        Some("deflate") => ZlibDecoder::new(raw).read_to_end(&mut out).ok()?,
        Some(_) => return None,
    };
    Some(out)
}

/// Flattens an error and its sources into one line; the legacy client's
/// top-level message alone ("client error (Connect)") hides the cause.
fn describe(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use std::io::Write;

    fn ctx() -> RewriteContext {
        RewriteContext::new("https://a.com", "https://p.io", "/webproxy/")
    }

    async fn body_string(body: ProxyBody) -> String {
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_is_html() {
        let mut headers = HeaderMap::new();
        assert!(!is_html(&headers));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=iso-8859-1"));
        assert!(is_html(&headers));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!is_html(&headers));
    }

    #[tokio::test]
    async fn test_rewrite_sets_html_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("14"));

        let body = rewrite_html_body(Bytes::from_static(b"<a href=\"/y\">"), &ctx(), &mut headers);

        assert_eq!(headers[CONTENT_TYPE], HTML_CONTENT_TYPE);
        assert!(!headers.contains_key(CONTENT_LENGTH));
        assert_eq!(body_string(body).await, "<a href=\"https://p.io/webproxy/a.com/y\">");
    }

    #[tokio::test]
    async fn test_gzip_body_inflated_before_rewrite() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<img src=\"/logo.png\">").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let body = rewrite_html_body(Bytes::from(compressed), &ctx(), &mut headers);

        assert!(!headers.contains_key(CONTENT_ENCODING));
        assert_eq!(body_string(body).await, "<img src=\"https://p.io/webproxy/a.com/logo.png\">");
    }

    #[tokio::test]
    async fn test_deflate_body_inflated_before_rewrite() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<form action=\"/login\">").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("deflate"));

        let body = rewrite_html_body(Bytes::from(compressed), &ctx(), &mut headers);

        assert!(!headers.contains_key(CONTENT_ENCODING));
        assert_eq!(
            body_string(body).await,
            "<form action=\"https://p.io/webproxy/a.com/login\">"
        );
    }

    #[derive(Debug)]
    struct ConnectError(std::io::Error);

    impl std::fmt::Display for ConnectError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "client error (Connect)")
        }
    }

    impl std::error::Error for ConnectError {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_describe_includes_sources() {
        let inner =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        assert_eq!(
            describe(&ConnectError(inner)),
            "client error (Connect): connection refused"
        );
    }
}
