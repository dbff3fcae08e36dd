use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Body type shared by every response the proxy emits: either a streamed
/// upstream body or a buffered one produced locally.
pub type ProxyBody = UnsyncBoxBody<Bytes, hyper::Error>;

pub const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";
pub const HTML_CONTENT_TYPE: &str = "text/html;charset=UTF-8";

pub fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// ISO 8601 UTC timestamp with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`.
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope<'a> {
    pub error: &'a str,
    pub code: u16,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub timestamp: String,
}

/// Common response builder utilities
pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Pretty-printed JSON with permissive CORS, the shape used by every
    /// locally generated JSON response.
    pub fn json<T: Serialize>(status: StatusCode, payload: &T) -> Response<ProxyBody> {
        let body = serde_json::to_string_pretty(payload).unwrap_or_else(|e| {
            log::error!("Failed to serialize JSON response: {}", e);
            String::from("{}")
        });

        let mut response = Response::new(full(body));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        response
    }

    pub fn error(status: StatusCode, message: &str, details: Option<&str>) -> Response<ProxyBody> {
        let envelope = ErrorEnvelope {
            error: message,
            code: status.as_u16(),
            timestamp: iso_timestamp(),
            details,
        };
        Self::json(status, &envelope)
    }

    pub fn health() -> Response<ProxyBody> {
        let payload = HealthStatus {
            status: "healthy",
            timestamp: iso_timestamp(),
        };
        Self::json(StatusCode::OK, &payload)
    }

    pub fn html(body: String, cache_control: &'static str) -> Response<ProxyBody> {
        let mut response = Response::new(full(body));
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(cache_control));
        response
    }
}

/// HTML templates for locally served pages
pub struct HtmlTemplates;

impl HtmlTemplates {
    /// Renders the informational home page: a URL to proxy-link converter
    /// followed by the supported routes with examples.
    pub fn render_home_page(proxy_origin: &str) -> String {
        let origin = escape_html(proxy_origin);
        let mut html = String::with_capacity(8192);

        html.push_str(HOME_HEAD);
        html.push_str(QUICK_ACCESS);

        let routes: [(&str, &str, String); 5] = [
            (
                "Basic proxy",
                "<code>/proxy/:host/:path*</code> or <code>/httpproxy/:host/:path*</code>",
                format!("{}/proxy/api.github.com/users/octocat", origin),
            ),
            (
                "Proxy with port",
                "<code>/proxyport/:host/:port/:path*</code> or \
                 <code>/httpproxyport/:host/:port/:path*</code>",
                format!("{}/httpproxyport/portquiz.net/8080", origin),
            ),
            (
                "Web proxy (HTML rewrite)",
                "<code>/webproxy/:host/:path*</code> or <code>/httpwebproxy/:host/:path*</code>",
                format!("{}/webproxy/example.com", origin),
            ),
            (
                "Git clone",
                "clone GitHub or GitLab repositories through the proxy",
                format!("git clone {}/proxy/github.com/rust-lang/log.git", origin),
            ),
            ("Health check", "<code>/health</code>", format!("{}/health", origin)),
        ];

        html.push_str("\n        <h2>Supported routes</h2>");
        for (title, pattern, example) in routes {
            html.push_str("\n        <div class=\"route\"><strong>");
            html.push_str(title);
            html.push_str(":</strong> ");
            html.push_str(pattern);
            html.push_str("<em>Example: ");
            html.push_str(&example);
            html.push_str("</em></div>");
        }

        html.push_str(HOME_TAIL);
        html
    }
}

const HOME_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Proxy</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Arial, sans-serif;
            background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
            min-height: 100vh; margin: 0; padding: 15px;
        }
        .container {
            max-width: 700px; margin: 20px auto; background: white; padding: 25px;
            border-radius: 16px; box-shadow: 0 20px 60px rgba(0,0,0,0.3);
        }
        h1 { color: #333; text-align: center; }
        h2 { color: #667eea; margin: 25px 0 12px 0; font-size: 16px; }
        .input-box { background: #f8f9ff; padding: 15px; border-radius: 10px; }
        .input-box input {
            width: 100%; box-sizing: border-box; padding: 12px;
            border: 2px solid #e0e0e0; border-radius: 8px; font-size: 14px;
        }
        #proxyLink {
            display: none; margin-top: 12px; padding: 12px; background: #e8f5e9;
            border-radius: 8px; font-family: 'Courier New', monospace; font-size: 11px;
            word-break: break-all; color: #2e7d32;
        }
        .btn-group { margin-top: 12px; display: flex; gap: 8px; }
        .btn { padding: 12px 20px; border: none; border-radius: 8px; cursor: pointer; }
        .btn-primary { background: #667eea; color: white; flex: 1; }
        .btn-success { background: #28a745; color: white; display: none; }
        .route {
            background: #fafafa; padding: 12px; margin: 8px 0; border-radius: 8px;
            border-left: 3px solid #667eea; font-size: 13px; word-break: break-all;
        }
        .route code { background: #e8e8e8; padding: 2px 5px; border-radius: 4px; font-size: 11px; }
        .route em { color: #666; font-size: 12px; display: block; margin-top: 5px; }
        .footer { text-align: center; margin-top: 30px; color: #999; font-size: 12px; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Proxy</h1>"#;

// Client-side converter: https URLs map to /proxy/, http to /httpproxy/, and
// an explicit port switches to the matching *port/ route.
const QUICK_ACCESS: &str = r#"
        <h2>Quick access</h2>
        <div class="input-box">
            <input type="text" id="targetUrl"
                   placeholder="Target URL, e.g. https://api.example.com/users">
            <div id="proxyLink"></div>
            <div class="btn-group">
                <button onclick="goProxy()" class="btn btn-primary">Open</button>
                <button onclick="copyProxy()" id="copyBtn" class="btn btn-success">
                    Copy link
                </button>
            </div>
        </div>
        <script>
        let currentProxyUrl = '';

        function toProxyPath(raw) {
            const parsed = new URL(raw);
            const route = parsed.protocol === 'https:' ? 'proxy' : 'httpproxy';
            const rest = parsed.pathname + parsed.search + parsed.hash;
            if (parsed.port) {
                return '/' + route + 'port/' + parsed.hostname + '/' + parsed.port + rest;
            }
            return '/' + route + '/' + parsed.hostname + rest;
        }

        function updateProxyLink() {
            const raw = document.getElementById('targetUrl').value.trim();
            const linkDiv = document.getElementById('proxyLink');
            const copyBtn = document.getElementById('copyBtn');
            currentProxyUrl = '';
            try {
                if (raw) {
                    currentProxyUrl = window.location.origin + toProxyPath(raw);
                }
            } catch (e) {}
            linkDiv.textContent = currentProxyUrl;
            linkDiv.style.display = currentProxyUrl ? 'block' : 'none';
            copyBtn.style.display = currentProxyUrl ? 'inline-block' : 'none';
        }

        function goProxy() {
            if (currentProxyUrl) {
                window.location.href = currentProxyUrl;
            }
        }

        function copyProxy() {
            if (!currentProxyUrl) {
                return;
            }
            navigator.clipboard.writeText(currentProxyUrl).then(function () {
                const btn = document.getElementById('copyBtn');
                btn.textContent = 'Copied!';
                setTimeout(function () { btn.textContent = 'Copy link'; }, 2000);
            });
        }

        const targetInput = document.getElementById('targetUrl');
        targetInput.addEventListener('input', updateProxyLink);
        targetInput.addEventListener('keypress', function (e) {
            if (e.key === 'Enter') goProxy();
        });
        </script>"#;

const HOME_TAIL: &str = r#"
        <div class="footer"><p>Stateless path-addressed reverse proxy</p></div>
    </div>
</body>
</html>"#;

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
