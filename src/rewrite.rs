//! Text-level rewriting of `href`, `src` and `action` attributes so pages
//! fetched through a web route keep navigating through the proxy.
//!
//! Absolute `http(s)://` links are re-homed under the proxy using their own
//! host; root-relative `/path` links are pinned to the current target host.
//! Protocol-relative `//host/path` links are left as they are, as are URLs
//! inside inline scripts, styles and CSS `url(...)` references.

use regex::{Captures, Regex};
use std::sync::OnceLock;
use url::Url;

/// Origins and route prefix used to re-home links found in a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteContext {
    /// Origin of the page being rewritten, e.g. `https://a.com`.
    pub target_origin: String,
    /// Public origin of the proxy, e.g. `https://p.io`.
    pub proxy_origin: String,
    /// Route prefix including both slashes, e.g. `/webproxy/`.
    pub proxy_prefix: String,
}

impl RewriteContext {
    pub fn new(
        target_origin: impl Into<String>,
        proxy_origin: impl Into<String>,
        proxy_prefix: impl Into<String>,
    ) -> Self {
        Self {
            target_origin: target_origin.into(),
            proxy_origin: proxy_origin.into(),
            proxy_prefix: proxy_prefix.into(),
        }
    }

    pub fn rewrite(&self, html: &str) -> String {
        rewrite(html, &self.target_origin, &self.proxy_origin, &self.proxy_prefix)
    }
}

fn absolute_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)(href|src|action)="(https?://[^"]+)""#)
            .expect("absolute URL pattern is valid")
    })
}

fn relative_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)(href|src|action)="(/[^"]*)""#).expect("relative URL pattern is valid")
    })
}

/// Rewrites link attributes in `html`. Never fails: values that do not
/// parse as URLs are kept verbatim.
pub fn rewrite(html: &str, target_origin: &str, proxy_origin: &str, proxy_prefix: &str) -> String {
    let base = format!("{}{}", proxy_origin, proxy_prefix);

    let pass_one = absolute_pattern().replace_all(html, |caps: &Captures| {
        match rehome_absolute(&caps[2]) {
            Some(location) => format!(r#"{}="{}{}""#, &caps[1], base, location),
            None => caps[0].to_string(),
        }
    });

    let target_host = host_with_port(target_origin).unwrap_or_default();
    let pass_two = relative_pattern().replace_all(&pass_one, |caps: &Captures| {
        let path = &caps[2];
        if path.starts_with("//") {
            return caps[0].to_string();
        }
        format!(r#"{}="{}{}{}""#, &caps[1], base, target_host, path)
    });

    pass_two.into_owned()
}

/// `host[:port]/path?query#fragment` of an absolute URL, or `None` when it
/// does not parse.
fn rehome_absolute(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let mut location = authority(&url)?;
    location.push_str(url.path());
    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        location.push('?');
        location.push_str(query);
    }
    if let Some(fragment) = url.fragment().filter(|f| !f.is_empty()) {
        location.push('#');
        location.push_str(fragment);
    }
    Some(location)
}

fn host_with_port(origin: &str) -> Option<String> {
    Url::parse(origin).ok().as_ref().and_then(authority)
}

fn authority(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}
