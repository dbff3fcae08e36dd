use crate::common::{HtmlTemplates, ProxyBody, ResponseBuilder};
use crate::config::Config;
use crate::error::ProxyError;
use crate::executor::ProxyExecutor;
use crate::rewrite::RewriteContext;
use crate::target::{ProxyMode, Scheme, resolve};
use hyper::header::{HOST, HeaderMap};
use hyper::{Request, Response};
use log::info;
use std::net::SocketAddr;
use std::time::Instant;

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

const NOT_FOUND_DETAILS: &str = "Invalid route. Supported routes: /proxy/*, /httpproxy/*, \
    /proxyport/*, /httpproxyport/*, /webproxy/*, /httpwebproxy/*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Literal path prefix including both slashes.
    pub prefix: &'static str,
    pub mode: ProxyMode,
    pub scheme: Scheme,
}

const ROUTES: [Route; 6] = [
    Route { prefix: "/proxy/", mode: ProxyMode::Plain, scheme: Scheme::Https },
    Route { prefix: "/httpproxy/", mode: ProxyMode::Plain, scheme: Scheme::Http },
    Route { prefix: "/proxyport/", mode: ProxyMode::WithPort, scheme: Scheme::Https },
    Route { prefix: "/httpproxyport/", mode: ProxyMode::WithPort, scheme: Scheme::Http },
    Route { prefix: "/webproxy/", mode: ProxyMode::Web, scheme: Scheme::Https },
    Route { prefix: "/httpwebproxy/", mode: ProxyMode::Web, scheme: Scheme::Http },
];

/// Prefix table probed longest prefix first, so a prefix can never shadow
/// a longer one that starts with it.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(ROUTES.to_vec())
    }
}

impl RouteTable {
    pub fn new(mut routes: Vec<Route>) -> Self {
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Returns the matching route and the path remaining after its prefix.
    pub fn match_path<'p>(&self, path: &'p str) -> Option<(&Route, &'p str)> {
        self.routes
            .iter()
            .find_map(|route| path.strip_prefix(route.prefix).map(|rest| (route, rest)))
    }
}

/// Per-request environment handed down explicitly instead of living in
/// globals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Public origin of the proxy as seen by the client, e.g. `https://p.io`.
    pub proxy_origin: String,
    pub remote_addr: Option<SocketAddr>,
}

pub struct Dispatcher {
    executor: ProxyExecutor,
    routes: RouteTable,
    public_origin: Option<String>,
    public_scheme: String,
}

impl Dispatcher {
    pub fn new(executor: ProxyExecutor, config: &Config) -> Self {
        Self {
            executor,
            routes: RouteTable::default(),
            public_origin: config.normalized_public_origin(),
            public_scheme: config.public_scheme().to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ProxyError> {
        Ok(Self::new(ProxyExecutor::from_config(config)?, config))
    }

    /// Builds the context for one inbound request. A configured public
    /// origin wins; otherwise the origin comes from `X-Forwarded-Proto`
    /// (set by the hosting edge) and the `Host` header.
    pub fn context_for(
        &self,
        headers: &HeaderMap,
        remote_addr: Option<SocketAddr>,
    ) -> RequestContext {
        let proxy_origin = match &self.public_origin {
            Some(origin) => origin.clone(),
            None => {
                let scheme = headers
                    .get(X_FORWARDED_PROTO)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.split(',').next())
                    .map(|v| v.trim().to_ascii_lowercase())
                    .filter(|v| v == "http" || v == "https")
                    .unwrap_or_else(|| self.public_scheme.clone());
                let host = headers
                    .get(HOST)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("localhost");
                format!("{}://{}", scheme, host)
            }
        };

        RequestContext {
            proxy_origin,
            remote_addr,
        }
    }

    /// Routes one request. Never fails: every error becomes a JSON envelope.
    pub async fn dispatch(
        &self,
        req: Request<ProxyBody>,
        ctx: &RequestContext,
    ) -> Response<ProxyBody> {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let result = match path.as_str() {
            "/health" => Ok(ResponseBuilder::health()),
            "/" => Ok(ResponseBuilder::html(
                HtmlTemplates::render_home_page(&ctx.proxy_origin),
                "public, max-age=300",
            )),
            _ => match self.routes.match_path(&path) {
                Some((route, rest)) => self.proxy(req, *route, rest, ctx).await,
                None => Err(ProxyError::NotFound(NOT_FOUND_DETAILS.to_string())),
            },
        };

        let response = result.unwrap_or_else(ProxyError::into_response);

        info!(
            "{} {} {} -> {} ({} ms)",
            ctx.remote_addr.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string()),
            method,
            path,
            response.status().as_u16(),
            started.elapsed().as_millis()
        );
        response
    }

    async fn proxy(
        &self,
        req: Request<ProxyBody>,
        route: Route,
        rest: &str,
        ctx: &RequestContext,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let target = resolve(rest, req.uri().query(), route.mode, route.scheme)?;

        let rewrite = route
            .mode
            .is_web()
            .then(|| RewriteContext::new(target.origin(), ctx.proxy_origin.clone(), route.prefix));

        self.executor
            .execute(req, &target, route.mode, rewrite.as_ref())
            .await
    }
}
