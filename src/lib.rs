pub mod common;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod headers;
pub mod logging;
pub mod rewrite;
pub mod server;
pub mod target;

pub use config::Config;
pub use dispatch::{Dispatcher, RequestContext, RouteTable};
pub use error::ProxyError;
pub use executor::ProxyExecutor;
pub use headers::HeaderPolicy;
pub use rewrite::{RewriteContext, rewrite};
pub use server::ProxyServer;
pub use target::{ProxyMode, ResolvedTarget, Scheme, resolve};
