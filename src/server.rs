use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::ProxyError;
use http_body_util::BodyExt;
use hyper::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct ProxyServer {
    listen_addr: SocketAddr,
    max_header_size: usize,
    dispatcher: Arc<Dispatcher>,
}

impl ProxyServer {
    pub fn new(config: &Config) -> Result<Self, ProxyError> {
        config.validate()?;
        info!("Creating proxy server for {}", config.listen_addr);
        debug!(
            "Upstream request timeout: {:?}, connect timeout: {:?}, pool max idle per host: {}",
            config.request_timeout(),
            config.connect_timeout(),
            config.pool_max_idle_per_host()
        );

        Ok(Self {
            listen_addr: config.listen_addr,
            max_header_size: config.max_header_size(),
            dispatcher: Arc::new(Dispatcher::from_config(config)?),
        })
    }

    pub async fn run(self) -> Result<(), ProxyError> {
        info!("Binding HTTP listener to: {}", self.listen_addr);
        let listener = TcpListener::bind(self.listen_addr).await?;
        self.serve(listener).await
    }

    /// Accept loop on an already bound listener. Each connection gets its
    /// own task; requests share nothing but the dispatcher.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ProxyError> {
        let local_addr = listener.local_addr()?;
        info!("Proxy listening on: http://{}", local_addr);

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };
            let dispatcher = self.dispatcher.clone();
            let max_header_size = self.max_header_size;

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req: Request<Incoming>| {
                    let dispatcher = dispatcher.clone();
                    async move {
                        let ctx = dispatcher.context_for(req.headers(), Some(remote_addr));
                        let req = req.map(|body| body.boxed_unsync());
                        Ok::<_, Infallible>(dispatcher.dispatch(req, &ctx).await)
                    }
                });

                if let Err(err) = ServerBuilder::new()
                    .keep_alive(true)
                    .max_buf_size(max_header_size)
                    .serve_connection(io, service)
                    .await
                {
                    error!("Error serving connection from {}: {}", remote_addr, err);
                }
            });
        }
    }
}
