use clap::Parser;
use log::info;
use pathway_proxy::config::{Config, LogFormat, LogLevel, LoggingConfig};
use pathway_proxy::logging::{self, ProxyLogger};
use pathway_proxy::server::ProxyServer;
use std::path::Path;
use tokio::signal;

#[derive(Parser)]
#[clap(
    version,
    about = "Stateless reverse proxy that forwards to the host encoded in the request path"
)]
struct Args {
    #[clap(short, long, value_name = "ADDR", help = "Listen address (e.g., 127.0.0.1:8080)")]
    listen: Option<String>,

    #[clap(short, long, value_name = "FILE", help = "Configuration file path")]
    config: Option<String>,

    #[clap(
        long,
        value_name = "URL",
        help = "Public origin used in rewritten links (e.g., https://proxy.example.com)"
    )]
    public_origin: Option<String>,

    #[clap(
        long,
        value_name = "SCHEME",
        help = "Scheme assumed for the public origin when X-Forwarded-Proto is absent"
    )]
    public_scheme: Option<String>,

    #[clap(long, value_name = "SECONDS", help = "Upstream request timeout in seconds")]
    timeout: Option<u64>,

    #[clap(long, value_name = "SECONDS", help = "Upstream connect timeout in seconds")]
    connect_timeout: Option<u64>,

    #[clap(long, value_name = "NUM", help = "Maximum idle upstream connections per host")]
    pool_max_idle: Option<usize>,

    #[clap(long, value_name = "BYTES", help = "Maximum HTTP header size in bytes")]
    max_header_size: Option<usize>,

    #[clap(
        long,
        value_name = "LEVEL",
        value_parser = logging::parse_log_level,
        help = "Log level: trace, debug, info, warn, error"
    )]
    log_level: Option<LogLevel>,

    #[clap(
        long,
        value_name = "FORMAT",
        value_parser = logging::parse_log_format,
        help = "Log format: text or json"
    )]
    log_format: Option<LogFormat>,

    #[clap(long, value_name = "FILE", help = "Generate a sample configuration file")]
    generate_config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(config_file) = &args.generate_config {
        generate_sample_config(config_file)?;
        println!("Sample configuration file generated: {}", config_file);
        return Ok(());
    }

    let mut config = if let Some(config_file) = &args.config {
        if !Path::new(config_file).exists() {
            return Err(format!("Configuration file not found: {}", config_file).into());
        }
        Config::from_file(config_file)?
    } else {
        Config::default()
    };
    apply_args(&mut config, &args)?;

    match config.logging.clone() {
        Some(logging_config) => {
            let logging_config = LoggingConfig {
                level: args.log_level.or(logging_config.level),
                format: args.log_format.or(logging_config.format),
                targets: logging_config.targets,
            };
            ProxyLogger::init(logging_config)?;
        }
        None => logging::init_fallback(args.log_level, args.log_format),
    }

    info!("Starting proxy server...");
    let server = ProxyServer::new(&config)?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            log::error!("Server error: {}", e);
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
        result = server_handle => {
            if let Err(e) = result {
                log::error!("Server task error: {}", e);
            }
        }
    }

    info!("Proxy server stopped");
    Ok(())
}

fn apply_args(config: &mut Config, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(listen) = &args.listen {
        config.listen_addr = listen.parse()?;
    }
    if args.public_origin.is_some() {
        config.public_origin = args.public_origin.clone();
    }
    if args.public_scheme.is_some() {
        config.public_scheme = args.public_scheme.clone();
    }
    if args.timeout.is_some() {
        config.request_timeout_secs = args.timeout;
    }
    if args.connect_timeout.is_some() {
        config.connect_timeout_secs = args.connect_timeout;
    }
    if args.pool_max_idle.is_some() {
        config.pool_max_idle_per_host = args.pool_max_idle;
    }
    if args.max_header_size.is_some() {
        config.max_header_size = args.max_header_size;
    }
    Ok(())
}

fn generate_sample_config(file_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::default();
    config.listen_addr = "0.0.0.0:8080".parse()?;
    config.public_origin = Some("https://proxy.example.com".to_string());
    config.logging = Some(LoggingConfig::default());
    config.to_file(file_path)?;
    Ok(())
}
