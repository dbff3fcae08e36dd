use crate::error::ProxyError;
use crate::headers::DEFAULT_USER_AGENT;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// hyper refuses HTTP/1 read buffers smaller than this.
pub const MIN_HEADER_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutputType {
    Stdout,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogTarget {
    #[serde(rename = "type")]
    pub output_type: LogOutputType,
    pub path: Option<PathBuf>,
    pub level: Option<LogLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<LogLevel>,
    pub format: Option<LogFormat>,
    pub targets: Option<Vec<LogTarget>>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Some(LogLevel::Info),
            format: Some(LogFormat::Text),
            targets: Some(vec![LogTarget {
                output_type: LogOutputType::Stdout,
                path: None,
                level: None,
            }]),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_max_header_size() -> Option<usize> {
    Some(16 * 1024)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Origin used in rewritten links, e.g. `https://proxy.example.com`.
    /// When unset it is derived per request from the `Host` header.
    #[serde(default)]
    pub public_origin: Option<String>,
    /// Scheme assumed when deriving the origin and no `X-Forwarded-Proto`
    /// is present. Defaults to `http`.
    #[serde(default)]
    pub public_scheme: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
    #[serde(default)]
    pub pool_idle_timeout_secs: Option<u64>,
    #[serde(default = "default_max_header_size")]
    pub max_header_size: Option<usize>,
    #[serde(default)]
    pub fallback_user_agent: Option<String>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            public_origin: None,
            public_scheme: None,
            request_timeout_secs: Some(30),
            connect_timeout_secs: Some(10),
            pool_max_idle_per_host: Some(10),
            pool_idle_timeout_secs: Some(90),
            max_header_size: default_max_header_size(),
            fallback_user_agent: None,
            logging: None,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ProxyError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::Config(format!("Cannot read configuration file {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ProxyError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(30))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.unwrap_or(10))
    }

    pub fn pool_max_idle_per_host(&self) -> usize {
        self.pool_max_idle_per_host.unwrap_or(10)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs.unwrap_or(90))
    }

    pub fn max_header_size(&self) -> usize {
        self.max_header_size.unwrap_or(16 * 1024)
    }

    pub fn public_scheme(&self) -> &str {
        self.public_scheme.as_deref().unwrap_or("http")
    }

    pub fn fallback_user_agent(&self) -> &str {
        self.fallback_user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.request_timeout_secs == Some(0) {
            return Err(ProxyError::Config(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.connect_timeout_secs == Some(0) {
            return Err(ProxyError::Config(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.max_header_size() < MIN_HEADER_SIZE {
            return Err(ProxyError::Config(format!(
                "max_header_size must be at least {} bytes",
                MIN_HEADER_SIZE
            )));
        }
        if !matches!(self.public_scheme(), "http" | "https") {
            return Err(ProxyError::Config(format!(
                "public_scheme must be http or https, got '{}'",
                self.public_scheme()
            )));
        }
        if let Some(origin) = &self.public_origin {
            let url = Url::parse(origin)
                .map_err(|e| {
                    ProxyError::Config(format!("Invalid public_origin '{}': {}", origin, e))
                })?;
            if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                return Err(ProxyError::Config(format!(
                    "public_origin must be an absolute http(s) origin, got '{}'",
                    origin
                )));
            }
        }
        if let Some(logging) = &self.logging {
            for target in logging.targets.iter().flatten() {
                if target.output_type == LogOutputType::File && target.path.is_none() {
                    return Err(ProxyError::Config("File log target requires a path".to_string()));
                }
            }
        }
        Ok(())
    }

    /// `public_origin` without a trailing slash, when configured.
    pub fn normalized_public_origin(&self) -> Option<String> {
        self.public_origin
            .as_deref()
            .map(|origin| origin.trim_end_matches('/').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.listen_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_header_size(), 16 * 1024);
        assert_eq!(config.public_scheme(), "http");
        assert_eq!(config.fallback_user_agent(), DEFAULT_USER_AGENT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.listen_addr, default_listen_addr());
        assert_eq!(config.max_header_size, Some(16 * 1024));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proxy.json");

        let mut config = Config::default();
        config.public_origin = Some("https://proxy.example.com".to_string());
        config.logging = Some(LoggingConfig::default());
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.public_origin.as_deref(), Some("https://proxy.example.com"));
        assert_eq!(loaded.logging.unwrap().format, Some(LogFormat::Text));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = Config::from_file("/nonexistent/proxy.json");
        assert!(matches!(result, Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.request_timeout_secs = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_header_size = Some(1024);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.public_origin = Some("ftp://files.example.com".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.public_scheme = Some("gopher".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging = Some(LoggingConfig {
            level: None,
            format: None,
            targets: Some(vec![LogTarget {
                output_type: LogOutputType::File,
                path: None,
                level: None,
            }]),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_public_origin_trailing_slash_trimmed() {
        let mut config = Config::default();
        config.public_origin = Some("https://p.io/".to_string());
        assert_eq!(config.normalized_public_origin().as_deref(), Some("https://p.io"));
    }
}
