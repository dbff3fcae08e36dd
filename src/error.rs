use crate::common::{ProxyBody, ResponseBuilder};
use hyper::{Response, StatusCode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    #[error("Hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label carried in the `error` field of the envelope.
    pub fn title(&self) -> &'static str {
        match self {
            ProxyError::BadRequest(_) => "Bad Request",
            ProxyError::Upstream(_) => "Proxy Error",
            ProxyError::NotFound(_) => "Not Found",
            _ => "Internal Server Error",
        }
    }

    pub fn details(&self) -> String {
        match self {
            ProxyError::BadRequest(msg)
            | ProxyError::Upstream(msg)
            | ProxyError::NotFound(msg)
            | ProxyError::Internal(msg)
            | ProxyError::Config(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    pub fn into_response(self) -> Response<ProxyBody> {
        ResponseBuilder::error(self.status(), self.title(), Some(&self.details()))
    }
}
