use reqwest::StatusCode;
use thiserror::Error;

/// Failure classes of an upstream call. The rate controller and the
/// orchestrator branch on the variant, never on the message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    #[error("rate limited by upstream")]
    RateLimited,

    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("upstream rejected credentials: {0}")]
    Authentication(String),

    #[error("symbol not supported upstream: {0}")]
    UnsupportedSymbol(String),
}

impl UpstreamError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, UpstreamError::Authentication(_))
    }
}

/// Maps a non-success HTTP status onto a failure class.
pub fn classify_status(status: StatusCode, product_id: &str) -> UpstreamError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => UpstreamError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            UpstreamError::Authentication(format!("http {status}"))
        }
        StatusCode::NOT_FOUND => UpstreamError::UnsupportedSymbol(product_id.to_string()),
        other => UpstreamError::Transient(format!("http {other}")),
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status == StatusCode::TOO_MANY_REQUESTS => UpstreamError::RateLimited,
            Some(status) if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN => {
                UpstreamError::Authentication(e.to_string())
            }
            _ => UpstreamError::Transient(e.to_string()),
        }
    }
}
