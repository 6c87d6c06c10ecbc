use thiserror::Error;

pub type Result<T> = std::result::Result<T, SocialError>;

#[derive(Debug, Error)]
pub enum SocialError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing API credentials: {0}")]
    MissingCredentials(String),
}

impl SocialError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SocialError::RateLimited { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SocialError::NotFound(_))
    }
}

impl From<reqwest::Error> for SocialError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SocialError::Parse(err.to_string())
        } else {
            SocialError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SocialError {
    fn from(err: serde_json::Error) -> Self {
        SocialError::Parse(err.to_string())
    }
}
