use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RestreamError {
    #[error("restream cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("invalid redirect from {url}: {reason}")]
    InvalidRedirect { url: String, reason: String },

    #[error("reader cannot keep up: {behind} bytes behind a {capacity} byte buffer")]
    ReaderOverrun { behind: u64, capacity: usize },

    #[error("restream session was never opened")]
    NotOpened,

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl RestreamError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn invalid_redirect(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRedirect {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// A reader overrun is unrecoverable for that reader; everything else
    /// leaves the session usable.
    pub fn is_reader_fatal(&self) -> bool {
        matches!(self, Self::ReaderOverrun { .. })
    }
}

pub type Result<T> = std::result::Result<T, RestreamError>;
