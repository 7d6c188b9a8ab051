use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single catalog call.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("HTTP {status} from {url}")]
    Status { status: StatusCode, url: String },

    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("catalog request cancelled")]
    Cancelled,
}

impl CatalogError {
    pub fn status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::Status {
            status,
            url: url.into(),
        }
    }

    pub fn transport(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Server errors and failures that never produced a status code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => status.is_server_error(),
            Self::Transport { .. } => true,
            Self::Decode { .. } | Self::Cancelled => false,
        }
    }

    /// The resource does not exist or is not ours to read.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Status { status, .. } if status.is_client_error())
    }

    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
