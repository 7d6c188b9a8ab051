//! Plugin-wide error types.

use restream_engine::RestreamError;
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::identifier::IdentifierError;

/// Plugin-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Plugin-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Restream error: {0}")]
    Restream(#[from] RestreamError),

    #[error("Identifier error: {0}")]
    Identifier(#[from] IdentifierError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("A cache refresh is already in progress")]
    RefreshInProgress,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// True for cancellation, whichever layer it surfaced from.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::Catalog(CatalogError::Cancelled)
                | Self::Restream(RestreamError::Cancelled)
        )
    }
}
