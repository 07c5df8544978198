//! Errors produced by entity fetchers.

use thiserror::Error;

/// Why a single-key fetch failed.
///
/// Neither variant is ever cached by a loader: the next load of the same key
/// goes back to the fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The key has no entity behind it.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The backing repository or service could not answer.
    #[error("failed to fetch {entity}: {message}")]
    Unavailable {
        entity: &'static str,
        message: String,
    },
}

impl FetchError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        FetchError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn unavailable(entity: &'static str, message: impl Into<String>) -> Self {
        FetchError::Unavailable {
            entity,
            message: message.into(),
        }
    }

    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }
}
