use std::fmt::Display;

use thiserror::Error;

/// Errors surfaced by [`crate::IngestionEngine::ingest_legal_content`].
#[derive(Debug, Error)]
pub enum IngestError {
    /// Missing or malformed request fields. The message is meant for the caller.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    /// A store or embedding call failed. Writes made before the failure are kept.
    #[error("{context}: {source}")]
    Dependency {
        context: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("ingestion cancelled")]
    Cancelled,
}

pub(crate) trait DependencyExt<T> {
    fn dependency<C: Display>(self, context: C) -> Result<T, IngestError>;
}

impl<T> DependencyExt<T> for anyhow::Result<T> {
    fn dependency<C: Display>(self, context: C) -> Result<T, IngestError> {
        self.map_err(|source| IngestError::Dependency {
            context: context.to_string(),
            source,
        })
    }
}
