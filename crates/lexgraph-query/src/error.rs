use thiserror::Error;

/// Errors surfaced by [`crate::QueryEngine::process_query`].
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    Validation(String),
    /// Candidate search or star retrieval failed; the query is aborted.
    #[error("{context}: {source}")]
    Dependency {
        context: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("query cancelled")]
    Cancelled,
}

impl QueryError {
    pub(crate) fn dependency(context: impl Into<String>, source: anyhow::Error) -> Self {
        QueryError::Dependency {
            context: context.into(),
            source,
        }
    }
}
