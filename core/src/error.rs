use thiserror::Error;

/// Abstract error taxonomy for the scheduling pipeline (spec §7).
///
/// These are domain-level kinds, not wire types; `server` translates them
/// into the RPC error envelope.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("upstream transient failure: {0}")]
    UpstreamTransient(String),

    #[error("upstream returned a malformed response: {0}")]
    UpstreamMalformed(String),

    #[error("{service} is not configured")]
    NotConfigured { service: &'static str },

    #[error("missing reference: {0}")]
    MissingReference(String),

    #[error("precondition violated: {0}")]
    PreconditionViolated(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
