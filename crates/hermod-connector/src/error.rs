use thiserror::Error;

/// Hermod's error taxonomy (spec §7): a discriminated sum, not exceptions.
/// Connector code may return a plain `anyhow::Error`, in which case the
/// sink writer classifies it as [`HermodError::Fatal`]; a connector that
/// wants more precise retry/DLQ behavior returns one of these variants
/// directly (matched via `anyhow::Error::downcast_ref`).
#[derive(Debug, Error)]
pub enum HermodError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transient error: {0}")]
    Transient(#[source] anyhow::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("duplicate delivery: {0}")]
    Idempotent(String),

    #[error("lease lost for workflow {workflow_id}")]
    LeaseLost { workflow_id: String },

    #[error("fatal error: {0}")]
    Fatal(#[source] anyhow::Error),
}

impl HermodError {
    /// Classifies an opaque connector error into the taxonomy. Errors the
    /// connector already tagged as a [`HermodError`] pass through
    /// unchanged; anything else is treated as [`HermodError::Fatal`],
    /// matching the "unrecoverable unless proven otherwise" stance of
    /// spec §7 propagation policy.
    pub fn classify(err: anyhow::Error) -> Self {
        match err.downcast::<HermodError>() {
            Ok(classified) => classified,
            Err(err) => HermodError::Fatal(err),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, HermodError::Transient(_))
    }

    pub fn is_dlq_eligible(&self) -> bool {
        matches!(self, HermodError::Validation(_))
    }
}
