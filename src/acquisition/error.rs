use thiserror::Error;

/// Errors surfaced by the acquisition core.
///
/// Provider and network failures are normally absorbed and logged at the
/// client boundary; `NoCandidates` is the one provider outcome that reaches
/// the orchestrator as an error.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Acquisition provider not configured: {0}")]
    NotConfigured(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("No candidates available for {0}")]
    NoCandidates(String),

    #[error("Job {0} timed out")]
    StaleTimeout(String),

    #[error("Import failed (transient: {transient}): {reason}")]
    ImportFailed { transient: bool, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

pub type AcquisitionResult<T> = Result<T, AcquisitionError>;
