use thiserror::Error;

/// Error taxonomy for the analysis pipeline.
///
/// Every kind is terminal for the current request; nothing is retried
/// inside the pipeline. Callers decide whether a fresh request is worth
/// attempting based on the kind.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Client-supplied profile data is out of range or malformed. Raised
    /// before any network call is made.
    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    /// The literature search service could not be reached or returned an
    /// error status.
    #[error("literature service unavailable: {0}")]
    LiteratureUnavailable(String),

    /// The literature search succeeded but yielded zero usable open-access
    /// records. Distinct from a transport failure: there is nothing to
    /// ground an answer on.
    #[error("no usable open-access abstracts found")]
    NoAbstractsFound,

    /// The inference service could not be reached or timed out.
    #[error("inference service unavailable: {0}")]
    InferenceUnavailable(String),

    /// The inference service returned text that failed schema validation
    /// even after tolerant cleanup. The raw text is preserved for
    /// diagnostics.
    #[error("model output failed schema validation: {reason}")]
    MalformedModelOutput { reason: String, raw_output: String },
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
