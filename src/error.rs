use thiserror::Error;

/// Errors returned by sweep, client and compositor operations.
#[derive(Error, Debug)]
pub enum XyPlotError {
    /// User input was missing or malformed. Raised before any remote work.
    #[error("{0}")]
    Validation(String),

    /// An axis name did not match any supported parameter family.
    #[error("Invalid axis kind: {0}")]
    InvalidAxisKind(String),

    /// Queuing a job on ComfyUI failed.
    #[error("Job submission failed: {0}")]
    Submission(String),

    /// The push channel closed or errored before the job finished.
    #[error("Job tracking failed: {0}")]
    Tracking(String),

    /// The job finished but recorded no image output.
    #[error("No image output recorded for job {0}")]
    NoResult(String),

    /// ComfyUI reported an execution error for the job.
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// The bytes returned for a cell could not be decoded as an image.
    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    /// Every cell of the sweep failed to produce an image.
    #[error("Failed to generate any images.")]
    EmptySweepResult,

    /// ComfyUI returned a non-success HTTP status.
    #[error("ComfyUI returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The response from ComfyUI was missing expected fields.
    #[error("{0}")]
    InvalidResponse(String),

    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Encoding or saving the composed image failed.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl XyPlotError {
    /// Whether this error only affects a single cell of the sweep.
    ///
    /// Anything else reaching the sweep loop points at a misconfigured run
    /// and is logged at error level, though the cell is still skipped.
    pub fn is_cell_failure(&self) -> bool {
        matches!(
            self,
            XyPlotError::Submission(_)
                | XyPlotError::Tracking(_)
                | XyPlotError::NoResult(_)
                | XyPlotError::GenerationFailed(_)
                | XyPlotError::Decode(_)
                | XyPlotError::Http { .. }
                | XyPlotError::InvalidResponse(_)
                | XyPlotError::Network { .. }
                | XyPlotError::Json(_)
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, XyPlotError>;
