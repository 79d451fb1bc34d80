use thiserror::Error;

/// Crate-wide error taxonomy, grouped by kind rather than by originating
/// module so callers can match on failure class.
#[derive(Error, Debug)]
pub enum RetrovueError {
    // --- Input errors, never retried -------------------------------------
    #[error("DSL compile error: {0}")]
    Compile(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("asset resolution error: {0}")]
    AssetResolution(String),

    // --- Transient pipeline errors, retried on next horizon tick ---------
    #[error("pipeline error [{error_code}]: {message}")]
    Pipeline { error_code: String, message: String },

    // --- Seam / coverage invariant breach --------------------------------
    #[error("seam violation: left={left} right={right} delta_ms={delta_ms}")]
    SeamViolation {
        left: String,
        right: String,
        delta_ms: i64,
    },

    // --- Boundary / convergence failures -----------------------------------
    #[error("boundary infeasible: lead_time_ms={lead_time_ms} min_required_ms={min_required_ms}")]
    BoundaryInfeasible {
        lead_time_ms: i64,
        min_required_ms: i64,
    },

    #[error("swap timed out waiting for producer acknowledgement")]
    SwapTimeout,

    #[error("startup convergence timeout expired")]
    ConvergenceTimeout,

    // --- Producer errors --------------------------------------------------
    #[error("producer error: {0}")]
    Producer(String),

    // --- Ambient stack ----------------------------------------------------
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("toml deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("toml serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("segment not found: channel={channel_id} name={name}")]
    SegmentNotFound { channel_id: String, name: String },

    #[error("http error: {0}")]
    Http(String),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RetrovueError>;

impl RetrovueError {
    /// Short machine-readable code for `ExtensionAttempt.error_code` and
    /// similar structured reporting fields.
    pub fn code(&self) -> &'static str {
        match self {
            RetrovueError::Compile(_) => "COMPILE",
            RetrovueError::Validation(_) => "VALIDATION",
            RetrovueError::AssetResolution(_) => "ASSET_RESOLUTION",
            RetrovueError::Pipeline { .. } => "PIPELINE",
            RetrovueError::SeamViolation { .. } => "SEAM_VIOLATION",
            RetrovueError::BoundaryInfeasible { .. } => "BOUNDARY_INFEASIBLE",
            RetrovueError::SwapTimeout => "SWAP_TIMEOUT",
            RetrovueError::ConvergenceTimeout => "CONVERGENCE_TIMEOUT",
            RetrovueError::Producer(_) => "PRODUCER",
            RetrovueError::Io(_) => "IO",
            RetrovueError::Config(_) => "CONFIG",
            RetrovueError::Yaml(_) => "YAML",
            RetrovueError::TomlDe(_) => "TOML_DE",
            RetrovueError::TomlSer(_) => "TOML_SER",
            RetrovueError::Json(_) => "JSON",
            RetrovueError::ChannelNotFound(_) => "CHANNEL_NOT_FOUND",
            RetrovueError::SegmentNotFound { .. } => "SEGMENT_NOT_FOUND",
            RetrovueError::Http(_) => "HTTP",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_formats_with_code() {
        let err = RetrovueError::Pipeline {
            error_code: "DB_TIMEOUT".into(),
            message: "catalog lookup timed out".into(),
        };
        assert!(err.to_string().contains("DB_TIMEOUT"));
    }

    #[test]
    fn seam_violation_formats_with_delta() {
        let err = RetrovueError::SeamViolation {
            left: "b1".into(),
            right: "b2".into(),
            delta_ms: 1,
        };
        assert!(err.to_string().contains("delta_ms=1"));
    }
}
