use crate::engine::EngineError;

/// Failure taxonomy for the analysis pipeline.
///
/// Only `InvalidImage` aborts a call; the other kinds are recorded on the
/// result and the pipeline carries on with reduced output.
#[derive(thiserror::Error, Debug)]
pub enum AnalysisError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Recognition engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("No handwriting detected: {0}")]
    NoContentDetected(String),

    #[error("Preprocess error: {0}")]
    Preprocess(String),

    #[error("Feature extraction error: {0}")]
    Features(String),

    #[error("Overlay error: {0}")]
    Overlay(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for AnalysisError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(e) => AnalysisError::Io(e),
            other => AnalysisError::InvalidImage(other.to_string()),
        }
    }
}

/// A stage result that may have fallen back to a safe default.
#[derive(Debug, Clone, PartialEq)]
pub struct Degradable<T> {
    pub value: T,
    pub degraded: bool,
    pub reason: Option<String>,
}

impl<T> Degradable<T> {
    pub fn ok(value: T) -> Self {
        Self {
            value,
            degraded: false,
            reason: None,
        }
    }

    pub fn degraded(value: T, reason: impl Into<String>) -> Self {
        Self {
            value,
            degraded: true,
            reason: Some(reason.into()),
        }
    }

    /// Falls back to `default` when `result` is an error.
    pub fn from_result<E: std::fmt::Display>(result: Result<T, E>, default: T) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(e) => Self::degraded(default, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degradable_from_result() {
        let ok: Degradable<u32> = Degradable::from_result(Ok::<u32, String>(3), 0);
        assert_eq!(ok.value, 3);
        assert!(!ok.degraded);

        let bad = Degradable::from_result(Err::<u32, _>("boom"), 7);
        assert_eq!(bad.value, 7);
        assert!(bad.degraded);
        assert_eq!(bad.reason.as_deref(), Some("boom"));
    }

    #[test]
    fn test_image_error_maps_to_invalid_image() {
        let err = image::load_from_memory(b"not an image").unwrap_err();
        assert!(matches!(AnalysisError::from(err), AnalysisError::InvalidImage(_)));
    }
}
