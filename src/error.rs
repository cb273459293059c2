//! Error types surfaced by the label pipeline.
//!
//! Only two failures ever reach a caller of a scan: the input was rejected
//! before processing, or the substance registry could not be fetched.
//! Everything that goes wrong during image cleanup or recognition degrades
//! the result instead of failing it.

use thiserror::Error;

/// Reasons an input is refused before any processing starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputRejection {
    #[error("only image files are allowed (got {0})")]
    UnsupportedType(String),

    #[error("file too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("image could not be decoded: {0}")]
    Undecodable(String),

    #[error("text is required")]
    MissingText,

    #[error("text too large: {len} bytes (max {max})")]
    TextTooLarge { len: usize, max: usize },

    #[error("query is required")]
    EmptyQuery,
}

/// Failure fetching or parsing the substance registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry responded with HTTP {0}")]
    Status(u16),

    #[error("failed to read registry file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed registry payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("registry still paginating after {0} pages")]
    TooManyPages(usize),
}

/// Failure inside the OCR engine wrapper.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Tesseract not found. Please install Tesseract-OCR or set ocr.tesseract_path")]
    ExecutableNotFound,

    #[error("tessdata directory not found (need {0}.traineddata)")]
    TessdataNotFound(String),

    #[error("Tesseract failed: {0}")]
    EngineFailed(String),

    #[error("empty image: width or height is zero")]
    EmptyImage,

    #[error("OCR I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode raster for OCR: {0}")]
    Image(#[from] image::ImageError),
}

/// Errors a scan or match request can surface to its caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("input rejected: {0}")]
    InputRejected(#[from] InputRejection),

    #[error("could not check substances: {0}")]
    RegistryUnavailable(#[from] RegistryError),
}

impl PipelineError {
    /// True for errors caused by the caller's input (a "400" in HTTP terms).
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::InputRejected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_messages() {
        let err = InputRejection::TooLarge { size: 6_000_000, max: 5_242_880 };
        assert_eq!(err.to_string(), "file too large: 6000000 bytes (max 5242880)");

        let err: PipelineError = InputRejection::MissingText.into();
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "input rejected: text is required");
    }

    #[test]
    fn test_registry_error_is_distinct() {
        let err: PipelineError = RegistryError::Status(503).into();
        assert!(!err.is_client_error());
        assert!(err.to_string().contains("HTTP 503"));
    }
}
