use crate::detector::DetectorError;
use crate::pixel::{DecodeError, EncodeError};
use std::time::Duration;
use thiserror::Error;

/// Every failure a request can end in. Nothing else escapes `process_image`.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("invalid image format: {0}")]
    Decode(#[from] DecodeError),
    #[error("face detection failed: {0}")]
    DetectionFailure(#[from] DetectorError),
    #[error("face detection timed out after {0:?}")]
    DetectionTimeout(Duration),
    #[error("failed to encode output: {0}")]
    Encode(#[from] EncodeError),
    #[error("failed to process image: {0}")]
    Internal(String),
}

/// Who is at fault, for mapping onto a transport status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The submitted bytes are not a usable image.
    ClientInput,
    /// The input was fine; processing it failed.
    Processing,
}

impl ProcessingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessingError::Decode(_) => ErrorKind::ClientInput,
            ProcessingError::DetectionFailure(_)
            | ProcessingError::DetectionTimeout(_)
            | ProcessingError::Encode(_)
            | ProcessingError::Internal(_) => ErrorKind::Processing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ProcessingError::from(DecodeError::UnknownFormat).kind(),
            ErrorKind::ClientInput
        );
        assert_eq!(
            ProcessingError::DetectionTimeout(Duration::from_secs(1)).kind(),
            ErrorKind::Processing
        );
        assert_eq!(
            ProcessingError::from(DetectorError::InferenceFailed("x".into())).kind(),
            ErrorKind::Processing
        );
    }

    #[test]
    fn test_decode_message_names_format_problem() {
        let err = ProcessingError::from(DecodeError::UnknownFormat);
        assert_eq!(err.to_string(), "invalid image format: unrecognized image format");
    }
}
