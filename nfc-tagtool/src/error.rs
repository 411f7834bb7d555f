//! Error types
//!
//! `TagError` is the taxonomy every engine reports through. The coordinator
//! converts it into an [`Outcome`](crate::outcome::Outcome) so no engine
//! failure reaches a caller as anything but a message and a stable code.

use thiserror::Error;

use crate::outcome::Status;

/// Failure of a single transport primitive (select, authenticate, read, write)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no target in the field")]
    NoTarget,

    #[error("authentication rejected")]
    AuthRejected,

    #[error("operation not permitted by the card")]
    NotPermitted,

    #[error("transport timed out")]
    Timeout,

    #[error("reader handshake failed: {0}")]
    Handshake(String),

    #[error("transport I/O error: {0}")]
    Io(String),
}

/// Errors produced while decoding a dump file
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DumpError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },

    #[error("unsupported file type: {0}")]
    UnsupportedFiletype(String),

    #[error("incomplete dump: {loaded} of {expected} blocks present")]
    Incomplete { loaded: usize, expected: usize },

    #[error("dump contains no data blocks")]
    Empty,
}

/// Engine level error taxonomy
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("no tag detected")]
    NoTagDetected,

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("file error: {0}")]
    FileError(String),

    #[error("hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("{0} is not yet implemented")]
    NotImplemented(&'static str),
}

impl TagError {
    /// Stable numeric code for programmatic branching
    pub fn code(&self) -> i32 {
        match self {
            TagError::NoTagDetected => Status::NO_TAG,
            TagError::AuthenticationFailed(_) => Status::AUTH_FAILED,
            TagError::ReadFailed(_) => Status::READ_FAILED,
            TagError::WriteFailed(_) => Status::WRITE_FAILED,
            TagError::FileError(_) => Status::FILE_ERROR,
            TagError::InvalidData(_) => Status::INVALID_DATA,
            TagError::HardwareUnavailable(_) => Status::HARDWARE_UNAVAILABLE,
            TagError::Timeout(_) => Status::TIMEOUT,
            TagError::NotImplemented(_) => Status::NOT_IMPLEMENTED,
        }
    }
}

/// A batch write that stopped at one block
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed at block {block}: {source} (code={})", .source.code())]
pub struct SelectiveWriteError {
    pub block: usize,
    pub source: TagError,
}

impl From<DumpError> for TagError {
    fn from(err: DumpError) -> Self {
        TagError::FileError(err.to_string())
    }
}

impl From<std::io::Error> for TagError {
    fn from(err: std::io::Error) -> Self {
        TagError::FileError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_negative_and_distinct() {
        let errors = [
            TagError::NoTagDetected,
            TagError::AuthenticationFailed(String::new()),
            TagError::ReadFailed(String::new()),
            TagError::WriteFailed(String::new()),
            TagError::FileError(String::new()),
            TagError::InvalidData(String::new()),
            TagError::HardwareUnavailable(String::new()),
            TagError::Timeout(String::new()),
            TagError::NotImplemented("NTAG"),
        ];
        let mut codes: Vec<i32> = errors.iter().map(TagError::code).collect();
        assert!(codes.iter().all(|c| *c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_dump_error_maps_to_file_error() {
        let err: TagError = DumpError::Incomplete { loaded: 12, expected: 128 }.into();
        assert_eq!(err.code(), Status::FILE_ERROR);
        assert!(err.to_string().contains("12 of 128"));
    }

    #[test]
    fn test_selective_write_error_message() {
        let err = SelectiveWriteError {
            block: 0,
            source: TagError::InvalidData("block 0 holds the UID".into()),
        };
        assert_eq!(
            err.to_string(),
            "Failed at block 0: invalid data: block 0 holds the UID (code=-6)"
        );
    }
}
