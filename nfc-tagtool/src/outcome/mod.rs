//! Uniform operation outcome
//!
//! Every coordinator operation answers with an [`Outcome`]: a success flag,
//! a human readable message and a stable numeric code.
//!
//! # Example
//! ```ignore
//! use nfc_tagtool::outcome::{Outcome, Status};
//!
//! let done = Outcome::ok("Read 64 blocks");
//! assert!(done.success);
//!
//! let lost = Outcome::tag_lost(50);
//! assert_eq!(lost.code, 50);
//! ```

mod status;

pub use status::Status;

use serde::Serialize;

use crate::error::{SelectiveWriteError, TagError};

/// Result of a coordinator operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
    pub code: i32,
}

impl Outcome {
    /// Create a new outcome
    pub fn new(success: bool, message: impl Into<String>, code: i32) -> Self {
        Self {
            success,
            message: message.into(),
            code,
        }
    }

    /// Create a full success outcome (code 0)
    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(true, message, Status::OK)
    }

    /// Create a hard failure outcome
    pub fn failure(message: impl Into<String>, code: i32) -> Self {
        Self::new(false, message, code)
    }

    /// Create the outcome of an SRIX write that lost the tag after
    /// `blocks_written` blocks
    pub fn tag_lost(blocks_written: usize) -> Self {
        Self::new(
            false,
            format!(
                "Tag lost after {} blocks written (those writes likely succeeded)",
                blocks_written
            ),
            blocks_written as i32,
        )
    }

    /// Create the outcome for a protocol with no engine
    pub fn not_implemented(protocol: &'static str) -> Self {
        TagError::NotImplemented(protocol).into()
    }

    /// Check if the code is a partial or degraded success
    pub fn is_degraded(&self) -> bool {
        Status::is_degraded(self.code)
    }

    /// Check if the code is a hard failure
    pub fn is_hard_failure(&self) -> bool {
        self.code < 0
    }
}

impl Default for Outcome {
    fn default() -> Self {
        Self::ok("")
    }
}

impl From<TagError> for Outcome {
    fn from(err: TagError) -> Self {
        Self::failure(err.to_string(), err.code())
    }
}

impl From<SelectiveWriteError> for Outcome {
    fn from(err: SelectiveWriteError) -> Self {
        Self::failure(err.to_string(), err.source.code())
    }
}

impl<T> From<Result<T, TagError>> for Outcome
where
    T: Into<Outcome>,
{
    fn from(result: Result<T, TagError>) -> Self {
        match result {
            Ok(value) => value.into(),
            Err(err) => err.into(),
        }
    }
}
