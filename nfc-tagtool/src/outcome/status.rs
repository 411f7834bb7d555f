//! Outcome status codes
//!
//! `0` is full success, positive codes are degraded success, negative codes
//! are hard failures.

/// Status code constants
pub struct Status;

impl Status {
    // Success
    pub const OK: i32 = 0;

    // Degraded success (SRIX single block write)
    pub const VERIFY_MISMATCH: i32 = 1;
    pub const VERIFY_SKIPPED: i32 = 2;

    // Hard failures
    pub const NO_TAG: i32 = -1;
    pub const AUTH_FAILED: i32 = -2;
    pub const READ_FAILED: i32 = -3;
    pub const WRITE_FAILED: i32 = -4;
    pub const FILE_ERROR: i32 = -5;
    pub const INVALID_DATA: i32 = -6;
    pub const HARDWARE_UNAVAILABLE: i32 = -7;
    pub const TIMEOUT: i32 = -8;
    pub const NOT_IMPLEMENTED: i32 = -99;

    /// Check if a code means the operation took effect
    #[inline]
    pub fn is_success(code: i32) -> bool {
        code >= 0
    }

    /// Check if a code is a partial or degraded success
    #[inline]
    pub fn is_degraded(code: i32) -> bool {
        code > 0
    }

    /// Check if a code is an SRIX single block write outcome that callers
    /// count as written (ok, verify mismatch, verify skipped)
    #[inline]
    pub fn is_block_written(code: i32) -> bool {
        matches!(code, Self::OK | Self::VERIFY_MISMATCH | Self::VERIFY_SKIPPED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_success() {
        assert!(Status::is_success(Status::OK));
        assert!(Status::is_success(50));
        assert!(!Status::is_success(Status::NO_TAG));
    }

    #[test]
    fn test_is_degraded() {
        assert!(!Status::is_degraded(Status::OK));
        assert!(Status::is_degraded(Status::VERIFY_SKIPPED));
        assert!(!Status::is_degraded(Status::WRITE_FAILED));
    }

    #[test]
    fn test_is_block_written() {
        assert!(Status::is_block_written(0));
        assert!(Status::is_block_written(1));
        assert!(Status::is_block_written(2));
        assert!(!Status::is_block_written(3));
        assert!(!Status::is_block_written(Status::WRITE_FAILED));
    }
}
