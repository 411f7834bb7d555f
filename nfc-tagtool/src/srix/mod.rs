//! SRIX4K support
//!
//! SRIX4K tags hold 128 blocks of 4 bytes with no authentication. The
//! engine handles detection, read retries, per block settle timing and the
//! verify tiers of single block writes; [`dump`] is the `.srix` codec.

pub mod dump;
pub mod engine;

pub use engine::{SrixBlockWrite, SrixEngine, SrixWriteReport};

/// Number of blocks on an SRIX4K tag
pub const SRIX_BLOCKS: usize = 128;

/// Size of one block in bytes
pub const SRIX_BLOCK_SIZE: usize = 4;

/// Size of a full memory image
pub const SRIX_DUMP_SIZE: usize = SRIX_BLOCKS * SRIX_BLOCK_SIZE;

/// Length of the tag UID in bytes
pub const SRIX_UID_LEN: usize = 8;
