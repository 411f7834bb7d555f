//! Multi-protocol NFC tag engine
//!
//! Reads, dumps, restores and clones contactless tags through an abstract
//! reader. Two protocol families are supported:
//! - Mifare Classic 1K/4K (sector authentication with a key database)
//! - SRIX4K (ISO 14443-B, unauthenticated 4 byte blocks)
//!
//! [`TagCoordinator`] is the entry point: it owns the per-protocol engines,
//! the current tag record and the dump files. Hardware access goes through
//! the traits in [`transport`]; [`virtual_tag`] provides in-memory tags.

// Core modules
pub mod error;
pub mod outcome;
pub mod tag;
pub mod storage;
pub mod config;
pub mod keys;
pub mod transport;

// Protocol engines
pub mod mifare;
pub mod srix;

// Coordination
pub mod compare;
pub mod coordinator;
pub mod task;
pub mod virtual_tag;

pub use compare::{compare_records, BlockDifference, CompareReport};
pub use config::{CoordinatorConfig, EngineTiming};
pub use coordinator::TagCoordinator;
pub use error::{DumpError, SelectiveWriteError, TagError, TransportError};
pub use keys::{KeyStore, MifareKey};
pub use outcome::{Outcome, Status};
pub use storage::{FsStorage, MemoryStorage, Storage};
pub use tag::{dump_to_hex, protocol_name, uid_to_string, Protocol, TagMemory, TagRecord, Uid};
pub use task::{Operation, OperationHandle, WaitOutcome};
pub use transport::{KeyType, MifareTransport, SrixTransport, TransportProvider};
