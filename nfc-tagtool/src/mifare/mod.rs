//! Mifare Classic support
//!
//! - `layout`: sector and block geometry for 1K and 4K cards
//! - `auth`: the key cascade and the per sector key cache
//! - `engine`: detection, read, write, selective write and UID clone
//! - `dump`: the `.mfc` file codec

pub mod auth;
pub mod dump;
pub mod engine;
pub mod layout;

pub use auth::{SectorKeyCache, SectorKeys};
pub use engine::{CardIdentity, MifareEngine, ReadSummary, WriteSummary};
pub use layout::MifareCardType;
