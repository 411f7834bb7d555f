//! Card transport seam
//!
//! The engines talk to hardware only through these traits. A reader driver
//! implements the primitives; [`TransportProvider`] opens one transport per
//! protocol the first time the coordinator needs it.

use std::time::Duration;

use crate::error::TransportError;
use crate::keys::MifareKey;

/// Mifare Classic authentication key slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyType {
    /// MF_AUTH_KEY_A command
    A = 0x60,
    /// MF_AUTH_KEY_B command
    B = 0x61,
}

impl KeyType {
    pub fn command(self) -> u8 {
        self as u8
    }
}

/// ISO 14443A primitives for Mifare Classic
pub trait MifareTransport: Send {
    /// Select a card in the field and return its UID
    ///
    /// Also used to re-activate a card after a failed authentication.
    fn select(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Authenticate the sector that contains `block`
    fn authenticate(
        &mut self,
        uid: &[u8],
        block: u8,
        key_type: KeyType,
        key: &MifareKey,
    ) -> Result<(), TransportError>;

    /// Read one 16 byte block of the authenticated sector
    fn read_block(&mut self, block: u8) -> Result<[u8; 16], TransportError>;

    /// Write one 16 byte block of the authenticated sector
    fn write_block(&mut self, block: u8, data: &[u8; 16]) -> Result<(), TransportError>;
}

/// ISO 14443B primitives for SRIX4K
pub trait SrixTransport: Send {
    /// Run initiate + select on a tag in the field
    fn initiate_select(&mut self) -> Result<(), TransportError>;

    /// Read the 8 byte UID of the selected tag
    fn get_uid(&mut self) -> Result<[u8; 8], TransportError>;

    fn read_block(&mut self, block: u8) -> Result<[u8; 4], TransportError>;

    fn write_block(&mut self, block: u8, data: &[u8; 4]) -> Result<(), TransportError>;
}

/// Opens transports on demand
pub trait TransportProvider: Send + Sync {
    fn open_mifare(&self) -> Result<Box<dyn MifareTransport>, TransportError>;

    fn open_srix(&self) -> Result<Box<dyn SrixTransport>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_type_commands() {
        assert_eq!(KeyType::A.command(), 0x60);
        assert_eq!(KeyType::B.command(), 0x61);
    }
}
