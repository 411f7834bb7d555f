//! Virtual Mifare Classic card

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::TransportError;
use crate::keys::{MifareKey, FACTORY_KEY};
use crate::mifare::layout::{self, MifareCardType, BLOCK_SIZE, TRAILER_KEY_A, TRAILER_KEY_B};
use crate::transport::{KeyType, MifareTransport};

/// Transport access bits (FF 07 80) plus user byte
const DEFAULT_ACCESS_BITS: [u8; 4] = [0xFF, 0x07, 0x80, 0x69];

/// One authentication attempt seen by the card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthAttempt {
    pub block: u8,
    pub key_type: KeyType,
    pub key: MifareKey,
}

struct CardState {
    card_type: MifareCardType,
    uid: Vec<u8>,
    blocks: Vec<[u8; BLOCK_SIZE]>,
    present: bool,
    magic: bool,
    halted: bool,
    authenticated_sector: Option<usize>,
    select_count: usize,
    auth_log: Vec<AuthAttempt>,
    write_log: Vec<usize>,
    fail_writes_after: Option<usize>,
    unreadable: BTreeSet<usize>,
}

impl CardState {
    fn check_active(&self) -> Result<(), TransportError> {
        if !self.present {
            return Err(TransportError::NoTarget);
        }
        if self.halted {
            return Err(TransportError::NotPermitted);
        }
        Ok(())
    }

    fn check_sector(&self, block: usize) -> Result<(), TransportError> {
        if block >= self.blocks.len() || self.authenticated_sector != Some(layout::sector_of(block)) {
            return Err(TransportError::NotPermitted);
        }
        Ok(())
    }
}

/// A Mifare Classic 1K/4K card in memory
///
/// Starts with every sector on the factory key. A failed authentication
/// halts the card until the next select; trailer reads return zeros in
/// place of the keys; block 0 only takes writes on a magic card.
#[derive(Clone)]
pub struct VirtualMifareCard {
    state: Arc<Mutex<CardState>>,
}

impl VirtualMifareCard {
    /// Create a factory fresh card
    pub fn new(card_type: MifareCardType, uid: &[u8]) -> Self {
        let mut blocks = vec![[0u8; BLOCK_SIZE]; card_type.total_blocks()];

        let bcc = uid.iter().fold(0u8, |acc, b| acc ^ b);
        let atqa = card_type.atqa().to_le_bytes();
        let block0 = &mut blocks[0];
        block0[..uid.len()].copy_from_slice(uid);
        block0[uid.len()] = bcc;
        block0[uid.len() + 1] = card_type.sak();
        block0[uid.len() + 2..uid.len() + 4].copy_from_slice(&atqa);

        for sector in 0..card_type.sector_count() {
            let trailer = &mut blocks[layout::trailer_of_sector(sector)];
            trailer[TRAILER_KEY_A].copy_from_slice(FACTORY_KEY.as_bytes());
            trailer[6..10].copy_from_slice(&DEFAULT_ACCESS_BITS);
            trailer[TRAILER_KEY_B].copy_from_slice(FACTORY_KEY.as_bytes());
        }

        Self {
            state: Arc::new(Mutex::new(CardState {
                card_type,
                uid: uid.to_vec(),
                blocks,
                present: true,
                magic: false,
                halted: false,
                authenticated_sector: None,
                select_count: 0,
                auth_log: Vec::new(),
                write_log: Vec::new(),
                fail_writes_after: None,
                unreadable: BTreeSet::new(),
            })),
        }
    }

    /// Accept unauthenticated style writes to block 0
    pub fn magic(self) -> Self {
        self.state.lock().magic = true;
        self
    }

    pub fn card_type(&self) -> MifareCardType {
        self.state.lock().card_type
    }

    pub fn uid(&self) -> Vec<u8> {
        self.state.lock().uid.clone()
    }

    /// Change the keys stored in a sector trailer
    pub fn set_sector_keys(&self, sector: usize, key_a: MifareKey, key_b: MifareKey) {
        let mut state = self.state.lock();
        let trailer = &mut state.blocks[layout::trailer_of_sector(sector)];
        trailer[TRAILER_KEY_A].copy_from_slice(key_a.as_bytes());
        trailer[TRAILER_KEY_B].copy_from_slice(key_b.as_bytes());
    }

    /// Raw block content, keys included
    pub fn block(&self, block: usize) -> [u8; BLOCK_SIZE] {
        self.state.lock().blocks[block]
    }

    pub fn set_block(&self, block: usize, data: [u8; BLOCK_SIZE]) {
        self.state.lock().blocks[block] = data;
    }

    /// Take the card out of the field
    pub fn remove(&self) {
        self.state.lock().present = false;
    }

    /// Put the card back into the field
    pub fn insert(&self) {
        self.state.lock().present = true;
    }

    /// Fail every write after `count` successful ones
    pub fn fail_writes_after(&self, count: usize) {
        self.state.lock().fail_writes_after = Some(count);
    }

    /// Make a block fail to read
    pub fn set_unreadable(&self, block: usize) {
        self.state.lock().unreadable.insert(block);
    }

    pub fn select_count(&self) -> usize {
        self.state.lock().select_count
    }

    pub fn auth_attempts(&self) -> Vec<AuthAttempt> {
        self.state.lock().auth_log.clone()
    }

    /// Blocks written so far, in order
    pub fn written_blocks(&self) -> Vec<usize> {
        self.state.lock().write_log.clone()
    }
}

impl MifareTransport for VirtualMifareCard {
    fn select(&mut self, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock();
        if !state.present {
            return Err(TransportError::NoTarget);
        }
        state.halted = false;
        state.authenticated_sector = None;
        state.select_count += 1;
        Ok(state.uid.clone())
    }

    fn authenticate(
        &mut self,
        uid: &[u8],
        block: u8,
        key_type: KeyType,
        key: &MifareKey,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.auth_log.push(AuthAttempt {
            block,
            key_type,
            key: *key,
        });
        state.check_active()?;

        let block = block as usize;
        let accepted = block < state.blocks.len() && uid == state.uid.as_slice() && {
            let trailer = &state.blocks[layout::trailer_of_sector(layout::sector_of(block))];
            let range = match key_type {
                KeyType::A => TRAILER_KEY_A,
                KeyType::B => TRAILER_KEY_B,
            };
            &trailer[range] == key.as_bytes()
        };

        if accepted {
            state.authenticated_sector = Some(layout::sector_of(block));
            Ok(())
        } else {
            state.halted = true;
            state.authenticated_sector = None;
            Err(TransportError::AuthRejected)
        }
    }

    fn read_block(&mut self, block: u8) -> Result<[u8; BLOCK_SIZE], TransportError> {
        let state = self.state.lock();
        state.check_active()?;
        let block = block as usize;
        state.check_sector(block)?;
        if state.unreadable.contains(&block) {
            return Err(TransportError::Io(format!("block {} did not answer", block)));
        }
        let mut data = state.blocks[block];
        if layout::is_trailer(block) {
            data[TRAILER_KEY_A].fill(0);
            data[TRAILER_KEY_B].fill(0);
        }
        Ok(data)
    }

    fn write_block(&mut self, block: u8, data: &[u8; BLOCK_SIZE]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.check_active()?;
        let block = block as usize;
        state.check_sector(block)?;
        if block == 0 && !state.magic {
            return Err(TransportError::NotPermitted);
        }
        if let Some(limit) = state.fail_writes_after {
            if state.write_log.len() >= limit {
                return Err(TransportError::Io("write not acknowledged".to_string()));
            }
        }
        state.blocks[block] = *data;
        state.write_log.push(block);
        Ok(())
    }
}
