//! Virtual SRIX4K tag

use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::TransportError;
use crate::srix::{SRIX_BLOCKS, SRIX_BLOCK_SIZE, SRIX_UID_LEN};
use crate::transport::SrixTransport;

struct TagState {
    uid: [u8; SRIX_UID_LEN],
    blocks: [[u8; SRIX_BLOCK_SIZE]; SRIX_BLOCKS],
    present: bool,
    select_count: usize,
    writes: usize,
    vanish_after_writes: Option<usize>,
    refuse_select_after_write: bool,
    garble_readback: bool,
    failing_reads: usize,
}

/// An SRIX4K tag in memory
#[derive(Clone)]
pub struct VirtualSrixTag {
    state: Arc<Mutex<TagState>>,
}

impl VirtualSrixTag {
    /// Create a blank tag
    pub fn new(uid: [u8; SRIX_UID_LEN]) -> Self {
        Self {
            state: Arc::new(Mutex::new(TagState {
                uid,
                blocks: [[0u8; SRIX_BLOCK_SIZE]; SRIX_BLOCKS],
                present: true,
                select_count: 0,
                writes: 0,
                vanish_after_writes: None,
                refuse_select_after_write: false,
                garble_readback: false,
                failing_reads: 0,
            })),
        }
    }

    /// Fill every block from a 512 byte image
    pub fn with_memory(self, data: &[u8]) -> Self {
        {
            let mut state = self.state.lock();
            for (block, chunk) in data.chunks_exact(SRIX_BLOCK_SIZE).take(SRIX_BLOCKS).enumerate() {
                state.blocks[block].copy_from_slice(chunk);
            }
        }
        self
    }

    pub fn block(&self, block: usize) -> [u8; SRIX_BLOCK_SIZE] {
        self.state.lock().blocks[block]
    }

    pub fn remove(&self) {
        self.state.lock().present = false;
    }

    pub fn insert(&self) {
        self.state.lock().present = true;
    }

    /// Leave the field once `count` writes have landed
    pub fn vanish_after_writes(&self, count: usize) {
        self.state.lock().vanish_after_writes = Some(count);
    }

    /// Stop answering initiate/select after the first write
    pub fn refuse_select_after_write(&self) {
        self.state.lock().refuse_select_after_write = true;
    }

    /// Return inverted data on reads
    pub fn garble_readback(&self) {
        self.state.lock().garble_readback = true;
    }

    /// Fail the next `count` block reads
    pub fn fail_next_reads(&self, count: usize) {
        self.state.lock().failing_reads = count;
    }

    pub fn select_count(&self) -> usize {
        self.state.lock().select_count
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }
}

impl SrixTransport for VirtualSrixTag {
    fn initiate_select(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.present || (state.refuse_select_after_write && state.writes > 0) {
            return Err(TransportError::NoTarget);
        }
        state.select_count += 1;
        Ok(())
    }

    fn get_uid(&mut self) -> Result<[u8; SRIX_UID_LEN], TransportError> {
        let state = self.state.lock();
        if !state.present {
            return Err(TransportError::NoTarget);
        }
        Ok(state.uid)
    }

    fn read_block(&mut self, block: u8) -> Result<[u8; SRIX_BLOCK_SIZE], TransportError> {
        let mut state = self.state.lock();
        if !state.present {
            return Err(TransportError::NoTarget);
        }
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(TransportError::Io(format!("block {} did not answer", block)));
        }
        let mut data = *state
            .blocks
            .get(block as usize)
            .ok_or(TransportError::NotPermitted)?;
        if state.garble_readback {
            data.iter_mut().for_each(|b| *b = !*b);
        }
        Ok(data)
    }

    fn write_block(&mut self, block: u8, data: &[u8; SRIX_BLOCK_SIZE]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.present {
            return Err(TransportError::NoTarget);
        }
        let slot = state
            .blocks
            .get_mut(block as usize)
            .ok_or(TransportError::NotPermitted)?;
        *slot = *data;
        state.writes += 1;
        if state.vanish_after_writes.map_or(false, |n| state.writes >= n) {
            state.present = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UID: [u8; 8] = [0xD0, 0x02, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E, 0x6F];

    #[test]
    fn test_read_write() {
        let mut tag = VirtualSrixTag::new(UID);
        tag.initiate_select().unwrap();
        assert_eq!(tag.get_uid().unwrap(), UID);
        tag.write_block(10, &[1, 2, 3, 4]).unwrap();
        assert_eq!(tag.read_block(10).unwrap(), [1, 2, 3, 4]);
        assert!(tag.read_block(128).is_err());
    }

    #[test]
    fn test_vanish_after_writes() {
        let mut tag = VirtualSrixTag::new(UID);
        tag.vanish_after_writes(2);
        tag.write_block(0, &[0; 4]).unwrap();
        tag.write_block(1, &[0; 4]).unwrap();
        assert!(tag.initiate_select().is_err());
        assert_eq!(tag.write_count(), 2);
    }

    #[test]
    fn test_failing_reads_recover() {
        let mut tag = VirtualSrixTag::new(UID);
        tag.fail_next_reads(1);
        assert!(tag.read_block(0).is_err());
        assert!(tag.read_block(0).is_ok());
    }
}
