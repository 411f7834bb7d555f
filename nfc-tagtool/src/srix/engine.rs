//! SRIX4K engine

use log::{debug, info, warn};
use std::thread;
use std::time::{Duration, Instant};

use super::{SRIX_BLOCKS, SRIX_BLOCK_SIZE, SRIX_UID_LEN};
use crate::config::EngineTiming;
use crate::error::{SelectiveWriteError, TagError};
use crate::outcome::Status;
use crate::tag::{SrixDump, TagRecord};
use crate::transport::SrixTransport;

/// Outcome of a single block write
///
/// Read back verification is unreliable on SRIX tags, so all three tiers
/// mean the block was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrixBlockWrite {
    Verified,
    VerifyMismatch,
    /// The tag did not answer the re-select or the read back
    VerifySkipped,
}

impl SrixBlockWrite {
    pub fn code(self) -> i32 {
        match self {
            SrixBlockWrite::Verified => Status::OK,
            SrixBlockWrite::VerifyMismatch => Status::VERIFY_MISMATCH,
            SrixBlockWrite::VerifySkipped => Status::VERIFY_SKIPPED,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            SrixBlockWrite::Verified => "Block written and verified",
            SrixBlockWrite::VerifyMismatch => "Block written (verify mismatch)",
            SrixBlockWrite::VerifySkipped => "Block written (verify skipped)",
        }
    }
}

/// Outcome of a full dump write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrixWriteReport {
    Complete,
    /// The tag left the field; the blocks written so far likely landed
    TagLost { blocks_written: usize },
}

/// Tally of a selective write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectiveTally {
    pub written: usize,
    pub verify_mismatch: usize,
    pub verify_skipped: usize,
}

/// Drives an SRIX4K tag through a [`SrixTransport`]
///
/// Holds the live dump buffer that writes replay onto the tag.
pub struct SrixEngine {
    transport: Box<dyn SrixTransport>,
    timing: EngineTiming,
    image: Option<([u8; SRIX_UID_LEN], SrixDump)>,
}

impl SrixEngine {
    /// Create a new engine over an opened transport
    pub fn new(transport: Box<dyn SrixTransport>, timing: EngineTiming) -> Self {
        Self {
            transport,
            timing,
            image: None,
        }
    }

    /// Replace the live buffer
    pub fn adopt(&mut self, uid: [u8; SRIX_UID_LEN], dump: SrixDump) {
        self.image = Some((uid, dump));
    }

    /// Drop the live buffer
    pub fn clear(&mut self) {
        self.image = None;
    }

    pub fn image(&self) -> Option<&([u8; SRIX_UID_LEN], SrixDump)> {
        self.image.as_ref()
    }

    /// The live buffer as a record
    pub fn record(&self) -> Option<TagRecord> {
        self.image.as_ref().map(|(uid, dump)| TagRecord::srix(*uid, dump.clone()))
    }

    /// Poll initiate+select until the tag answers or `timeout` passes
    pub fn wait_for_tag(&mut self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.transport.initiate_select().is_ok() {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            pause(self.timing.srix_detect_interval);
        }
    }

    /// Read the UID and all 128 blocks
    ///
    /// Any failure restarts the whole detect and read sequence until
    /// `timeout` passes.
    pub fn read(&mut self, timeout: Duration) -> Result<TagRecord, TagError> {
        info!("Waiting for SRIX tag ({:?})", timeout);
        let start = Instant::now();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            match self.read_pass() {
                Ok((uid, dump)) => {
                    info!("SRIX read complete: UID {} ({} attempts)", hex::encode_upper(uid), attempt);
                    self.image = Some((uid, dump.clone()));
                    return Ok(TagRecord::srix(uid, dump));
                }
                Err(PassError::NoTag) => pause(self.timing.srix_detect_interval),
                Err(PassError::Uid) => pause(self.timing.srix_retry_delay),
                Err(PassError::Block(block)) => {
                    warn!("Read failed at block {}, retrying", block);
                    pause(self.timing.srix_retry_delay);
                }
            }
            if start.elapsed() >= timeout {
                warn!("SRIX read timed out after {} attempts", attempt);
                return Err(TagError::NoTagDetected);
            }
        }
    }

    fn read_pass(&mut self) -> Result<([u8; SRIX_UID_LEN], SrixDump), PassError> {
        self.transport.initiate_select().map_err(|_| PassError::NoTag)?;
        let uid = self.transport.get_uid().map_err(|_| PassError::Uid)?;
        let mut dump = SrixDump::zeroed();
        for block in 0..SRIX_BLOCKS {
            let data = self
                .transport
                .read_block(block as u8)
                .map_err(|_| PassError::Block(block))?;
            dump.set_block(block, &data).map_err(|_| PassError::Block(block))?;
        }
        Ok((uid, dump))
    }

    /// Write the live buffer to the tag, block by block
    ///
    /// After each block the tag gets its EEPROM commit time and must be
    /// re-detected before the next one. Losing it is reported as
    /// [`SrixWriteReport::TagLost`].
    pub fn write(&mut self, timeout: Duration) -> Result<SrixWriteReport, TagError> {
        let dump = match &self.image {
            Some((_, dump)) => dump.clone(),
            None => return Err(TagError::InvalidData("no data loaded".to_string())),
        };

        info!("Waiting for SRIX tag to write ({:?})", timeout);
        if !self.wait_for_tag(timeout) {
            return Err(TagError::NoTagDetected);
        }

        for block in 0..SRIX_BLOCKS {
            self.transport
                .write_block(block as u8, &dump.block(block))
                .map_err(|e| TagError::WriteFailed(format!("block {}: {}", block, e)))?;
            debug!("Wrote SRIX block {}", block);
            pause(self.timing.srix_eeprom_delay);

            let written = block + 1;
            if written < SRIX_BLOCKS && !self.wait_for_tag(self.timing.srix_redetect_timeout) {
                warn!("Tag lost after {} blocks", written);
                return Ok(SrixWriteReport::TagLost {
                    blocks_written: written,
                });
            }
        }

        info!("SRIX write complete");
        Ok(SrixWriteReport::Complete)
    }

    /// Write one block and try to verify it by reading it back
    ///
    /// The live buffer follows the block once the write lands.
    pub fn write_block(&mut self, block: usize, data: [u8; SRIX_BLOCK_SIZE]) -> Result<SrixBlockWrite, TagError> {
        if block >= SRIX_BLOCKS {
            return Err(TagError::InvalidData(format!("invalid SRIX block {}", block)));
        }
        if !self.wait_for_tag(self.timing.srix_single_block_timeout) {
            return Err(TagError::NoTagDetected);
        }

        self.transport
            .write_block(block as u8, &data)
            .map_err(|e| TagError::WriteFailed(format!("block {}: {}", block, e)))?;
        if let Some((_, dump)) = self.image.as_mut() {
            dump.set_block(block, &data)?;
        }
        pause(self.timing.srix_eeprom_delay);

        if self.transport.initiate_select().is_err() {
            debug!("Block {}: re-select failed, verify skipped", block);
            return Ok(SrixBlockWrite::VerifySkipped);
        }
        pause(self.timing.srix_verify_delay);

        Ok(match self.transport.read_block(block as u8) {
            Ok(read_back) if read_back == data => SrixBlockWrite::Verified,
            Ok(read_back) => {
                warn!(
                    "Block {}: verify mismatch (wrote {}, read {})",
                    block,
                    hex::encode_upper(data),
                    hex::encode_upper(read_back)
                );
                SrixBlockWrite::VerifyMismatch
            }
            Err(_) => SrixBlockWrite::VerifySkipped,
        })
    }

    /// Write the listed blocks from the live buffer
    ///
    /// The batch is checked before any hardware access and stops at the
    /// first block that fails to write.
    pub fn write_selective(&mut self, blocks: &[usize]) -> Result<SelectiveTally, SelectiveWriteError> {
        let dump = match &self.image {
            Some((_, dump)) => dump.clone(),
            None => {
                return Err(SelectiveWriteError {
                    block: blocks.first().copied().unwrap_or(0),
                    source: TagError::InvalidData("no data loaded".to_string()),
                })
            }
        };
        if let Some(&block) = blocks.iter().find(|b| **b >= SRIX_BLOCKS) {
            return Err(SelectiveWriteError {
                block,
                source: TagError::InvalidData(format!("invalid SRIX block {}", block)),
            });
        }

        let mut tally = SelectiveTally::default();
        for &block in blocks {
            match self.write_block(block, dump.block(block)) {
                Ok(result) => {
                    tally.written += 1;
                    match result {
                        SrixBlockWrite::VerifyMismatch => tally.verify_mismatch += 1,
                        SrixBlockWrite::VerifySkipped => tally.verify_skipped += 1,
                        SrixBlockWrite::Verified => {}
                    }
                }
                Err(source) => return Err(SelectiveWriteError { block, source }),
            }
        }
        info!("Selective SRIX write: {} blocks", tally.written);
        Ok(tally)
    }
}

enum PassError {
    NoTag,
    Uid,
    Block(usize),
}

fn pause(duration: Duration) {
    if duration.is_zero() {
        thread::yield_now();
    } else {
        thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_tag::VirtualSrixTag;

    const UID: [u8; 8] = [0xD0, 0x02, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E, 0x6F];

    fn pattern() -> Vec<u8> {
        (0..512).map(|i| (i % 251) as u8).collect()
    }

    fn engine_for(tag: &VirtualSrixTag) -> SrixEngine {
        SrixEngine::new(Box::new(tag.clone()), EngineTiming::instant())
    }

    #[test]
    fn test_read_full_tag() {
        let tag = VirtualSrixTag::new(UID).with_memory(&pattern());
        let mut engine = engine_for(&tag);
        let record = engine.read(Duration::from_millis(100)).unwrap();
        assert_eq!(record.uid.as_bytes(), &UID);
        assert_eq!(record.memory.as_bytes(), pattern().as_slice());
        assert!(engine.image().is_some());
    }

    #[test]
    fn test_read_retries_whole_pass() {
        let tag = VirtualSrixTag::new(UID).with_memory(&pattern());
        tag.fail_next_reads(1);
        let mut engine = engine_for(&tag);
        let record = engine.read(Duration::from_millis(200)).unwrap();
        assert_eq!(record.memory.as_bytes(), pattern().as_slice());
        assert!(tag.select_count() >= 2);
    }

    #[test]
    fn test_read_without_tag_times_out() {
        let tag = VirtualSrixTag::new(UID);
        tag.remove();
        let mut engine = engine_for(&tag);
        assert_eq!(engine.read(Duration::from_millis(20)), Err(TagError::NoTagDetected));
    }

    #[test]
    fn test_write_requires_loaded_dump() {
        let tag = VirtualSrixTag::new(UID);
        let mut engine = engine_for(&tag);
        assert!(matches!(engine.write(Duration::from_millis(20)), Err(TagError::InvalidData(_))));
        assert_eq!(tag.write_count(), 0);
    }

    #[test]
    fn test_write_full_dump() {
        let tag = VirtualSrixTag::new(UID);
        let mut engine = engine_for(&tag);
        engine.adopt(UID, SrixDump::from_bytes(&pattern()).unwrap());
        assert_eq!(engine.write(Duration::from_millis(50)), Ok(SrixWriteReport::Complete));
        assert_eq!(tag.write_count(), 128);
        assert_eq!(tag.block(127), [6, 7, 8, 9]);
    }

    #[test]
    fn test_write_reports_tag_lost() {
        let tag = VirtualSrixTag::new(UID);
        tag.vanish_after_writes(50);
        let mut engine = engine_for(&tag);
        engine.adopt(UID, SrixDump::from_bytes(&pattern()).unwrap());
        assert_eq!(
            engine.write(Duration::from_millis(50)),
            Ok(SrixWriteReport::TagLost { blocks_written: 50 })
        );
        assert_eq!(tag.write_count(), 50);
    }

    #[test]
    fn test_block_write_verified() {
        let tag = VirtualSrixTag::new(UID);
        let mut engine = engine_for(&tag);
        assert_eq!(engine.write_block(9, [1, 2, 3, 4]), Ok(SrixBlockWrite::Verified));
        assert_eq!(tag.block(9), [1, 2, 3, 4]);
    }

    #[test]
    fn test_block_write_verify_mismatch() {
        let tag = VirtualSrixTag::new(UID);
        tag.garble_readback();
        let mut engine = engine_for(&tag);
        let result = engine.write_block(9, [1, 2, 3, 4]).unwrap();
        assert_eq!(result, SrixBlockWrite::VerifyMismatch);
        assert_eq!(result.code(), 1);
    }

    #[test]
    fn test_block_write_verify_skipped() {
        let tag = VirtualSrixTag::new(UID);
        tag.refuse_select_after_write();
        let mut engine = engine_for(&tag);
        let result = engine.write_block(9, [1, 2, 3, 4]).unwrap();
        assert_eq!(result, SrixBlockWrite::VerifySkipped);
        assert_eq!(result.code(), 2);
        assert_eq!(tag.block(9), [1, 2, 3, 4]);
    }

    #[test]
    fn test_block_write_rejects_out_of_range() {
        let tag = VirtualSrixTag::new(UID);
        let mut engine = engine_for(&tag);
        assert!(matches!(engine.write_block(128, [0; 4]), Err(TagError::InvalidData(_))));
        assert_eq!(tag.write_count(), 0);
    }

    #[test]
    fn test_block_write_updates_live_buffer() {
        let tag = VirtualSrixTag::new(UID);
        let mut engine = engine_for(&tag);
        engine.adopt(UID, SrixDump::zeroed());
        engine.write_block(3, [9, 9, 9, 9]).unwrap();
        assert_eq!(engine.image().unwrap().1.block(3), [9, 9, 9, 9]);
    }

    #[test]
    fn test_selective_write() {
        let tag = VirtualSrixTag::new(UID);
        let mut engine = engine_for(&tag);
        engine.adopt(UID, SrixDump::from_bytes(&pattern()).unwrap());
        let tally = engine.write_selective(&[4, 5, 6]).unwrap();
        assert_eq!(tally.written, 3);
        assert_eq!(tag.write_count(), 3);
        assert_eq!(tag.block(5), [20, 21, 22, 23]);
    }

    #[test]
    fn test_selective_write_validates_first() {
        let tag = VirtualSrixTag::new(UID);
        let mut engine = engine_for(&tag);
        engine.adopt(UID, SrixDump::zeroed());
        let err = engine.write_selective(&[4, 200]).unwrap_err();
        assert_eq!(err.block, 200);
        assert_eq!(tag.write_count(), 0);
    }

    #[test]
    fn test_selective_write_stops_at_first_failure() {
        let tag = VirtualSrixTag::new(UID);
        tag.vanish_after_writes(1);
        let mut engine = engine_for(&tag);
        engine.adopt(UID, SrixDump::zeroed());
        let err = engine.write_selective(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.block, 2);
        assert_eq!(err.source, TagError::NoTagDetected);
        assert_eq!(tag.write_count(), 1);
    }
}
