//! Mifare Classic engine

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::auth::{self, AuthHint, AuthRequest, SectorKeyCache};
use super::layout::{self, MifareCardType, BLOCK_SIZE};
use crate::config::EngineTiming;
use crate::error::{SelectiveWriteError, TagError};
use crate::keys::{KeyStore, MifareKey, FACTORY_KEY};
use crate::tag::{MifareDump, TagRecord, Uid};
use crate::transport::{KeyType, MifareTransport};

/// Longest single select call while polling for a card
const SHORT_DETECT_TIMEOUT: Duration = Duration::from_millis(100);

/// First block of sector 16, which only exists on 4K cards
const TYPING_BLOCK: u8 = 64;

/// What detection learnt about the card in the field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardIdentity {
    pub uid: Uid,
    pub card_type: MifareCardType,
    pub sak: u8,
    pub atqa: u16,
}

/// Result of a full read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadSummary {
    pub identity: CardIdentity,
    pub blocks_read: usize,
    pub total_blocks: usize,
    pub failed_sectors: Vec<usize>,
}

/// Result of a full write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub sectors_written: usize,
    pub blocks_written: usize,
}

/// Drives a Mifare Classic card through a [`MifareTransport`]
///
/// Owns the live dump buffer that writes replay, and the per sector key
/// cache that lets repeated operations on a card skip the key scan.
pub struct MifareEngine {
    transport: Box<dyn MifareTransport>,
    keys: Arc<KeyStore>,
    timing: EngineTiming,
    sector_keys: SectorKeyCache,
    // card the cached sector keys were learnt from; `None` after `adopt`
    last_uid: Option<Uid>,
    image: Option<(Uid, MifareDump)>,
}

impl MifareEngine {
    /// Create a new engine over an opened transport
    pub fn new(transport: Box<dyn MifareTransport>, keys: Arc<KeyStore>, timing: EngineTiming) -> Self {
        Self {
            transport,
            keys,
            timing,
            sector_keys: SectorKeyCache::new(),
            last_uid: None,
            image: None,
        }
    }

    pub fn sector_keys(&self) -> &SectorKeyCache {
        &self.sector_keys
    }

    pub fn image(&self) -> Option<&(Uid, MifareDump)> {
        self.image.as_ref()
    }

    /// The live buffer as a record
    pub fn record(&self) -> Option<TagRecord> {
        self.image
            .as_ref()
            .map(|(uid, dump)| TagRecord::mifare(uid.clone(), dump.clone()))
    }

    /// Replace the live buffer and learn the keys in its trailers
    ///
    /// The seeded keys are kept for whichever card is detected next.
    pub fn adopt(&mut self, uid: Uid, dump: MifareDump) {
        self.sector_keys.seed_from_dump(&dump);
        self.last_uid = None;
        self.image = Some((uid, dump));
    }

    /// Drop the live buffer
    pub fn clear(&mut self) {
        self.image = None;
    }

    fn request<'a>(&self, uid: &'a [u8], block: usize, database: &'a [MifareKey]) -> AuthRequest<'a> {
        AuthRequest {
            uid,
            block,
            database,
            reactivate_timeout: self.timing.mifare_reactivate_timeout,
        }
    }

    /// Wait for a card, then work out whether it is a 1K or a 4K
    ///
    /// A 4K card is recognised by block 64 opening with the factory key. A
    /// 4K card whose sector 16 key was changed is reported as a 1K. A card
    /// that answers the re-select with another UID fails detection. The
    /// sector key cache is dropped when the UID differs from the last card.
    pub fn detect(&mut self, timeout: Duration) -> Result<CardIdentity, TagError> {
        let start = Instant::now();
        let uid = loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            if let Ok(uid) = self.transport.select(remaining.min(SHORT_DETECT_TIMEOUT)) {
                break uid;
            }
            if start.elapsed() >= timeout {
                return Err(TagError::NoTagDetected);
            }
            pause(self.timing.mifare_detect_interval);
        };
        let uid = Uid::new(&uid)?;

        let card_type = match self
            .transport
            .authenticate(uid.as_bytes(), TYPING_BLOCK, KeyType::A, &FACTORY_KEY)
        {
            Ok(()) => MifareCardType::Classic4K,
            Err(_) => MifareCardType::Classic1K,
        };
        let reselected = self
            .transport
            .select(self.timing.mifare_reselect_timeout)
            .map_err(|_| TagError::NoTagDetected)?;
        if reselected.as_slice() != uid.as_bytes() {
            warn!(
                "Card changed during detection ({} then {})",
                uid.to_colon_string(),
                hex::encode_upper(&reselected)
            );
            return Err(TagError::NoTagDetected);
        }

        if self.last_uid.as_ref().is_some_and(|last| *last != uid) {
            debug!("New card {}, dropping cached sector keys", uid.to_colon_string());
            self.sector_keys.clear();
        }
        self.last_uid = Some(uid.clone());

        debug!("Detected {} with UID {}", card_type.name(), uid.to_colon_string());
        Ok(CardIdentity {
            uid,
            card_type,
            sak: card_type.sak(),
            atqa: card_type.atqa(),
        })
    }

    /// Detect a card and return its identity without reading memory
    pub fn read_uid(&mut self, timeout: Duration) -> Result<CardIdentity, TagError> {
        let identity = self.detect(timeout)?;
        info!("UID read: {} ({})", identity.uid.to_colon_string(), identity.card_type.name());
        Ok(identity)
    }

    /// Read every sector the key cascade can open
    ///
    /// Sectors that cannot be opened or read stay zeroed and the pass moves
    /// on. Trailer key bytes are replaced by the working keys, since the
    /// card answers them as zeros.
    pub fn read(&mut self, timeout: Duration) -> Result<ReadSummary, TagError> {
        info!("Waiting for Mifare card ({:?})", timeout);
        let identity = self.detect(timeout)?;
        let card_type = identity.card_type;
        let database = self.keys.key_bytes();
        let uid_bytes = identity.uid.as_bytes().to_vec();

        let mut dump = MifareDump::new(card_type).with_identity(identity.sak, identity.atqa);
        let mut hint = AuthHint::default();
        let mut failed_sectors = Vec::new();

        for sector in 0..card_type.sector_count() {
            let first = layout::first_block_of_sector(sector);
            let request = self.request(&uid_bytes, first, &database);
            if let Err(e) = auth::authenticate(self.transport.as_mut(), &request, &mut self.sector_keys, Some(&mut hint)) {
                warn!("Sector {} skipped: {}", sector, e);
                failed_sectors.push(sector);
                continue;
            }

            match self.read_sector(sector, &mut dump) {
                Ok(()) => {
                    let known = self.sector_keys.get(sector);
                    dump.set_trailer_keys(
                        sector,
                        known.key_a.as_ref().map(MifareKey::as_bytes),
                        known.key_b.as_ref().map(MifareKey::as_bytes),
                    );
                    dump.mark_sector_read(sector, true);
                }
                Err(e) => {
                    warn!("Sector {} read failed: {}", sector, e);
                    failed_sectors.push(sector);
                    if let Err(e) = self.transport.select(self.timing.mifare_reactivate_timeout) {
                        debug!("Re-select after sector {} failed: {}", sector, e);
                    }
                }
            }
        }

        let blocks_read = dump.blocks_read();
        let total_blocks = card_type.total_blocks();
        if blocks_read == 0 {
            error!("No sector could be read");
            return Err(TagError::AuthenticationFailed("no sector could be authenticated".to_string()));
        }

        info!("Mifare read: {}/{} blocks", blocks_read, total_blocks);
        self.image = Some((identity.uid.clone(), dump));
        Ok(ReadSummary {
            identity,
            blocks_read,
            total_blocks,
            failed_sectors,
        })
    }

    fn read_sector(&mut self, sector: usize, dump: &mut MifareDump) -> Result<(), TagError> {
        let first = layout::first_block_of_sector(sector);
        for block in first..first + layout::block_count_of_sector(sector) {
            let data = self
                .transport
                .read_block(block as u8)
                .map_err(|e| TagError::ReadFailed(format!("block {}: {}", block, e)))?;
            dump.set_block(block, &data)?;
        }
        Ok(())
    }

    fn require_image(&self) -> Result<(Uid, MifareDump), TagError> {
        self.image
            .clone()
            .ok_or_else(|| TagError::InvalidData("no dump loaded".to_string()))
    }

    fn require_card_type(identity: &CardIdentity, dump: &MifareDump) -> Result<(), TagError> {
        if identity.card_type != dump.card_type() {
            return Err(TagError::InvalidData(format!(
                "card type mismatch: dump is {}, card is {}",
                dump.card_type().name(),
                identity.card_type.name()
            )));
        }
        Ok(())
    }

    /// Write the live buffer to the card
    ///
    /// Block 0 and the trailers are never written. Sectors missing from the
    /// dump are skipped. The first sector that fails to open or write
    /// aborts the rest.
    pub fn write(&mut self, timeout: Duration) -> Result<WriteSummary, TagError> {
        let (_, dump) = self.require_image()?;
        info!("Waiting for Mifare card to write ({:?})", timeout);
        let start = Instant::now();
        let identity = self.detect(timeout)?;
        Self::require_card_type(&identity, &dump)?;

        let database = self.keys.key_bytes();
        let uid_bytes = identity.uid.as_bytes().to_vec();
        let mut summary = WriteSummary {
            sectors_written: 0,
            blocks_written: 0,
        };

        for sector in 0..dump.sector_count() {
            if start.elapsed() > timeout {
                return Err(TagError::Timeout(format!("write stopped before sector {}", sector)));
            }
            if !dump.is_sector_read(sector) {
                warn!("Sector {} not in dump, skipped", sector);
                continue;
            }

            let first = layout::first_block_of_sector(sector);
            let request = self.request(&uid_bytes, first, &database);
            auth::authenticate(self.transport.as_mut(), &request, &mut self.sector_keys, None)?;

            for block in first..first + layout::block_count_of_sector(sector) {
                if layout::is_protected(block) {
                    continue;
                }
                self.write_raw(block, dump.block(block))?;
                summary.blocks_written += 1;
            }
            summary.sectors_written += 1;
        }

        info!(
            "Mifare write: {} blocks in {} sectors",
            summary.blocks_written, summary.sectors_written
        );
        Ok(summary)
    }

    fn write_raw(&mut self, block: usize, data: &[u8]) -> Result<(), TagError> {
        let mut bytes = [0u8; BLOCK_SIZE];
        bytes.copy_from_slice(data);
        self.transport
            .write_block(block as u8, &bytes)
            .map_err(|e| TagError::WriteFailed(format!("block {}: {}", block, e)))?;
        debug!("Wrote block {}", block);
        pause(self.timing.mifare_block_write_delay);
        Ok(())
    }

    /// Check that a block may go through a plain block write
    pub fn check_writable(&self, block: usize) -> Result<(), TagError> {
        let total = self
            .image
            .as_ref()
            .map_or(MifareCardType::Classic4K.total_blocks(), |(_, dump)| dump.total_blocks());
        if block >= total {
            return Err(TagError::InvalidData(format!("block {} is out of range", block)));
        }
        if block == 0 {
            return Err(TagError::InvalidData("block 0 holds the UID, use UID clone".to_string()));
        }
        if layout::is_trailer(block) {
            return Err(TagError::InvalidData(format!("block {} is a sector trailer", block)));
        }
        Ok(())
    }

    /// Write one block, from `data` or else from the live buffer
    ///
    /// Block 0 and trailers are refused before the card is touched. When
    /// `data` is given the live buffer follows it.
    pub fn write_single_block(&mut self, block: usize, data: Option<[u8; BLOCK_SIZE]>) -> Result<(), TagError> {
        self.check_writable(block)?;
        let payload = match data {
            Some(bytes) => bytes,
            None => {
                let (_, dump) = self
                    .image
                    .as_ref()
                    .ok_or_else(|| TagError::InvalidData("no dump loaded".to_string()))?;
                let mut bytes = [0u8; BLOCK_SIZE];
                bytes.copy_from_slice(dump.block(block));
                bytes
            }
        };

        let identity = self.detect(self.timing.mifare_single_block_timeout)?;
        if let Some((_, dump)) = self.image.as_ref() {
            Self::require_card_type(&identity, dump)?;
        }

        let database = self.keys.key_bytes();
        let uid_bytes = identity.uid.as_bytes().to_vec();
        let first = layout::first_block_of_sector(layout::sector_of(block));
        let request = self.request(&uid_bytes, first, &database);
        auth::authenticate(self.transport.as_mut(), &request, &mut self.sector_keys, None)?;
        self.write_raw(block, &payload)?;

        if data.is_some() {
            if let Some((_, dump)) = self.image.as_mut() {
                dump.set_block(block, &payload)?;
            }
        }
        Ok(())
    }

    /// Write the listed blocks from the live buffer
    ///
    /// Every index is checked before any hardware access. The batch stops
    /// at the first block that fails.
    pub fn write_selective(&mut self, blocks: &[usize]) -> Result<usize, SelectiveWriteError> {
        if self.image.is_none() {
            return Err(SelectiveWriteError {
                block: blocks.first().copied().unwrap_or(0),
                source: TagError::InvalidData("no dump loaded".to_string()),
            });
        }
        for &block in blocks {
            self.check_writable(block)
                .map_err(|source| SelectiveWriteError { block, source })?;
        }

        for &block in blocks {
            self.write_single_block(block, None)
                .map_err(|source| SelectiveWriteError { block, source })?;
        }
        info!("Selective Mifare write: {} blocks", blocks.len());
        Ok(blocks.len())
    }

    /// Build the manufacturer block for a UID: `UID ‖ BCC ‖ SAK ‖ ATQA`
    ///
    /// ATQA is stored low byte first, as the card transmits it.
    pub fn build_block0(uid: &Uid, sak: u8, atqa: u16) -> Result<[u8; BLOCK_SIZE], TagError> {
        let len = uid.len();
        if len == 0 || len + 4 > BLOCK_SIZE {
            return Err(TagError::InvalidData(format!("cannot build block 0 for a {} byte UID", len)));
        }
        let mut block = [0u8; BLOCK_SIZE];
        block[..len].copy_from_slice(uid.as_bytes());
        block[len] = uid.bcc();
        block[len + 1] = sak;
        block[len + 2..len + 4].copy_from_slice(&atqa.to_le_bytes());
        Ok(block)
    }

    /// Write the live buffer's UID to a magic card's block 0
    pub fn clone_uid(&mut self, timeout: Duration) -> Result<(), TagError> {
        let (uid, dump) = self.require_image()?;
        let block0 = Self::build_block0(&uid, dump.sak(), dump.atqa())?;

        info!("Waiting for target card to clone UID {} ({:?})", uid.to_colon_string(), timeout);
        let identity = self.detect(timeout)?;
        let database = self.keys.key_bytes();
        let target_uid = identity.uid.as_bytes().to_vec();
        let request = self.request(&target_uid, 0, &database);
        auth::authenticate(self.transport.as_mut(), &request, &mut self.sector_keys, None)?;

        self.transport.write_block(0, &block0).map_err(|e| {
            error!("Block 0 write refused: {}", e);
            TagError::WriteFailed("block 0 refused the write (magic card required)".to_string())
        })?;
        info!("UID cloned: {}", uid.to_colon_string());
        Ok(())
    }
}

fn pause(duration: Duration) {
    if duration.is_zero() {
        thread::yield_now();
    } else {
        thread::sleep(duration);
    }
}
