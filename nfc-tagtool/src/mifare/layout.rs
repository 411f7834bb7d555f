//! Mifare Classic memory geometry
//!
//! Sectors 0..32 hold 4 blocks each (blocks 0..128). Sectors 32..40 exist
//! on 4K cards only and hold 16 blocks each (blocks 128..256). Every block
//! is 16 bytes and the last block of each sector is its trailer.

use serde::{Deserialize, Serialize};

/// Size of one Mifare Classic block in bytes
pub const BLOCK_SIZE: usize = 16;

/// Highest sector count of any supported card (4K)
pub const MAX_SECTORS: usize = 40;

const SMALL_SECTORS: usize = 32;
const SMALL_SECTOR_BLOCKS: usize = 4;
const LARGE_SECTOR_BLOCKS: usize = 16;

/// Byte ranges inside a sector trailer
pub const TRAILER_KEY_A: std::ops::Range<usize> = 0..6;
pub const TRAILER_ACCESS_BITS: std::ops::Range<usize> = 6..10;
pub const TRAILER_KEY_B: std::ops::Range<usize> = 10..16;

/// Mifare Classic card variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MifareCardType {
    Classic1K,
    Classic4K,
}

impl MifareCardType {
    pub fn sector_count(self) -> usize {
        match self {
            MifareCardType::Classic1K => 16,
            MifareCardType::Classic4K => MAX_SECTORS,
        }
    }

    pub fn total_blocks(self) -> usize {
        match self {
            MifareCardType::Classic1K => 64,
            MifareCardType::Classic4K => 256,
        }
    }

    pub fn memory_size(self) -> usize {
        self.total_blocks() * BLOCK_SIZE
    }

    /// SAK this variant answers anticollision with
    pub fn sak(self) -> u8 {
        match self {
            MifareCardType::Classic1K => 0x08,
            MifareCardType::Classic4K => 0x18,
        }
    }

    /// ATQA as a 16 bit value (displayed high byte first)
    pub fn atqa(self) -> u16 {
        match self {
            MifareCardType::Classic1K => 0x0004,
            MifareCardType::Classic4K => 0x0002,
        }
    }

    /// Name used in dump files and user facing messages
    pub fn name(self) -> &'static str {
        match self {
            MifareCardType::Classic1K => "Mifare Classic 1K",
            MifareCardType::Classic4K => "Mifare Classic 4K",
        }
    }

    /// Map a SAK byte to a card variant
    pub fn from_sak(sak: u8) -> Option<Self> {
        // bit 8 is ignored (AN10833 3.2)
        match sak & 0x7F {
            0x08 => Some(MifareCardType::Classic1K),
            0x18 => Some(MifareCardType::Classic4K),
            _ => None,
        }
    }

    /// Map a card variant from its total memory size
    pub fn from_memory_size(len: usize) -> Option<Self> {
        match len {
            1024 => Some(MifareCardType::Classic1K),
            4096 => Some(MifareCardType::Classic4K),
            _ => None,
        }
    }
}

/// Geometry of a sector: `(first_block, block_count)`
///
/// This is the only place sector arithmetic lives.
pub const fn sector_geometry(sector: usize) -> Option<(usize, usize)> {
    if sector < SMALL_SECTORS {
        Some((sector * SMALL_SECTOR_BLOCKS, SMALL_SECTOR_BLOCKS))
    } else if sector < MAX_SECTORS {
        Some((
            SMALL_SECTORS * SMALL_SECTOR_BLOCKS + (sector - SMALL_SECTORS) * LARGE_SECTOR_BLOCKS,
            LARGE_SECTOR_BLOCKS,
        ))
    } else {
        None
    }
}

/// First block of a sector
///
/// Sectors past the 4K range clamp to the end of memory.
pub fn first_block_of_sector(sector: usize) -> usize {
    sector_geometry(sector).map_or(256, |(first, _)| first)
}

/// Number of blocks in a sector
pub fn block_count_of_sector(sector: usize) -> usize {
    sector_geometry(sector).map_or(0, |(_, count)| count)
}

/// Trailer block of a sector
pub fn trailer_of_sector(sector: usize) -> usize {
    first_block_of_sector(sector) + block_count_of_sector(sector) - 1
}

/// Sector containing a block
pub fn sector_of(block: usize) -> usize {
    let small_blocks = SMALL_SECTORS * SMALL_SECTOR_BLOCKS;
    if block < small_blocks {
        block / SMALL_SECTOR_BLOCKS
    } else {
        SMALL_SECTORS + (block - small_blocks) / LARGE_SECTOR_BLOCKS
    }
}

/// Check if a block is the trailer of its sector
pub fn is_trailer(block: usize) -> bool {
    trailer_of_sector(sector_of(block)) == block
}

/// Check if a block needs a dedicated operation (UID block or trailer)
pub fn is_protected(block: usize) -> bool {
    block == 0 || is_trailer(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_sector_geometry() {
        assert_eq!(sector_geometry(0), Some((0, 4)));
        assert_eq!(sector_geometry(15), Some((60, 4)));
        assert_eq!(sector_geometry(31), Some((124, 4)));
    }

    #[test]
    fn test_large_sector_geometry() {
        assert_eq!(sector_geometry(32), Some((128, 16)));
        assert_eq!(sector_geometry(39), Some((240, 16)));
        assert_eq!(sector_geometry(40), None);
    }

    #[test]
    fn test_addressing_bijection() {
        for card in [MifareCardType::Classic1K, MifareCardType::Classic4K] {
            for block in 0..card.total_blocks() {
                let sector = sector_of(block);
                let first = first_block_of_sector(sector);
                assert!(sector < card.sector_count());
                assert!(first <= block && block < first + block_count_of_sector(sector));
            }
        }
    }

    #[test]
    fn test_sectors_tile_memory() {
        let blocks: usize = (0..MAX_SECTORS).map(block_count_of_sector).sum();
        assert_eq!(blocks, MifareCardType::Classic4K.total_blocks());
        let blocks_1k: usize = (0..16).map(block_count_of_sector).sum();
        assert_eq!(blocks_1k, MifareCardType::Classic1K.total_blocks());
    }

    #[test]
    fn test_trailers() {
        assert_eq!(trailer_of_sector(0), 3);
        assert_eq!(trailer_of_sector(2), 11);
        assert_eq!(trailer_of_sector(32), 143);
        assert_eq!(trailer_of_sector(39), 255);
        assert!(is_trailer(7));
        assert!(is_trailer(143));
        assert!(!is_trailer(140));
        let trailers_1k = (0..64).filter(|b| is_trailer(*b)).count();
        assert_eq!(trailers_1k, 16);
    }

    #[test]
    fn test_protected_blocks() {
        assert!(is_protected(0));
        assert!(is_protected(3));
        assert!(!is_protected(1));
        assert!(!is_protected(5));
        assert!(is_protected(7));
    }

    #[test]
    fn test_card_type_from_sak() {
        assert_eq!(MifareCardType::from_sak(0x08), Some(MifareCardType::Classic1K));
        assert_eq!(MifareCardType::from_sak(0x18), Some(MifareCardType::Classic4K));
        assert_eq!(MifareCardType::from_sak(0x20), None);
    }

    #[test]
    fn test_card_type_sizes() {
        assert_eq!(MifareCardType::Classic1K.memory_size(), 1024);
        assert_eq!(MifareCardType::Classic4K.memory_size(), 4096);
        assert_eq!(MifareCardType::from_memory_size(4096), Some(MifareCardType::Classic4K));
    }
}
