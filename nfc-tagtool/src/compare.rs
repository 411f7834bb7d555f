//! Loaded dump versus physical tag comparison

use serde::Serialize;

use crate::mifare::layout;
use crate::srix::SRIX_BLOCK_SIZE;
use crate::tag::{Protocol, TagRecord};

/// One block that differs between the two images
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockDifference {
    pub block: usize,
    pub loaded: String,
    pub physical: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Result of a comparison, ready for JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompareReport {
    pub success: bool,
    pub message: String,
    pub identical: bool,
    pub size_mismatch: bool,
    pub loaded_size: usize,
    pub physical_size: usize,
    pub block_size: usize,
    pub total_blocks: usize,
    pub total_differences: usize,
    pub differences: Vec<BlockDifference>,
    pub loaded_uid: String,
    pub physical_uid: String,
}

impl CompareReport {
    /// A comparison that could not run
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::default()
        }
    }
}

fn spaced_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn mifare_warning(block: usize) -> Option<String> {
    if block == 0 {
        Some("Block 0 (UID) - will be skipped".to_string())
    } else if layout::is_trailer(block) {
        Some("Sector trailer (keys) - will be skipped".to_string())
    } else {
        None
    }
}

/// Compare a loaded record with a fresh read of the physical tag
///
/// Records of different protocols or capacities are reported as a size
/// mismatch instead of a block diff.
pub fn compare_records(loaded: &TagRecord, physical: &TagRecord) -> CompareReport {
    let loaded_bytes = loaded.memory.as_bytes();
    let physical_bytes = physical.memory.as_bytes();
    let mut report = CompareReport {
        loaded_size: loaded_bytes.len(),
        physical_size: physical_bytes.len(),
        loaded_uid: loaded.uid.to_colon_string(),
        physical_uid: physical.uid.to_colon_string(),
        ..CompareReport::default()
    };

    if loaded.protocol() != physical.protocol() || loaded_bytes.len() != physical_bytes.len() {
        report.size_mismatch = true;
        report.message = format!(
            "Size mismatch: loaded {} bytes ({}), physical {} bytes ({})",
            loaded_bytes.len(),
            loaded.protocol(),
            physical_bytes.len(),
            physical.protocol()
        );
        return report;
    }

    let block_size = match loaded.protocol() {
        Protocol::Srix => SRIX_BLOCK_SIZE,
        Protocol::MifareClassic => layout::BLOCK_SIZE,
        other => {
            report.message = format!("Cannot compare {} records", other);
            return report;
        }
    };
    let is_mifare = loaded.protocol() == Protocol::MifareClassic;

    report.block_size = block_size;
    report.total_blocks = loaded_bytes.len() / block_size;
    report.differences = loaded_bytes
        .chunks(block_size)
        .zip(physical_bytes.chunks(block_size))
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .map(|(block, (a, b))| BlockDifference {
            block,
            loaded: spaced_hex(a),
            physical: spaced_hex(b),
            warning: if is_mifare { mifare_warning(block) } else { None },
        })
        .collect();
    report.total_differences = report.differences.len();
    report.identical = report.total_differences == 0;
    report.success = true;
    report.message = if report.identical {
        "Tag matches the loaded dump".to_string()
    } else {
        format!("{} of {} blocks differ", report.total_differences, report.total_blocks)
    };
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mifare::layout::MifareCardType;
    use crate::tag::{MifareDump, SrixDump, Uid};

    const SRIX_UID: [u8; 8] = [0xD0, 0x02, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E, 0x6F];

    fn srix(data: &[u8]) -> TagRecord {
        TagRecord::srix(SRIX_UID, SrixDump::from_bytes(data).unwrap())
    }

    fn mifare(dump: MifareDump) -> TagRecord {
        TagRecord::mifare(Uid::new(&[1, 2, 3, 4]).unwrap(), dump)
    }

    #[test]
    fn test_identical_srix() {
        let data = vec![0x5A; 512];
        let report = compare_records(&srix(&data), &srix(&data));
        assert!(report.success);
        assert!(report.identical);
        assert_eq!(report.total_differences, 0);
        assert_eq!(report.block_size, 4);
        assert_eq!(report.total_blocks, 128);
    }

    #[test]
    fn test_srix_differences_listed() {
        let loaded = vec![0u8; 512];
        let mut physical = loaded.clone();
        physical[8] = 0xAB;
        physical[511] = 0x01;
        let report = compare_records(&srix(&loaded), &srix(&physical));
        assert!(report.success);
        assert!(!report.identical);
        assert_eq!(report.total_differences, 2);
        assert_eq!(report.differences[0].block, 2);
        assert_eq!(report.differences[0].loaded, "00 00 00 00");
        assert_eq!(report.differences[0].physical, "AB 00 00 00");
        assert_eq!(report.differences[0].warning, None);
        assert_eq!(report.differences[1].block, 127);
    }

    #[test]
    fn test_mifare_protected_blocks_annotated() {
        let loaded = MifareDump::new(MifareCardType::Classic1K);
        let mut physical = loaded.clone();
        physical.set_block(0, &[0x11; 16]).unwrap();
        physical.set_block(7, &[0x22; 16]).unwrap();
        physical.set_block(5, &[0x33; 16]).unwrap();

        let report = compare_records(&mifare(loaded), &mifare(physical));
        assert_eq!(report.block_size, 16);
        assert_eq!(report.total_differences, 3);
        let warnings: Vec<Option<&str>> = report.differences.iter().map(|d| d.warning.as_deref()).collect();
        assert_eq!(
            warnings,
            vec![
                Some("Block 0 (UID) - will be skipped"),
                None,
                Some("Sector trailer (keys) - will be skipped"),
            ]
        );
    }

    #[test]
    fn test_size_mismatch() {
        let small = mifare(MifareDump::new(MifareCardType::Classic1K));
        let large = mifare(MifareDump::new(MifareCardType::Classic4K));
        let report = compare_records(&small, &large);
        assert!(!report.success);
        assert!(report.size_mismatch);
        assert!(report.differences.is_empty());
        assert_eq!(report.loaded_size, 1024);
        assert_eq!(report.physical_size, 4096);

        let cross = compare_records(&srix(&[0u8; 512]), &small);
        assert!(cross.size_mismatch);
    }

    #[test]
    fn test_report_json() {
        let data = vec![0u8; 512];
        let json = serde_json::to_value(compare_records(&srix(&data), &srix(&data))).unwrap();
        assert_eq!(json["identical"], true);
        assert_eq!(json["size_mismatch"], false);
        assert_eq!(json["total_blocks"], 128);
    }
}
