//! `.srix` dump file codec
//!
//! ```text
//! Filetype: SRIX Dump
//! UID: D0021A2B3C4D5E6F
//! Blocks: 128
//! Data size: 512
//! # Data:
//! [00] 0123ABCD
//! ...
//! [7F] FFFFFFFF
//! ```

use log::warn;
use std::collections::BTreeSet;

use super::{SRIX_BLOCKS, SRIX_BLOCK_SIZE, SRIX_DUMP_SIZE, SRIX_UID_LEN};
use crate::error::DumpError;
use crate::tag::SrixDump;

const FILETYPE: &str = "SRIX Dump";
const DATA_MARKER: &str = "# Data:";

/// Render a dump in the `.srix` text format
pub fn encode(uid: &[u8; SRIX_UID_LEN], dump: &SrixDump) -> String {
    let mut out = String::with_capacity(SRIX_BLOCKS * 14 + 96);
    out.push_str(&format!("Filetype: {}\n", FILETYPE));
    out.push_str(&format!("UID: {}\n", hex::encode_upper(uid)));
    out.push_str(&format!("Blocks: {}\n", SRIX_BLOCKS));
    out.push_str(&format!("Data size: {}\n", SRIX_DUMP_SIZE));
    out.push_str(DATA_MARKER);
    out.push('\n');
    for block in 0..SRIX_BLOCKS {
        out.push_str(&format!("[{:02X}] {}\n", block, hex::encode_upper(dump.block(block))));
    }
    out
}

/// Parse a `.srix` file
///
/// Every one of the 128 blocks must be present.
pub fn decode(text: &str) -> Result<([u8; SRIX_UID_LEN], SrixDump), DumpError> {
    let mut uid: Option<[u8; SRIX_UID_LEN]> = None;
    let mut data = [0u8; SRIX_DUMP_SIZE];
    let mut seen = BTreeSet::new();
    let mut in_data = false;

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        let line_no = index + 1;
        if line.is_empty() {
            continue;
        }

        if let Some(value) = line.strip_prefix("Filetype:") {
            let value = value.trim();
            if value != FILETYPE {
                return Err(DumpError::UnsupportedFiletype(value.to_string()));
            }
            continue;
        }

        if let Some(value) = line.strip_prefix("UID:") {
            let hex_str: String = value.chars().filter(|c| !c.is_whitespace()).collect();
            let mut bytes = [0u8; SRIX_UID_LEN];
            hex::decode_to_slice(&hex_str, &mut bytes).map_err(|e| DumpError::InvalidLine {
                line: line_no,
                reason: format!("bad UID {:?}: {}", hex_str, e),
            })?;
            uid = Some(bytes);
            continue;
        }

        if !in_data {
            in_data = line.starts_with(DATA_MARKER);
            continue;
        }

        let Some((index_str, rest)) = line.strip_prefix('[').and_then(|l| l.split_once(']')) else {
            warn!("Line {}: not a block line, skipped", line_no);
            continue;
        };
        let Ok(block) = usize::from_str_radix(index_str.trim(), 16) else {
            warn!("Line {}: bad block index {:?}", line_no, index_str);
            continue;
        };
        if block >= SRIX_BLOCKS {
            warn!("Invalid block number: {}", block);
            continue;
        }

        let digits: String = rest.chars().filter(|c| !c.is_whitespace()).collect();
        let mut bytes = [0u8; SRIX_BLOCK_SIZE];
        match digits.get(..SRIX_BLOCK_SIZE * 2).map(|d| hex::decode_to_slice(d, &mut bytes)) {
            Some(Ok(())) => {
                let offset = block * SRIX_BLOCK_SIZE;
                data[offset..offset + SRIX_BLOCK_SIZE].copy_from_slice(&bytes);
                seen.insert(block);
            }
            _ => warn!("Line {}: bad data for block {}", line_no, block),
        }
    }

    let uid = uid.ok_or(DumpError::MissingField("UID"))?;
    if seen.len() < SRIX_BLOCKS {
        return Err(DumpError::Incomplete {
            loaded: seen.len(),
            expected: SRIX_BLOCKS,
        });
    }
    let dump = SrixDump::from_bytes(&data).map_err(|e| DumpError::InvalidLine {
        line: 0,
        reason: e.to_string(),
    })?;
    Ok((uid, dump))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UID: [u8; 8] = [0xD0, 0x02, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E, 0x6F];

    fn sample_dump() -> SrixDump {
        let data: Vec<u8> = (0..SRIX_DUMP_SIZE).map(|i| (i * 7 % 256) as u8).collect();
        SrixDump::from_bytes(&data).unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let text = encode(&UID, &sample_dump());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Filetype: SRIX Dump");
        assert_eq!(lines[1], "UID: D0021A2B3C4D5E6F");
        assert_eq!(lines[2], "Blocks: 128");
        assert_eq!(lines[3], "Data size: 512");
        assert_eq!(lines[4], "# Data:");
        assert_eq!(lines[5], "[00] 00070E15");
        assert!(lines[132].starts_with("[7F] "));
        assert_eq!(lines.len(), 133);
    }

    #[test]
    fn test_round_trip_is_byte_exact() {
        let dump = sample_dump();
        let text = encode(&UID, &dump);
        let (uid, decoded) = decode(&text).unwrap();
        assert_eq!(uid, UID);
        assert_eq!(decoded, dump);
        assert_eq!(encode(&uid, &decoded), text);
    }

    #[test]
    fn test_decode_tolerates_spacing_and_case() {
        let mut text = String::from("Filetype: SRIX Dump\nUID: d0 02 1a 2b 3c 4d 5e 6f\n\n# Data:\n");
        for block in 0..SRIX_BLOCKS {
            text.push_str(&format!("[{:02x}]  de ad be ef\n", block));
        }
        text.push_str("[80] 00000000\n");
        let (uid, dump) = decode(&text).unwrap();
        assert_eq!(uid, UID);
        assert_eq!(dump.block(127), [0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_decode_rejects_incomplete() {
        let text = encode(&UID, &sample_dump());
        let truncated: String = text.lines().take(100).map(|l| format!("{}\n", l)).collect();
        assert_eq!(
            decode(&truncated),
            Err(DumpError::Incomplete {
                loaded: 95,
                expected: 128
            })
        );
    }

    #[test]
    fn test_decode_requires_uid() {
        let text = encode(&UID, &sample_dump()).replace("UID: D0021A2B3C4D5E6F\n", "");
        assert_eq!(decode(&text), Err(DumpError::MissingField("UID")));
    }

    #[test]
    fn test_decode_rejects_other_filetype() {
        let text = encode(&UID, &sample_dump()).replace("SRIX Dump", "Mifare Classic File");
        assert!(matches!(decode(&text), Err(DumpError::UnsupportedFiletype(_))));
    }

    #[test]
    fn test_block_lines_before_marker_are_ignored() {
        let text = encode(&UID, &sample_dump()).replace("# Data:\n", "");
        assert!(matches!(decode(&text), Err(DumpError::Incomplete { loaded: 0, .. })));
    }
}
