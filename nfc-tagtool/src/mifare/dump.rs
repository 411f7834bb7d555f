//! `.mfc` dump file codec
//!
//! ```text
//! Filetype: Mifare Classic File
//! Version 1
//! Device type: Mifare Classic 1K
//! UID: 04 A1 B2 C3
//! SAK: 08
//! ATQA: 00 04
//! # Memory dump
//! Pages total: 64
//! Pages read: 60
//! Page 0: 04A1B2C3DC0804006263646566676869
//! ...
//! ```
//!
//! `Pages read` only appears for partial dumps. Pages of sectors that were
//! never read are left out, and each page carries its own index.

use log::warn;

use super::layout::{self, MifareCardType, BLOCK_SIZE};
use crate::error::DumpError;
use crate::tag::{MifareDump, Uid};

const FILETYPE: &str = "Mifare Classic File";

/// Render a dump in the `.mfc` text format
pub fn encode(uid: &Uid, dump: &MifareDump) -> String {
    let card_type = dump.card_type();
    let total = card_type.total_blocks();
    let blocks_read = dump.blocks_read();
    let uid_hex = uid
        .as_bytes()
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ");
    let [atqa_hi, atqa_lo] = dump.atqa().to_be_bytes();

    let mut out = String::with_capacity(total * 44 + 200);
    out.push_str(&format!("Filetype: {}\n", FILETYPE));
    out.push_str("Version 1\n");
    out.push_str(&format!("Device type: {}\n", card_type.name()));
    out.push_str(&format!("UID: {}\n", uid_hex));
    out.push_str(&format!("SAK: {:02X}\n", dump.sak()));
    out.push_str(&format!("ATQA: {:02X} {:02X}\n", atqa_hi, atqa_lo));
    out.push_str("# Memory dump\n");
    out.push_str(&format!("Pages total: {}\n", total));
    if blocks_read < total {
        out.push_str(&format!("Pages read: {}\n", blocks_read));
    }
    for block in 0..total {
        if dump.is_sector_read(layout::sector_of(block)) {
            out.push_str(&format!("Page {}: {}\n", block, hex::encode_upper(dump.block(block))));
        }
    }
    out
}

fn invalid(line: usize, reason: impl Into<String>) -> DumpError {
    DumpError::InvalidLine {
        line,
        reason: reason.into(),
    }
}

fn parse_hex_bytes(value: &str, line: usize, what: &str) -> Result<Vec<u8>, DumpError> {
    let digits: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(&digits).map_err(|e| invalid(line, format!("bad {} {:?}: {}", what, value.trim(), e)))
}

/// Parse a `.mfc` file
///
/// The card size comes from the device type line, falling back to the SAK
/// and then to the page total. A sector counts as read when all of its
/// pages are present.
pub fn decode(text: &str) -> Result<(Uid, MifareDump), DumpError> {
    let mut device: Option<MifareCardType> = None;
    let mut uid: Option<Uid> = None;
    let mut sak: Option<u8> = None;
    let mut atqa: Option<u16> = None;
    let mut pages_total: Option<(usize, usize)> = None;
    let mut pages: Vec<(usize, usize, [u8; BLOCK_SIZE])> = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        let line_no = index + 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(value) = line.strip_prefix("Filetype:") {
            let value = value.trim();
            if value != FILETYPE {
                return Err(DumpError::UnsupportedFiletype(value.to_string()));
            }
        } else if let Some(value) = line.strip_prefix("Device type:") {
            device = if value.contains("4K") {
                Some(MifareCardType::Classic4K)
            } else if value.contains("1K") {
                Some(MifareCardType::Classic1K)
            } else {
                return Err(invalid(line_no, format!("unsupported device type {:?}", value.trim())));
            };
        } else if let Some(value) = line.strip_prefix("UID:") {
            let bytes = parse_hex_bytes(value, line_no, "UID")?;
            uid = Some(Uid::new(&bytes).map_err(|e| invalid(line_no, e.to_string()))?);
        } else if let Some(value) = line.strip_prefix("SAK:") {
            match parse_hex_bytes(value, line_no, "SAK")?.as_slice() {
                [byte] => sak = Some(*byte),
                _ => return Err(invalid(line_no, "SAK must be one byte")),
            }
        } else if let Some(value) = line.strip_prefix("ATQA:") {
            match parse_hex_bytes(value, line_no, "ATQA")?.as_slice() {
                [hi, lo] => atqa = Some(u16::from_be_bytes([*hi, *lo])),
                _ => return Err(invalid(line_no, "ATQA must be two bytes")),
            }
        } else if let Some(value) = line.strip_prefix("Pages total:") {
            let total = value
                .trim()
                .parse::<usize>()
                .map_err(|e| invalid(line_no, format!("bad page total: {}", e)))?;
            pages_total = Some((total, line_no));
        } else if line.starts_with("Pages read:") || line.starts_with("Version") {
            // informational
        } else if let Some(rest) = line.strip_prefix("Page ") {
            let Some((index_str, data)) = rest.split_once(':') else {
                warn!("Line {}: malformed page line skipped", line_no);
                continue;
            };
            let Ok(block) = index_str.trim().parse::<usize>() else {
                warn!("Line {}: bad page index {:?}", line_no, index_str);
                continue;
            };
            let digits: String = data.chars().filter(|c| !c.is_whitespace()).collect();
            let mut bytes = [0u8; BLOCK_SIZE];
            if digits.len() != BLOCK_SIZE * 2 || hex::decode_to_slice(&digits, &mut bytes).is_err() {
                warn!("Line {}: page {} is not 16 hex bytes, skipped", line_no, block);
                continue;
            }
            pages.push((block, line_no, bytes));
        } else {
            warn!("Line {}: unrecognised line skipped", line_no);
        }
    }

    let card_type = device
        .or_else(|| sak.and_then(MifareCardType::from_sak))
        .or_else(|| pages_total.and_then(|(total, _)| MifareCardType::from_memory_size(total * BLOCK_SIZE)))
        .ok_or(DumpError::MissingField("Device type"))?;
    if let Some((total, line)) = pages_total {
        if total != card_type.total_blocks() {
            return Err(invalid(
                line,
                format!("{} pages do not match {}", total, card_type.name()),
            ));
        }
    }
    let uid = uid.ok_or(DumpError::MissingField("UID"))?;

    let mut dump = MifareDump::new(card_type).with_identity(
        sak.unwrap_or_else(|| card_type.sak()),
        atqa.unwrap_or_else(|| card_type.atqa()),
    );
    let mut present = vec![false; card_type.total_blocks()];
    for (block, line, bytes) in pages {
        if block >= card_type.total_blocks() {
            warn!("Line {}: page {} beyond {}, skipped", line, block, card_type.name());
            continue;
        }
        dump.set_block(block, &bytes).map_err(|e| invalid(line, e.to_string()))?;
        present[block] = true;
    }
    if !present.iter().any(|p| *p) {
        return Err(DumpError::Empty);
    }

    for sector in 0..card_type.sector_count() {
        let first = layout::first_block_of_sector(sector);
        let complete = present[first..first + layout::block_count_of_sector(sector)]
            .iter()
            .all(|p| *p);
        dump.mark_sector_read(sector, complete);
    }
    Ok((uid, dump))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(card_type: MifareCardType) -> (Uid, MifareDump) {
        let data: Vec<u8> = (0..card_type.memory_size()).map(|i| (i * 13 % 256) as u8).collect();
        let uid = Uid::new(&[0x04, 0xA1, 0xB2, 0xC3]).unwrap();
        (uid, MifareDump::from_bytes(card_type, &data).unwrap())
    }

    #[test]
    fn test_encode_header() {
        let (uid, dump) = sample(MifareCardType::Classic1K);
        let text = encode(&uid, &dump);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Filetype: Mifare Classic File");
        assert_eq!(lines[1], "Version 1");
        assert_eq!(lines[2], "Device type: Mifare Classic 1K");
        assert_eq!(lines[3], "UID: 04 A1 B2 C3");
        assert_eq!(lines[4], "SAK: 08");
        assert_eq!(lines[5], "ATQA: 00 04");
        assert_eq!(lines[6], "# Memory dump");
        assert_eq!(lines[7], "Pages total: 64");
        assert_eq!(lines[8], "Page 0: 000D1A2734414E5B6875828F9CA9B6C3");
        assert_eq!(lines.len(), 8 + 64);
    }

    #[test]
    fn test_round_trip_1k_and_4k() {
        for card_type in [MifareCardType::Classic1K, MifareCardType::Classic4K] {
            let (uid, dump) = sample(card_type);
            let text = encode(&uid, &dump);
            let (uid_back, dump_back) = decode(&text).unwrap();
            assert_eq!(uid_back, uid);
            assert_eq!(dump_back.sak(), card_type.sak());
            assert_eq!(dump_back.atqa(), card_type.atqa());
            assert_eq!(dump_back, dump);
            assert_eq!(encode(&uid_back, &dump_back), text);
        }
    }

    #[test]
    fn test_partial_dump_round_trip() {
        let (uid, mut dump) = sample(MifareCardType::Classic1K);
        let mut blank = MifareDump::new(MifareCardType::Classic1K);
        for sector in [0usize, 1, 5] {
            for block in layout::first_block_of_sector(sector)..=layout::trailer_of_sector(sector) {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(dump.block(block));
                blank.set_block(block, &bytes).unwrap();
            }
            blank.mark_sector_read(sector, true);
        }
        dump = blank;

        let text = encode(&uid, &dump);
        assert!(text.contains("Pages read: 12\n"));
        assert!(!text.contains("Page 8:"));

        let (_, back) = decode(&text).unwrap();
        assert_eq!(back, dump);
        assert_eq!(back.blocks_read(), 12);
        assert!(back.is_sector_read(5));
        assert!(!back.is_sector_read(2));
    }

    #[test]
    fn test_decode_accepts_spaced_pages_and_colon_uid() {
        let text = "Filetype: Mifare Classic File\n\
                    Version 1\n\
                    Device type: Mifare Classic 1K\n\
                    UID: 04:A1:B2:C3\n\
                    SAK: 08\n\
                    ATQA: 00 04\n\
                    Pages total: 64\n\
                    Page 1: 00 11 22 33 44 55 66 77 88 99 AA BB CC DD EE FF\n";
        let (uid, dump) = decode(text).unwrap();
        assert_eq!(uid.to_colon_string(), "04:A1:B2:C3");
        assert_eq!(dump.block(1)[15], 0xFF);
        assert_eq!(dump.blocks_read(), 0);
    }

    #[test]
    fn test_decode_falls_back_to_sak() {
        let (uid, dump) = sample(MifareCardType::Classic4K);
        let text = encode(&uid, &dump).replace("Device type: Mifare Classic 4K\n", "");
        let (_, back) = decode(&text).unwrap();
        assert_eq!(back.card_type(), MifareCardType::Classic4K);
    }

    #[test]
    fn test_decode_rejects_page_total_mismatch() {
        let (uid, dump) = sample(MifareCardType::Classic1K);
        let text = encode(&uid, &dump).replace("Pages total: 64", "Pages total: 256");
        assert!(matches!(decode(&text), Err(DumpError::InvalidLine { line: 8, .. })));
    }

    #[test]
    fn test_decode_requires_pages() {
        let text = "Filetype: Mifare Classic File\nDevice type: Mifare Classic 1K\nUID: 01 02 03 04\n";
        assert_eq!(decode(text), Err(DumpError::Empty));
    }

    #[test]
    fn test_decode_requires_uid() {
        let (uid, dump) = sample(MifareCardType::Classic1K);
        let text = encode(&uid, &dump).replace("UID: 04 A1 B2 C3\n", "");
        assert_eq!(decode(&text), Err(DumpError::MissingField("UID")));
    }

    #[test]
    fn test_decode_rejects_srix_file() {
        assert!(matches!(
            decode("Filetype: SRIX Dump\nUID: D0021A2B3C4D5E6F\n"),
            Err(DumpError::UnsupportedFiletype(_))
        ));
    }
}
