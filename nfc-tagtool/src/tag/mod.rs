//! Tag data model
//!
//! The protocol agnostic record shared by both engines and the coordinator,
//! plus display helpers used in user facing messages.

pub mod record;

pub use record::{MifareDump, Protocol, SrixDump, TagMemory, TagRecord, Uid, MAX_UID_LEN};

/// Hex view of a memory image: a space every 4 bytes, a newline every 16
pub fn dump_to_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            if i % 16 == 0 {
                out.push('\n');
            } else if i % 4 == 0 {
                out.push(' ');
            }
        }
        out.push_str(&format!("{:02X}", byte));
    }
    out
}

/// Display name of a protocol, `"Unknown"` for none
pub fn protocol_name(protocol: Protocol) -> &'static str {
    protocol.name()
}

/// Colon separated uppercase hex, e.g. `04:A1:B2:C3`
pub fn uid_to_string(uid: &[u8]) -> String {
    uid.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_to_hex_grouping() {
        let data: Vec<u8> = (0u8..20).collect();
        let hex = dump_to_hex(&data);
        assert_eq!(
            hex,
            "00010203 04050607 08090A0B 0C0D0E0F\n10111213"
        );
    }

    #[test]
    fn test_dump_to_hex_empty() {
        assert_eq!(dump_to_hex(&[]), "");
    }

    #[test]
    fn test_protocol_name() {
        assert_eq!(protocol_name(Protocol::Srix), "SRIX4K");
        assert_eq!(protocol_name(Protocol::MifareClassic), "Mifare Classic");
        assert_eq!(protocol_name(Protocol::Unknown), "Unknown");
    }

    #[test]
    fn test_uid_to_string() {
        assert_eq!(uid_to_string(&[0x04, 0xA1, 0x0B]), "04:A1:0B");
        assert_eq!(uid_to_string(&[]), "");
    }
}
