use crate::structures::raw::fat::RawFatRecord;
use crate::types::{Lba28, Timestamp};

/// A decoded FAT record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatRecord {
    /// Logical block index within the file.
    pub index: u32,
    /// Physical block holding that index's data.
    pub lba: Lba28,
    /// Stamp deciding between records sharing an index; greatest wins.
    pub modify_date: Timestamp,
}

impl FatRecord {
    pub const FREE: Self = Self {
        index: 0,
        lba: Lba28::new(0),
        modify_date: Timestamp::ZERO,
    };

    /// A record is free iff both index and lba are zero.
    pub fn is_free(&self) -> bool {
        self.index == 0 && self.lba.raw() == 0
    }

    pub fn decode(bytes: &[u8; 16]) -> Self {
        let raw: &RawFatRecord = bytemuck::from_bytes(bytes);
        Self {
            index: u32::from_le_bytes(raw.index),
            lba: Lba28::from_le_bytes(raw.lba),
            modify_date: Timestamp::from_le_bytes(raw.modify_date),
        }
    }

    pub fn encode(&self) -> [u8; 16] {
        let raw = RawFatRecord {
            index: self.index.to_le_bytes(),
            lba: self.lba.to_le_bytes(),
            modify_date: self.modify_date.to_le_bytes(),
        };
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(bytemuck::bytes_of(&raw));
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_needs_both_zero() {
        assert!(FatRecord::FREE.is_free());
        // block index 0 of a file is a legitimate mapping
        let mapped = FatRecord {
            index: 0,
            lba: Lba28::new(9),
            modify_date: Timestamp::ZERO,
        };
        assert!(!mapped.is_free());
    }

    #[test]
    fn roundtrip() {
        let record = FatRecord {
            index: 3,
            lba: Lba28::new(0x123),
            modify_date: Timestamp::new(0x1122_3344_5566_7788),
        };
        assert_eq!(FatRecord::decode(&record.encode()), record);
    }
}
