/// Header of a FAT index section.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::NoUninit, bytemuck::AnyBitPattern)]
pub struct RawFatHeader {
    /// Next section of this FAT chain; zero for the last
    pub next_section: [u8; 4],
    /// Byte size of the next section
    pub next_size: [u8; 4],
    pub reserved: [u8; 8],
}

/// One FAT record: maps a logical block index of the file to a physical
/// block. A record with both index and lba zero is free; several records may
/// carry the same index, the greatest `modify_date` wins.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::NoUninit, bytemuck::AnyBitPattern)]
pub struct RawFatRecord {
    pub index: [u8; 4],
    pub lba: [u8; 4],
    pub modify_date: [u8; 8],
}

/// Byte size of [`RawFatHeader`] and of every [`RawFatRecord`].
pub const FAT_RECORD_SIZE: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, offset_of, size_of};
    use static_assertions::const_assert_eq;

    const_assert_eq!(size_of::<RawFatHeader>(), 16);
    const_assert_eq!(size_of::<RawFatRecord>(), 16);
    const_assert_eq!(align_of::<RawFatRecord>(), 1);

    const_assert_eq!(offset_of!(RawFatHeader, next_section), 0);
    const_assert_eq!(offset_of!(RawFatHeader, next_size), 4);
    const_assert_eq!(offset_of!(RawFatRecord, lba), 4);
    const_assert_eq!(offset_of!(RawFatRecord, modify_date), 8);
}
