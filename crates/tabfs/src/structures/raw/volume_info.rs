/// The 256-byte volume descriptor, stored at the LBA named by the boot
/// header.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::NoUninit, bytemuck::AnyBitPattern)]
pub struct RawVolumeInfo {
    /// Duplicate of the header magic
    pub magic: [u8; 16],
    /// First section of the block allocation table
    pub bat_lba: [u8; 4],
    /// Lowest LBA belonging to the volume
    pub min_lba: [u8; 4],
    /// First LBA described by bit 0 of the BAT
    pub bat_start_lba: [u8; 4],
    /// Highest LBA belonging to the volume
    pub max_lba: [u8; 4],
    /// Bytes per block
    pub block_size: [u8; 4],
    /// Blocks-per-sector scale; carried but not interpreted by the core
    pub bs: u8,
    pub reserved0: u8,
    /// Bit 0: absolute_lbas
    pub flags: [u8; 2],
    /// First section of the root entry-table
    pub root_lba: [u8; 4],
    /// Byte size of the root entry-table section
    pub root_size: [u8; 4],
    pub reserved1: [u8; 32],
    /// NUL-terminated volume label, at most 175 characters
    pub label: [u8; 176],
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, offset_of, size_of};
    use static_assertions::const_assert_eq;

    const_assert_eq!(size_of::<RawVolumeInfo>(), 256);
    const_assert_eq!(align_of::<RawVolumeInfo>(), 1);

    const_assert_eq!(offset_of!(RawVolumeInfo, bat_lba), 0x10);
    const_assert_eq!(offset_of!(RawVolumeInfo, min_lba), 0x14);
    const_assert_eq!(offset_of!(RawVolumeInfo, bat_start_lba), 0x18);
    const_assert_eq!(offset_of!(RawVolumeInfo, max_lba), 0x1C);
    const_assert_eq!(offset_of!(RawVolumeInfo, block_size), 0x20);
    const_assert_eq!(offset_of!(RawVolumeInfo, bs), 0x24);
    const_assert_eq!(offset_of!(RawVolumeInfo, flags), 0x26);
    const_assert_eq!(offset_of!(RawVolumeInfo, root_lba), 0x28);
    const_assert_eq!(offset_of!(RawVolumeInfo, root_size), 0x2C);
    const_assert_eq!(offset_of!(RawVolumeInfo, label), 0x50);
}
