//! The three 64-byte slot layouts of an entry-table section.
//!
//! Which layout applies is decided by the type nibble in bits 4..=7 of the
//! first byte, common to all three.

/// A regular entry slot.
///
/// The last byte of the name area doubles as the long-name identifier: 0x00
/// means the name area holds the NUL-terminated name itself, anything else
/// means the area holds a [`RawLongNameRef`] descriptor.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::NoUninit, bytemuck::AnyBitPattern)]
pub struct RawEntry {
    /// Bit 0 user-read, bit 1 sticky, bit 2 set-gid, bit 3 set-uid,
    /// bits 4..=7 type nibble, bits 8..=10 other x/w/r, bits 11..=13 group
    /// x/w/r, bit 14 user-exec, bit 15 user-write
    pub flags: [u8; 2],
    pub create_ts: [u8; 8],
    pub modify_ts: [u8; 8],
    pub access_ts: [u8; 8],
    pub user_id: [u8; 4],
    pub group_id: [u8; 4],
    /// Interpretation depends on the type nibble
    pub data: [u8; 8],
    /// In-place NUL-terminated name, or a long-name descriptor
    pub name: [u8; 22],
}

/// The descriptor form of [`RawEntry::name`].
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::NoUninit, bytemuck::AnyBitPattern)]
pub struct RawLongNameRef {
    pub unused: [u8; 9],
    /// Section holding the long-name slot
    pub longname_lba: [u8; 4],
    /// Byte size of that section
    pub longname_size: [u8; 4],
    /// Slot index of the long-name slot within that section
    pub longname_offset: [u8; 4],
    /// 0xFF when this descriptor form is active
    pub identifier: u8,
}

/// A long-name slot (type nibble 0xA): 62 characters plus NUL.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::NoUninit, bytemuck::AnyBitPattern)]
pub struct RawLongName {
    pub flags: u8,
    pub name: [u8; 63],
}

/// The tableinfo slot (type nibble 0xE), always slot 0 of a section.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::NoUninit, bytemuck::AnyBitPattern)]
pub struct RawTableInfo {
    pub flags: u8,
    pub reserved: [u8; 39],
    /// First section of the parent directory's table; zero for the root
    pub parent_lba: [u8; 4],
    pub parent_size: [u8; 4],
    /// Previous section of this chain; zero for the first
    pub prev_lba: [u8; 4],
    pub prev_size: [u8; 4],
    /// Next section of this chain; zero for the last
    pub next_lba: [u8; 4],
    pub next_size: [u8; 4],
}

/// Slot size; a section holds `byte_size / SLOT_SIZE` slots.
pub const SLOT_SIZE: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, offset_of, size_of};
    use static_assertions::const_assert_eq;

    const_assert_eq!(size_of::<RawEntry>(), 64);
    const_assert_eq!(align_of::<RawEntry>(), 1);

    const_assert_eq!(offset_of!(RawEntry, flags), 0);
    const_assert_eq!(offset_of!(RawEntry, create_ts), 2);
    const_assert_eq!(offset_of!(RawEntry, modify_ts), 10);
    const_assert_eq!(offset_of!(RawEntry, access_ts), 18);
    const_assert_eq!(offset_of!(RawEntry, user_id), 26);
    const_assert_eq!(offset_of!(RawEntry, group_id), 30);
    const_assert_eq!(offset_of!(RawEntry, data), 34);
    const_assert_eq!(offset_of!(RawEntry, name), 42);

    const_assert_eq!(size_of::<RawLongNameRef>(), 22);
    const_assert_eq!(offset_of!(RawLongNameRef, longname_lba), 9);
    const_assert_eq!(offset_of!(RawLongNameRef, longname_offset), 17);
    const_assert_eq!(offset_of!(RawLongNameRef, identifier), 21);

    const_assert_eq!(size_of::<RawLongName>(), 64);
    const_assert_eq!(size_of::<RawTableInfo>(), 64);
    const_assert_eq!(offset_of!(RawTableInfo, parent_lba), 40);
    const_assert_eq!(offset_of!(RawTableInfo, prev_lba), 48);
    const_assert_eq!(offset_of!(RawTableInfo, next_lba), 56);
}
