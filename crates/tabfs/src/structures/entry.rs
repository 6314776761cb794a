//! Entry-table slots.
//!
//! A section is an array of 64-byte slots; slot 0 is always the tableinfo
//! slot carrying the chain links. Every other slot is either free, a
//! regular entry, or a long-name slot spilled from an entry whose name does
//! not fit in place.

use alloc::string::{String, ToString};

use crate::structures::raw::table::{RawEntry, RawLongName, RawLongNameRef, RawTableInfo};
use crate::types::{Lba28, SectionRef, Timestamp};

/// Maximum name length in characters, excluding the terminating NUL.
pub const MAX_NAME_LEN: usize = 62;

/// Longest name that still fits into the entry itself.
pub const INLINE_NAME_MAX: usize = 21;

/// The type nibble, bits 4..=7 of the first slot byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Unknown = 0x0,
    Directory = 0x1,
    FatFile = 0x2,
    SegmentedFile = 0x3,
    CharDevice = 0x4,
    BlockDevice = 0x5,
    Fifo = 0x6,
    Symlink = 0x7,
    Socket = 0x8,
    ContinuousFile = 0x9,
    LongName = 0xA,
    TableInfo = 0xE,
    Kernel = 0xF,
}

bitflags::bitflags! {
    /// Permission bits in the POSIX order used by ACL checks.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Perm: u8 {
        const EXEC = 0b001;
        const WRITE = 0b010;
        const READ = 0b100;
    }
}

bitflags::bitflags! {
    /// The on-disk 16-bit flag word of a regular entry, without the type
    /// nibble. The ACL is packed asymmetrically; the layout here is fixed by
    /// the on-disk format and must not be rearranged.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct RawFlags: u16 {
        const USER_READ = 1 << 0;
        const STICKY = 1 << 1;
        const SET_GID = 1 << 2;
        const SET_UID = 1 << 3;
        const OTHER_EXEC = 1 << 8;
        const OTHER_WRITE = 1 << 9;
        const OTHER_READ = 1 << 10;
        const GROUP_EXEC = 1 << 11;
        const GROUP_WRITE = 1 << 12;
        const GROUP_READ = 1 << 13;
        const USER_EXEC = 1 << 14;
        const USER_WRITE = 1 << 15;
    }
}

/// One read/write/execute triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Acl {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl Acl {
    pub const fn new(read: bool, write: bool, exec: bool) -> Self {
        Self { read, write, exec }
    }

    /// The triple as permission bits (R=4, W=2, X=1).
    pub fn perm(self) -> Perm {
        let mut perm = Perm::empty();
        perm.set(Perm::READ, self.read);
        perm.set(Perm::WRITE, self.write);
        perm.set(Perm::EXEC, self.exec);
        perm
    }

    /// Whether any of the requested bits is granted by this triple.
    pub fn grants(self, perm: Perm) -> bool {
        self.perm().intersects(perm)
    }
}

/// Mode bits of an entry: the three ACL triples plus the sticky, set-uid
/// and set-gid bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileFlags {
    pub sticky: bool,
    pub set_gid: bool,
    pub set_uid: bool,
    pub user: Acl,
    pub group: Acl,
    pub other: Acl,
}

impl FileFlags {
    fn from_raw(raw: u16) -> Self {
        let f = RawFlags::from_bits_retain(raw);
        Self {
            sticky: f.contains(RawFlags::STICKY),
            set_gid: f.contains(RawFlags::SET_GID),
            set_uid: f.contains(RawFlags::SET_UID),
            user: Acl::new(
                f.contains(RawFlags::USER_READ),
                f.contains(RawFlags::USER_WRITE),
                f.contains(RawFlags::USER_EXEC),
            ),
            group: Acl::new(
                f.contains(RawFlags::GROUP_READ),
                f.contains(RawFlags::GROUP_WRITE),
                f.contains(RawFlags::GROUP_EXEC),
            ),
            other: Acl::new(
                f.contains(RawFlags::OTHER_READ),
                f.contains(RawFlags::OTHER_WRITE),
                f.contains(RawFlags::OTHER_EXEC),
            ),
        }
    }

    fn to_raw(self) -> u16 {
        let mut f = RawFlags::empty();
        f.set(RawFlags::STICKY, self.sticky);
        f.set(RawFlags::SET_GID, self.set_gid);
        f.set(RawFlags::SET_UID, self.set_uid);
        f.set(RawFlags::USER_READ, self.user.read);
        f.set(RawFlags::USER_WRITE, self.user.write);
        f.set(RawFlags::USER_EXEC, self.user.exec);
        f.set(RawFlags::GROUP_READ, self.group.read);
        f.set(RawFlags::GROUP_WRITE, self.group.write);
        f.set(RawFlags::GROUP_EXEC, self.group.exec);
        f.set(RawFlags::OTHER_READ, self.other.read);
        f.set(RawFlags::OTHER_WRITE, self.other.write);
        f.set(RawFlags::OTHER_EXEC, self.other.exec);
        f.bits()
    }
}

/// The 8-byte type-dependent data area of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryData {
    /// First section of the child entry-table.
    Directory(SectionRef),
    /// First section of the file's FAT index.
    FatFile(SectionRef),
    /// Reserved on-disk type; carried but not operable.
    SegmentedFile(SectionRef),
    CharDevice { id: u32, flags: u32 },
    BlockDevice { id: u32, flags: u32 },
    Fifo { buffer_size: u32 },
    /// Chain-global slot index of the long-name slot holding the target
    /// path, counted from the first section of the owning chain.
    Symlink { offset: u32 },
    Socket { address: u32 },
    /// Contiguous run of blocks holding the file body.
    ContinuousFile(SectionRef),
    Kernel(SectionRef),
}

impl EntryData {
    pub fn entry_type(&self) -> EntryType {
        match self {
            EntryData::Directory(_) => EntryType::Directory,
            EntryData::FatFile(_) => EntryType::FatFile,
            EntryData::SegmentedFile(_) => EntryType::SegmentedFile,
            EntryData::CharDevice { .. } => EntryType::CharDevice,
            EntryData::BlockDevice { .. } => EntryType::BlockDevice,
            EntryData::Fifo { .. } => EntryType::Fifo,
            EntryData::Symlink { .. } => EntryType::Symlink,
            EntryData::Socket { .. } => EntryType::Socket,
            EntryData::ContinuousFile(_) => EntryType::ContinuousFile,
            EntryData::Kernel(_) => EntryType::Kernel,
        }
    }

    fn decode(nibble: u8, data: &[u8; 8]) -> Option<Self> {
        let lo = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let hi = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let section = SectionRef::new(Lba28::new(lo), hi);
        Some(match nibble {
            0x1 => EntryData::Directory(section),
            0x2 => EntryData::FatFile(section),
            0x3 => EntryData::SegmentedFile(section),
            0x4 => EntryData::CharDevice { id: lo, flags: hi },
            0x5 => EntryData::BlockDevice { id: lo, flags: hi },
            0x6 => EntryData::Fifo { buffer_size: lo },
            0x7 => EntryData::Symlink { offset: lo },
            0x8 => EntryData::Socket { address: lo },
            0x9 => EntryData::ContinuousFile(section),
            0xF => EntryData::Kernel(section),
            _ => return None,
        })
    }

    fn encode(&self) -> [u8; 8] {
        let (lo, hi) = match *self {
            EntryData::Directory(s)
            | EntryData::FatFile(s)
            | EntryData::SegmentedFile(s)
            | EntryData::ContinuousFile(s)
            | EntryData::Kernel(s) => (s.lba.raw(), s.size),
            EntryData::CharDevice { id, flags } | EntryData::BlockDevice { id, flags } => {
                (id, flags)
            }
            EntryData::Fifo { buffer_size } => (buffer_size, 0),
            EntryData::Symlink { offset } => (offset, 0),
            EntryData::Socket { address } => (address, 0),
        };
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&lo.to_le_bytes());
        bytes[4..].copy_from_slice(&hi.to_le_bytes());
        bytes
    }
}

/// How an entry's name is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryName {
    /// NUL-terminated in the entry itself, at most [`INLINE_NAME_MAX`]
    /// characters.
    Inline(String),
    /// Spilled into a long-name slot elsewhere in the chain.
    Long { table: SectionRef, slot: u32 },
}

/// A decoded regular entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub data: EntryData,
    pub flags: FileFlags,
    pub create_ts: Timestamp,
    pub modify_ts: Timestamp,
    pub access_ts: Timestamp,
    pub user_id: u32,
    pub group_id: u32,
    pub name: EntryName,
}

impl Entry {
    pub fn entry_type(&self) -> EntryType {
        self.data.entry_type()
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.data, EntryData::Directory(_))
    }

    /// ACL check. The first matching principal decides alone: a user match
    /// with a denied bit does not fall through to the group or other
    /// triples. Any one of the requested bits grants.
    pub fn check_perm(&self, user_id: u32, group_id: u32, perm: Perm) -> bool {
        let acl = if user_id == self.user_id {
            self.flags.user
        } else if group_id == self.group_id {
            self.flags.group
        } else {
            self.flags.other
        };
        acl.grants(perm)
    }
}

/// The chain links persisted in slot 0 of every section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableInfo {
    /// First section of the parent directory's table; `NONE` for the root.
    pub parent: SectionRef,
    /// Previous section of this chain; `NONE` for the first.
    pub prev: SectionRef,
    /// Next section of this chain; `NONE` for the last.
    pub next: SectionRef,
}

/// A decoded 64-byte slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Free,
    Entry(Entry),
    LongName(String),
    TableInfo(TableInfo),
    /// A type nibble this implementation does not know; the bytes are
    /// carried verbatim and the slot is never treated as free.
    Reserved([u8; 64]),
}

impl Slot {
    pub fn is_free(&self) -> bool {
        matches!(self, Slot::Free)
    }

    pub fn decode(bytes: &[u8; 64]) -> Slot {
        let nibble = (bytes[0] >> 4) & 0xF;
        match nibble {
            0x0 => Slot::Free,
            0xA => {
                let raw: &RawLongName = bytemuck::from_bytes(bytes);
                Slot::LongName(read_nul_str(&raw.name))
            }
            0xE => {
                let raw: &RawTableInfo = bytemuck::from_bytes(bytes);
                Slot::TableInfo(TableInfo {
                    parent: section_ref(raw.parent_lba, raw.parent_size),
                    prev: section_ref(raw.prev_lba, raw.prev_size),
                    next: section_ref(raw.next_lba, raw.next_size),
                })
            }
            _ => {
                let raw: &RawEntry = bytemuck::from_bytes(bytes);
                let word = u16::from_le_bytes(raw.flags);
                let Some(data) = EntryData::decode(nibble, &raw.data) else {
                    return Slot::Reserved(*bytes);
                };
                let name = if raw.name[21] == 0x00 {
                    EntryName::Inline(read_nul_str(&raw.name))
                } else {
                    let nref: &RawLongNameRef = bytemuck::from_bytes(&raw.name);
                    EntryName::Long {
                        table: section_ref(nref.longname_lba, nref.longname_size),
                        slot: u32::from_le_bytes(nref.longname_offset),
                    }
                };
                Slot::Entry(Entry {
                    data,
                    flags: FileFlags::from_raw(word),
                    create_ts: Timestamp::from_le_bytes(raw.create_ts),
                    modify_ts: Timestamp::from_le_bytes(raw.modify_ts),
                    access_ts: Timestamp::from_le_bytes(raw.access_ts),
                    user_id: u32::from_le_bytes(raw.user_id),
                    group_id: u32::from_le_bytes(raw.group_id),
                    name,
                })
            }
        }
    }

    pub fn encode(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        match self {
            Slot::Free => {}
            Slot::LongName(name) => {
                bytes[0] = (EntryType::LongName as u8) << 4;
                let len = name.len().min(MAX_NAME_LEN);
                bytes[1..1 + len].copy_from_slice(&name.as_bytes()[..len]);
            }
            Slot::TableInfo(info) => {
                bytes[0] = (EntryType::TableInfo as u8) << 4;
                write_section_ref(&mut bytes[40..48], info.parent);
                write_section_ref(&mut bytes[48..56], info.prev);
                write_section_ref(&mut bytes[56..64], info.next);
            }
            Slot::Entry(entry) => {
                let word =
                    entry.flags.to_raw() | ((entry.entry_type() as u8 as u16 & 0xF) << 4);
                bytes[0..2].copy_from_slice(&word.to_le_bytes());
                bytes[2..10].copy_from_slice(&entry.create_ts.to_le_bytes());
                bytes[10..18].copy_from_slice(&entry.modify_ts.to_le_bytes());
                bytes[18..26].copy_from_slice(&entry.access_ts.to_le_bytes());
                bytes[26..30].copy_from_slice(&entry.user_id.to_le_bytes());
                bytes[30..34].copy_from_slice(&entry.group_id.to_le_bytes());
                bytes[34..42].copy_from_slice(&entry.data.encode());
                match &entry.name {
                    EntryName::Inline(name) => {
                        let len = name.len().min(INLINE_NAME_MAX);
                        bytes[42..42 + len].copy_from_slice(&name.as_bytes()[..len]);
                    }
                    EntryName::Long { table, slot } => {
                        bytes[51..55].copy_from_slice(&table.lba.to_le_bytes());
                        bytes[55..59].copy_from_slice(&table.size.to_le_bytes());
                        bytes[59..63].copy_from_slice(&slot.to_le_bytes());
                        bytes[63] = 0xFF;
                    }
                }
            }
            Slot::Reserved(raw) => bytes.copy_from_slice(raw),
        }
        bytes
    }
}

fn section_ref(lba: [u8; 4], size: [u8; 4]) -> SectionRef {
    SectionRef::new(Lba28::from_le_bytes(lba), u32::from_le_bytes(size))
}

fn write_section_ref(dst: &mut [u8], section: SectionRef) {
    dst[..4].copy_from_slice(&section.lba.to_le_bytes());
    dst[4..8].copy_from_slice(&section.size.to_le_bytes());
}

fn read_nul_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dir_entry() -> Entry {
        Entry {
            data: EntryData::Directory(SectionRef::new(Lba28::new(0x6), 1024)),
            flags: FileFlags {
                set_uid: true,
                user: Acl::new(false, false, true),
                ..FileFlags::default()
            },
            create_ts: Timestamp::ZERO,
            modify_ts: Timestamp::ZERO,
            access_ts: Timestamp::ZERO,
            user_id: 1,
            group_id: 2,
            name: EntryName::Inline("myDir".into()),
        }
    }

    /// Byte image of the directory entry a reference volume carries in the
    /// root table after `create_dir("myDir", set_uid | user.x, uid 1, gid 2)`.
    #[rustfmt::skip]
    const MYDIR_SLOT: [u8; 64] = [
        0x18, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00,
        0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x6D, 0x79, 0x44, 0x69, 0x72, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn directory_entry_matches_reference_bytes() {
        let encoded = Slot::Entry(dir_entry()).encode();
        assert_eq!(encoded, MYDIR_SLOT);
    }

    #[test]
    fn directory_entry_roundtrip() {
        assert_eq!(Slot::decode(&MYDIR_SLOT), Slot::Entry(dir_entry()));
    }

    #[test]
    fn acl_word_packing() {
        let flags = FileFlags {
            sticky: true,
            user: Acl::new(true, true, true),
            group: Acl::new(true, false, true),
            other: Acl::new(false, false, true),
            ..FileFlags::default()
        };
        let raw = flags.to_raw();
        // user read lives in the low byte, everything else in the high byte
        assert_eq!(raw & 0x00FF, 0b0000_0011);
        assert_eq!(raw >> 8, 0b1110_1001);
        assert_eq!(FileFlags::from_raw(raw), flags);
    }

    #[test]
    fn long_name_slot_roundtrip() {
        let name: String = core::iter::repeat('a').take(62).collect();
        let slot = Slot::LongName(name.clone());
        let bytes = slot.encode();
        assert_eq!(bytes[0], 0xA0);
        assert_eq!(Slot::decode(&bytes), Slot::LongName(name));
    }

    #[test]
    fn tableinfo_roundtrip() {
        let slot = Slot::TableInfo(TableInfo {
            parent: SectionRef::new(Lba28::new(3), 512),
            prev: SectionRef::NONE,
            next: SectionRef::new(Lba28::new(8), 1024),
        });
        let bytes = slot.encode();
        assert_eq!(bytes[0], 0xE0);
        assert_eq!(Slot::decode(&bytes), slot);
    }

    #[test]
    fn long_name_descriptor_roundtrip() {
        let entry = Entry {
            data: EntryData::CharDevice {
                id: 0x1234,
                flags: 0x5678,
            },
            flags: FileFlags::default(),
            create_ts: Timestamp::new(7),
            modify_ts: Timestamp::new(8),
            access_ts: Timestamp::new(9),
            user_id: 1,
            group_id: 2,
            name: EntryName::Long {
                table: SectionRef::new(Lba28::new(3), 512),
                slot: 4,
            },
        };
        let bytes = Slot::Entry(entry.clone()).encode();
        assert_eq!(bytes[63], 0xFF);
        assert_eq!(Slot::decode(&bytes), Slot::Entry(entry));
    }

    #[test]
    fn permission_check_does_not_chain() {
        let mut entry = dir_entry();
        entry.flags.user = Acl::new(false, false, false);
        entry.flags.group = Acl::new(true, true, true);
        entry.flags.other = Acl::new(true, true, true);

        // uid matches, user triple denies, no fall-through
        assert!(!entry.check_perm(1, 2, Perm::READ));
        // gid matches, group triple grants
        assert!(entry.check_perm(99, 2, Perm::READ));
        // neither matches, other triple decides
        assert!(entry.check_perm(99, 99, Perm::EXEC));
    }

    #[test]
    fn unknown_nibble_is_preserved() {
        let mut bytes = [0u8; 64];
        bytes[0] = 0xB0;
        bytes[13] = 0x42;
        let slot = Slot::decode(&bytes);
        assert!(!slot.is_free());
        assert_eq!(slot.encode(), bytes);
    }
}
