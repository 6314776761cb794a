//! On-disk structures of a TabFS volume.
//!
//! The `raw` submodule pins the byte-exact layouts; the types here are the
//! decoded forms the rest of the crate works with. Conversion happens only
//! at the device boundary.

pub mod raw;

pub mod entry;
pub mod fat;
pub mod header;
pub mod volume_info;

pub use entry::{Acl, Entry, EntryData, EntryName, EntryType, FileFlags, Perm, Slot, TableInfo};
pub use fat::FatRecord;
pub use header::Header;
pub use volume_info::VolumeInfo;

/// The volume magic: "TABFS-28" padded with NUL to 16 bytes.
pub const MAGIC: [u8; 16] = *b"TABFS-28\0\0\0\0\0\0\0\0";

bitflags::bitflags! {
    /// Volume-wide flags, present in both the boot header and the volume
    /// descriptor.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VolumeFlags: u16 {
        /// Device-port calls address the raw device instead of a partition
        /// base established by the host.
        const ABSOLUTE_LBAS = 1 << 0;
    }
}
