use crate::error::{Error, Result};
use crate::structures::raw::volume_info::RawVolumeInfo;
use crate::structures::{VolumeFlags, MAGIC};
use crate::types::{Lba28, SectionRef};

/// Maximum label length in characters, excluding the terminating NUL.
pub const MAX_LABEL_LEN: usize = 175;

/// The decoded 256-byte volume descriptor.
///
/// The reserved area is carried verbatim so that rewriting the descriptor
/// never destroys bytes the core does not interpret.
#[derive(Debug, Clone)]
pub struct VolumeInfo {
    pub bat_lba: Lba28,
    pub min_lba: Lba28,
    pub bat_start_lba: Lba28,
    pub max_lba: Lba28,
    pub block_size: u32,
    /// Blocks-per-sector scale, retained but not interpreted.
    pub bs: u8,
    pub flags: VolumeFlags,
    pub root: SectionRef,
    reserved: [u8; 32],
    label: [u8; 176],
}

impl VolumeInfo {
    pub fn parse(bytes: &[u8; 256]) -> Self {
        let raw: &RawVolumeInfo = bytemuck::from_bytes(bytes);
        Self {
            bat_lba: Lba28::from_le_bytes(raw.bat_lba),
            min_lba: Lba28::from_le_bytes(raw.min_lba),
            bat_start_lba: Lba28::from_le_bytes(raw.bat_start_lba),
            max_lba: Lba28::from_le_bytes(raw.max_lba),
            block_size: u32::from_le_bytes(raw.block_size),
            bs: raw.bs,
            flags: VolumeFlags::from_bits_retain(u16::from_le_bytes(raw.flags)),
            root: SectionRef::new(
                Lba28::from_le_bytes(raw.root_lba),
                u32::from_le_bytes(raw.root_size),
            ),
            reserved: raw.reserved1,
            label: raw.label,
        }
    }

    pub fn encode(&self) -> [u8; 256] {
        let raw = RawVolumeInfo {
            magic: MAGIC,
            bat_lba: self.bat_lba.to_le_bytes(),
            min_lba: self.min_lba.to_le_bytes(),
            bat_start_lba: self.bat_start_lba.to_le_bytes(),
            max_lba: self.max_lba.to_le_bytes(),
            block_size: self.block_size.to_le_bytes(),
            bs: self.bs,
            reserved0: 0,
            flags: self.flags.bits().to_le_bytes(),
            root_lba: self.root.lba.to_le_bytes(),
            root_size: self.root.size.to_le_bytes(),
            reserved1: self.reserved,
            label: self.label,
        };
        let mut bytes = [0u8; 256];
        bytes.copy_from_slice(bytemuck::bytes_of(&raw));
        bytes
    }

    /// The label up to its terminating NUL.
    pub fn label(&self) -> &str {
        let end = self
            .label
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.label.len());
        core::str::from_utf8(&self.label[..end]).unwrap_or("")
    }

    pub fn set_label(&mut self, label: &str) -> Result<()> {
        if label.len() > MAX_LABEL_LEN {
            return Err(Error::LabelTooLong);
        }
        self.label = [0u8; 176];
        self.label[..label.len()].copy_from_slice(label.as_bytes());
        Ok(())
    }
}
