//! The volume façade.
//!
//! A [`Volume`] owns the device handle, the eagerly loaded BAT chain and the
//! two section caches. It is the unit of isolation: operations on one volume
//! never touch another, and all mutating operations must be serialized by
//! the caller (the core is single-threaded and non-reentrant).

mod bat;
mod fatfile;
mod table;

pub use bat::BatSection;
pub use fatfile::FatSection;
pub use table::TableSection;

use alloc::vec::Vec;

use crate::cache::SectionCache;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::structures::entry::EntryData;
use crate::structures::raw::header::HEADER_OFFSET;
use crate::structures::{Header, VolumeFlags, VolumeInfo};
use crate::time::Clock;
use crate::types::{Lba28, Lba48, SectionRef};

/// Locates an entry slot: the section that holds it and the slot index
/// within that section (slot 0 is the tableinfo and never an entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRef {
    pub table: Lba28,
    pub slot: usize,
}

/// A mounted TabFS volume.
pub struct Volume<D: BlockDevice, C: Clock> {
    dev: D,
    clock: C,
    info: VolumeInfo,
    info_lba: Lba28,
    bats: Vec<BatSection>,
    tables: SectionCache<TableSection>,
    fats: SectionCache<FatSection>,
}

impl<D: BlockDevice, C: Clock> Volume<D, C> {
    /// Mounts the volume whose boot block sits at `boot_lba`.
    ///
    /// Reads the boot-block footer, validates signature and magic, loads the
    /// volume descriptor, the complete BAT chain and the root entry-table.
    /// The BAT chain found on disk is final: the addressable range does not
    /// grow while the volume is mounted.
    pub fn mount(mut dev: D, clock: C, boot_lba: Lba48, absolute_lba: bool) -> Result<Self> {
        let mut footer = [0u8; 64];
        dev.read(boot_lba.to_lba28(), absolute_lba, HEADER_OFFSET, &mut footer)?;
        let header = Header::parse(&footer)?;

        let info_lba = header.info_lba.to_lba28();
        let mut descriptor = [0u8; 256];
        dev.read(
            info_lba,
            header.flags.contains(VolumeFlags::ABSOLUTE_LBAS),
            0,
            &mut descriptor,
        )?;
        let info = VolumeInfo::parse(&descriptor);
        // a block must at least hold one entry slot
        if info.block_size < 64 {
            return Err(Error::Generic);
        }

        let mut volume = Self {
            dev,
            clock,
            info,
            info_lba,
            bats: Vec::new(),
            tables: SectionCache::new(),
            fats: SectionCache::new(),
        };
        volume.load_bat_chain()?;
        let root = volume.info.root;
        volume.read_entrytable(root)?;

        log::debug!(
            "mounted TabFS volume: block size {}, {} BAT section(s), root at {}",
            volume.info.block_size,
            volume.bats.len(),
            root.lba
        );
        Ok(volume)
    }

    pub fn block_size(&self) -> u32 {
        self.info.block_size
    }

    /// First section of the root entry-table.
    pub fn root(&self) -> SectionRef {
        self.info.root
    }

    pub fn label(&self) -> &str {
        self.info.label()
    }

    /// Replaces the volume label (at most 175 characters), optionally
    /// syncing the descriptor and BAT chain to disk.
    pub fn set_label(&mut self, label: &str, sync: bool) -> Result<()> {
        self.info.set_label(label)?;
        if sync {
            self.sync()?;
        }
        Ok(())
    }

    pub fn device(&self) -> &D {
        &self.dev
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.dev
    }

    pub(crate) fn absolute(&self) -> bool {
        self.info.flags.contains(VolumeFlags::ABSOLUTE_LBAS)
    }

    fn zero_blocks(&mut self, lba: Lba28, blocks: u32) -> Result<()> {
        let block_size = self.info.block_size as usize;
        let absolute = self.absolute();
        for i in 0..blocks {
            self.dev.fill(lba + i, absolute, 0, 0, block_size)?;
        }
        Ok(())
    }

    /// Writes the volume descriptor and every BAT section. Cached
    /// entry-table and FAT sections are not touched; they write back on
    /// [`Volume::flush`] or teardown.
    pub fn sync(&mut self) -> Result<()> {
        let descriptor = self.info.encode();
        let absolute = self.absolute();
        self.dev.write(self.info_lba, absolute, 0, &descriptor)?;
        self.sync_bats()
    }

    /// [`Volume::sync`] plus a write-back of every cached section.
    pub fn flush(&mut self) -> Result<()> {
        self.sync()?;
        let tables: Vec<Lba28> = self.tables.iter().map(|t| t.lba()).collect();
        for lba in tables {
            self.sync_table(lba)?;
        }
        let fats: Vec<Lba28> = self.fats.iter().map(|f| f.lba()).collect();
        for lba in fats {
            self.sync_fat(lba)?;
        }
        Ok(())
    }

    /// Tears the volume down: flushes everything and hands the device back.
    pub fn close(mut self) -> Result<D> {
        self.sync()?;
        let absolute = self.absolute();
        for section in self.tables.drain().collect::<Vec<_>>() {
            let bytes = section.encode();
            self.dev.write(section.lba(), absolute, 0, &bytes)?;
        }
        for section in self.fats.drain().collect::<Vec<_>>() {
            let bytes = section.encode();
            self.dev.write(section.lba(), absolute, 0, &bytes)?;
        }
        Ok(self.dev)
    }

    /// Reads from a file entry. Continuous and kernel files clamp to the
    /// recorded size; FAT-backed files zero-fill holes and never allocate.
    pub fn read_file(&mut self, entry: EntryRef, offset: u64, buf: &mut [u8]) -> Result<usize> {
        match self.entry(entry)?.data {
            EntryData::ContinuousFile(content) | EntryData::Kernel(content) => {
                self.continuous_read(content, offset, buf)
            }
            EntryData::FatFile(fat) => self.fat_read(fat, offset, buf),
            EntryData::SegmentedFile(_) => Err(Error::Generic),
            _ => Err(Error::Args),
        }
    }

    /// Writes to a file entry. Continuous and kernel files clamp to the
    /// recorded size; FAT-backed files provision missing blocks.
    pub fn write_file(&mut self, entry: EntryRef, offset: u64, buf: &[u8]) -> Result<usize> {
        match self.entry(entry)?.data {
            EntryData::ContinuousFile(content) | EntryData::Kernel(content) => {
                self.continuous_write(content, offset, buf)
            }
            EntryData::FatFile(fat) => self.fat_write(fat, offset, buf),
            EntryData::SegmentedFile(_) => Err(Error::Generic),
            _ => Err(Error::Args),
        }
    }

    fn continuous_read(&mut self, content: SectionRef, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= content.size as u64 {
            return Err(Error::OffsetAfterFileEnd);
        }
        let len = buf.len().min((content.size as u64 - offset) as usize);
        let absolute = self.absolute();
        self.dev.read(content.lba, absolute, offset as u32, &mut buf[..len])?;
        Ok(len)
    }

    fn continuous_write(&mut self, content: SectionRef, offset: u64, buf: &[u8]) -> Result<usize> {
        if offset >= content.size as u64 {
            return Err(Error::OffsetAfterFileEnd);
        }
        let len = buf.len().min((content.size as u64 - offset) as usize);
        let absolute = self.absolute();
        self.dev.write(content.lba, absolute, offset as u32, &buf[..len])?;
        Ok(len)
    }
}
