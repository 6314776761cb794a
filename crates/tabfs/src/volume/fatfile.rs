//! FAT-indexed files.
//!
//! A FAT-backed file points at a chain of index sections instead of a
//! contiguous body. Block `k` of the file is found by scanning the chain
//! for records with index `k` and taking the one with the greatest stamp;
//! writes provision missing blocks one at a time, reads treat them as
//! holes.

use alloc::vec::Vec;

use crate::cache::CacheItem;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::structures::entry::{EntryData, FileFlags, Slot};
use crate::structures::fat::FatRecord;
use crate::structures::raw::fat::{RawFatHeader, FAT_RECORD_SIZE};
use crate::time::Clock;
use crate::types::{Lba28, SectionRef, Timestamp};

use super::table::build_entry;
use super::{EntryRef, Volume};

/// One loaded FAT index section.
pub struct FatSection {
    lba: Lba28,
    byte_size: u32,
    next: SectionRef,
    records: Vec<FatRecord>,
}

impl CacheItem for FatSection {
    fn lba(&self) -> Lba28 {
        self.lba
    }
}

impl FatSection {
    fn new_empty(lba: Lba28, byte_size: u32) -> Self {
        let count = (byte_size as usize / FAT_RECORD_SIZE).saturating_sub(1);
        Self {
            lba,
            byte_size,
            next: SectionRef::NONE,
            records: alloc::vec![FatRecord::FREE; count],
        }
    }

    fn decode(lba: Lba28, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FAT_RECORD_SIZE || bytes.len() % FAT_RECORD_SIZE != 0 {
            return Err(Error::Generic);
        }
        let header: &RawFatHeader = bytemuck::from_bytes(&bytes[..FAT_RECORD_SIZE]);
        let next = SectionRef::new(
            Lba28::new(u32::from_le_bytes(header.next_section)),
            u32::from_le_bytes(header.next_size),
        );
        let mut records = Vec::with_capacity(bytes.len() / FAT_RECORD_SIZE - 1);
        for chunk in bytes[FAT_RECORD_SIZE..].chunks_exact(FAT_RECORD_SIZE) {
            let mut raw = [0u8; FAT_RECORD_SIZE];
            raw.copy_from_slice(chunk);
            records.push(FatRecord::decode(&raw));
        }
        Ok(Self {
            lba,
            byte_size: bytes.len() as u32,
            next,
            records,
        })
    }

    pub(super) fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.byte_size as usize);
        bytes.extend_from_slice(&self.next.lba.to_le_bytes());
        bytes.extend_from_slice(&self.next.size.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        for record in &self.records {
            bytes.extend_from_slice(&record.encode());
        }
        bytes
    }

    pub fn lba(&self) -> Lba28 {
        self.lba
    }

    pub fn next(&self) -> SectionRef {
        self.next
    }

    pub fn records(&self) -> &[FatRecord] {
        &self.records
    }
}

/// Locates one record: the section holding it and its index there.
#[derive(Clone, Copy)]
struct FatSlot {
    section: Lba28,
    index: usize,
}

impl<D: BlockDevice, C: Clock> Volume<D, C> {
    fn read_fat(&mut self, section: SectionRef) -> Result<Lba28> {
        if section.is_none() {
            return Err(Error::Args);
        }
        let mut bytes = alloc::vec![0u8; section.size as usize];
        let absolute = self.absolute();
        self.dev.read(section.lba, absolute, 0, &mut bytes)?;
        let decoded = FatSection::decode(section.lba, &bytes)?;
        self.fats.add(decoded);
        Ok(section.lba)
    }

    fn ensure_fat(&mut self, section: SectionRef) -> Result<Lba28> {
        if self.fats.contains(section.lba) {
            Ok(section.lba)
        } else {
            self.read_fat(section)
        }
    }

    fn fat(&self, lba: Lba28) -> Result<&FatSection> {
        self.fats.find(lba).ok_or(Error::Generic)
    }

    fn fat_mut(&mut self, lba: Lba28) -> Result<&mut FatSection> {
        self.fats.find_mut(lba).ok_or(Error::Generic)
    }

    /// Writes a cached FAT section back to disk.
    pub fn sync_fat(&mut self, lba: Lba28) -> Result<()> {
        let bytes = self.fat(lba)?.encode();
        let absolute = self.absolute();
        self.dev.write(lba, absolute, 0, &bytes)
    }

    fn create_fat_section(&mut self, lba: Lba28, size: u32) -> Result<()> {
        self.zero_blocks(lba, size / self.info.block_size)?;
        self.fats.add(FatSection::new_empty(lba, size));
        Ok(())
    }

    /// First free record in the chain, extending it with a fresh two-block
    /// section when full.
    fn fat_find_free(&mut self, start: SectionRef) -> Result<FatSlot> {
        let mut cur = start;
        loop {
            let lba = self.ensure_fat(cur)?;
            let (free, next) = {
                let section = self.fat(lba)?;
                (
                    section.records.iter().position(FatRecord::is_free),
                    section.next,
                )
            };
            if let Some(index) = free {
                return Ok(FatSlot { section: lba, index });
            }
            if next.is_some() {
                cur = next;
                continue;
            }

            let new_lba = self.allocate_chained_blocks(2)?;
            let size = 2 * self.info.block_size;
            self.create_fat_section(new_lba, size)?;
            self.fat_mut(lba)?.next = SectionRef::new(new_lba, size);
            log::debug!("extended FAT chain with section at {new_lba}");
            return Ok(FatSlot {
                section: new_lba,
                index: 0,
            });
        }
    }

    /// Most recent record for a block index, across the whole chain.
    fn fat_find_latest(&mut self, start: SectionRef, index: u32) -> Result<Option<FatRecord>> {
        let mut best: Option<FatRecord> = None;
        let mut cur = start;
        loop {
            let lba = self.ensure_fat(cur)?;
            let section = self.fat(lba)?;
            for record in &section.records {
                if record.is_free() || record.index != index {
                    continue;
                }
                if best.map_or(true, |b| record.modify_date > b.modify_date) {
                    best = Some(*record);
                }
            }
            let next = section.next;
            if next.is_none() {
                return Ok(best);
            }
            cur = next;
        }
    }

    fn fat_provision(&mut self, fat: SectionRef, index: u32) -> Result<Lba28> {
        let slot = self.fat_find_free(fat)?;
        let lba = self.allocate_chained_blocks(1)?;
        let stamp = self.clock.now();
        self.fat_mut(slot.section)?.records[slot.index] = FatRecord {
            index,
            lba,
            modify_date: stamp,
        };
        log::debug!("provisioned block index {index} at {lba}");
        Ok(lba)
    }

    /// Creates a FAT-backed file with an empty two-block index.
    pub fn create_fat_file(
        &mut self,
        table: SectionRef,
        name: &str,
        flags: FileFlags,
        create_ts: Timestamp,
        user_id: u32,
        group_id: u32,
    ) -> Result<EntryRef> {
        let fat_lba = self.allocate_chained_blocks(2)?;
        let size = 2 * self.info.block_size;
        let (slot, entry_name) = match self.create_entry(table, name) {
            Ok(claimed) => claimed,
            Err(err) => {
                self.free_chained_blocks(fat_lba, 2);
                return Err(err);
            }
        };
        self.set_slot(
            slot,
            Slot::Entry(build_entry(
                EntryData::FatFile(SectionRef::new(fat_lba, size)),
                flags,
                create_ts,
                user_id,
                group_id,
                entry_name,
            )),
        )?;
        self.zero_blocks(fat_lba, 2)?;
        Ok(slot)
    }

    pub(super) fn fat_read(&mut self, fat: SectionRef, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let block_size = self.info.block_size as u64;
        let start_block = offset / block_size;
        let span = offset % block_size + buf.len() as u64;
        let blocks = span.div_ceil(block_size);
        log::trace!(
            "fat read: offset {offset}, len {}, blocks {start_block}..{}",
            buf.len(),
            start_block + blocks
        );

        let mut done = 0usize;
        for i in 0..blocks {
            let index = u32::try_from(start_block + i).map_err(|_| Error::Args)?;
            let block_off = if i == 0 { (offset % block_size) as u32 } else { 0 };
            let block_len = ((block_size - block_off as u64) as usize).min(buf.len() - done);
            match self.fat_find_latest(fat, index)? {
                Some(record) => {
                    let absolute = self.absolute();
                    self.dev
                        .read(record.lba, absolute, block_off, &mut buf[done..done + block_len])?;
                }
                // a hole: the block was never written
                None => buf[done..done + block_len].fill(0),
            }
            done += block_len;
        }
        Ok(done)
    }

    pub(super) fn fat_write(&mut self, fat: SectionRef, offset: u64, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let block_size = self.info.block_size as u64;
        let start_block = offset / block_size;
        let span = offset % block_size + buf.len() as u64;
        let blocks = span.div_ceil(block_size);
        log::trace!(
            "fat write: offset {offset}, len {}, blocks {start_block}..{}",
            buf.len(),
            start_block + blocks
        );

        let mut done = 0usize;
        for i in 0..blocks {
            let index = u32::try_from(start_block + i).map_err(|_| Error::Args)?;
            let lba = match self.fat_find_latest(fat, index)? {
                Some(record) => record.lba,
                None => self.fat_provision(fat, index)?,
            };
            let block_off = if i == 0 { (offset % block_size) as u32 } else { 0 };
            let block_len = ((block_size - block_off as u64) as usize).min(buf.len() - done);
            let absolute = self.absolute();
            self.dev
                .write(lba, absolute, block_off, &buf[done..done + block_len])?;
            done += block_len;
        }
        Ok(done)
    }
}
