//! The block allocation table.
//!
//! A chain of on-disk sections, each a small header plus an allocation
//! bitmap. Section bitmaps concatenate: the first data bit of the first
//! section describes `bat_start_lba`, and every following bit the next LBA,
//! MSB-first within each byte. The whole chain is loaded at mount and stays
//! in memory until teardown.

use alloc::vec;
use alloc::vec::Vec;

use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::structures::raw::bat::{RawBatHeader, BAT_HEADER_SIZE};
use crate::time::Clock;
use crate::types::Lba28;

use super::Volume;

/// One loaded BAT section.
pub struct BatSection {
    lba: Lba28,
    next_bat: u32,
    block_count: u16,
    data: Vec<u8>,
}

impl BatSection {
    pub fn lba(&self) -> Lba28 {
        self.lba
    }

    /// Raw next-section link; zero when this is the last section.
    pub fn next_bat(&self) -> u32 {
        self.next_bat
    }

    pub fn block_count(&self) -> u16 {
        self.block_count
    }

    /// The allocation bitmap.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// How many LBAs this section describes.
    pub fn lba_count(&self) -> u64 {
        self.data.len() as u64 * 8
    }

    fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(BAT_HEADER_SIZE + self.data.len());
        bytes.extend_from_slice(&self.next_bat.to_le_bytes());
        bytes.extend_from_slice(&self.block_count.to_le_bytes());
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

impl<D: BlockDevice, C: Clock> Volume<D, C> {
    fn load_bat(&mut self, lba: Lba28) -> Result<BatSection> {
        let block_size = self.info.block_size as usize;
        let absolute = self.absolute();

        let mut first = vec![0u8; block_size];
        self.dev.read(lba, absolute, 0, &mut first)?;

        let header: &RawBatHeader = bytemuck::from_bytes(&first[..BAT_HEADER_SIZE]);
        let next_bat = u32::from_le_bytes(header.next_bat);
        let block_count = u16::from_le_bytes(header.block_count);
        if block_count == 0 {
            return Err(Error::Generic);
        }

        let mut data = Vec::with_capacity(block_count as usize * block_size - BAT_HEADER_SIZE);
        data.extend_from_slice(&first[BAT_HEADER_SIZE..]);
        if block_count > 1 {
            let mut rest = vec![0u8; (block_count as usize - 1) * block_size];
            self.dev.read(lba + 1, absolute, 0, &mut rest)?;
            data.extend_from_slice(&rest);
        }

        Ok(BatSection {
            lba,
            next_bat,
            block_count,
            data,
        })
    }

    pub(super) fn load_bat_chain(&mut self) -> Result<()> {
        let mut next = self.info.bat_lba;
        loop {
            let section = self.load_bat(next)?;
            let link = section.next_bat;
            self.bats.push(section);
            if link == 0 {
                return Ok(());
            }
            next = Lba28::new(link);
        }
    }

    /// The loaded chain, in on-disk order.
    pub fn bat_sections(&self) -> &[BatSection] {
        &self.bats
    }

    /// First LBA described by the given section's bitmap.
    fn bat_section_start(&self, idx: usize) -> u64 {
        let mut start = self.info.bat_start_lba.raw() as u64;
        for section in &self.bats[..idx] {
            start += section.lba_count();
        }
        start
    }

    /// Finds the section describing `lba` and the bit position within it.
    fn bat_resolve(&self, lba: Lba28) -> Option<(usize, u64)> {
        if lba.is_invalid() || lba < self.info.bat_start_lba || lba > self.info.max_lba {
            return None;
        }
        let mut rel = (lba.raw() - self.info.bat_start_lba.raw()) as u64;
        for (idx, section) in self.bats.iter().enumerate() {
            let count = section.lba_count();
            if rel < count {
                return Some((idx, rel));
            }
            rel -= count;
        }
        None
    }

    /// Whether a block is free. Addresses outside the range the BAT
    /// describes are never free.
    pub fn is_free(&self, lba: Lba28) -> bool {
        match self.bat_resolve(lba) {
            Some((idx, rel)) => {
                let byte = self.bats[idx].data[(rel / 8) as usize];
                byte & (0x80 >> (rel % 8)) == 0
            }
            None => false,
        }
    }

    /// Checks that `count` blocks starting at the given bit position are
    /// free, falling through into the following sections of the chain.
    ///
    /// `RangeNoSpace` means a block in range is already taken (try another
    /// position); `DeviceNoSpace` means the chain ended first.
    fn are_blocks_free(
        &self,
        mut idx: usize,
        mut byte: usize,
        mut bit: u32,
        count: u16,
    ) -> Result<()> {
        let mut remaining = count as u32;
        if remaining == 0 {
            return Ok(());
        }
        loop {
            let data = &self.bats[idx].data;
            while byte < data.len() {
                while bit < 8 {
                    if data[byte] & (0x80 >> bit) != 0 {
                        return Err(Error::RangeNoSpace);
                    }
                    remaining -= 1;
                    if remaining == 0 {
                        return Ok(());
                    }
                    bit += 1;
                }
                bit = 0;
                byte += 1;
            }
            idx += 1;
            if idx == self.bats.len() {
                return Err(Error::DeviceNoSpace);
            }
            byte = 0;
            bit = 0;
        }
    }

    /// Sets or clears `count` bits starting at the given position,
    /// mirroring the scan of [`Volume::are_blocks_free`].
    fn bat_set_range(&mut self, mut idx: usize, mut byte: usize, mut bit: u32, count: u16, allocated: bool) {
        let mut remaining = count as u32;
        if remaining == 0 {
            return;
        }
        loop {
            let data = &mut self.bats[idx].data;
            while byte < data.len() {
                while bit < 8 {
                    if allocated {
                        data[byte] |= 0x80 >> bit;
                    } else {
                        data[byte] &= !(0x80 >> bit);
                    }
                    remaining -= 1;
                    if remaining == 0 {
                        return;
                    }
                    bit += 1;
                }
                bit = 0;
                byte += 1;
            }
            idx += 1;
            if idx == self.bats.len() {
                return;
            }
            byte = 0;
            bit = 0;
        }
    }

    /// Allocates `count` contiguous blocks, first-fit from the head of the
    /// chain. The allocation never wraps around.
    pub fn allocate_chained_blocks(&mut self, count: u16) -> Result<Lba28> {
        if count == 0 {
            return Err(Error::Args);
        }
        for idx in 0..self.bats.len() {
            for byte in 0..self.bats[idx].data.len() {
                if self.bats[idx].data[byte] == 0xFF {
                    continue;
                }
                for bit in 0..8u32 {
                    if self.bats[idx].data[byte] & (0x80 >> bit) != 0 {
                        continue;
                    }
                    match self.are_blocks_free(idx, byte, bit, count) {
                        Ok(()) => {
                            self.bat_set_range(idx, byte, bit, count, true);
                            let lba = Lba28::new(
                                (self.bat_section_start(idx) + byte as u64 * 8 + bit as u64) as u32,
                            );
                            log::debug!("allocated {count} chained block(s) at {lba}");
                            return Ok(lba);
                        }
                        Err(Error::RangeNoSpace) => continue,
                        Err(err) => return Err(err),
                    }
                }
            }
        }
        Err(Error::DeviceNoSpace)
    }

    /// Releases `count` blocks starting at `lba`. Nothing checks that the
    /// range was allocated before; addresses outside the described range
    /// are ignored.
    pub fn free_chained_blocks(&mut self, lba: Lba28, count: u16) {
        if let Some((idx, rel)) = self.bat_resolve(lba) {
            self.bat_set_range(idx, (rel / 8) as usize, (rel % 8) as u32, count, false);
        }
    }

    fn bat_flush(&mut self, idx: usize) -> Result<()> {
        let bytes = self.bats[idx].encode();
        let lba = self.bats[idx].lba;
        let absolute = self.absolute();
        self.dev.write(lba, absolute, 0, &bytes)
    }

    /// Writes one whole BAT section back to disk.
    pub fn flush_bat_section(&mut self, lba: Lba28) -> Result<()> {
        let idx = self
            .bats
            .iter()
            .position(|section| section.lba == lba)
            .ok_or(Error::Args)?;
        self.bat_flush(idx)
    }

    /// Writes a single block of a BAT section back to disk.
    pub fn flush_bat_block(&mut self, lba: Lba28, block_off: u32) -> Result<()> {
        let idx = self
            .bats
            .iter()
            .position(|section| section.lba == lba)
            .ok_or(Error::Args)?;
        if block_off >= self.bats[idx].block_count as u32 {
            return Err(Error::Args);
        }
        let block_size = self.info.block_size as usize;
        let bytes = self.bats[idx].encode();
        let start = block_off as usize * block_size;
        let chunk = bytes[start..start + block_size].to_vec();
        let absolute = self.absolute();
        self.dev.write(self.bats[idx].lba + block_off, absolute, 0, &chunk)
    }

    pub(super) fn sync_bats(&mut self) -> Result<()> {
        for idx in 0..self.bats.len() {
            self.bat_flush(idx)?;
        }
        Ok(())
    }
}
