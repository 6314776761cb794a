//! Entry-table chains.
//!
//! A directory is a chain of sections whose slot 0 carries the
//! parent/prev/next links. Searches walk the chain left to right; running
//! out of free slots extends it on the right with a fresh two-block section.
//! Sections are interned in the volume's table cache by LBA, so every load
//! of the same section yields the same object.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::cache::CacheItem;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::structures::entry::{
    Entry, EntryData, EntryName, FileFlags, Perm, Slot, TableInfo, INLINE_NAME_MAX, MAX_NAME_LEN,
};
use crate::structures::raw::table::SLOT_SIZE;
use crate::time::Clock;
use crate::types::{Lba28, SectionRef, Timestamp};

use super::{EntryRef, Volume};

/// One loaded entry-table section.
pub struct TableSection {
    lba: Lba28,
    byte_size: u32,
    info: TableInfo,
    /// Slots 1..n; slot 0 is the tableinfo held separately.
    slots: Vec<Slot>,
}

impl CacheItem for TableSection {
    fn lba(&self) -> Lba28 {
        self.lba
    }
}

impl TableSection {
    fn new_empty(lba: Lba28, byte_size: u32, parent: SectionRef) -> Self {
        let count = (byte_size as usize / SLOT_SIZE).saturating_sub(1);
        Self {
            lba,
            byte_size,
            info: TableInfo {
                parent,
                prev: SectionRef::NONE,
                next: SectionRef::NONE,
            },
            slots: alloc::vec![Slot::Free; count],
        }
    }

    fn decode(lba: Lba28, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SLOT_SIZE || bytes.len() % SLOT_SIZE != 0 {
            return Err(Error::Generic);
        }
        let mut first = [0u8; SLOT_SIZE];
        first.copy_from_slice(&bytes[..SLOT_SIZE]);
        let Slot::TableInfo(info) = Slot::decode(&first) else {
            return Err(Error::Generic);
        };

        let mut slots = Vec::with_capacity(bytes.len() / SLOT_SIZE - 1);
        for chunk in bytes[SLOT_SIZE..].chunks_exact(SLOT_SIZE) {
            let mut raw = [0u8; SLOT_SIZE];
            raw.copy_from_slice(chunk);
            slots.push(Slot::decode(&raw));
        }

        Ok(Self {
            lba,
            byte_size: bytes.len() as u32,
            info,
            slots,
        })
    }

    pub(super) fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.byte_size as usize);
        bytes.extend_from_slice(&Slot::TableInfo(self.info).encode());
        for slot in &self.slots {
            bytes.extend_from_slice(&slot.encode());
        }
        bytes
    }

    pub fn lba(&self) -> Lba28 {
        self.lba
    }

    pub fn byte_size(&self) -> u32 {
        self.byte_size
    }

    pub fn section_ref(&self) -> SectionRef {
        SectionRef::new(self.lba, self.byte_size)
    }

    /// Slot count including the tableinfo slot.
    pub fn slot_count(&self) -> usize {
        self.byte_size as usize / SLOT_SIZE
    }

    pub fn info(&self) -> &TableInfo {
        &self.info
    }

    /// Slot by its on-disk index; index 0 (the tableinfo) has no `Slot`
    /// representation here.
    pub fn slot(&self, index: usize) -> Option<&Slot> {
        index.checked_sub(1).and_then(|i| self.slots.get(i))
    }

    fn slot_mut(&mut self, index: usize) -> Option<&mut Slot> {
        index.checked_sub(1).and_then(|i| self.slots.get_mut(i))
    }
}

pub(super) fn build_entry(
    data: EntryData,
    flags: FileFlags,
    create_ts: Timestamp,
    user_id: u32,
    group_id: u32,
    name: EntryName,
) -> Entry {
    Entry {
        data,
        flags,
        create_ts,
        modify_ts: create_ts,
        access_ts: create_ts,
        user_id,
        group_id,
        name,
    }
}

impl<D: BlockDevice, C: Clock> Volume<D, C> {
    /// Loads a section from disk and interns it, without consulting the
    /// cache first.
    pub(super) fn read_entrytable(&mut self, section: SectionRef) -> Result<Lba28> {
        if section.is_none() {
            return Err(Error::Args);
        }
        let mut bytes = alloc::vec![0u8; section.size as usize];
        let absolute = self.absolute();
        self.dev.read(section.lba, absolute, 0, &mut bytes)?;
        let decoded = TableSection::decode(section.lba, &bytes)?;
        self.tables.add(decoded);
        Ok(section.lba)
    }

    /// Cache-or-load lookup; the identity of a loaded section is its LBA.
    pub(super) fn ensure_table(&mut self, section: SectionRef) -> Result<Lba28> {
        if self.tables.contains(section.lba) {
            Ok(section.lba)
        } else {
            self.read_entrytable(section)
        }
    }

    pub(super) fn table(&self, lba: Lba28) -> Result<&TableSection> {
        self.tables.find(lba).ok_or(Error::Generic)
    }

    fn table_mut(&mut self, lba: Lba28) -> Result<&mut TableSection> {
        self.tables.find_mut(lba).ok_or(Error::Generic)
    }

    /// Creates a fresh zeroed section on disk and interns it.
    fn create_table_section(&mut self, lba: Lba28, size: u32, parent: SectionRef) -> Result<()> {
        self.zero_blocks(lba, size / self.info.block_size)?;
        self.tables.add(TableSection::new_empty(lba, size, parent));
        Ok(())
    }

    /// Writes a cached section back to disk.
    pub fn sync_table(&mut self, lba: Lba28) -> Result<()> {
        let bytes = self.table(lba)?.encode();
        let absolute = self.absolute();
        self.dev.write(lba, absolute, 0, &bytes)
    }

    /// Syncs a section and evicts it from the cache.
    pub fn destroy_table(&mut self, lba: Lba28) -> Result<()> {
        self.sync_table(lba)?;
        self.tables.take(lba);
        Ok(())
    }

    /// Evicts a section and releases its blocks; the on-disk content is
    /// left behind unsynced.
    pub fn remove_table(&mut self, lba: Lba28) -> Result<()> {
        let section = self.tables.take(lba).ok_or(Error::Args)?;
        let blocks = section.byte_size / self.info.block_size;
        self.free_chained_blocks(lba, blocks as u16);
        Ok(())
    }

    /// Reads the entry stored at `entry_ref`.
    pub fn entry(&self, entry_ref: EntryRef) -> Result<Entry> {
        match self.table(entry_ref.table)?.slot(entry_ref.slot) {
            Some(Slot::Entry(entry)) => Ok(entry.clone()),
            _ => Err(Error::Args),
        }
    }

    pub(super) fn set_slot(&mut self, entry_ref: EntryRef, slot: Slot) -> Result<()> {
        match self.table_mut(entry_ref.table)?.slot_mut(entry_ref.slot) {
            Some(target) => {
                *target = slot;
                Ok(())
            }
            None => Err(Error::Args),
        }
    }

    /// Finds the first free slot in the chain, extending it with a new
    /// two-block section when every section is full.
    pub(super) fn find_free_slot(&mut self, start: SectionRef) -> Result<EntryRef> {
        let mut cur = start;
        loop {
            let lba = self.ensure_table(cur)?;
            let (free, next) = {
                let section = self.table(lba)?;
                let free = (1..section.slot_count())
                    .find(|&i| section.slot(i).is_some_and(Slot::is_free));
                (free, section.info().next)
            };
            if let Some(slot) = free {
                return Ok(EntryRef { table: lba, slot });
            }
            if next.is_some() {
                cur = next;
                continue;
            }

            // chain exhausted; append a fresh section
            let new_lba = self.allocate_chained_blocks(2)?;
            let size = 2 * self.info.block_size;
            let parent = self.table(lba)?.info().parent;
            self.create_table_section(new_lba, size, parent)?;

            let cur_ref = self.table(lba)?.section_ref();
            let new_ref = SectionRef::new(new_lba, size);
            self.table_mut(lba)?.info.next = new_ref;
            self.table_mut(new_lba)?.info.prev = cur_ref;

            log::debug!("extended entry-table chain with section at {new_lba}");
            return Ok(EntryRef {
                table: new_lba,
                slot: 1,
            });
        }
    }

    /// Searches the chain for an entry by name. Absence is not an error:
    /// `Ok(None)` means no entry of that name exists.
    pub fn find_entry(&mut self, start: SectionRef, name: &str) -> Result<Option<EntryRef>> {
        if name.len() > MAX_NAME_LEN {
            return Err(Error::NameTooLong);
        }
        let spilled = name.len() > INLINE_NAME_MAX;
        let mut cur = start;
        loop {
            let lba = self.ensure_table(cur)?;
            let next;
            if spilled {
                let candidates: Vec<(usize, SectionRef, u32)> = {
                    let section = self.table(lba)?;
                    next = section.info().next;
                    (1..section.slot_count())
                        .filter_map(|i| match section.slot(i) {
                            Some(Slot::Entry(entry)) => match entry.name {
                                EntryName::Long { table, slot } => Some((i, table, slot)),
                                EntryName::Inline(_) => None,
                            },
                            _ => None,
                        })
                        .collect()
                };
                for (slot, name_table, name_slot) in candidates {
                    if self.long_name_at(name_table, name_slot)? == name {
                        return Ok(Some(EntryRef { table: lba, slot }));
                    }
                }
            } else {
                let found = {
                    let section = self.table(lba)?;
                    next = section.info().next;
                    (1..section.slot_count()).find(|&i| {
                        matches!(
                            section.slot(i),
                            Some(Slot::Entry(entry))
                                if matches!(&entry.name, EntryName::Inline(n) if n.as_str() == name)
                        )
                    })
                };
                if let Some(slot) = found {
                    return Ok(Some(EntryRef { table: lba, slot }));
                }
            }
            if next.is_some() {
                cur = next;
            } else {
                return Ok(None);
            }
        }
    }

    fn long_name_at(&mut self, table: SectionRef, slot: u32) -> Result<String> {
        let lba = self.ensure_table(table)?;
        match self.table(lba)?.slot(slot as usize) {
            Some(Slot::LongName(name)) => Ok(name.clone()),
            _ => Err(Error::Generic),
        }
    }

    /// The entry's effective name, following the long-name descriptor if
    /// the name was spilled.
    pub fn entry_name(&mut self, entry_ref: EntryRef) -> Result<String> {
        match self.entry(entry_ref)?.name {
            EntryName::Inline(name) => Ok(name),
            EntryName::Long { table, slot } => self.long_name_at(table, slot),
        }
    }

    /// Collects every regular entry of a chain, in slot order.
    pub fn list_entries(&mut self, start: SectionRef) -> Result<Vec<EntryRef>> {
        let mut entries = Vec::new();
        let mut cur = start;
        loop {
            let lba = self.ensure_table(cur)?;
            let section = self.table(lba)?;
            for i in 1..section.slot_count() {
                if let Some(Slot::Entry(_)) = section.slot(i) {
                    entries.push(EntryRef { table: lba, slot: i });
                }
            }
            let next = section.info().next;
            if next.is_none() {
                return Ok(entries);
            }
            cur = next;
        }
    }

    /// Counts the occupied slots of a chain, optionally ignoring long-name
    /// slots.
    pub fn count_entries(&mut self, start: SectionRef, skip_long_names: bool) -> Result<usize> {
        let mut count = 0;
        let mut cur = start;
        loop {
            let lba = self.ensure_table(cur)?;
            let section = self.table(lba)?;
            for i in 1..section.slot_count() {
                match section.slot(i) {
                    Some(Slot::Free) | None => {}
                    Some(Slot::LongName(_)) if skip_long_names => {}
                    Some(_) => count += 1,
                }
            }
            let next = section.info().next;
            if next.is_none() {
                return Ok(count);
            }
            cur = next;
        }
    }

    /// Replaces the owners of an entry.
    pub fn chown(&mut self, entry_ref: EntryRef, user_id: u32, group_id: u32) -> Result<()> {
        match self.table_mut(entry_ref.table)?.slot_mut(entry_ref.slot) {
            Some(Slot::Entry(entry)) => {
                entry.user_id = user_id;
                entry.group_id = group_id;
                Ok(())
            }
            _ => Err(Error::Args),
        }
    }

    /// Replaces the modify and access timestamps of an entry.
    pub fn touch(&mut self, entry_ref: EntryRef, modify_ts: Timestamp, access_ts: Timestamp) -> Result<()> {
        match self.table_mut(entry_ref.table)?.slot_mut(entry_ref.slot) {
            Some(Slot::Entry(entry)) => {
                entry.modify_ts = modify_ts;
                entry.access_ts = access_ts;
                Ok(())
            }
            _ => Err(Error::Args),
        }
    }

    /// First section of the chain `section` belongs to, found by walking
    /// the prev links.
    fn chain_head(&mut self, section: SectionRef) -> Result<SectionRef> {
        let mut cur = section;
        loop {
            let lba = self.ensure_table(cur)?;
            let this = self.table(lba)?;
            let prev = this.info().prev;
            let this_ref = this.section_ref();
            if prev.is_some() {
                cur = prev;
            } else {
                return Ok(this_ref);
            }
        }
    }

    /// Chain-global slot index of `entry_ref`, counted from the first slot
    /// of the chain head.
    fn chain_slot_index(&mut self, head: SectionRef, entry_ref: EntryRef) -> Result<u32> {
        let mut base = 0usize;
        let mut cur = head;
        loop {
            let lba = self.ensure_table(cur)?;
            if lba == entry_ref.table {
                return Ok((base + entry_ref.slot) as u32);
            }
            let section = self.table(lba)?;
            base += section.slot_count();
            let next = section.info().next;
            if next.is_none() {
                return Err(Error::Generic);
            }
            cur = next;
        }
    }

    /// Resolves a symlink entry to the entry its target path names.
    ///
    /// The stored offset is a chain-global slot index into the symlink's
    /// own chain; the slot there holds the target path. A path starting
    /// with '/' restarts at the volume root, anything else at the head of
    /// the symlink's chain.
    fn symlink_target(
        &mut self,
        link: EntryRef,
        user_id: u32,
        group_id: u32,
    ) -> Result<EntryRef> {
        let entry = self.entry(link)?;
        let EntryData::Symlink { offset } = entry.data else {
            return Err(Error::Args);
        };
        let owning = self.table(link.table)?.section_ref();
        let head = self.chain_head(owning)?;

        let mut remaining = offset as usize;
        let mut cur = head;
        let path = loop {
            let lba = self.ensure_table(cur)?;
            let (count, next) = {
                let section = self.table(lba)?;
                (section.slot_count(), section.info().next)
            };
            if remaining >= count {
                remaining -= count;
                if next.is_none() {
                    return Err(Error::Generic);
                }
                cur = next;
                continue;
            }
            match self.table(lba)?.slot(remaining) {
                Some(Slot::LongName(path)) => break path.clone(),
                _ => return Err(Error::Generic),
            }
        };

        if let Some(absolute) = path.strip_prefix('/') {
            let root = self.info.root;
            let absolute = absolute.to_string();
            self.traverse(root, &absolute, true, user_id, group_id)
        } else {
            self.traverse(head, &path, true, user_id, group_id)
        }
    }

    /// Walks a relative path from `start` and returns the entry the final
    /// component names.
    ///
    /// `.` and empty components are skipped; `..` ascends via the parent
    /// link and is a no-op at the root. Intermediate components must be
    /// directories the acting principal may execute. The caller's path is
    /// only borrowed, never modified.
    pub fn traverse(
        &mut self,
        start: SectionRef,
        path: &str,
        follow_symlinks: bool,
        user_id: u32,
        group_id: u32,
    ) -> Result<EntryRef> {
        let mut table = start;
        let mut components = path
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .peekable();

        while let Some(component) = components.next() {
            if component == ".." {
                let lba = self.ensure_table(table)?;
                let parent = self.table(lba)?.info().parent;
                if parent.is_some() {
                    table = parent;
                }
                continue;
            }

            let found = self
                .find_entry(table, component)?
                .ok_or(Error::NotFound)?;

            if components.peek().is_none() {
                if follow_symlinks
                    && matches!(self.entry(found)?.data, EntryData::Symlink { .. })
                {
                    return self.symlink_target(found, user_id, group_id);
                }
                return Ok(found);
            }

            let mut at = found;
            let mut entry = self.entry(at)?;
            if follow_symlinks && matches!(entry.data, EntryData::Symlink { .. }) {
                at = self.symlink_target(at, user_id, group_id)?;
                entry = self.entry(at)?;
            }
            let EntryData::Directory(child) = entry.data else {
                return Err(Error::IsNoDir);
            };
            if !entry.check_perm(user_id, group_id, Perm::EXEC) {
                return Err(Error::NoPerm);
            }
            table = child;
        }
        Err(Error::Generic)
    }

    /// Claims a free slot and settles the name: short names stay with the
    /// entry, long ones spill into a separate long-name slot first.
    pub(super) fn create_entry(
        &mut self,
        table: SectionRef,
        name: &str,
    ) -> Result<(EntryRef, EntryName)> {
        if name.len() > MAX_NAME_LEN {
            return Err(Error::NameTooLong);
        }
        let primary = self.find_free_slot(table)?;
        if name.len() > INLINE_NAME_MAX {
            // park a placeholder so the search for the name slot cannot
            // hand the primary slot out again
            self.set_slot(primary, Slot::LongName(String::new()))?;
            let name_slot = match self.find_free_slot(table) {
                Ok(found) => found,
                Err(err) => {
                    self.set_slot(primary, Slot::Free)?;
                    return Err(err);
                }
            };
            self.set_slot(name_slot, Slot::LongName(name.to_string()))?;
            let name_table = self.table(name_slot.table)?.section_ref();
            self.set_slot(primary, Slot::Free)?;
            Ok((
                primary,
                EntryName::Long {
                    table: name_table,
                    slot: name_slot.slot as u32,
                },
            ))
        } else {
            Ok((primary, EntryName::Inline(name.to_string())))
        }
    }

    fn create_simple(
        &mut self,
        table: SectionRef,
        name: &str,
        flags: FileFlags,
        create_ts: Timestamp,
        user_id: u32,
        group_id: u32,
        data: EntryData,
    ) -> Result<EntryRef> {
        let (slot, entry_name) = self.create_entry(table, name)?;
        self.set_slot(
            slot,
            Slot::Entry(build_entry(data, flags, create_ts, user_id, group_id, entry_name)),
        )?;
        Ok(slot)
    }

    /// Creates a directory: a new two-block entry-table plus the entry
    /// pointing at it. Returns the new table.
    pub fn create_dir(
        &mut self,
        table: SectionRef,
        name: &str,
        flags: FileFlags,
        create_ts: Timestamp,
        user_id: u32,
        group_id: u32,
    ) -> Result<SectionRef> {
        let child_lba = self.allocate_chained_blocks(2)?;
        let size = 2 * self.info.block_size;
        let (slot, entry_name) = match self.create_entry(table, name) {
            Ok(claimed) => claimed,
            Err(err) => {
                self.free_chained_blocks(child_lba, 2);
                return Err(err);
            }
        };

        let child = SectionRef::new(child_lba, size);
        self.set_slot(
            slot,
            Slot::Entry(build_entry(
                EntryData::Directory(child),
                flags,
                create_ts,
                user_id,
                group_id,
                entry_name,
            )),
        )?;

        let parent = self.chain_head(table)?;
        self.create_table_section(child_lba, size, parent)?;
        log::debug!("created directory table at {child_lba}");
        Ok(child)
    }

    pub fn create_chardevice(
        &mut self,
        table: SectionRef,
        name: &str,
        flags: FileFlags,
        create_ts: Timestamp,
        user_id: u32,
        group_id: u32,
        dev_id: u32,
        dev_flags: u32,
    ) -> Result<EntryRef> {
        self.create_simple(
            table,
            name,
            flags,
            create_ts,
            user_id,
            group_id,
            EntryData::CharDevice {
                id: dev_id,
                flags: dev_flags,
            },
        )
    }

    pub fn create_blockdevice(
        &mut self,
        table: SectionRef,
        name: &str,
        flags: FileFlags,
        create_ts: Timestamp,
        user_id: u32,
        group_id: u32,
        dev_id: u32,
        dev_flags: u32,
    ) -> Result<EntryRef> {
        self.create_simple(
            table,
            name,
            flags,
            create_ts,
            user_id,
            group_id,
            EntryData::BlockDevice {
                id: dev_id,
                flags: dev_flags,
            },
        )
    }

    pub fn create_fifo(
        &mut self,
        table: SectionRef,
        name: &str,
        flags: FileFlags,
        create_ts: Timestamp,
        user_id: u32,
        group_id: u32,
        buffer_size: u32,
    ) -> Result<EntryRef> {
        self.create_simple(
            table,
            name,
            flags,
            create_ts,
            user_id,
            group_id,
            EntryData::Fifo { buffer_size },
        )
    }

    pub fn create_socket(
        &mut self,
        table: SectionRef,
        name: &str,
        flags: FileFlags,
        create_ts: Timestamp,
        user_id: u32,
        group_id: u32,
        address: u32,
    ) -> Result<EntryRef> {
        self.create_simple(
            table,
            name,
            flags,
            create_ts,
            user_id,
            group_id,
            EntryData::Socket { address },
        )
    }

    /// Creates a symlink whose target path is stored in a long-name slot of
    /// the same chain; the entry records the chain-global index of that
    /// slot.
    pub fn create_symlink(
        &mut self,
        table: SectionRef,
        name: &str,
        flags: FileFlags,
        create_ts: Timestamp,
        user_id: u32,
        group_id: u32,
        target: &str,
    ) -> Result<EntryRef> {
        if target.len() > MAX_NAME_LEN {
            return Err(Error::Args);
        }
        let (slot, entry_name) = self.create_entry(table, name)?;
        // occupy the entry slot while searching for the path slot
        self.set_slot(slot, Slot::LongName(String::new()))?;
        let path_slot = match self.find_free_slot(table) {
            Ok(found) => found,
            Err(err) => {
                self.set_slot(slot, Slot::Free)?;
                return Err(err);
            }
        };
        self.set_slot(path_slot, Slot::LongName(target.to_string()))?;

        let head = self.chain_head(table)?;
        let offset = self.chain_slot_index(head, path_slot)?;
        self.set_slot(
            slot,
            Slot::Entry(build_entry(
                EntryData::Symlink { offset },
                flags,
                create_ts,
                user_id,
                group_id,
                entry_name,
            )),
        )?;
        Ok(slot)
    }

    /// Creates a file stored as one contiguous run of blocks, zeroed on
    /// creation. `kernel` selects the kernel entry type instead of the
    /// plain continuous one.
    pub fn create_continuous_file(
        &mut self,
        table: SectionRef,
        name: &str,
        flags: FileFlags,
        create_ts: Timestamp,
        user_id: u32,
        group_id: u32,
        size: u32,
        kernel: bool,
    ) -> Result<EntryRef> {
        let block_size = self.info.block_size;
        let blocks = u16::try_from(size.div_ceil(block_size)).map_err(|_| Error::Args)?;
        if blocks == 0 {
            return Err(Error::Args);
        }

        let content_lba = self.allocate_chained_blocks(blocks)?;
        let (slot, entry_name) = match self.create_entry(table, name) {
            Ok(claimed) => claimed,
            Err(err) => {
                self.free_chained_blocks(content_lba, blocks);
                return Err(err);
            }
        };

        let content = SectionRef::new(content_lba, size);
        let data = if kernel {
            EntryData::Kernel(content)
        } else {
            EntryData::ContinuousFile(content)
        };
        self.set_slot(
            slot,
            Slot::Entry(build_entry(data, flags, create_ts, user_id, group_id, entry_name)),
        )?;
        self.zero_blocks(content_lba, blocks as u32)?;
        log::debug!("created continuous file body at {content_lba} ({blocks} block(s))");
        Ok(slot)
    }
}
