//! End-to-end tests against a byte-built reference image.
//!
//! The image replicates the layout the format's own tooling produces:
//!
//! - block 0: boot block with the TabFS footer at 0x1C0
//! - block 1: volume descriptor
//! - block 2: first BAT section (one block, next section at 4)
//! - block 3: root entry-table (one block)
//! - blocks 4-5: second BAT section (two blocks)
//! - block 6 onwards: free

use pretty_assertions::assert_eq;
use tabfs::{
    Acl, Clock, EntryData, Error, FileFlags, Lba28, Lba48, MemDevice, Perm, SectionRef, Timestamp,
    Volume,
};

const BLOCK: usize = 512;

/// A deterministic clock: 1, 2, 3, ...
struct TickClock(u64);

impl Clock for TickClock {
    fn now(&mut self) -> Timestamp {
        self.0 += 1;
        Timestamp::new(self.0)
    }
}

fn put16(disk: &mut [u8], at: usize, value: u16) {
    disk[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put32(disk: &mut [u8], at: usize, value: u32) {
    disk[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn example_disk(blocks: usize) -> MemDevice {
    let mut dev = MemDevice::new(blocks, BLOCK as u32);
    let disk = dev.bytes_mut();

    // boot block footer
    disk[0x1C0..0x1C9].copy_from_slice(b"TABFS-28\0");
    put16(disk, 0x1F0, 0x0001); // absolute_lbas
    disk[0x1F6] = 0x01; // info LBA
    disk[0x1FE] = 0x55;
    disk[0x1FF] = 0xAA;

    // volume descriptor
    let info = BLOCK;
    disk[info..info + 9].copy_from_slice(b"TABFS-28\0");
    put32(disk, info + 0x10, 0x2); // bat LBA
    put32(disk, info + 0x14, 0x0); // min LBA
    put32(disk, info + 0x18, 0x2); // bat-start LBA
    put32(disk, info + 0x1C, 0xFFF); // max LBA
    put32(disk, info + 0x20, BLOCK as u32);
    disk[info + 0x24] = 1; // BS
    put16(disk, info + 0x26, 0x0001); // absolute_lbas
    put32(disk, info + 0x28, 0x3); // root LBA
    put32(disk, info + 0x2C, BLOCK as u32); // root size
    disk[info + 0x50..info + 0x50 + 26].copy_from_slice(b"This is an awesome volume!");

    // first BAT section: next at 4, one block, blocks 2-5 taken
    put32(disk, 2 * BLOCK, 0x4);
    put16(disk, 2 * BLOCK + 4, 1);
    disk[2 * BLOCK + 6] = 0b1111_0000;

    // second BAT section: last, two blocks, all free
    put32(disk, 4 * BLOCK, 0);
    put16(disk, 4 * BLOCK + 4, 2);

    // root table: slot 0 is the tableinfo
    disk[3 * BLOCK] = 0xE0;

    dev
}

fn mount(dev: MemDevice) -> Volume<MemDevice, TickClock> {
    Volume::mount(dev, TickClock(0), Lba48::new(0), true).unwrap()
}

fn rwx(read: bool, write: bool, exec: bool) -> Acl {
    Acl::new(read, write, exec)
}

fn dir_flags() -> FileFlags {
    FileFlags {
        set_uid: true,
        user: rwx(true, true, true),
        group: rwx(true, false, true),
        other: rwx(false, false, true),
        ..FileFlags::default()
    }
}

fn lba(raw: u32) -> Lba28 {
    Lba28::new(raw)
}

#[test]
fn mount_reads_reference_image() {
    let volume = mount(example_disk(10));

    assert_eq!(volume.label(), "This is an awesome volume!");
    assert_eq!(volume.block_size(), 512);
    assert_eq!(volume.root(), SectionRef::new(lba(3), 512));

    let bats = volume.bat_sections();
    assert_eq!(bats.len(), 2);
    assert_eq!(bats[0].lba(), lba(2));
    assert_eq!(bats[0].next_bat(), 4);
    assert_eq!(bats[0].block_count(), 1);
    assert_eq!(bats[1].lba(), lba(4));
    assert_eq!(bats[1].block_count(), 2);
}

#[test]
fn mount_rejects_corrupt_images() {
    let mut dev = example_disk(10);
    dev.bytes_mut()[0x1FF] = 0;
    assert_eq!(
        Volume::mount(dev, TickClock(0), Lba48::new(0), true).err(),
        Some(Error::NoBootSig)
    );

    let mut dev = example_disk(10);
    dev.bytes_mut()[0x1C0] = b'X';
    assert_eq!(
        Volume::mount(dev, TickClock(0), Lba48::new(0), true).err(),
        Some(Error::WrongMagic)
    );
}

#[test]
fn is_free_follows_the_bitmap() {
    let volume = mount(example_disk(10));

    // below bat_start_lba nothing is ever free
    assert!(!volume.is_free(lba(0)));
    assert!(!volume.is_free(lba(1)));
    // pre-marked blocks of the image
    for taken in 2..=5 {
        assert!(!volume.is_free(lba(taken)));
    }
    assert!(volume.is_free(lba(6)));
    assert!(volume.is_free(lba(7)));
    // resolution falls through into the second section
    assert!(volume.is_free(lba(0xFD2)));
    // beyond max_lba nothing is free
    assert!(!volume.is_free(lba(0x1000)));
}

#[test]
fn allocate_then_free_restores_the_bitmap() {
    let mut volume = mount(example_disk(10));
    let before: Vec<Vec<u8>> = volume
        .bat_sections()
        .iter()
        .map(|s| s.data().to_vec())
        .collect();

    let first = volume.allocate_chained_blocks(2).unwrap();
    assert_eq!(first, lba(0x6));
    assert!(!volume.is_free(lba(6)));
    assert!(!volume.is_free(lba(7)));

    volume.free_chained_blocks(first, 2);
    assert!(volume.is_free(lba(6)));
    assert!(volume.is_free(lba(7)));

    let after: Vec<Vec<u8>> = volume
        .bat_sections()
        .iter()
        .map(|s| s.data().to_vec())
        .collect();
    assert_eq!(before, after);
}

#[test]
fn allocation_crosses_section_boundaries() {
    let mut volume = mount(example_disk(10));

    // the first section describes (512 - 6) * 8 = 4048 blocks starting at
    // 2; leave exactly one of them free
    let bulk = volume.allocate_chained_blocks(4043).unwrap();
    assert_eq!(bulk, lba(6));
    assert!(volume.is_free(lba(0xFD1)));

    let crossing = volume.allocate_chained_blocks(4).unwrap();
    assert_eq!(crossing, lba(0xFD1));
    for taken in 0xFD1..0xFD5 {
        assert!(!volume.is_free(lba(taken)));
    }

    volume.free_chained_blocks(crossing, 4);
    for freed in 0xFD1..0xFD5 {
        assert!(volume.is_free(lba(freed)));
    }
}

#[test]
fn exhaustion_reports_device_nospace() {
    let mut volume = mount(example_disk(10));
    // both sections together describe 4048 + 8144 blocks
    assert_eq!(
        volume.allocate_chained_blocks(13000).err(),
        Some(Error::DeviceNoSpace)
    );
}

#[test]
fn create_dir_writes_the_reference_entry() {
    let mut volume = mount(example_disk(10));
    let root = volume.root();

    let flags = FileFlags {
        set_uid: true,
        user: rwx(false, false, true),
        ..FileFlags::default()
    };
    let child = volume
        .create_dir(root, "myDir", flags, Timestamp::ZERO, 1, 2)
        .unwrap();
    assert_eq!(child, SectionRef::new(lba(0x6), 1024));

    volume.sync_table(lba(3)).unwrap();

    #[rustfmt::skip]
    let expected: [u8; 64] = [
        0x18, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00,
        0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x6D, 0x79, 0x44, 0x69, 0x72, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    assert_eq!(
        &volume.device().bytes()[3 * BLOCK + 64..3 * BLOCK + 128],
        &expected
    );

    // lookup and traversal both yield the new entry
    let by_name = volume.find_entry(root, "myDir").unwrap().unwrap();
    let by_path = volume.traverse(root, "myDir", true, 1, 2).unwrap();
    assert_eq!(by_name, by_path);
    assert_eq!(
        volume.entry(by_name).unwrap().data,
        EntryData::Directory(child)
    );
}

#[test]
fn long_names_spill_into_their_own_slot() {
    let mut volume = mount(example_disk(10));
    let root = volume.root();
    let name = "123456789_123456789_123456789_123456789_123456789_123456789_";
    assert_eq!(name.len(), 61);

    volume
        .create_chardevice(root, name, dir_flags(), Timestamp::ZERO, 1, 2, 0x1234, 0x5678)
        .unwrap();
    volume.sync_table(lba(3)).unwrap();

    let disk = volume.device().bytes();
    // primary entry in slot 1 carries the descriptor marker,
    // the name lives in slot 2 as a long-name slot
    assert_eq!(disk[3 * BLOCK + 64 + 63], 0xFF);
    assert_eq!(disk[3 * BLOCK + 128] >> 4, 0xA);
    assert_eq!(&disk[3 * BLOCK + 128 + 1..3 * BLOCK + 128 + 1 + 61], name.as_bytes());

    let found = volume.find_entry(root, name).unwrap().unwrap();
    assert_eq!(volume.entry_name(found).unwrap(), name);
    assert_eq!(
        volume.entry(found).unwrap().data,
        EntryData::CharDevice {
            id: 0x1234,
            flags: 0x5678
        }
    );
}

#[test]
fn name_length_boundaries() {
    let mut volume = mount(example_disk(10));
    let root = volume.root();

    let name21: String = "a".repeat(21);
    let name22: String = "b".repeat(22);
    let name62: String = "c".repeat(62);
    let name63: String = "d".repeat(63);

    // the format does not forbid an empty name
    volume
        .create_fifo(root, "", dir_flags(), Timestamp::ZERO, 1, 2, 64)
        .unwrap();
    assert!(volume.find_entry(root, "").unwrap().is_some());

    volume
        .create_fifo(root, &name21, dir_flags(), Timestamp::ZERO, 1, 2, 64)
        .unwrap();
    volume
        .create_fifo(root, &name22, dir_flags(), Timestamp::ZERO, 1, 2, 64)
        .unwrap();
    volume
        .create_fifo(root, &name62, dir_flags(), Timestamp::ZERO, 1, 2, 64)
        .unwrap();
    assert_eq!(
        volume
            .create_fifo(root, &name63, dir_flags(), Timestamp::ZERO, 1, 2, 64)
            .err(),
        Some(Error::NameTooLong)
    );

    volume.sync_table(lba(3)).unwrap();
    let disk = volume.device().bytes();
    // 21 characters still fit in place (slot 2)
    assert_eq!(disk[3 * BLOCK + 2 * 64 + 63], 0x00);
    // 22 characters no longer do (slot 3)
    assert_eq!(disk[3 * BLOCK + 3 * 64 + 63], 0xFF);

    for name in [&name21, &name22, &name62] {
        let found = volume.find_entry(root, name).unwrap().unwrap();
        assert_eq!(volume.entry_name(found).unwrap(), *name);
    }
    assert_eq!(
        volume.find_entry(root, &name63).err(),
        Some(Error::NameTooLong)
    );
}

#[test]
fn traversal_resolves_symlinks_and_dotdot() {
    let mut volume = mount(example_disk(64));
    let root = volume.root();

    let my_dir = volume
        .create_dir(root, "myDir", dir_flags(), Timestamp::ZERO, 1, 2)
        .unwrap();
    volume
        .create_chardevice(root, "myChrDev", dir_flags(), Timestamp::ZERO, 1, 2, 0x1234, 0x5678)
        .unwrap();
    volume
        .create_symlink(my_dir, "testLink", dir_flags(), Timestamp::ZERO, 1, 2, "../myChrDev")
        .unwrap();
    volume
        .create_symlink(my_dir, "absLink", dir_flags(), Timestamp::ZERO, 1, 2, "/myChrDev")
        .unwrap();

    // relative path from a subdirectory, through the parent link
    let entry = volume.traverse(my_dir, "../myChrDev", true, 1, 2).unwrap();
    assert!(matches!(
        volume.entry(entry).unwrap().data,
        EntryData::CharDevice { id: 0x1234, .. }
    ));

    // '..' at the root is a no-op
    let entry = volume.traverse(root, "../myChrDev", true, 1, 2).unwrap();
    assert!(matches!(
        volume.entry(entry).unwrap().data,
        EntryData::CharDevice { .. }
    ));

    // followed, the symlink yields its target
    let entry = volume
        .traverse(root, "myDir/testLink", true, 1, 2)
        .unwrap();
    assert!(matches!(
        volume.entry(entry).unwrap().data,
        EntryData::CharDevice { .. }
    ));

    // unfollowed, the symlink itself
    let entry = volume
        .traverse(root, "myDir/testLink", false, 1, 2)
        .unwrap();
    assert!(matches!(
        volume.entry(entry).unwrap().data,
        EntryData::Symlink { .. }
    ));

    // an absolute target restarts at the root
    let entry = volume.traverse(root, "myDir/absLink", true, 1, 2).unwrap();
    assert!(matches!(
        volume.entry(entry).unwrap().data,
        EntryData::CharDevice { .. }
    ));

    // './' components are skipped
    let entry = volume
        .traverse(root, "./myDir/./testLink", true, 1, 2)
        .unwrap();
    assert!(matches!(
        volume.entry(entry).unwrap().data,
        EntryData::CharDevice { .. }
    ));
}

#[test]
fn traversal_errors() {
    let mut volume = mount(example_disk(64));
    let root = volume.root();

    volume
        .create_chardevice(root, "dev", dir_flags(), Timestamp::ZERO, 1, 2, 1, 1)
        .unwrap();
    let locked_flags = FileFlags {
        user: rwx(true, true, true),
        ..FileFlags::default()
    };
    volume
        .create_dir(root, "locked", locked_flags, Timestamp::ZERO, 1, 2)
        .unwrap();

    assert_eq!(
        volume.traverse(root, "missing", true, 1, 2).err(),
        Some(Error::NotFound)
    );
    assert_eq!(
        volume.traverse(root, "dev/below", true, 1, 2).err(),
        Some(Error::IsNoDir)
    );
    // owner passes the execute check
    assert!(volume.traverse(root, "locked/x", true, 1, 2).is_err_and(|e| e == Error::NotFound));
    // everyone else is rejected before descending
    assert_eq!(
        volume.traverse(root, "locked/x", true, 9, 9).err(),
        Some(Error::NoPerm)
    );
}

#[test]
fn permission_check_picks_one_principal() {
    let mut volume = mount(example_disk(10));
    let root = volume.root();
    let flags = FileFlags {
        user: rwx(false, false, false),
        group: rwx(true, true, true),
        other: rwx(true, true, true),
        ..FileFlags::default()
    };
    let dev = volume
        .create_chardevice(root, "dev", flags, Timestamp::ZERO, 1, 2, 0, 0)
        .unwrap();
    let entry = volume.entry(dev).unwrap();

    // the uid match decides on the user triple alone
    assert!(!entry.check_perm(1, 2, Perm::READ));
    assert!(entry.check_perm(5, 2, Perm::READ));
    assert!(entry.check_perm(5, 7, Perm::WRITE));
}

#[test]
fn chain_extension_keeps_entries_reachable() {
    let mut volume = mount(example_disk(64));
    let root = volume.root();

    // the 512-byte root section holds 7 entries; force an extension
    for i in 0..10 {
        let name = format!("fifo{i}");
        volume
            .create_fifo(root, &name, dir_flags(), Timestamp::ZERO, 1, 2, 16)
            .unwrap();
    }

    assert_eq!(volume.count_entries(root, true).unwrap(), 10);
    for i in 0..10 {
        let name = format!("fifo{i}");
        let found = volume.find_entry(root, &name).unwrap();
        assert!(found.is_some(), "{name} not reachable");
    }

    // the extension landed in a freshly allocated section
    let last = volume.find_entry(root, "fifo9").unwrap().unwrap();
    assert_ne!(last.table, lba(3));
}

#[test]
fn continuous_file_roundtrip() {
    let mut volume = mount(example_disk(64));
    let root = volume.root();

    let file = volume
        .create_continuous_file(root, "blob", dir_flags(), Timestamp::ZERO, 1, 2, 1000, false)
        .unwrap();

    // freshly created content reads back zeroed
    let mut buf = vec![0xCC_u8; 1000];
    assert_eq!(volume.read_file(file, 0, &mut buf).unwrap(), 1000);
    assert!(buf.iter().all(|&b| b == 0));

    let data = vec![0xAB_u8; 1000];
    // writes clamp at the recorded size
    assert_eq!(volume.write_file(file, 600, &data).unwrap(), 400);
    assert_eq!(
        volume.write_file(file, 1000, &data).err(),
        Some(Error::OffsetAfterFileEnd)
    );

    let mut back = vec![0u8; 1000];
    assert_eq!(volume.read_file(file, 600, &mut back).unwrap(), 400);
    assert_eq!(&back[..400], &data[..400]);
}

#[test]
fn kernel_file_uses_the_kernel_type() {
    let mut volume = mount(example_disk(64));
    let root = volume.root();
    let file = volume
        .create_continuous_file(root, "kernel", dir_flags(), Timestamp::ZERO, 0, 0, 2048, true)
        .unwrap();
    assert!(matches!(
        volume.entry(file).unwrap().data,
        EntryData::Kernel(_)
    ));
    let payload = [0x7F, b'E', b'L', b'F'];
    assert_eq!(volume.write_file(file, 0, &payload).unwrap(), 4);
}

#[test]
fn fat_file_write_then_read() {
    let mut volume = mount(example_disk(64));
    let root = volume.root();

    let file = volume
        .create_fat_file(root, "f", dir_flags(), Timestamp::ZERO, 1, 2)
        .unwrap();

    let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(volume.write_file(file, 600, &data).unwrap(), 1000);

    let mut back = vec![0u8; 1000];
    assert_eq!(volume.read_file(file, 600, &mut back).unwrap(), 1000);
    assert_eq!(back, data);

    // a second write to the same range reuses the provisioned blocks
    let data2: Vec<u8> = data.iter().map(|b| b ^ 0xFF).collect();
    assert_eq!(volume.write_file(file, 600, &data2).unwrap(), 1000);
    assert_eq!(volume.read_file(file, 600, &mut back).unwrap(), 1000);
    assert_eq!(back, data2);
}

#[test]
fn fat_file_reads_do_not_provision() {
    let mut volume = mount(example_disk(64));
    let root = volume.root();

    let file = volume
        .create_fat_file(root, "sparse", dir_flags(), Timestamp::ZERO, 1, 2)
        .unwrap();
    let free_before: Vec<bool> = (6..20).map(|b| volume.is_free(lba(b))).collect();

    // never-written blocks read as holes
    let mut buf = vec![0xEE_u8; 1536];
    assert_eq!(volume.read_file(file, 0, &mut buf).unwrap(), 1536);
    assert!(buf.iter().all(|&b| b == 0));

    let free_after: Vec<bool> = (6..20).map(|b| volume.is_free(lba(b))).collect();
    assert_eq!(free_before, free_after);

    // a write in the middle leaves the hole in front intact
    volume.write_file(file, 1024, &[0x55; 512]).unwrap();
    let mut buf = vec![0xEE_u8; 1536];
    assert_eq!(volume.read_file(file, 0, &mut buf).unwrap(), 1536);
    assert!(buf[..1024].iter().all(|&b| b == 0));
    assert!(buf[1024..].iter().all(|&b| b == 0x55));
}

#[test]
fn set_label_roundtrip() {
    let mut volume = mount(example_disk(10));

    assert_eq!(
        volume.set_label(&"x".repeat(176), false).err(),
        Some(Error::LabelTooLong)
    );

    volume.set_label("Hello world!", true).unwrap();
    assert_eq!(volume.label(), "Hello world!");
    assert_eq!(
        &volume.device().bytes()[BLOCK + 0x50..BLOCK + 0x50 + 13],
        b"Hello world!\0"
    );

    let dev = volume.close().unwrap();
    let volume = mount(dev);
    assert_eq!(volume.label(), "Hello world!");
}

#[test]
fn remove_table_releases_its_blocks() {
    let mut volume = mount(example_disk(10));
    let root = volume.root();
    let child = volume
        .create_dir(root, "gone", dir_flags(), Timestamp::ZERO, 1, 2)
        .unwrap();
    assert!(!volume.is_free(child.lba));

    volume.remove_table(child.lba).unwrap();
    assert!(volume.is_free(child.lba));
    assert!(volume.is_free(child.lba + 1));
}

#[test]
fn everything_survives_a_remount() {
    let mut volume = mount(example_disk(64));
    let root = volume.root();

    let my_dir = volume
        .create_dir(root, "myDir", dir_flags(), Timestamp::ZERO, 1, 2)
        .unwrap();
    volume
        .create_chardevice(root, "myChrDev", dir_flags(), Timestamp::ZERO, 1, 2, 0x1234, 0x5678)
        .unwrap();
    volume
        .create_symlink(my_dir, "testLink", dir_flags(), Timestamp::ZERO, 1, 2, "../myChrDev")
        .unwrap();
    let file = volume
        .create_fat_file(my_dir, "data", dir_flags(), Timestamp::ZERO, 1, 2)
        .unwrap();
    let payload: Vec<u8> = (0..2000u32).map(|i| (i % 253) as u8).collect();
    assert_eq!(volume.write_file(file, 100, &payload).unwrap(), 2000);

    let dev = volume.close().unwrap();
    let mut volume = mount(dev);
    let root = volume.root();

    let entry = volume
        .traverse(root, "myDir/testLink", true, 1, 2)
        .unwrap();
    assert!(matches!(
        volume.entry(entry).unwrap().data,
        EntryData::CharDevice {
            id: 0x1234,
            flags: 0x5678
        }
    ));

    let file = volume.traverse(root, "myDir/data", true, 1, 2).unwrap();
    let mut back = vec![0u8; 2000];
    assert_eq!(volume.read_file(file, 100, &mut back).unwrap(), 2000);
    assert_eq!(back, payload);
}

#[test]
fn chown_and_touch_update_the_entry() {
    let mut volume = mount(example_disk(10));
    let root = volume.root();
    let dev = volume
        .create_chardevice(root, "dev", dir_flags(), Timestamp::new(5), 1, 2, 0, 0)
        .unwrap();

    volume.chown(dev, 10, 20).unwrap();
    volume
        .touch(dev, Timestamp::new(7), Timestamp::new(8))
        .unwrap();

    let entry = volume.entry(dev).unwrap();
    assert_eq!((entry.user_id, entry.group_id), (10, 20));
    assert_eq!(entry.create_ts, Timestamp::new(5));
    assert_eq!(entry.modify_ts, Timestamp::new(7));
    assert_eq!(entry.access_ts, Timestamp::new(8));
}

#[test]
fn flush_bat_block_writes_a_single_block() {
    let mut volume = mount(example_disk(10));
    volume.allocate_chained_blocks(2).unwrap();

    // in-memory state is ahead of the disk until flushed
    assert_eq!(volume.device().bytes()[2 * BLOCK + 6], 0b1111_0000);
    volume.flush_bat_block(lba(2), 0).unwrap();
    assert_eq!(volume.device().bytes()[2 * BLOCK + 6], 0b1111_1100);
}
