use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tabfs::{
    EntryData, EntryRef, Lba48, MemDevice, SectionRef, SystemClock, Volume,
};

#[derive(Debug, Parser)]
struct Args {
    /// Image file housing the TabFS volume
    image: PathBuf,
    /// Block size of the image
    #[arg(long, default_value_t = 512)]
    block_size: u32,
    /// LBA of the boot block
    #[arg(long, default_value_t = 0)]
    boot_lba: u64,
    /// Acting user id for permission checks along paths
    #[arg(long, default_value_t = 0)]
    uid: u32,
    /// Acting group id for permission checks along paths
    #[arg(long, default_value_t = 0)]
    gid: u32,
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Print the volume descriptor
    Volume,
    /// Print the BAT chain and a free-block summary
    Bat,
    /// Recursively list the directory tree
    Tree,
    /// Print the entry a path names
    Stat { path: String },
    /// Dump a file's content to stdout
    Read {
        path: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long)]
        len: Option<u64>,
    },
}

type Vol = Volume<MemDevice, SystemClock>;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    simple_logger::SimpleLogger::new()
        .with_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init()?;

    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("reading {}", args.image.display()))?;
    let dev = MemDevice::from_vec(bytes, args.block_size);
    let mut volume = Vol::mount(dev, SystemClock, Lba48::new(args.boot_lba), true)
        .map_err(|err| anyhow::anyhow!("mount failed: {err}"))?;

    match args.cmd {
        Command::Volume => print_volume(&volume),
        Command::Bat => print_bat(&volume),
        Command::Tree => {
            let root = volume.root();
            print_tree(&mut volume, root, 0)?;
        }
        Command::Stat { path } => {
            let root = volume.root();
            let entry = volume
                .traverse(root, &path, false, args.uid, args.gid)
                .map_err(|err| anyhow::anyhow!("{path}: {err}"))?;
            print_entry(&mut volume, entry, 0)?;
        }
        Command::Read { path, offset, len } => {
            let root = volume.root();
            let entry = volume
                .traverse(root, &path, true, args.uid, args.gid)
                .map_err(|err| anyhow::anyhow!("{path}: {err}"))?;
            let len = len.unwrap_or(u64::from(volume.block_size()));
            let mut buf = vec![0u8; len as usize];
            let read = volume
                .read_file(entry, offset, &mut buf)
                .map_err(|err| anyhow::anyhow!("{path}: {err}"))?;
            std::io::stdout().write_all(&buf[..read])?;
        }
    }
    Ok(())
}

fn print_volume(volume: &Vol) {
    println!("label:      {:?}", volume.label());
    println!("block size: {}", volume.block_size());
    println!(
        "root:       {} ({} bytes)",
        volume.root().lba,
        volume.root().size
    );
    println!("bat chain:  {} section(s)", volume.bat_sections().len());
}

fn print_bat(volume: &Vol) {
    for (i, section) in volume.bat_sections().iter().enumerate() {
        let free = section
            .data()
            .iter()
            .map(|byte| byte.count_zeros() as u64)
            .sum::<u64>();
        println!(
            "section {i}: lba {} | {} block(s) | {} of {} described blocks free | next {:#x}",
            section.lba(),
            section.block_count(),
            free,
            section.lba_count(),
            section.next_bat()
        );
    }
}

fn print_tree(volume: &mut Vol, table: SectionRef, level: usize) -> anyhow::Result<()> {
    let entries = volume
        .list_entries(table)
        .map_err(|err| anyhow::anyhow!("listing table: {err}"))?;
    for entry in entries {
        print_entry(volume, entry, level)?;
        if let EntryData::Directory(child) = volume
            .entry(entry)
            .map_err(|err| anyhow::anyhow!("reading entry: {err}"))?
            .data
        {
            print_tree(volume, child, level + 1)?;
        }
    }
    Ok(())
}

fn print_entry(volume: &mut Vol, entry_ref: EntryRef, level: usize) -> anyhow::Result<()> {
    let entry = volume
        .entry(entry_ref)
        .map_err(|err| anyhow::anyhow!("reading entry: {err}"))?;
    let name = volume
        .entry_name(entry_ref)
        .map_err(|err| anyhow::anyhow!("resolving name: {err}"))?;

    let kind = match entry.data {
        EntryData::Directory(t) => format!("dir -> {} ({} bytes)", t.lba, t.size),
        EntryData::FatFile(t) => format!("fat file, index at {} ({} bytes)", t.lba, t.size),
        EntryData::SegmentedFile(_) => "segmented file (reserved)".into(),
        EntryData::CharDevice { id, flags } => format!("chardev id {id:#x} flags {flags:#x}"),
        EntryData::BlockDevice { id, flags } => format!("blockdev id {id:#x} flags {flags:#x}"),
        EntryData::Fifo { buffer_size } => format!("fifo ({buffer_size} bytes)"),
        EntryData::Symlink { offset } => format!("symlink (path slot {offset})"),
        EntryData::Socket { address } => format!("socket ({address:#x})"),
        EntryData::ContinuousFile(t) => format!("file at {} ({} bytes)", t.lba, t.size),
        EntryData::Kernel(t) => format!("kernel at {} ({} bytes)", t.lba, t.size),
    };
    println!(
        "{:indent$}{name} [uid {} gid {}] {kind}",
        "",
        entry.user_id,
        entry.group_id,
        indent = level * 2
    );
    Ok(())
}
