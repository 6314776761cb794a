//! A library for working with TabFS-28 volumes
//! Supports mounting, inspecting and modifying TabFS volumes on any
//! LBA-28 addressed block device, with no-std support
//!
//! The host supplies the outside world through two small ports: a
//! [`BlockDevice`] for byte I/O keyed by LBA, and a [`Clock`] for the
//! stamps the FAT index uses to version its records. Everything else
//! (the chained allocation bitmap, the entry-table chains with long-name
//! spilling, the per-file FAT index and the section caches) lives in this
//! crate and is reached through [`Volume`].
//!
//! ## Cargo Features
//!
//! - **std**: enables the chrono-backed [`SystemClock`]; without it the
//! crate is `no_std` (with `alloc`) and the host provides the clock

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

// On-disk integers are little endian and the raw structures reinterpret
// bytes in place.
#[cfg(not(target_endian = "little"))]
compile_error!("This crate only supports little endian systems");

pub mod cache;
pub mod device;
pub mod error;
pub mod structures;
pub mod time;
pub mod types;
pub mod volume;

pub use device::{BlockDevice, MemDevice};
pub use error::{Error, Result};
pub use structures::{
    Acl, Entry, EntryData, EntryName, EntryType, FatRecord, FileFlags, Perm, Slot, TableInfo,
    VolumeFlags,
};
pub use time::{Clock, NoClock};
#[cfg(feature = "std")]
pub use time::SystemClock;
pub use types::{Lba28, Lba48, SectionRef, Timestamp};
pub use volume::{EntryRef, Volume};
