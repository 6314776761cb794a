//! The wall-clock port.
//!
//! FAT-backed files stamp every provisioned block with the current time and
//! resolve conflicting records for the same block index by picking the
//! greatest stamp, so the only requirement on a clock is that it does not
//! run backwards while a volume is mounted.

use crate::types::Timestamp;

/// A source of opaque 64-bit timestamps.
pub trait Clock {
    fn now(&mut self) -> Timestamp;
}

/// A clock for hosts without a time source. Every stamp is zero.
pub struct NoClock;

impl Clock for NoClock {
    fn now(&mut self) -> Timestamp {
        Timestamp::ZERO
    }
}

/// The system clock, in microseconds since the UNIX epoch.
#[cfg(feature = "std")]
pub struct SystemClock;

#[cfg(feature = "std")]
impl Clock for SystemClock {
    fn now(&mut self) -> Timestamp {
        Timestamp::new(chrono::Utc::now().timestamp_micros() as u64)
    }
}
