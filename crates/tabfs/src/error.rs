//! The single error enumeration shared by every fallible operation.

/// Errors reported by the TabFS core.
///
/// `RangeNoSpace` is an internal signal of the allocation scan ("this
/// position cannot satisfy the range, try elsewhere") and never escapes the
/// block allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("argument error")]
    Args,
    #[error("generic error")]
    Generic,
    #[error("no bootsignature")]
    NoBootSig,
    #[error("missing or wrong magic")]
    WrongMagic,
    #[error("volume label too long")]
    LabelTooLong,
    #[error("no space at position to satisfy range")]
    RangeNoSpace,
    #[error("no space on device left")]
    DeviceNoSpace,
    #[error("name too long")]
    NameTooLong,
    #[error("entry is no directory")]
    IsNoDir,
    #[error("no permission")]
    NoPerm,
    #[error("directory is full")]
    DirFull,
    #[error("could not find entry")]
    NotFound,
    #[error("offset is after end of file")]
    OffsetAfterFileEnd,
    #[error("file allocation table is full")]
    FatFull,
}

pub type Result<T> = core::result::Result<T, Error>;
