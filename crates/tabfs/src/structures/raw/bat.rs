/// Header of a BAT section. The rest of the section,
/// `block_count * block_size - 6` bytes, is the allocation bitmap: bit 7 of
/// data byte 0 describes the first LBA covered by the section, "1" means
/// allocated.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::NoUninit, bytemuck::AnyBitPattern)]
pub struct RawBatHeader {
    /// Next BAT section; zero for the last
    pub next_bat: [u8; 4],
    /// How many contiguous blocks this section occupies, at least 1
    pub block_count: [u8; 2],
}

/// Byte size of [`RawBatHeader`].
pub const BAT_HEADER_SIZE: usize = 6;
