use crate::error::{Error, Result};
use crate::structures::raw::header::RawHeader;
use crate::structures::{VolumeFlags, MAGIC};
use crate::types::Lba48;

/// The decoded boot-block footer.
///
/// A footer is valid iff the boot signature is {0x55, 0xAA} and the magic
/// compares equal byte for byte; validation order is signature first.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub flags: VolumeFlags,
    pub info_lba: Lba48,
}

impl Header {
    pub fn parse(bytes: &[u8; 64]) -> Result<Self> {
        let raw: &RawHeader = bytemuck::from_bytes(bytes);

        if raw.boot_signature != [0x55, 0xAA] {
            return Err(Error::NoBootSig);
        }
        if raw.magic != MAGIC {
            return Err(Error::WrongMagic);
        }

        Ok(Self {
            flags: VolumeFlags::from_bits_retain(u16::from_le_bytes(raw.flags)),
            info_lba: Lba48::from_le_bytes(raw.info_lba),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn footer() -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..16].copy_from_slice(&MAGIC);
        bytes[48] = 0x01;
        bytes[54] = 0x01;
        bytes[62] = 0x55;
        bytes[63] = 0xAA;
        bytes
    }

    #[test]
    fn parses_valid_footer() {
        let header = Header::parse(&footer()).unwrap();
        assert!(header.flags.contains(VolumeFlags::ABSOLUTE_LBAS));
        assert_eq!(header.info_lba.raw(), 1);
    }

    #[test]
    fn rejects_missing_bootsig() {
        let mut bytes = footer();
        bytes[63] = 0;
        assert!(matches!(Header::parse(&bytes), Err(Error::NoBootSig)));
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut bytes = footer();
        bytes[0] = b'X';
        assert!(matches!(Header::parse(&bytes), Err(Error::WrongMagic)));
    }
}
