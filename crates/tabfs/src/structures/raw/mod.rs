//! Bit-exact on-disk forms.
//!
//! Every multi-byte integer on disk is little-endian; the structs here keep
//! them as byte arrays so the types have alignment 1 and no endianness of
//! the host leaks into the layout. The cooked types in the parent module
//! convert at the boundary.

pub mod bat;
pub mod fat;
pub mod header;
pub mod table;
pub mod volume_info;
