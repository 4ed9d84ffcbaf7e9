// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Device Driver Interface (DDI) library - Buffer descriptor module
//!
//! A buffer pointer list (BPL) is a device-readable page of buffer
//! descriptor entries. Each entry is 12 bytes, little endian:
//!
//! | Offset | Field     | Description                              |
//! |--------|-----------|------------------------------------------|
//! | 0      | `addr_lo` | Low 32 bits of the bus address           |
//! | 4      | `addr_hi` | High 32 bits of the bus address          |
//! | 8      | `tus`     | Byte size (24 bits) and entry kind (8)   |
//!
//! A [`BdeKind::Link`] entry points at the next page; its size is the byte
//! length of the valid entries in that page.

use bitfield_struct::bitfield;
use zerocopy::byteorder::LittleEndian;
use zerocopy::byteorder::U32;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

use crate::DdiError;
use crate::DdiResult;

/// Size of one descriptor entry in bytes
pub const BDE_SIZE: usize = std::mem::size_of::<Bde>();

/// Largest byte count a single descriptor entry can describe
pub const BDE_MAX_SIZE: u32 = (1 << 24) - 1;

/// Kind of a descriptor entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BdeKind {
    /// Host to device data
    Transmit = 0x00,

    /// Device to host data
    Receive = 0x02,

    /// Continuation link to another descriptor page
    Link = 0x06,
}

impl TryFrom<u8> for BdeKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            x if x == BdeKind::Transmit as u8 => Ok(BdeKind::Transmit),
            x if x == BdeKind::Receive as u8 => Ok(BdeKind::Receive),
            x if x == BdeKind::Link as u8 => Ok(BdeKind::Link),
            _ => Err(value)?,
        }
    }
}

/// Size and kind word of a descriptor entry
#[bitfield(u32)]
pub struct BdeTus {
    /// Byte size of the described region
    #[bits(24)]
    pub size: u32,

    /// Raw [`BdeKind`] value
    #[bits(8)]
    pub kind: u8,
}

/// Buffer descriptor entry as laid out in a descriptor page
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Bde {
    addr_lo: U32<LittleEndian>,
    addr_hi: U32<LittleEndian>,
    tus: U32<LittleEndian>,
}

impl Bde {
    /// Build an entry.
    ///
    /// # Error
    /// * `DdiError::InvalidParameter` - `size` does not fit in 24 bits
    pub fn new(kind: BdeKind, addr: u64, size: u32) -> DdiResult<Self> {
        if size > BDE_MAX_SIZE {
            Err(DdiError::InvalidParameter)?
        }

        let tus = BdeTus::new().with_size(size).with_kind(kind as u8);
        Ok(Self {
            addr_lo: U32::new(addr as u32),
            addr_hi: U32::new((addr >> 32) as u32),
            tus: U32::new(tus.into()),
        })
    }

    /// Decode an entry from the first [`BDE_SIZE`] bytes of `bytes`.
    ///
    /// # Error
    /// * `DdiError::IndexOutOfBounds` - `bytes` is too short
    pub fn decode(bytes: &[u8]) -> DdiResult<Self> {
        let raw = bytes.get(..BDE_SIZE).ok_or(DdiError::IndexOutOfBounds)?;
        Bde::read_from_bytes(raw).map_err(|_| DdiError::IndexOutOfBounds)
    }

    /// Wire representation of the entry
    pub fn encode(&self) -> &[u8] {
        self.as_bytes()
    }

    /// Bus address of the described region
    pub fn addr(&self) -> u64 {
        (u64::from(self.addr_hi.get()) << 32) | u64::from(self.addr_lo.get())
    }

    /// Byte size of the described region
    pub fn size(&self) -> u32 {
        BdeTus::from(self.tus.get()).size()
    }

    /// Entry kind, or the raw value if it is not recognized
    pub fn kind(&self) -> Result<BdeKind, u8> {
        BdeKind::try_from(BdeTus::from(self.tus.get()).kind())
    }

    /// Returns `true` for a continuation link
    pub fn is_link(&self) -> bool {
        self.kind() == Ok(BdeKind::Link)
    }
}

/// Location of a descriptor list handed to the device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BplRef {
    /// Bus address of the first descriptor page
    pub addr: u64,

    /// Byte length of the valid entries in the first page
    pub size: u32,
}
