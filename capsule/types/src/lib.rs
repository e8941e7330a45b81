/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains the bit-exact wire structures for signed capsules.

--*/

#![cfg_attr(not(feature = "std"), no_std)]

use zerocopy::{AsBytes, FromBytes};

pub const BLOCK0_MAGIC: u32 = 0xB6EA_FD19;
pub const BLOCK1_MAGIC: u32 = 0xF27F_28D7;
pub const ROOT_ENTRY_MAGIC: u32 = 0xA757_A046;
pub const CSK_ENTRY_MAGIC: u32 = 0x1471_1C2F;
pub const B0_ENTRY_MAGIC: u32 = 0x1536_4367;
pub const CURVE_MAGIC_SECP256: u32 = 0xC7B8_8C74;

pub const BLOCK0_BYTE_SIZE: usize = 128;
pub const BLOCK1_BYTE_SIZE: usize = 896;
pub const KCH_SIGNATURE_BYTE_SIZE: usize = 1024;

pub const WIRE_SCALAR_BYTE_SIZE: usize = 48;
pub const ECC256_SCALAR_BYTE_SIZE: usize = 32;
pub const SHA256_DIGEST_BYTE_SIZE: usize = 32;

/// Sentinel for the root entry's permissions and key id fields
pub const ROOT_ENTRY_SENTINEL: u32 = 0xFFFF_FFFF;

/// Highest CSK key id representable in the cancellation bitmaps
pub const CSK_KEY_ID_MAX: u32 = 127;

/// Flag bits in the Block0 `pc_type` word
pub const PC_TYPE_KEY_CANCELLATION: u32 = 1 << 8;
pub const PC_TYPE_DECOMMISSION: u32 = 1 << 9;

/// Protected-content length rules
pub const PC_LENGTH_ALIGN: u32 = 128;
pub const CANCEL_PAYLOAD_BYTE_SIZE: u32 = 128;
pub const CPLD_UPDATE_PC_LENGTH: u32 = 0x10_0000;
pub const PCH_PC_LENGTH_MAX: u32 = 0x100_0000;
pub const BMC_PC_LENGTH_MAX: u32 = 0x200_0000;

pub const PFM_TAG: u32 = 0x02B3_CE1D;
pub const PFM_MAX_SVN: u8 = 64;
pub const PFM_DEF_SPI_REGION: u8 = 0x01;
pub const PFM_DEF_SMBUS_RULE: u8 = 0x02;

pub const PBC_TAG: u32 = 0x5F50_4243;
pub const PBC_VERSION: u32 = 2;
pub const PBC_PAGE_SIZE: u32 = 4096;
pub const PBC_PATTERN_SIZE: u32 = 1;
pub const PBC_PATTERN: u32 = 0xFF;
pub const PBC_HEADER_BYTE_SIZE: usize = 128;

/// 48-byte wire slot for a P-256 scalar or coordinate. The value occupies
/// the low 32 bytes; the trailing 16 bytes are zero.
pub type WireScalar = [u8; WIRE_SCALAR_BYTE_SIZE];

/// Round a protected-content length up to the 128-byte signing boundary
pub const fn pc_align(len: u32) -> u32 {
    (len + PC_LENGTH_ALIGN - 1) & !(PC_LENGTH_ALIGN - 1)
}

/// Protected-content type carried in the low byte of `pc_type`
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProtectedContentType {
    CpldUpdate = 0,
    PchPfm = 1,
    PchUpdate = 2,
    BmcPfm = 3,
    BmcUpdate = 4,
}

impl ProtectedContentType {
    /// Decode the low byte of a `pc_type` word
    pub fn from_pc_type(pc_type: u32) -> Option<Self> {
        match pc_type & 0xFF {
            0 => Some(Self::CpldUpdate),
            1 => Some(Self::PchPfm),
            2 => Some(Self::PchUpdate),
            3 => Some(Self::BmcPfm),
            4 => Some(Self::BmcUpdate),
            _ => None,
        }
    }

    /// CSK capability bit a signing key must carry for this type
    pub fn capability_mask(&self) -> u32 {
        match self {
            Self::CpldUpdate => 0x01,
            Self::PchPfm => 0x02,
            Self::PchUpdate => 0x04,
            Self::BmcPfm => 0x08,
            Self::BmcUpdate => 0x10,
        }
    }
}

/// Block0 of the KCH signature: the protected-content descriptor
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug)]
pub struct Block0 {
    pub magic: u32,
    pub pc_length: u32,
    pub pc_type: u32,
    pub reserved: u32,
    pub sha256: [u8; SHA256_DIGEST_BYTE_SIZE],
    /// Present on the wire, not checked by this core
    pub sha384: [u8; 48],
    pub reserved2: [u8; 32],
}

impl Block0 {
    pub fn content_type(&self) -> Option<ProtectedContentType> {
        ProtectedContentType::from_pc_type(self.pc_type)
    }

    pub fn is_key_cancellation(&self) -> bool {
        self.pc_type & PC_TYPE_KEY_CANCELLATION != 0
    }

    pub fn is_decommission(&self) -> bool {
        self.pc_type & PC_TYPE_DECOMMISSION != 0
    }
}

/// Block1 header
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug)]
pub struct Block1Header {
    pub magic: u32,
    pub reserved: [u8; 12],
}

/// Block1 root key entry. The root key is pinned by digest; its
/// permissions and key id fields must hold the all-ones sentinel.
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug)]
pub struct RootEntry {
    pub magic: u32,
    pub curve_magic: u32,
    pub permissions: u32,
    pub key_id: u32,
    pub pubkey_x: WireScalar,
    pub pubkey_y: WireScalar,
    pub reserved: [u8; 20],
}

/// Block1 code signing key entry, signed by the root key over bytes
/// [4, 136) of the entry (curve magic through reserved).
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug)]
pub struct CskEntry {
    pub magic: u32,
    pub curve_magic: u32,
    pub permissions: u32,
    pub key_id: u32,
    pub pubkey_x: WireScalar,
    pub pubkey_y: WireScalar,
    pub reserved: [u8; 24],
    pub sig_r: WireScalar,
    pub sig_s: WireScalar,
}

/// Byte range of a CSK entry covered by its signature
pub const CSK_ENTRY_SIGNED_RANGE: core::ops::Range<usize> = 4..136;

/// Terminal Block1 entry: the signature over the full 128-byte Block0
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug)]
pub struct Block0Entry {
    pub magic: u32,
    pub curve_magic: u32,
    pub sig_r: WireScalar,
    pub sig_s: WireScalar,
}

/// Block1 of the KCH signature: the key chain
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone)]
pub struct Block1 {
    pub header: Block1Header,
    pub root_entry: RootEntry,
    /// Reinterpreted as a `Block0Entry` when Block0 carries the
    /// key-cancellation flag
    pub csk_entry: CskEntry,
    pub b0_entry: Block0Entry,
    pub padding: [u8; 412],
}

/// Complete 1024-byte KCH signature: Block0 followed by Block1
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone)]
pub struct KchSignature {
    pub block0: Block0,
    pub block1: Block1,
}

/// Protected content of a key-cancellation certificate
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug)]
pub struct KeyCancellationPayload {
    pub csk_id: u32,
    pub reserved: [u8; 124],
}

/// Platform Firmware Manifest header
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug)]
pub struct PfmHeader {
    pub tag: u32,
    pub svn: u8,
    pub bkc: u8,
    pub major: u8,
    pub minor: u8,
    pub reserved: u32,
    pub oem: [u8; 16],
    /// Header plus body length in bytes
    pub length: u32,
}

/// SPI region definition in a PFM body. When `hash_info` is 1 a 32-byte
/// SHA-256 digest of the region follows the definition.
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug)]
pub struct PfmSpiRegionDef {
    pub def_type: u8,
    pub protection: u8,
    pub hash_info: u16,
    pub reserved: u32,
    pub start: u32,
    /// Exclusive, 4 KiB aligned
    pub end: u32,
}

impl PfmSpiRegionDef {
    pub const PROTECTION_READ_ALLOWED: u8 = 1 << 0;
    pub const PROTECTION_WRITE_ALLOWED: u8 = 1 << 1;

    pub fn has_digest(&self) -> bool {
        self.hash_info == 1
    }

    pub fn write_allowed(&self) -> bool {
        self.protection & Self::PROTECTION_WRITE_ALLOWED != 0
    }
}

/// SMBus rule definition in a PFM body
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug)]
pub struct PfmSmbusRuleDef {
    pub def_type: u8,
    pub reserved: [u8; 3],
    pub bus_id: u8,
    pub rule_id: u8,
    pub reserved2: u16,
    /// 256-bit command whitelist bitmap
    pub cmd_whitelist: [u8; 32],
}

/// One parsed PFM body definition
#[derive(Debug)]
pub enum PfmDef<'a> {
    SpiRegion {
        def: PfmSpiRegionDef,
        digest: Option<&'a [u8; SHA256_DIGEST_BYTE_SIZE]>,
    },
    SmbusRule(PfmSmbusRuleDef),
}

/// Walks the packed definition list of a PFM body. The body is covered by
/// the manifest signature, so the walk ends at the first byte that does
/// not start a known definition.
pub struct PfmBodyIter<'a> {
    body: &'a [u8],
}

impl<'a> PfmBodyIter<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self { body }
    }
}

impl<'a> Iterator for PfmBodyIter<'a> {
    type Item = PfmDef<'a>;

    fn next(&mut self) -> Option<PfmDef<'a>> {
        match *self.body.first()? {
            PFM_DEF_SPI_REGION => {
                let def = PfmSpiRegionDef::read_from_prefix(self.body)?;
                let mut rest = &self.body[core::mem::size_of::<PfmSpiRegionDef>()..];
                let digest = if def.has_digest() {
                    let bytes = rest.get(..SHA256_DIGEST_BYTE_SIZE)?;
                    rest = &rest[SHA256_DIGEST_BYTE_SIZE..];
                    Some(<&[u8; SHA256_DIGEST_BYTE_SIZE]>::try_from(bytes).ok()?)
                } else {
                    None
                };
                self.body = rest;
                Some(PfmDef::SpiRegion { def, digest })
            }
            PFM_DEF_SMBUS_RULE => {
                let def = PfmSmbusRuleDef::read_from_prefix(self.body)?;
                self.body = &self.body[core::mem::size_of::<PfmSmbusRuleDef>()..];
                Some(PfmDef::SmbusRule(def))
            }
            _ => None,
        }
    }
}

/// Page Block Compression header
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug)]
pub struct PbcHeader {
    pub tag: u32,
    pub version: u32,
    pub page_size: u32,
    pub pattern_size: u32,
    pub pattern: u32,
    /// One bit per 4 KiB page; multiple of 8
    pub bitmap_nbit: u32,
    pub payload_len: u32,
    pub reserved: [u32; 25],
}

impl PbcHeader {
    /// Size of each of the two bitmaps in bytes
    pub fn bitmap_byte_size(&self) -> u32 {
        self.bitmap_nbit / 8
    }

    /// Offset of the active bitmap relative to the PBC header
    pub fn active_bitmap_offset(&self) -> u32 {
        PBC_HEADER_BYTE_SIZE as u32
    }

    /// Offset of the compression bitmap relative to the PBC header
    pub fn compression_bitmap_offset(&self) -> u32 {
        PBC_HEADER_BYTE_SIZE as u32 + self.bitmap_byte_size()
    }

    /// Offset of the payload stream relative to the PBC header
    pub fn payload_offset(&self) -> u32 {
        PBC_HEADER_BYTE_SIZE as u32 + 2 * self.bitmap_byte_size()
    }
}
