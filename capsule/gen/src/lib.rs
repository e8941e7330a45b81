/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains data structures for the PFR capsule generator.

--*/

mod generator;
mod rustcrypto;

pub use generator::CapsuleGenerator;
pub use rustcrypto::RustCrypto;

use pfr_capsule_types::{PfmSmbusRuleDef, PfmSpiRegionDef};

/// Capsule Generator Crypto Trait
pub trait CapsuleGeneratorCrypto {
    /// Calculate SHA-256 digest
    fn sha256_digest(&self, data: &[u8]) -> anyhow::Result<[u8; 32]>;

    /// Calculate an ECDSA P-256 signature over a SHA-256 digest
    fn ecdsa256_sign(
        &self,
        digest: &[u8; 32],
        priv_key: &[u8; 32],
    ) -> anyhow::Result<([u8; 32], [u8; 32])>;

    /// Derive the public key of a P-256 private key
    fn ecdsa256_pub_key(&self, priv_key: &[u8; 32]) -> anyhow::Result<([u8; 32], [u8; 32])>;
}

/// Signing keys for one capsule: the root key and the CSK it certifies
#[derive(Clone)]
pub struct KeyConfig {
    pub root_priv: [u8; 32],

    pub csk_priv: [u8; 32],

    pub csk_key_id: u32,

    /// CSK capability bitmask written into the CSK entry
    pub csk_permissions: u32,
}

/// PFM contents to generate
#[derive(Default, Clone)]
pub struct PfmConfig {
    pub svn: u8,

    pub bkc: u8,

    pub major: u8,

    pub minor: u8,

    pub oem: [u8; 16],

    /// SPI region defs, each with an optional region digest
    pub regions: Vec<(PfmSpiRegionDef, Option<[u8; 32]>)>,

    pub smbus_rules: Vec<PfmSmbusRuleDef>,
}

/// PBC contents to generate
#[derive(Default, Clone)]
pub struct PbcConfig {
    /// One bit per 4 KiB page of the protected flash
    pub bitmap_nbit: u32,

    /// Page indices to erase
    pub erase_pages: Vec<u32>,

    /// Page indices to copy, with their 4 KiB payloads; payload pages are
    /// emitted in ascending page order
    pub copy_pages: Vec<(u32, Vec<u8>)>,
}

/// Deterministic test keys, analogous to checked-in development signing
/// keys. Scalars are below the P-256 group order; public keys are derived
/// at runtime.
pub mod test_keys {
    use super::KeyConfig;

    pub const ROOT_KEY_PRIVATE: [u8; 32] = [
        0x1c, 0x9e, 0x2f, 0x5a, 0x77, 0x03, 0xe8, 0x41, 0xb2, 0x6d, 0x58, 0xc4, 0x8f, 0x12, 0xa5,
        0x3e, 0x64, 0xd0, 0x9b, 0x27, 0xf1, 0x4c, 0x86, 0x35, 0xaa, 0x71, 0x0e, 0xd9, 0x52, 0xbd,
        0x38, 0x97,
    ];

    pub const CSK_KEY_0_PRIVATE: [u8; 32] = [
        0x4b, 0x21, 0xe6, 0x7d, 0x90, 0x3a, 0x5c, 0xf8, 0x16, 0xc3, 0x2b, 0xae, 0x49, 0xd7, 0x60,
        0x85, 0xfb, 0x0d, 0x94, 0x6e, 0x33, 0xb8, 0x51, 0xc7, 0x08, 0xe2, 0x7f, 0x1a, 0xd4, 0x46,
        0x99, 0x62,
    ];

    pub const CSK_KEY_1_PRIVATE: [u8; 32] = [
        0x73, 0x0f, 0xb4, 0x2e, 0x81, 0x5d, 0xc9, 0x17, 0x6a, 0xf2, 0x40, 0x9c, 0x25, 0xe1, 0x58,
        0xbf, 0x04, 0x76, 0xd3, 0x8a, 0x1f, 0x65, 0xe0, 0x3b, 0xc8, 0x52, 0x97, 0x2d, 0xb1, 0x69,
        0x0c, 0xd5,
    ];

    /// Key config used by most tests: CSK 0 with every capability bit
    pub fn default_keys() -> KeyConfig {
        KeyConfig {
            root_priv: ROOT_KEY_PRIVATE,
            csk_priv: CSK_KEY_0_PRIVATE,
            csk_key_id: 0,
            csk_permissions: 0x1F,
        }
    }
}
