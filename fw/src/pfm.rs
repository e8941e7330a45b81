/*++

Licensed under the Apache-2.0 license.

File Name:

    pfm.rs

Abstract:

    File contains routines to read a flash-resident PFM, verify the
    region digests it declares, and drive the protection hardware from
    its definition list.

--*/

use pfr_capsule_types::{PfmBodyIter, PfmDef, PfmHeader, PFM_TAG};
use pfr_drivers::{
    CryptoEngine, FlashDevice, FwDomain, PlatformPort, Sha256Digest, Sha256Hasher, SpiFlash,
};
use pfr_error::{PfrError, PfrResult};
use zerocopy::FromBytes;

/// Working buffer for one manifest body
pub const PFM_BUF_BYTE_SIZE: usize = 2048;

const DIGEST_CHUNK: usize = 512;

/// A PFM read out of flash
pub struct Pfm {
    pub header: PfmHeader,
    body: [u8; PFM_BUF_BYTE_SIZE],
    body_len: usize,
}

impl Pfm {
    /// Read the manifest at `pfm_offset` (past its KCH signature) on the
    /// selected device
    pub fn read<F: SpiFlash>(flash: &mut F, pfm_offset: u32) -> PfrResult<Pfm> {
        let mut buf = [0u8; core::mem::size_of::<PfmHeader>()];
        flash.read_exact(pfm_offset, &mut buf)?;
        let header =
            PfmHeader::read_from(&buf[..]).ok_or(PfrError::VALIDATOR_DECODE_FAILED)?;
        if header.tag != PFM_TAG {
            return Err(PfrError::VALIDATOR_PFM_TAG_MISMATCH);
        }

        let total = header.length as usize;
        if total < core::mem::size_of::<PfmHeader>() {
            return Err(PfrError::VALIDATOR_DECODE_FAILED);
        }
        let body_len = total - core::mem::size_of::<PfmHeader>();
        if body_len > PFM_BUF_BYTE_SIZE {
            return Err(PfrError::FW_PFM_TOO_LARGE);
        }

        let mut body = [0u8; PFM_BUF_BYTE_SIZE];
        flash.read_exact(
            pfm_offset + core::mem::size_of::<PfmHeader>() as u32,
            &mut body[..body_len],
        )?;

        Ok(Pfm {
            header,
            body,
            body_len,
        })
    }

    pub fn defs(&self) -> PfmBodyIter<'_> {
        PfmBodyIter::new(&self.body[..self.body_len])
    }
}

fn flash_digest<F: SpiFlash, C: CryptoEngine>(
    flash: &mut F,
    crypto: &mut C,
    offset: u32,
    len: u32,
) -> PfrResult<Sha256Digest> {
    let mut hasher = crypto.sha256_start();
    let mut buf = [0u8; DIGEST_CHUNK];
    let mut offset = offset;
    let mut remaining = len as usize;
    while remaining > 0 {
        let chunk = remaining.min(DIGEST_CHUNK);
        flash.read_exact(offset, &mut buf[..chunk])?;
        hasher.update(&buf[..chunk]);
        offset += chunk as u32;
        remaining -= chunk;
    }
    Ok(hasher.finish())
}

/// Digest of the manifest bytes (header + body), used to compare a
/// staged image's firmware content against the active image's
pub fn pfm_digest<F: SpiFlash, C: CryptoEngine>(
    flash: &mut F,
    crypto: &mut C,
    pfm_offset: u32,
    length: u32,
) -> PfrResult<Sha256Digest> {
    flash_digest(flash, crypto, pfm_offset, length)
}

/// Verify every SPI region that declares a digest against the flash
/// contents
pub fn verify_region_digests<F: SpiFlash, C: CryptoEngine>(
    flash: &mut F,
    crypto: &mut C,
    pfm: &Pfm,
) -> PfrResult<()> {
    for def in pfm.defs() {
        if let PfmDef::SpiRegion {
            def,
            digest: Some(digest),
        } = def
        {
            let actual = flash_digest(flash, crypto, def.start, def.end - def.start)?;
            if actual != *digest {
                return Err(PfrError::FW_REGION_DIGEST_MISMATCH);
            }
        }
    }
    Ok(())
}

/// Derive and apply the protection config from a validated manifest:
/// SPI write protection for every region not marked writable, and (BMC
/// only) the SMBus command whitelists.
pub fn apply_protection<P: PlatformPort>(
    port: &mut P,
    device: FlashDevice,
    domain: FwDomain,
    pfm: &Pfm,
) {
    for def in pfm.defs() {
        match def {
            PfmDef::SpiRegion { def, .. } => {
                if !def.write_allowed() {
                    port.apply_write_protection(device, def.start, def.end);
                }
            }
            PfmDef::SmbusRule(rule) => {
                if domain == FwDomain::Bmc {
                    port.apply_smbus_whitelist(rule.bus_id, rule.rule_id, &rule.cmd_whitelist);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfr_capsule_gen::{CapsuleGenerator, PfmConfig, RustCrypto};
    use pfr_capsule_types::PfmSpiRegionDef;
    use pfr_model::{ModelCrypto, ModelFlash};

    fn region(start: u32, end: u32, protection: u8, digest: Option<[u8; 32]>) -> (PfmSpiRegionDef, Option<[u8; 32]>) {
        (
            PfmSpiRegionDef {
                def_type: pfr_capsule_types::PFM_DEF_SPI_REGION,
                protection,
                hash_info: digest.is_some() as u16,
                reserved: 0,
                start,
                end,
            },
            digest,
        )
    }

    #[test]
    fn test_pfm_read_roundtrip() {
        let gen = CapsuleGenerator::new(RustCrypto::default());
        let pfm_bytes = gen.gen_pfm(&PfmConfig {
            svn: 4,
            regions: vec![region(0x1000, 0x3000, 0x01, None)],
            ..Default::default()
        });

        let mut flash = ModelFlash::new(1 << 20);
        flash.select(FlashDevice::BmcFlash);
        flash.load(FlashDevice::BmcFlash, 0x400, &pfm_bytes);

        let pfm = Pfm::read(&mut flash, 0x400).unwrap();
        assert_eq!(pfm.header.svn, 4);
        assert_eq!(pfm.defs().count(), 1);
    }

    #[test]
    fn test_region_digest_check() {
        let mut flash = ModelFlash::new(1 << 20);
        flash.select(FlashDevice::BmcFlash);
        flash.load(FlashDevice::BmcFlash, 0x1000, &[0x77; 0x1000]);

        let mut crypto = ModelCrypto::default();
        let expected = {
            use pfr_drivers::CryptoEngine;
            crypto.sha256(&[0x77; 0x1000])
        };

        let gen = CapsuleGenerator::new(RustCrypto::default());
        let pfm_bytes = gen.gen_pfm(&PfmConfig {
            regions: vec![region(0x1000, 0x2000, 0x01, Some(expected))],
            ..Default::default()
        });
        flash.load(FlashDevice::BmcFlash, 0x8000, &pfm_bytes);

        let pfm = Pfm::read(&mut flash, 0x8000).unwrap();
        assert!(verify_region_digests(&mut flash, &mut crypto, &pfm).is_ok());

        // Flip one region byte: the digest no longer matches.
        flash.load(FlashDevice::BmcFlash, 0x1800, &[0x78]);
        assert_eq!(
            verify_region_digests(&mut flash, &mut crypto, &pfm),
            Err(PfrError::FW_REGION_DIGEST_MISMATCH)
        );
    }
}
