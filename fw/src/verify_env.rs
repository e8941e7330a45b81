/*++

Licensed under the Apache-2.0 license.

File Name:

    verify_env.rs

Abstract:

    Capsule verification support routines: bridges the flash, crypto and
    policy collaborators into the verification environment.

--*/

use crate::persistent::{PersistentState, SVN_MAX};
use pfr_capsule_types::WireScalar;
use pfr_capsule_verify::CapsuleVerificationEnv;
use pfr_drivers::{
    CryptoEngine, FwDomain, PolicyStorage, Sha256Digest, Sha256Hasher, SpiFlash,
};
use pfr_error::PfrResult;

const FLASH_DIGEST_CHUNK: usize = 512;

/// Firmware Verification Environment
pub struct FwVerificationEnv<'a, F: SpiFlash, C: CryptoEngine, S: PolicyStorage> {
    pub flash: &'a mut F,
    pub crypto: &'a mut C,
    pub persistent: &'a mut PersistentState<S>,
}

impl<'a, F: SpiFlash, C: CryptoEngine, S: PolicyStorage> CapsuleVerificationEnv
    for &mut FwVerificationEnv<'a, F, C, S>
{
    /// Calculate the digest of an in-memory buffer
    fn sha256_digest(&mut self, data: &[u8]) -> PfrResult<Sha256Digest> {
        Ok(self.crypto.sha256(data))
    }

    /// Calculate the digest over the selected flash device, streaming one
    /// chunk at a time
    fn sha256_flash_digest(&mut self, offset: u32, len: u32) -> PfrResult<Sha256Digest> {
        let mut hasher = self.crypto.sha256_start();
        let mut buf = [0u8; FLASH_DIGEST_CHUNK];
        let mut offset = offset;
        let mut remaining = len as usize;
        while remaining > 0 {
            let chunk = remaining.min(FLASH_DIGEST_CHUNK);
            self.flash.read_exact(offset, &mut buf[..chunk])?;
            hasher.update(&buf[..chunk]);
            offset += chunk as u32;
            remaining -= chunk;
        }
        Ok(hasher.finish())
    }

    /// ECDSA P-256 verification; values ride in the low 32 bytes of the
    /// 48-byte wire slots
    fn ecdsa256_verify(
        &mut self,
        pub_x: &WireScalar,
        pub_y: &WireScalar,
        sig_r: &WireScalar,
        sig_s: &WireScalar,
        digest: &Sha256Digest,
    ) -> PfrResult<bool> {
        let scalar = |slot: &WireScalar| -> [u8; 32] {
            let mut out = [0u8; 32];
            out.copy_from_slice(&slot[..32]);
            out
        };
        Ok(self.crypto.ecdsa_p256_verify(
            &scalar(pub_x),
            &scalar(pub_y),
            &scalar(sig_r),
            &scalar(sig_s),
            digest,
        ))
    }

    fn read_exact(&mut self, offset: u32, buf: &mut [u8]) -> PfrResult<()> {
        self.flash.read_exact(offset, buf)
    }

    fn root_key_digest(&self) -> PfrResult<Sha256Digest> {
        self.persistent.root_key_digest()
    }

    /// Storage faults read as "key cancelled": fail closed
    fn csk_key_valid(&self, domain: FwDomain, key_id: u32) -> bool {
        self.persistent.csk_key_valid(domain, key_id).unwrap_or(false)
    }

    /// Storage faults read as the maximum threshold: fail closed
    fn svn_threshold(&self, domain: FwDomain) -> u8 {
        self.persistent.svn_threshold(domain).unwrap_or(SVN_MAX)
    }

    fn cancel_csk_key(&mut self, domain: FwDomain, key_id: u32) -> PfrResult<()> {
        self.persistent.cancel_csk_key(domain, key_id)
    }

    fn erase_policy_store(&mut self) -> PfrResult<()> {
        self.persistent.erase();
        Ok(())
    }
}
