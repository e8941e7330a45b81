/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    PFR capsule verification library.

--*/
#![cfg_attr(not(feature = "std"), no_std)]

mod validator;
mod verifier;

use pfr_capsule_types::{ProtectedContentType, WireScalar};
use pfr_drivers::{FwDomain, Sha256Digest};
use pfr_error::{PfrError, PfrResult};

pub use validator::{is_pbc_valid, CapsuleValidator};
pub use verifier::SignatureVerifier;

/// Validated Block0 information
#[derive(Debug, Copy, Clone)]
pub struct Block0Info {
    /// Raw `pc_type` word, flag bits included
    pub pc_type: u32,

    /// Protected-content length in bytes
    pub pc_length: u32,
}

impl Block0Info {
    pub fn content_type(&self) -> Option<ProtectedContentType> {
        ProtectedContentType::from_pc_type(self.pc_type)
    }
}

/// Where a validated update capsule's pieces live on flash
#[derive(Debug, Copy, Clone)]
pub struct UpdateInfo {
    /// Security version number carried by the capsule
    pub svn: u8,

    /// Offset of the embedded signed PFM (its KCH signature). Zero for a
    /// CPLD capsule, which carries no PFM.
    pub pfm_offset: u32,

    /// Length of the signed PFM: KCH signature plus padded manifest
    pub pfm_length: u32,

    /// Offset of the PBC structure. Zero for a CPLD capsule.
    pub pbc_offset: u32,
}

/// Outcome of `CapsuleValidator::check_capsule_before_update`
#[derive(Debug, Copy, Clone)]
pub enum Decision {
    /// The capsule authenticates and passes policy; the update may proceed
    Proceed(UpdateInfo),

    /// The capsule was a key-cancellation certificate; the key is
    /// cancelled and no image changes
    KeyCancelled,

    /// The capsule was a decommission capsule; the policy store is erased
    Decommissioned,

    /// The capsule was rejected; existing images are untouched
    Rejected(PfrError),
}

/// Domain whose policy governs a protected-content type
pub fn content_domain(content_type: ProtectedContentType) -> FwDomain {
    match content_type {
        ProtectedContentType::CpldUpdate => FwDomain::Cpld,
        ProtectedContentType::PchPfm | ProtectedContentType::PchUpdate => FwDomain::Pch,
        ProtectedContentType::BmcPfm | ProtectedContentType::BmcUpdate => FwDomain::Bmc,
    }
}

/// Capsule Verification Environment
///
/// Supplies the collaborators the verifier and validator run against: the
/// selected flash device, the blocking crypto engine, and the persisted
/// policy state.
pub trait CapsuleVerificationEnv {
    /// Calculate the SHA-256 digest of an in-memory buffer
    fn sha256_digest(&mut self, data: &[u8]) -> PfrResult<Sha256Digest>;

    /// Calculate the SHA-256 digest over the selected flash device
    fn sha256_flash_digest(&mut self, offset: u32, len: u32) -> PfrResult<Sha256Digest>;

    /// ECDSA P-256 verification over a SHA-256 digest. Wire scalars carry
    /// the value in their low 32 bytes.
    fn ecdsa256_verify(
        &mut self,
        pub_x: &WireScalar,
        pub_y: &WireScalar,
        sig_r: &WireScalar,
        sig_s: &WireScalar,
        digest: &Sha256Digest,
    ) -> PfrResult<bool>;

    /// Read from the selected flash device
    fn read_exact(&mut self, offset: u32, buf: &mut [u8]) -> PfrResult<()>;

    /// Provisioned root-key digest: SHA-256 of the root public key X ‖ Y
    fn root_key_digest(&self) -> PfrResult<Sha256Digest>;

    /// True when `key_id` is within range and not cancelled for `domain`
    fn csk_key_valid(&self, domain: FwDomain, key_id: u32) -> bool;

    /// Current anti-rollback threshold for `domain`
    fn svn_threshold(&self, domain: FwDomain) -> u8;

    /// Cancel a CSK key for `domain`; persisted immediately, irreversible
    fn cancel_csk_key(&mut self, domain: FwDomain, key_id: u32) -> PfrResult<()>;

    /// Erase the persistent policy store (decommission)
    fn erase_policy_store(&mut self) -> PfrResult<()>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Stub environment: every hash returns `digest`, every signature
    /// check returns `verify_result`, reads come from the `flash` vector.
    pub(crate) struct TestEnv {
        pub digest: Sha256Digest,
        pub root_key_digest: Sha256Digest,
        pub verify_result: bool,
        pub csk_key_valid: bool,
        pub svn: u8,
        pub flash: Vec<u8>,
        pub flash_digest_calls: usize,
        pub cancelled: Vec<(FwDomain, u32)>,
        pub erased: bool,
    }

    impl Default for TestEnv {
        fn default() -> Self {
            Self {
                digest: [0; 32],
                root_key_digest: [0; 32],
                verify_result: true,
                csk_key_valid: true,
                svn: 0,
                flash: Vec::new(),
                flash_digest_calls: 0,
                cancelled: Vec::new(),
                erased: false,
            }
        }
    }

    impl CapsuleVerificationEnv for TestEnv {
        fn sha256_digest(&mut self, _data: &[u8]) -> PfrResult<Sha256Digest> {
            Ok(self.digest)
        }

        fn sha256_flash_digest(&mut self, _offset: u32, _len: u32) -> PfrResult<Sha256Digest> {
            self.flash_digest_calls += 1;
            Ok(self.digest)
        }

        fn ecdsa256_verify(
            &mut self,
            _pub_x: &WireScalar,
            _pub_y: &WireScalar,
            _sig_r: &WireScalar,
            _sig_s: &WireScalar,
            _digest: &Sha256Digest,
        ) -> PfrResult<bool> {
            Ok(self.verify_result)
        }

        fn read_exact(&mut self, offset: u32, buf: &mut [u8]) -> PfrResult<()> {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = self.flash.get(offset as usize + i).copied().unwrap_or(0);
            }
            Ok(())
        }

        fn root_key_digest(&self) -> PfrResult<Sha256Digest> {
            Ok(self.root_key_digest)
        }

        fn csk_key_valid(&self, _domain: FwDomain, _key_id: u32) -> bool {
            self.csk_key_valid
        }

        fn svn_threshold(&self, _domain: FwDomain) -> u8 {
            self.svn
        }

        fn cancel_csk_key(&mut self, domain: FwDomain, key_id: u32) -> PfrResult<()> {
            self.cancelled.push((domain, key_id));
            Ok(())
        }

        fn erase_policy_store(&mut self) -> PfrResult<()> {
            self.erased = true;
            Ok(())
        }
    }
}
