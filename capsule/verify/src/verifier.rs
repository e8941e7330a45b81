/*++

Licensed under the Apache-2.0 license.

File Name:

    verifier.rs

Abstract:

    This file is the main implementation of the KCH signature chain
    verifier.

--*/

use crate::{content_domain, Block0Info, CapsuleVerificationEnv};
use pfr_capsule_types::*;
use pfr_error::{PfrError, PfrResult};
use zerocopy::{AsBytes, FromBytes};

/// KCH signature chain verifier.
///
/// Validates a 1024-byte signature block (Block0 + Block1) against the
/// pinned root key: Root -> CSK -> Block0 entry, or Root -> Block0 entry
/// for key-cancellation certificates. Any single failure short-circuits.
pub struct SignatureVerifier<Env: CapsuleVerificationEnv> {
    /// Verification Environment
    pub(crate) env: Env,
}

impl<Env: CapsuleVerificationEnv> SignatureVerifier<Env> {
    /// Create a new instance of `SignatureVerifier`
    ///
    /// # Arguments
    ///
    /// * `env` - Environment
    pub fn new(env: Env) -> Self {
        Self { env }
    }

    /// Verify the full signature chain of the capsule at `sig_offset` on
    /// the selected flash device.
    ///
    /// # Returns
    ///
    /// * `Block0Info` - Validated protected-content type and length
    pub fn verify_signature(&mut self, sig_offset: u32) -> PfrResult<Block0Info> {
        let mut buf = [0u8; KCH_SIGNATURE_BYTE_SIZE];
        self.env.read_exact(sig_offset, &mut buf)?;
        let sig = KchSignature::read_from(&buf[..])
            .ok_or(PfrError::SIG_VERIFIER_DECODE_FAILED)?;

        if sig.block1.header.magic != BLOCK1_MAGIC {
            return Err(PfrError::SIG_VERIFIER_BLOCK1_MAGIC_MISMATCH);
        }

        self.verify_block0(&sig.block0, sig_offset)?;
        self.verify_root_entry(&sig.block1.root_entry)?;

        let root = &sig.block1.root_entry;
        if sig.block0.is_key_cancellation() {
            // Short chain: the CSK slot is reinterpreted as the Block0
            // entry and the root key signs Block0 directly.
            let entry = Block0Entry::read_from_prefix(sig.block1.csk_entry.as_bytes())
                .ok_or(PfrError::SIG_VERIFIER_DECODE_FAILED)?;
            self.verify_b0_entry(&root.pubkey_x, &root.pubkey_y, &entry, &sig.block0)?;
        } else {
            let content_type = sig
                .block0
                .content_type()
                .ok_or(PfrError::SIG_VERIFIER_PC_TYPE_INVALID)?;
            let csk = &sig.block1.csk_entry;
            self.verify_csk_entry(root, csk, content_type)?;
            self.verify_b0_entry(&csk.pubkey_x, &csk.pubkey_y, &sig.block1.b0_entry, &sig.block0)?;
        }

        Ok(Block0Info {
            pc_type: sig.block0.pc_type,
            pc_length: sig.block0.pc_length,
        })
    }

    /// Verify Block0: magic, length class rules, reserved bytes, and the
    /// protected-content digest.
    pub fn verify_block0(&mut self, b0: &Block0, sig_offset: u32) -> PfrResult<()> {
        if b0.magic != BLOCK0_MAGIC {
            return Err(PfrError::SIG_VERIFIER_BLOCK0_MAGIC_MISMATCH);
        }

        let content_type = b0
            .content_type()
            .ok_or(PfrError::SIG_VERIFIER_PC_TYPE_INVALID)?;

        if b0.pc_length == 0 || b0.pc_length % PC_LENGTH_ALIGN != 0 {
            return Err(PfrError::SIG_VERIFIER_PC_LENGTH_INVALID);
        }

        let length_ok = if b0.is_key_cancellation() || b0.is_decommission() {
            b0.pc_length == CANCEL_PAYLOAD_BYTE_SIZE
        } else {
            match content_type {
                ProtectedContentType::CpldUpdate => b0.pc_length == CPLD_UPDATE_PC_LENGTH,
                ProtectedContentType::PchPfm | ProtectedContentType::PchUpdate => {
                    b0.pc_length <= PCH_PC_LENGTH_MAX
                }
                ProtectedContentType::BmcPfm | ProtectedContentType::BmcUpdate => {
                    b0.pc_length <= BMC_PC_LENGTH_MAX
                }
            }
        };
        if !length_ok {
            return Err(PfrError::SIG_VERIFIER_PC_LENGTH_MISMATCH);
        }

        if b0.reserved != 0 || b0.reserved2.iter().any(|&b| b != 0) {
            return Err(PfrError::SIG_VERIFIER_BLOCK0_RESERVED_NOT_ZERO);
        }

        let actual = self
            .env
            .sha256_flash_digest(sig_offset + KCH_SIGNATURE_BYTE_SIZE as u32, b0.pc_length)?;
        if actual != b0.sha256 {
            return Err(PfrError::SIG_VERIFIER_PC_DIGEST_MISMATCH);
        }

        Ok(())
    }

    /// Verify the root entry against the provisioned root-key digest
    pub fn verify_root_entry(&mut self, entry: &RootEntry) -> PfrResult<()> {
        if entry.magic != ROOT_ENTRY_MAGIC {
            return Err(PfrError::SIG_VERIFIER_ROOT_MAGIC_MISMATCH);
        }
        if entry.curve_magic != CURVE_MAGIC_SECP256 {
            return Err(PfrError::SIG_VERIFIER_ROOT_CURVE_MISMATCH);
        }
        if entry.permissions != ROOT_ENTRY_SENTINEL {
            return Err(PfrError::SIG_VERIFIER_ROOT_PERMISSIONS_INVALID);
        }
        if entry.key_id != ROOT_ENTRY_SENTINEL {
            return Err(PfrError::SIG_VERIFIER_ROOT_KEY_ID_INVALID);
        }

        // The pinned digest covers the full X ‖ Y wire fields.
        let pubkey_range = 16..16 + 2 * WIRE_SCALAR_BYTE_SIZE;
        let actual = self.env.sha256_digest(&entry.as_bytes()[pubkey_range])?;
        if actual != self.env.root_key_digest()? {
            return Err(PfrError::SIG_VERIFIER_ROOT_KEY_DIGEST_MISMATCH);
        }

        Ok(())
    }

    /// Verify a CSK entry: structure, capability, cancellation state, and
    /// the root key's signature over the entry body.
    pub fn verify_csk_entry(
        &mut self,
        prev: &RootEntry,
        entry: &CskEntry,
        content_type: ProtectedContentType,
    ) -> PfrResult<()> {
        if entry.magic != CSK_ENTRY_MAGIC {
            return Err(PfrError::SIG_VERIFIER_CSK_MAGIC_MISMATCH);
        }
        if entry.curve_magic != CURVE_MAGIC_SECP256 {
            return Err(PfrError::SIG_VERIFIER_CSK_CURVE_MISMATCH);
        }
        if entry.permissions & content_type.capability_mask() == 0 {
            return Err(PfrError::SIG_VERIFIER_CSK_PERMISSIONS_INSUFFICIENT);
        }
        if entry.key_id > CSK_KEY_ID_MAX {
            return Err(PfrError::SIG_VERIFIER_CSK_KEY_ID_OUT_OF_BOUNDS);
        }
        if !self
            .env
            .csk_key_valid(content_domain(content_type), entry.key_id)
        {
            return Err(PfrError::SIG_VERIFIER_CSK_KEY_CANCELLED);
        }

        let digest = self
            .env
            .sha256_digest(&entry.as_bytes()[CSK_ENTRY_SIGNED_RANGE])?;
        let ok = self.env.ecdsa256_verify(
            &prev.pubkey_x,
            &prev.pubkey_y,
            &entry.sig_r,
            &entry.sig_s,
            &digest,
        )?;
        if !ok {
            return Err(PfrError::SIG_VERIFIER_CSK_SIGNATURE_INVALID);
        }

        Ok(())
    }

    /// Verify the terminal Block0 entry: the previous link's signature
    /// over the raw 128-byte Block0.
    pub fn verify_b0_entry(
        &mut self,
        prev_x: &WireScalar,
        prev_y: &WireScalar,
        entry: &Block0Entry,
        b0: &Block0,
    ) -> PfrResult<()> {
        if entry.magic != B0_ENTRY_MAGIC {
            return Err(PfrError::SIG_VERIFIER_B0_ENTRY_MAGIC_MISMATCH);
        }
        if entry.curve_magic != CURVE_MAGIC_SECP256 {
            return Err(PfrError::SIG_VERIFIER_B0_ENTRY_CURVE_MISMATCH);
        }

        let digest = self.env.sha256_digest(b0.as_bytes())?;
        let ok = self
            .env
            .ecdsa256_verify(prev_x, prev_y, &entry.sig_r, &entry.sig_s, &digest)?;
        if !ok {
            return Err(PfrError::SIG_VERIFIER_B0_ENTRY_SIGNATURE_INVALID);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestEnv;

    // TestEnv hashes everything to its canned digest, which also serves
    // as the pinned root-key digest.
    fn valid_root_entry() -> RootEntry {
        let mut entry = RootEntry::new_zeroed();
        entry.magic = ROOT_ENTRY_MAGIC;
        entry.curve_magic = CURVE_MAGIC_SECP256;
        entry.permissions = ROOT_ENTRY_SENTINEL;
        entry.key_id = ROOT_ENTRY_SENTINEL;
        entry
    }

    fn valid_csk_entry() -> CskEntry {
        let mut entry = CskEntry::new_zeroed();
        entry.magic = CSK_ENTRY_MAGIC;
        entry.curve_magic = CURVE_MAGIC_SECP256;
        entry.permissions = 0x1F;
        entry.key_id = 2;
        entry
    }

    #[test]
    fn test_root_entry_magic_mismatch() {
        let env = TestEnv::default();
        let mut entry = valid_root_entry();
        entry.magic = 0;
        let mut verifier = SignatureVerifier::new(env);
        assert_eq!(
            verifier.verify_root_entry(&entry),
            Err(PfrError::SIG_VERIFIER_ROOT_MAGIC_MISMATCH)
        );
    }

    #[test]
    fn test_root_entry_sentinels() {
        let env = TestEnv::default();
        let mut entry = valid_root_entry();
        entry.permissions = 0x1F;
        let mut verifier = SignatureVerifier::new(env);
        assert_eq!(
            verifier.verify_root_entry(&entry),
            Err(PfrError::SIG_VERIFIER_ROOT_PERMISSIONS_INVALID)
        );

        let env = TestEnv::default();
        let mut entry = valid_root_entry();
        entry.key_id = 5;
        let mut verifier = SignatureVerifier::new(env);
        assert_eq!(
            verifier.verify_root_entry(&entry),
            Err(PfrError::SIG_VERIFIER_ROOT_KEY_ID_INVALID)
        );
    }

    #[test]
    fn test_root_entry_digest_mismatch() {
        let mut env = TestEnv::default();
        env.root_key_digest = [0x55; 32];
        let entry = valid_root_entry();
        let mut verifier = SignatureVerifier::new(env);
        assert_eq!(
            verifier.verify_root_entry(&entry),
            Err(PfrError::SIG_VERIFIER_ROOT_KEY_DIGEST_MISMATCH)
        );
    }

    #[test]
    fn test_csk_entry_wrong_curve_magic_rejected() {
        // A CSK entry with a bad curve magic fails even though the root
        // entry validated.
        let env = TestEnv::default();
        let root = valid_root_entry();
        let mut verifier = SignatureVerifier::new(env);
        assert!(verifier.verify_root_entry(&root).is_ok());

        let mut csk = valid_csk_entry();
        csk.curve_magic = 0xDEAD_BEEF;
        assert_eq!(
            verifier.verify_csk_entry(&root, &csk, ProtectedContentType::BmcUpdate),
            Err(PfrError::SIG_VERIFIER_CSK_CURVE_MISMATCH)
        );
    }

    #[test]
    fn test_csk_entry_capability_and_cancellation() {
        let env = TestEnv::default();
        let root = valid_root_entry();
        let mut verifier = SignatureVerifier::new(env);

        let mut csk = valid_csk_entry();
        csk.permissions = ProtectedContentType::PchUpdate.capability_mask();
        assert_eq!(
            verifier.verify_csk_entry(&root, &csk, ProtectedContentType::BmcUpdate),
            Err(PfrError::SIG_VERIFIER_CSK_PERMISSIONS_INSUFFICIENT)
        );

        let mut csk = valid_csk_entry();
        csk.key_id = 128;
        assert_eq!(
            verifier.verify_csk_entry(&root, &csk, ProtectedContentType::BmcUpdate),
            Err(PfrError::SIG_VERIFIER_CSK_KEY_ID_OUT_OF_BOUNDS)
        );

        let mut env = TestEnv::default();
        env.csk_key_valid = false;
        let mut verifier = SignatureVerifier::new(env);
        let csk = valid_csk_entry();
        assert_eq!(
            verifier.verify_csk_entry(&root, &csk, ProtectedContentType::BmcUpdate),
            Err(PfrError::SIG_VERIFIER_CSK_KEY_CANCELLED)
        );
    }

    #[test]
    fn test_csk_entry_bad_signature() {
        let mut env = TestEnv::default();
        env.verify_result = false;
        let root = valid_root_entry();
        let mut verifier = SignatureVerifier::new(env);
        let csk = valid_csk_entry();
        assert_eq!(
            verifier.verify_csk_entry(&root, &csk, ProtectedContentType::BmcUpdate),
            Err(PfrError::SIG_VERIFIER_CSK_SIGNATURE_INVALID)
        );
    }

    #[test]
    fn test_block0_class_rules() {
        let mut b0 = Block0::new_zeroed();
        b0.magic = BLOCK0_MAGIC;
        b0.pc_type = ProtectedContentType::CpldUpdate as u32;
        b0.pc_length = 4096;
        let mut verifier = SignatureVerifier::new(TestEnv::default());
        assert_eq!(
            verifier.verify_block0(&b0, 0),
            Err(PfrError::SIG_VERIFIER_PC_LENGTH_MISMATCH)
        );

        // Cancellation certificates are fixed at 128 bytes.
        b0.pc_type = ProtectedContentType::BmcUpdate as u32 | PC_TYPE_KEY_CANCELLATION;
        b0.pc_length = 256;
        assert_eq!(
            verifier.verify_block0(&b0, 0),
            Err(PfrError::SIG_VERIFIER_PC_LENGTH_MISMATCH)
        );

        b0.pc_length = 100;
        assert_eq!(
            verifier.verify_block0(&b0, 0),
            Err(PfrError::SIG_VERIFIER_PC_LENGTH_INVALID)
        );
    }

    #[test]
    fn test_block0_reserved_not_zero() {
        let mut b0 = Block0::new_zeroed();
        b0.magic = BLOCK0_MAGIC;
        b0.pc_type = ProtectedContentType::BmcUpdate as u32;
        b0.pc_length = 4096;
        b0.reserved2[7] = 1;
        let mut verifier = SignatureVerifier::new(TestEnv::default());
        assert_eq!(
            verifier.verify_block0(&b0, 0),
            Err(PfrError::SIG_VERIFIER_BLOCK0_RESERVED_NOT_ZERO)
        );
    }

    #[test]
    fn test_block0_digest_mismatch() {
        let mut b0 = Block0::new_zeroed();
        b0.magic = BLOCK0_MAGIC;
        b0.pc_type = ProtectedContentType::BmcUpdate as u32;
        b0.pc_length = 4096;
        b0.sha256 = [0x11; 32];
        let mut verifier = SignatureVerifier::new(TestEnv::default());
        assert_eq!(
            verifier.verify_block0(&b0, 0),
            Err(PfrError::SIG_VERIFIER_PC_DIGEST_MISMATCH)
        );
    }
}
