/*++

Licensed under the Apache-2.0 license.

File Name:

    validator.rs

Abstract:

    This file implements the capsule content validator: intent matching,
    compression-header validation, and the ordered pre-update dispatch.

--*/

use crate::{
    content_domain, CapsuleVerificationEnv, Decision, SignatureVerifier, UpdateInfo,
};
use pfr_capsule_types::*;
use pfr_drivers::{FwDomain, UpdateIntent};
use pfr_error::{PfrError, PfrResult};
use zerocopy::FromBytes;

/// Validate a PBC header's structure
pub fn is_pbc_valid(header: &PbcHeader) -> PfrResult<()> {
    if header.tag != PBC_TAG {
        return Err(PfrError::VALIDATOR_PBC_TAG_MISMATCH);
    }
    if header.version != PBC_VERSION {
        return Err(PfrError::VALIDATOR_PBC_VERSION_UNSUPPORTED);
    }
    if header.page_size != PBC_PAGE_SIZE {
        return Err(PfrError::VALIDATOR_PBC_PAGE_SIZE_UNSUPPORTED);
    }
    if header.pattern_size != PBC_PATTERN_SIZE || header.pattern != PBC_PATTERN {
        return Err(PfrError::VALIDATOR_PBC_PATTERN_UNSUPPORTED);
    }
    if header.bitmap_nbit % 8 != 0 {
        return Err(PfrError::VALIDATOR_PBC_BITMAP_SIZE_INVALID);
    }
    if header.payload_len % PBC_PAGE_SIZE != 0 {
        return Err(PfrError::VALIDATOR_PBC_PAYLOAD_LEN_INVALID);
    }
    Ok(())
}

/// Capsule content validator.
///
/// Decides whether an update, cancellation, or decommission operation may
/// proceed, in the order mandated for the pre-update check: intent match
/// first (before any content is hashed or addressed), then the full
/// signature chain, then the content-class dispatch.
pub struct CapsuleValidator<Env: CapsuleVerificationEnv> {
    verifier: SignatureVerifier<Env>,
}

impl<Env: CapsuleVerificationEnv> CapsuleValidator<Env> {
    /// Create a new instance of `CapsuleValidator`
    ///
    /// # Arguments
    ///
    /// * `env` - Environment
    pub fn new(env: Env) -> Self {
        Self {
            verifier: SignatureVerifier::new(env),
        }
    }

    pub fn into_env(self) -> Env {
        self.verifier.env
    }

    /// Match a capsule's `pc_type` word against the update intent.
    ///
    /// Runs before authentication, so it must not touch capsule content:
    /// the intent decides which flash addresses the cycle may hash at
    /// all, and a capsule must not steer the check toward a domain the
    /// requester does not control.
    pub fn pc_type_matches_intent(pc_type: u32, intent: UpdateIntent) -> PfrResult<()> {
        // A key-cancellation certificate matches any intent.
        if pc_type & PC_TYPE_KEY_CANCELLATION != 0 {
            return Ok(());
        }

        let content_type = ProtectedContentType::from_pc_type(pc_type)
            .ok_or(PfrError::SIG_VERIFIER_PC_TYPE_INVALID)?;
        let domain = intent
            .domain()
            .ok_or(PfrError::VALIDATOR_PC_TYPE_INTENT_MISMATCH)?;

        let matches = if pc_type & PC_TYPE_DECOMMISSION != 0 {
            // Decommission rides a CPLD-typed capsule and is only
            // accepted on a CPLD intent.
            domain == FwDomain::Cpld && content_type == ProtectedContentType::CpldUpdate
        } else {
            let expected = match domain {
                FwDomain::Cpld => ProtectedContentType::CpldUpdate,
                FwDomain::Pch => ProtectedContentType::PchUpdate,
                FwDomain::Bmc => ProtectedContentType::BmcUpdate,
            };
            content_type == expected
        };

        if !matches {
            return Err(PfrError::VALIDATOR_PC_TYPE_INTENT_MISMATCH);
        }
        Ok(())
    }

    /// Run the ordered pre-update check for the capsule at `sig_offset`.
    ///
    /// On `Decision::Rejected` the caller increments the domain's
    /// failed-attempt counter; any other outcome resets it.
    pub fn check_capsule_before_update(
        &mut self,
        domain: FwDomain,
        sig_offset: u32,
        intent: UpdateIntent,
    ) -> Decision {
        match self.check_inner(domain, sig_offset, intent) {
            Ok(decision) => decision,
            Err(e) => Decision::Rejected(e),
        }
    }

    fn check_inner(
        &mut self,
        domain: FwDomain,
        sig_offset: u32,
        intent: UpdateIntent,
    ) -> PfrResult<Decision> {
        // Step 1: Block0 only; no content is hashed before the intent
        // match passes.
        let mut b0_buf = [0u8; BLOCK0_BYTE_SIZE];
        self.verifier.env.read_exact(sig_offset, &mut b0_buf)?;
        let b0 =
            Block0::read_from(&b0_buf[..]).ok_or(PfrError::SIG_VERIFIER_DECODE_FAILED)?;
        Self::pc_type_matches_intent(b0.pc_type, intent)?;

        // Step 2: a cancellation certificate's fixed 128-byte payload is
        // format-checked before its chain is authenticated. Audited
        // exception to authenticate-before-use: the check reads a fixed
        // small structure and nothing is trusted from it yet.
        let cancel_payload = if b0.is_key_cancellation() {
            Some(self.read_cancel_payload(sig_offset)?)
        } else {
            None
        };

        // Step 3: full chain authentication.
        let info = self.verifier.verify_signature(sig_offset)?;
        let content_type = info
            .content_type()
            .ok_or(PfrError::SIG_VERIFIER_PC_TYPE_INVALID)?;

        // Step 4: content-class dispatch.
        if let Some(payload) = cancel_payload {
            self.verifier
                .env
                .cancel_csk_key(content_domain(content_type), payload.csk_id)?;
            return Ok(Decision::KeyCancelled);
        }

        if b0.is_decommission() {
            self.check_decommission_payload(sig_offset)?;
            self.verifier.env.erase_policy_store()?;
            return Ok(Decision::Decommissioned);
        }

        match content_type {
            ProtectedContentType::CpldUpdate => self.check_cpld_update(sig_offset),
            ProtectedContentType::PchUpdate | ProtectedContentType::BmcUpdate => {
                self.check_fw_update(domain, sig_offset, intent, content_type)
            }
            // PFM signatures never arrive as top-level capsules; the
            // intent match already rejected them.
            _ => Err(PfrError::VALIDATOR_PC_TYPE_INTENT_MISMATCH),
        }
    }

    fn read_cancel_payload(&mut self, sig_offset: u32) -> PfrResult<KeyCancellationPayload> {
        let mut buf = [0u8; CANCEL_PAYLOAD_BYTE_SIZE as usize];
        self.verifier
            .env
            .read_exact(sig_offset + KCH_SIGNATURE_BYTE_SIZE as u32, &mut buf)?;
        let payload = KeyCancellationPayload::read_from(&buf[..])
            .ok_or(PfrError::VALIDATOR_DECODE_FAILED)?;

        if payload.csk_id > CSK_KEY_ID_MAX {
            return Err(PfrError::VALIDATOR_CANCEL_CERT_CSK_ID_INVALID);
        }
        if payload.reserved.iter().any(|&b| b != 0) {
            return Err(PfrError::VALIDATOR_CANCEL_CERT_RESERVED_NOT_ZERO);
        }
        Ok(payload)
    }

    fn check_decommission_payload(&mut self, sig_offset: u32) -> PfrResult<()> {
        let mut buf = [0u8; CANCEL_PAYLOAD_BYTE_SIZE as usize];
        self.verifier
            .env
            .read_exact(sig_offset + KCH_SIGNATURE_BYTE_SIZE as u32, &mut buf)?;
        if buf.iter().any(|&b| b != 0) {
            return Err(PfrError::VALIDATOR_DECOMMISSION_RESERVED_NOT_ZERO);
        }
        Ok(())
    }

    /// CPLD bitstream capsules carry their SVN in the first word of the
    /// protected content.
    fn check_cpld_update(&mut self, sig_offset: u32) -> PfrResult<Decision> {
        let mut word = [0u8; 4];
        self.verifier
            .env
            .read_exact(sig_offset + KCH_SIGNATURE_BYTE_SIZE as u32, &mut word)?;
        let svn = u32::from_le_bytes(word);
        if svn > PFM_MAX_SVN as u32 {
            return Err(PfrError::VALIDATOR_CPLD_SVN_INVALID);
        }
        let svn = svn as u8;

        if svn < self.verifier.env.svn_threshold(FwDomain::Cpld) {
            return Err(PfrError::VALIDATOR_SVN_TOO_LOW);
        }

        Ok(Decision::Proceed(UpdateInfo {
            svn,
            pfm_offset: 0,
            pfm_length: 0,
            pbc_offset: 0,
        }))
    }

    fn check_fw_update(
        &mut self,
        domain: FwDomain,
        sig_offset: u32,
        intent: UpdateIntent,
        content_type: ProtectedContentType,
    ) -> PfrResult<Decision> {
        // The capsule content opens with a signed PFM; authenticate its
        // own chain before trusting anything it declares.
        let pfm_sig_offset = sig_offset + KCH_SIGNATURE_BYTE_SIZE as u32;
        let pfm_info = self.verifier.verify_signature(pfm_sig_offset)?;

        let expected = match content_type {
            ProtectedContentType::PchUpdate => ProtectedContentType::PchPfm,
            _ => ProtectedContentType::BmcPfm,
        };
        let flags = PC_TYPE_KEY_CANCELLATION | PC_TYPE_DECOMMISSION;
        if pfm_info.pc_type & flags != 0 || pfm_info.content_type() != Some(expected) {
            return Err(PfrError::VALIDATOR_PFM_TYPE_MISMATCH);
        }

        let mut buf = [0u8; core::mem::size_of::<PfmHeader>()];
        self.verifier
            .env
            .read_exact(pfm_sig_offset + KCH_SIGNATURE_BYTE_SIZE as u32, &mut buf)?;
        let pfm =
            PfmHeader::read_from(&buf[..]).ok_or(PfrError::VALIDATOR_DECODE_FAILED)?;
        if pfm.tag != PFM_TAG {
            return Err(PfrError::VALIDATOR_PFM_TAG_MISMATCH);
        }
        if pfm.svn > PFM_MAX_SVN {
            return Err(PfrError::VALIDATOR_PFM_SVN_INVALID);
        }

        let pbc_offset = pfm_sig_offset + KCH_SIGNATURE_BYTE_SIZE as u32 + pfm_info.pc_length;
        let mut buf = [0u8; PBC_HEADER_BYTE_SIZE];
        self.verifier.env.read_exact(pbc_offset, &mut buf)?;
        let pbc =
            PbcHeader::read_from(&buf[..]).ok_or(PfrError::VALIDATOR_DECODE_FAILED)?;
        is_pbc_valid(&pbc)?;

        let threshold = self.verifier.env.svn_threshold(domain);
        if pfm.svn < threshold {
            return Err(PfrError::VALIDATOR_SVN_TOO_LOW);
        }
        // The cheaper active-only path must not advance the anti-rollback
        // threshold; only a recovery-class update may raise it.
        if intent.is_active_only(domain) && pfm.svn != threshold {
            return Err(PfrError::VALIDATOR_ACTIVE_UPDATE_SVN_MISMATCH);
        }

        Ok(Decision::Proceed(UpdateInfo {
            svn: pfm.svn,
            pfm_offset: pfm_sig_offset,
            pfm_length: KCH_SIGNATURE_BYTE_SIZE as u32 + pfm_info.pc_length,
            pbc_offset,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestEnv;
    use zerocopy::AsBytes;

    fn write_at(flash: &mut Vec<u8>, offset: usize, data: &[u8]) {
        if flash.len() < offset + data.len() {
            flash.resize(offset + data.len(), 0);
        }
        flash[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Signature block that passes every check against TestEnv's canned
    /// digests.
    fn valid_signature(pc_type: u32, pc_length: u32) -> KchSignature {
        let mut sig = KchSignature::new_zeroed();
        sig.block0.magic = BLOCK0_MAGIC;
        sig.block0.pc_type = pc_type;
        sig.block0.pc_length = pc_length;
        sig.block1.header.magic = BLOCK1_MAGIC;
        sig.block1.root_entry.magic = ROOT_ENTRY_MAGIC;
        sig.block1.root_entry.curve_magic = CURVE_MAGIC_SECP256;
        sig.block1.root_entry.permissions = ROOT_ENTRY_SENTINEL;
        sig.block1.root_entry.key_id = ROOT_ENTRY_SENTINEL;
        if pc_type & PC_TYPE_KEY_CANCELLATION != 0 {
            // Root signs Block0 directly through the reused CSK slot.
            sig.block1.csk_entry.magic = B0_ENTRY_MAGIC;
            sig.block1.csk_entry.curve_magic = CURVE_MAGIC_SECP256;
        } else {
            sig.block1.csk_entry.magic = CSK_ENTRY_MAGIC;
            sig.block1.csk_entry.curve_magic = CURVE_MAGIC_SECP256;
            sig.block1.csk_entry.permissions = 0x1F;
            sig.block1.csk_entry.key_id = 1;
            sig.block1.b0_entry.magic = B0_ENTRY_MAGIC;
            sig.block1.b0_entry.curve_magic = CURVE_MAGIC_SECP256;
        }
        sig
    }

    /// Flash image of a firmware update capsule: outer signature, signed
    /// PFM, and a PBC with empty bitmaps.
    fn fw_update_capsule(outer_type: ProtectedContentType, pfm_type: ProtectedContentType, svn: u8) -> Vec<u8> {
        let mut flash = Vec::new();
        let outer = valid_signature(outer_type as u32, 1280);
        write_at(&mut flash, 0, outer.as_bytes());

        let nested = valid_signature(pfm_type as u32, 128);
        write_at(&mut flash, 1024, nested.as_bytes());

        let mut pfm = PfmHeader::new_zeroed();
        pfm.tag = PFM_TAG;
        pfm.svn = svn;
        pfm.length = 32;
        write_at(&mut flash, 2048, pfm.as_bytes());

        let mut pbc = PbcHeader::new_zeroed();
        pbc.tag = PBC_TAG;
        pbc.version = PBC_VERSION;
        pbc.page_size = PBC_PAGE_SIZE;
        pbc.pattern_size = PBC_PATTERN_SIZE;
        pbc.pattern = PBC_PATTERN;
        write_at(&mut flash, 2176, pbc.as_bytes());
        flash
    }

    #[test]
    fn test_pc_type_rejected_before_hashing() {
        // A BMC update capsule submitted against a PCH intent fails the
        // intent match without a single content hash.
        let mut env = TestEnv::default();
        let sig = valid_signature(ProtectedContentType::BmcUpdate as u32, 1280);
        env.flash = sig.as_bytes().to_vec();

        let mut validator = CapsuleValidator::new(env);
        let decision =
            validator.check_capsule_before_update(FwDomain::Pch, 0, UpdateIntent::PCH_ACTIVE);
        assert!(matches!(
            decision,
            Decision::Rejected(PfrError::VALIDATOR_PC_TYPE_INTENT_MISMATCH)
        ));
        assert_eq!(validator.into_env().flash_digest_calls, 0);
    }

    #[test]
    fn test_cancel_cert_bad_csk_id_rejected() {
        // csk_id 200 is invalid content even though the chain would
        // authenticate.
        let mut env = TestEnv::default();
        let sig = valid_signature(
            ProtectedContentType::BmcUpdate as u32 | PC_TYPE_KEY_CANCELLATION,
            128,
        );
        env.flash = sig.as_bytes().to_vec();
        let mut payload = KeyCancellationPayload::new_zeroed();
        payload.csk_id = 200;
        write_at(&mut env.flash, 1024, payload.as_bytes());

        let mut validator = CapsuleValidator::new(env);
        let decision =
            validator.check_capsule_before_update(FwDomain::Bmc, 0, UpdateIntent::BMC_ACTIVE);
        assert!(matches!(
            decision,
            Decision::Rejected(PfrError::VALIDATOR_CANCEL_CERT_CSK_ID_INVALID)
        ));
        assert!(validator.into_env().cancelled.is_empty());
    }

    #[test]
    fn test_cancel_cert_cancels_key() {
        let mut env = TestEnv::default();
        let sig = valid_signature(
            ProtectedContentType::BmcUpdate as u32 | PC_TYPE_KEY_CANCELLATION,
            128,
        );
        env.flash = sig.as_bytes().to_vec();
        let mut payload = KeyCancellationPayload::new_zeroed();
        payload.csk_id = 5;
        write_at(&mut env.flash, 1024, payload.as_bytes());

        let mut validator = CapsuleValidator::new(env);
        let decision =
            validator.check_capsule_before_update(FwDomain::Bmc, 0, UpdateIntent::BMC_ACTIVE);
        assert!(matches!(decision, Decision::KeyCancelled));
        assert_eq!(validator.into_env().cancelled, vec![(FwDomain::Bmc, 5)]);
    }

    #[test]
    fn test_decommission_erases_policy() {
        let mut env = TestEnv::default();
        let sig = valid_signature(
            ProtectedContentType::CpldUpdate as u32 | PC_TYPE_DECOMMISSION,
            128,
        );
        env.flash = sig.as_bytes().to_vec();
        write_at(&mut env.flash, 1024, &[0u8; 128]);

        let mut validator = CapsuleValidator::new(env);
        let decision =
            validator.check_capsule_before_update(FwDomain::Cpld, 0, UpdateIntent::CPLD_ACTIVE);
        assert!(matches!(decision, Decision::Decommissioned));
        assert!(validator.into_env().erased);
    }

    #[test]
    fn test_decommission_rejected_on_non_cpld_intent() {
        let mut env = TestEnv::default();
        let sig = valid_signature(
            ProtectedContentType::CpldUpdate as u32 | PC_TYPE_DECOMMISSION,
            128,
        );
        env.flash = sig.as_bytes().to_vec();

        let mut validator = CapsuleValidator::new(env);
        let decision =
            validator.check_capsule_before_update(FwDomain::Bmc, 0, UpdateIntent::BMC_ACTIVE);
        assert!(matches!(
            decision,
            Decision::Rejected(PfrError::VALIDATOR_PC_TYPE_INTENT_MISMATCH)
        ));
    }

    #[test]
    fn test_fw_update_proceeds() {
        let mut env = TestEnv::default();
        env.flash = fw_update_capsule(
            ProtectedContentType::BmcUpdate,
            ProtectedContentType::BmcPfm,
            3,
        );

        let mut validator = CapsuleValidator::new(env);
        let decision =
            validator.check_capsule_before_update(FwDomain::Bmc, 0, UpdateIntent::BMC_RECOVERY);
        match decision {
            Decision::Proceed(info) => {
                assert_eq!(info.svn, 3);
                assert_eq!(info.pfm_offset, 1024);
                assert_eq!(info.pfm_length, 1024 + 128);
                assert_eq!(info.pbc_offset, 2176);
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn test_fw_update_wrong_pfm_type() {
        let mut env = TestEnv::default();
        env.flash = fw_update_capsule(
            ProtectedContentType::BmcUpdate,
            ProtectedContentType::PchPfm,
            3,
        );

        let mut validator = CapsuleValidator::new(env);
        let decision =
            validator.check_capsule_before_update(FwDomain::Bmc, 0, UpdateIntent::BMC_RECOVERY);
        assert!(matches!(
            decision,
            Decision::Rejected(PfrError::VALIDATOR_PFM_TYPE_MISMATCH)
        ));
    }

    #[test]
    fn test_fw_update_svn_rollback_rejected() {
        let mut env = TestEnv::default();
        env.svn = 5;
        env.flash = fw_update_capsule(
            ProtectedContentType::BmcUpdate,
            ProtectedContentType::BmcPfm,
            3,
        );

        let mut validator = CapsuleValidator::new(env);
        let decision =
            validator.check_capsule_before_update(FwDomain::Bmc, 0, UpdateIntent::BMC_RECOVERY);
        assert!(matches!(
            decision,
            Decision::Rejected(PfrError::VALIDATOR_SVN_TOO_LOW)
        ));
    }

    #[test]
    fn test_active_only_update_must_match_recovery_svn() {
        let mut env = TestEnv::default();
        env.svn = 0;
        env.flash = fw_update_capsule(
            ProtectedContentType::BmcUpdate,
            ProtectedContentType::BmcPfm,
            3,
        );

        let mut validator = CapsuleValidator::new(env);
        let decision =
            validator.check_capsule_before_update(FwDomain::Bmc, 0, UpdateIntent::BMC_ACTIVE);
        assert!(matches!(
            decision,
            Decision::Rejected(PfrError::VALIDATOR_ACTIVE_UPDATE_SVN_MISMATCH)
        ));

        // The same capsule through the recovery-class path proceeds and
        // may raise the threshold.
        let mut env = TestEnv::default();
        env.flash = fw_update_capsule(
            ProtectedContentType::BmcUpdate,
            ProtectedContentType::BmcPfm,
            3,
        );
        let mut validator = CapsuleValidator::new(env);
        let decision = validator.check_capsule_before_update(
            FwDomain::Bmc,
            0,
            UpdateIntent::BMC_ACTIVE | UpdateIntent::BMC_RECOVERY,
        );
        assert!(matches!(decision, Decision::Proceed(_)));
    }

    #[test]
    fn test_pbc_header_rules() {
        let mut pbc = PbcHeader::new_zeroed();
        pbc.tag = PBC_TAG;
        pbc.version = PBC_VERSION;
        pbc.page_size = PBC_PAGE_SIZE;
        pbc.pattern_size = PBC_PATTERN_SIZE;
        pbc.pattern = PBC_PATTERN;
        pbc.bitmap_nbit = 64;
        pbc.payload_len = 8192;
        assert!(is_pbc_valid(&pbc).is_ok());

        pbc.bitmap_nbit = 63;
        assert_eq!(
            is_pbc_valid(&pbc),
            Err(PfrError::VALIDATOR_PBC_BITMAP_SIZE_INVALID)
        );

        pbc.bitmap_nbit = 64;
        pbc.payload_len = 100;
        assert_eq!(
            is_pbc_valid(&pbc),
            Err(PfrError::VALIDATOR_PBC_PAYLOAD_LEN_INVALID)
        );

        pbc.payload_len = 0;
        pbc.version = 1;
        assert_eq!(
            is_pbc_valid(&pbc),
            Err(PfrError::VALIDATOR_PBC_VERSION_UNSUPPORTED)
        );
    }
}
