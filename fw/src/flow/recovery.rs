/*++

Licensed under the Apache-2.0 license.

File Name:

    recovery.rs

Abstract:

    File contains the recovery-matrix state machine: per-cycle
    classification of the Active, Recovery and Staging regions and the
    self-healing actions the decision table prescribes.

--*/

use crate::cprintln;
use crate::flow::domain_str;
use crate::fw_env::{domain_index, FwEnv, PfrPlatform};
use crate::pbc;
use crate::pfm::{self, Pfm};
use crate::verify_env::FwVerificationEnv;
use pfr_capsule_types::{
    PbcHeader, PfmDef, ProtectedContentType, KCH_SIGNATURE_BYTE_SIZE, PBC_HEADER_BYTE_SIZE,
    PC_TYPE_DECOMMISSION, PC_TYPE_KEY_CANCELLATION, PFM_MAX_SVN,
};
use pfr_capsule_verify::{is_pbc_valid, SignatureVerifier};
use pfr_drivers::{FwDomain, MajorError, MinorError, PlatformState, Sha256Digest};
use pfr_error::{PfrError, PfrResult};
use zerocopy::FromBytes;

/// Result of one per-domain recovery pass
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RecoveryOutcome {
    /// All consulted regions valid, nothing to do
    Healthy,

    /// One or more regions were repaired from a verified source
    Recovered,

    /// The recovery region is invalid and staging cannot replace it;
    /// active-only updates are banned until it heals
    RecoveryUnavailable,

    /// Active, recovery and staging are all invalid; no image change
    Unrecoverable,
}

/// A classified full update capsule (recovery or staging region)
pub(crate) struct CapsuleInfo {
    /// Signature plus protected content
    pub total_len: u32,

    /// Absolute offset of the embedded signed PFM
    pub pfm_offset: u32,

    /// Signed PFM length: KCH signature plus padded manifest
    pub pfm_length: u32,

    /// Absolute offset of the PBC structure
    pub pbc_offset: u32,

    /// Digest of the manifest bytes, for content-equality comparison
    pub pfm_digest: Sha256Digest,
}

fn update_type(domain: FwDomain) -> ProtectedContentType {
    match domain {
        FwDomain::Pch => ProtectedContentType::PchUpdate,
        _ => ProtectedContentType::BmcUpdate,
    }
}

fn pfm_type(domain: FwDomain) -> ProtectedContentType {
    match domain {
        FwDomain::Pch => ProtectedContentType::PchPfm,
        _ => ProtectedContentType::BmcPfm,
    }
}

/// Authenticate a full update capsule without mutating any policy state.
/// Classification must never act on capsule content, so this never
/// dispatches cancellation or decommission side effects.
pub(crate) fn authenticate_capsule<P: PfrPlatform>(
    env: &mut FwEnv<P>,
    domain: FwDomain,
    offset: u32,
) -> PfrResult<CapsuleInfo> {
    let mut venv = FwVerificationEnv {
        flash: &mut env.flash,
        crypto: &mut env.crypto,
        persistent: &mut env.persistent,
    };
    let mut verifier = SignatureVerifier::new(&mut venv);

    let info = verifier.verify_signature(offset)?;
    let flags = PC_TYPE_KEY_CANCELLATION | PC_TYPE_DECOMMISSION;
    if info.pc_type & flags != 0 || info.content_type() != Some(update_type(domain)) {
        return Err(PfrError::VALIDATOR_PC_TYPE_INTENT_MISMATCH);
    }

    let pfm_sig_offset = offset + KCH_SIGNATURE_BYTE_SIZE as u32;
    let pfm_info = verifier.verify_signature(pfm_sig_offset)?;
    if pfm_info.pc_type & flags != 0 || pfm_info.content_type() != Some(pfm_type(domain)) {
        return Err(PfrError::VALIDATOR_PFM_TYPE_MISMATCH);
    }

    let pfm_offset = pfm_sig_offset + KCH_SIGNATURE_BYTE_SIZE as u32;
    let pfm = Pfm::read(&mut env.flash, pfm_offset)?;
    if pfm.header.svn > PFM_MAX_SVN {
        return Err(PfrError::VALIDATOR_PFM_SVN_INVALID);
    }
    if !env.persistent.svn_valid(domain, pfm.header.svn)? {
        return Err(PfrError::VALIDATOR_SVN_TOO_LOW);
    }

    let pbc_offset = pfm_offset + pfm_info.pc_length;
    let mut buf = [0u8; PBC_HEADER_BYTE_SIZE];
    env.flash.read_exact(pbc_offset, &mut buf)?;
    let pbc = PbcHeader::read_from(&buf[..]).ok_or(PfrError::VALIDATOR_DECODE_FAILED)?;
    is_pbc_valid(&pbc)?;

    let pfm_digest =
        pfm::pfm_digest(&mut env.flash, &mut env.crypto, pfm_offset, pfm.header.length)?;

    Ok(CapsuleInfo {
        total_len: KCH_SIGNATURE_BYTE_SIZE as u32 + info.pc_length,
        pfm_offset: pfm_sig_offset,
        pfm_length: KCH_SIGNATURE_BYTE_SIZE as u32 + pfm_info.pc_length,
        pbc_offset,
        pfm_digest,
    })
}

/// Authenticate an active region: its signed PFM plus every region
/// digest the manifest declares.
pub(crate) fn authenticate_active<P: PfrPlatform>(
    env: &mut FwEnv<P>,
    domain: FwDomain,
    offset: u32,
) -> PfrResult<Sha256Digest> {
    let mut venv = FwVerificationEnv {
        flash: &mut env.flash,
        crypto: &mut env.crypto,
        persistent: &mut env.persistent,
    };
    let mut verifier = SignatureVerifier::new(&mut venv);

    let info = verifier.verify_signature(offset)?;
    let flags = PC_TYPE_KEY_CANCELLATION | PC_TYPE_DECOMMISSION;
    if info.pc_type & flags != 0 || info.content_type() != Some(pfm_type(domain)) {
        return Err(PfrError::VALIDATOR_PFM_TYPE_MISMATCH);
    }

    let pfm_offset = offset + KCH_SIGNATURE_BYTE_SIZE as u32;
    let pfm = Pfm::read(&mut env.flash, pfm_offset)?;
    if pfm.header.svn > PFM_MAX_SVN {
        return Err(PfrError::VALIDATOR_PFM_SVN_INVALID);
    }
    pfm::verify_region_digests(&mut env.flash, &mut env.crypto, &pfm)?;

    pfm::pfm_digest(&mut env.flash, &mut env.crypto, pfm_offset, pfm.header.length)
}

/// Restore the active image from a verified capsule: rewrite the signed
/// PFM, then patch every SPI region the manifest lists from the
/// capsule's PBC.
fn recover_active<P: PfrPlatform>(
    env: &mut FwEnv<P>,
    capsule: &CapsuleInfo,
    active_offset: u32,
) -> PfrResult<()> {
    pbc::copy_region(
        &mut env.flash,
        &mut env.wdt,
        capsule.pfm_offset,
        active_offset,
        capsule.pfm_length,
    )?;

    let pfm = Pfm::read(
        &mut env.flash,
        capsule.pfm_offset + KCH_SIGNATURE_BYTE_SIZE as u32,
    )?;
    for def in pfm.defs() {
        if let PfmDef::SpiRegion { def, .. } = def {
            pbc::apply(
                &mut env.flash,
                &mut env.wdt,
                capsule.pbc_offset,
                def.start..def.end,
            )?;
        }
    }
    Ok(())
}

/// Run the recovery decision table for one domain. Recovery-region
/// issues are resolved and reported before active-region issues; each
/// failure is reported exactly once.
pub fn run<P: PfrPlatform>(env: &mut FwEnv<P>, domain: FwDomain) -> PfrResult<RecoveryOutcome> {
    let active_offset = env.persistent.active_region(domain)?;
    let recovery_offset = env.persistent.recovery_region(domain)?;
    let staging_offset = env.persistent.staging_region(domain)?;
    let major = MajorError::auth_failed(domain);

    let recovery_res = authenticate_capsule(env, domain, recovery_offset);
    let active_res = authenticate_active(env, domain, active_offset);

    let outcome = match (recovery_res, active_res) {
        (Ok(recovery), Ok(_)) => {
            if env.port.force_recovery_asserted(domain) {
                cprintln!("[recovery] {} force recovery asserted", domain_str(domain));
                env.port.report_state(PlatformState::RecoveryInProgress);
                recover_active(env, &recovery, active_offset)?;
                RecoveryOutcome::Recovered
            } else {
                RecoveryOutcome::Healthy
            }
        }

        (Ok(recovery), Err(_)) => {
            cprintln!("[recovery] {} active image invalid", domain_str(domain));
            env.port.report_error(major, MinorError::AuthActive);
            env.port.report_state(PlatformState::RecoveryInProgress);
            recover_active(env, &recovery, active_offset)?;
            RecoveryOutcome::Recovered
        }

        (Err(_), Ok(active_digest)) => {
            cprintln!("[recovery] {} recovery image invalid", domain_str(domain));
            env.port.report_error(major, MinorError::AuthRecovery);

            // Staging may replace the recovery image only when it holds
            // the same firmware the active image runs.
            match authenticate_capsule(env, domain, staging_offset) {
                Ok(staging) if staging.pfm_digest == active_digest => {
                    env.port.report_state(PlatformState::RecoveryInProgress);
                    pbc::copy_region(
                        &mut env.flash,
                        &mut env.wdt,
                        staging_offset,
                        recovery_offset,
                        staging.total_len,
                    )?;
                    RecoveryOutcome::Recovered
                }
                staging => {
                    if staging.is_err() {
                        env.port.report_error(major, MinorError::AuthStaging);
                    }
                    cprintln!("[recovery] {} recovery unavailable", domain_str(domain));
                    env.state.recovery_unavailable[domain_index(domain)] = true;
                    RecoveryOutcome::RecoveryUnavailable
                }
            }
        }

        (Err(_), Err(_)) => {
            env.port.report_error(major, MinorError::AuthRecovery);
            match authenticate_capsule(env, domain, staging_offset) {
                // Active is already invalid, so any authentic staging
                // capsule is promotable.
                Ok(staging) => {
                    env.port.report_state(PlatformState::RecoveryInProgress);
                    pbc::copy_region(
                        &mut env.flash,
                        &mut env.wdt,
                        staging_offset,
                        recovery_offset,
                        staging.total_len,
                    )?;
                    env.port.report_error(major, MinorError::AuthActive);
                    let recovery = authenticate_capsule(env, domain, recovery_offset)?;
                    recover_active(env, &recovery, active_offset)?;
                    RecoveryOutcome::Recovered
                }
                Err(_) => {
                    cprintln!("[recovery] {} unrecoverable", domain_str(domain));
                    env.port.report_error(major, MinorError::AuthAllRegions);
                    env.state.unrecoverable[domain_index(domain)] = true;
                    RecoveryOutcome::Unrecoverable
                }
            }
        }
    };

    // The bans tied to a broken region lift once the pass ends with that
    // region repaired.
    if matches!(outcome, RecoveryOutcome::Healthy | RecoveryOutcome::Recovered) {
        env.state.recovery_unavailable[domain_index(domain)] = false;
    }
    if outcome != RecoveryOutcome::Unrecoverable {
        env.state.unrecoverable[domain_index(domain)] = false;
    }

    // A domain that ends the pass with a valid active image gets its
    // protection config re-derived from the manifest that now governs it.
    if matches!(
        outcome,
        RecoveryOutcome::Healthy | RecoveryOutcome::Recovered | RecoveryOutcome::RecoveryUnavailable
    ) {
        let pfm = Pfm::read(&mut env.flash, active_offset + KCH_SIGNATURE_BYTE_SIZE as u32)?;
        pfm::apply_protection(&mut env.port, domain.flash_device(), domain, &pfm);
    }

    Ok(outcome)
}
