/*++

Licensed under the Apache-2.0 license.

File Name:

    update.rs

Abstract:

    File contains the update servicing flow: the pre-update capsule check
    followed by the staged image being patched into place.

--*/

use crate::cprintln;
use crate::flow::{domain_str, recovery};
use crate::fw_env::{domain_index, FwEnv, PfrPlatform};
use crate::pbc;
use crate::pfm::{self, Pfm};
use crate::verify_env::FwVerificationEnv;
use pfr_capsule_types::{Block0, PfmDef, BLOCK0_BYTE_SIZE, KCH_SIGNATURE_BYTE_SIZE};
use pfr_capsule_verify::{CapsuleValidator, Decision, UpdateInfo};
use pfr_drivers::{FwDomain, MajorError, MinorError, PlatformState, UpdateIntent};
use pfr_error::{PfrError, PfrResult};
use zerocopy::FromBytes;

/// Result of servicing one domain's update intent
#[derive(Debug, Copy, Clone)]
pub enum UpdateOutcome {
    /// The staged image was validated and applied
    Applied,

    /// The staged capsule was a key-cancellation certificate
    KeyCancelled,

    /// The staged capsule was a decommission capsule
    Decommissioned,

    /// The update was aborted; existing images are untouched
    Rejected(PfrError),
}

/// Service one domain's pending update intent.
///
/// Update failures do not self-heal: the update aborts, images stay
/// untouched and the failed-attempt counter increments. Three consecutive
/// failures lock the domain out until a success or power cycle.
pub fn run<P: PfrPlatform>(
    env: &mut FwEnv<P>,
    domain: FwDomain,
    intent: UpdateIntent,
) -> UpdateOutcome {
    let major = MajorError::update_failed(domain);

    if env.state.update_locked_out(domain) {
        cprintln!("[update] {} locked out", domain_str(domain));
        env.port.report_error(major, MinorError::ExceededMaxAttempts);
        return UpdateOutcome::Rejected(PfrError::FW_UPDATE_LOCKED_OUT);
    }

    if intent.is_active_only(domain) && env.state.recovery_unavailable[domain_index(domain)] {
        cprintln!("[update] {} active-only update banned", domain_str(domain));
        env.port.report_error(major, MinorError::ActiveUpdateBanned);
        return UpdateOutcome::Rejected(PfrError::FW_ACTIVE_UPDATE_BANNED);
    }

    env.port.report_state(PlatformState::UpdateInProgress);
    match service(env, domain, intent) {
        Ok(outcome) => {
            env.state.reset_update_failures(domain);
            outcome
        }
        Err(e) => {
            env.state.record_update_failure(domain);
            env.port.report_error(major, MinorError::UpdateAuthFailed);
            cprintln!("[update] {} rejected", domain_str(domain));
            UpdateOutcome::Rejected(e)
        }
    }
}

fn service<P: PfrPlatform>(
    env: &mut FwEnv<P>,
    domain: FwDomain,
    intent: UpdateIntent,
) -> PfrResult<UpdateOutcome> {
    let staging_offset = env.persistent.staging_region(domain)?;

    let decision = {
        let mut venv = FwVerificationEnv {
            flash: &mut env.flash,
            crypto: &mut env.crypto,
            persistent: &mut env.persistent,
        };
        let mut validator = CapsuleValidator::new(&mut venv);
        validator.check_capsule_before_update(domain, staging_offset, intent)
    };

    match decision {
        Decision::Rejected(e) => Err(e),

        Decision::KeyCancelled => {
            cprintln!("[update] {} csk key cancelled", domain_str(domain));
            Ok(UpdateOutcome::KeyCancelled)
        }

        Decision::Decommissioned => Ok(UpdateOutcome::Decommissioned),

        Decision::Proceed(info) => match domain {
            FwDomain::Cpld => {
                // The bitstream itself is handed to the reconfiguration
                // logic; this core only accounts for the anti-rollback
                // policy first.
                if intent.contains(UpdateIntent::CPLD_RECOVERY) {
                    env.persistent.svn_commit(FwDomain::Cpld, info.svn)?;
                }
                cprintln!("[update] cpld reconfiguration");
                env.port.trigger_cpld_reconfig();
                Ok(UpdateOutcome::Applied)
            }
            _ => apply_fw_update(env, domain, intent, staging_offset, &info),
        },
    }
}

fn apply_fw_update<P: PfrPlatform>(
    env: &mut FwEnv<P>,
    domain: FwDomain,
    intent: UpdateIntent,
    staging_offset: u32,
    info: &UpdateInfo,
) -> PfrResult<UpdateOutcome> {
    let active_offset = env.persistent.active_region(domain)?;

    // Patch the active image: rewrite the signed PFM, then patch every
    // SPI region the staged manifest lists.
    pbc::copy_region(
        &mut env.flash,
        &mut env.wdt,
        info.pfm_offset,
        active_offset,
        info.pfm_length,
    )?;
    let staged_pfm = Pfm::read(
        &mut env.flash,
        info.pfm_offset + KCH_SIGNATURE_BYTE_SIZE as u32,
    )?;
    for def in staged_pfm.defs() {
        if let PfmDef::SpiRegion { def, .. } = def {
            pbc::apply(
                &mut env.flash,
                &mut env.wdt,
                info.pbc_offset,
                def.start..def.end,
            )?;
        }
    }

    // The patched image must re-authenticate before the update commits
    // anything it implies.
    recovery::authenticate_active(env, domain, active_offset)
        .map_err(|_| PfrError::FW_UPDATE_REAUTH_FAILED)?;

    if !intent.is_active_only(domain) {
        // Recovery-class: promote the staged capsule and only then raise
        // the anti-rollback threshold.
        let recovery_offset = env.persistent.recovery_region(domain)?;
        let total_len = capsule_total_len(env, staging_offset)?;
        pbc::copy_region(
            &mut env.flash,
            &mut env.wdt,
            staging_offset,
            recovery_offset,
            total_len,
        )?;
        env.persistent.svn_commit(domain, info.svn)?;
    }

    let pfm = Pfm::read(&mut env.flash, active_offset + KCH_SIGNATURE_BYTE_SIZE as u32)?;
    pfm::apply_protection(&mut env.port, domain.flash_device(), domain, &pfm);

    cprintln!("[update] {} applied, svn {}", domain_str(domain), info.svn);
    Ok(UpdateOutcome::Applied)
}

fn capsule_total_len<P: PfrPlatform>(env: &mut FwEnv<P>, sig_offset: u32) -> PfrResult<u32> {
    let mut buf = [0u8; BLOCK0_BYTE_SIZE];
    env.flash.read_exact(sig_offset, &mut buf)?;
    let b0 = Block0::read_from(&buf[..]).ok_or(PfrError::SIG_VERIFIER_DECODE_FAILED)?;
    Ok(KCH_SIGNATURE_BYTE_SIZE as u32 + b0.pc_length)
}
