/*++

Licensed under the Apache-2.0 license.

File Name:

    mod.rs

Abstract:

    File contains the top level dispatch of the per-cycle firmware flows.

--*/

pub mod recovery;
pub mod update;

use crate::fw_env::{FwEnv, PfrPlatform};
use crate::cprintln;
use pfr_drivers::{FwDomain, PlatformState, UpdateIntent};
use pfr_error::{PfrError, PfrResult};

use recovery::RecoveryOutcome;
use update::UpdateOutcome;

/// Terminal result of one authentication/update cycle
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CycleOutcome {
    /// No intent pending, all regions healthy
    Idle,

    /// Recovery actions or updates were serviced
    Serviced,

    /// A decommission capsule was accepted; the policy store is erased
    /// and control passes to the factory image
    Decommissioned,

    /// At least one domain is unrecoverable; the platform is held in
    /// lockdown until external intervention
    Lockdown,
}

pub(crate) fn domain_str(domain: FwDomain) -> &'static str {
    match domain {
        FwDomain::Cpld => "cpld",
        FwDomain::Pch => "pch",
        FwDomain::Bmc => "bmc",
    }
}

/// Execute one full authentication cycle: per-domain recovery passes,
/// then pending updates, firmware domains before CPLD.
///
/// # Arguments
///
/// * `env` - Firmware Environment
pub fn flow_run<P: PfrPlatform>(env: &mut FwEnv<P>) -> PfrResult<CycleOutcome> {
    if !env.persistent.provisioned()? {
        cprintln!("[cycle] policy store not provisioned");
        return Err(PfrError::POLICY_STORE_NOT_PROVISIONED);
    }

    // Read-once-and-clear; every set bit is serviced this pass.
    let intent = env.port.take_update_intent();
    env.port.report_state(PlatformState::AuthInProgress);
    cprintln!("[cycle] ++");

    let mut lockdown = false;
    let mut serviced = false;

    for domain in [FwDomain::Pch, FwDomain::Bmc] {
        // The two flash devices share one bus; select the domain's device
        // and complete all work against it before moving on.
        env.flash.select(domain.flash_device());

        match recovery::run(env, domain)? {
            RecoveryOutcome::Unrecoverable => {
                lockdown = true;
                continue;
            }
            RecoveryOutcome::Recovered => serviced = true,
            _ => {}
        }

        let bits = intent & UpdateIntent::domain_bits(domain);
        if !bits.is_empty() {
            serviced = true;
            if let UpdateOutcome::Decommissioned = update::run(env, domain, bits) {
                return decommission(env);
            }
        }
    }

    // CPLD runs last: a CPLD update hands control to the reconfiguration
    // logic and nothing after it would execute.
    let bits = intent & UpdateIntent::domain_bits(FwDomain::Cpld);
    if !bits.is_empty() {
        serviced = true;
        env.flash.select(FwDomain::Cpld.flash_device());
        if let UpdateOutcome::Decommissioned = update::run(env, FwDomain::Cpld, bits) {
            return decommission(env);
        }
    }

    if lockdown {
        env.port.report_state(PlatformState::Lockdown);
        cprintln!("[cycle] lockdown --");
        return Ok(CycleOutcome::Lockdown);
    }

    env.port.report_state(PlatformState::RuntimeMonitoring);
    cprintln!("[cycle] --");
    Ok(if serviced {
        CycleOutcome::Serviced
    } else {
        CycleOutcome::Idle
    })
}

fn decommission<P: PfrPlatform>(env: &mut FwEnv<P>) -> PfrResult<CycleOutcome> {
    cprintln!("[cycle] decommissioned");
    env.port.report_state(PlatformState::Decommissioned);
    env.port.trigger_cpld_reconfig();
    Ok(CycleOutcome::Decommissioned)
}
