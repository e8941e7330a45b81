/*++

Licensed under the Apache-2.0 license.

File Name:

    fw_env.rs

Abstract:

    File implements a context holding all the collaborators utilized by
    the firmware flows. The primary need for this abstraction is to hide
    the hardware details from the flows; the natural side benefit is that
    it makes authoring models and tests easy.

--*/

use crate::persistent::PersistentState;
use pfr_drivers::{
    CryptoEngine, FwDomain, PlatformPort, PolicyStorage, SpiFlash, WatchdogPort,
};

/// Maximum consecutive failed update attempts before a domain is locked
/// out until a successful update or power cycle.
pub const MAX_FAILED_UPDATE_ATTEMPTS: u8 = 3;

/// Collaborator types for one platform
pub trait PfrPlatform {
    type Flash: SpiFlash;
    type Crypto: CryptoEngine;
    type Policy: PolicyStorage;
    type Wdt: WatchdogPort;
    type Port: PlatformPort;
}

/// Index of a domain into the per-domain RAM state arrays
pub fn domain_index(domain: FwDomain) -> usize {
    match domain {
        FwDomain::Cpld => 0,
        FwDomain::Pch => 1,
        FwDomain::Bmc => 2,
    }
}

/// Per-domain RAM state. Not persisted; resets on power cycle.
#[derive(Default)]
pub struct FwState {
    /// Consecutive failed update attempts per domain
    pub failed_attempts: [u8; 3],

    /// Recovery region is invalid and could not be repaired; active-only
    /// updates are banned for the domain
    pub recovery_unavailable: [bool; 3],

    /// Active, recovery and staging are all invalid
    pub unrecoverable: [bool; 3],
}

impl FwState {
    pub fn record_update_failure(&mut self, domain: FwDomain) {
        let count = &mut self.failed_attempts[domain_index(domain)];
        *count = count.saturating_add(1);
    }

    pub fn reset_update_failures(&mut self, domain: FwDomain) {
        self.failed_attempts[domain_index(domain)] = 0;
    }

    pub fn update_locked_out(&self, domain: FwDomain) -> bool {
        self.failed_attempts[domain_index(domain)] >= MAX_FAILED_UPDATE_ATTEMPTS
    }
}

/// Firmware Context
pub struct FwEnv<P: PfrPlatform> {
    /// SPI flash access (both devices behind the shared bus)
    pub flash: P::Flash,

    /// Blocking crypto engine
    pub crypto: P::Crypto,

    /// Hardware watchdog checkpoint
    pub wdt: P::Wdt,

    /// Platform port: intent, reporting, protection hardware
    pub port: P::Port,

    /// Persistent policy state
    pub persistent: PersistentState<P::Policy>,

    /// Per-domain RAM state
    pub state: FwState,
}
