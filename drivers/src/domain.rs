/*++

Licensed under the Apache-2.0 license.

File Name:

    domain.rs

Abstract:

    File contains the firmware domain and update intent types.

--*/

use bitflags::bitflags;

/// Physical flash device behind the shared SPI bus
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FlashDevice {
    BmcFlash,
    PchFlash,
}

/// Independently managed firmware target
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FwDomain {
    Cpld,
    Pch,
    Bmc,
}

impl FwDomain {
    /// Flash device holding the domain's regions. CPLD capsules are staged
    /// on the BMC flash.
    pub fn flash_device(&self) -> FlashDevice {
        match self {
            FwDomain::Pch => FlashDevice::PchFlash,
            FwDomain::Cpld | FwDomain::Bmc => FlashDevice::BmcFlash,
        }
    }
}

bitflags! {
    /// Update intent bitmask, read once per cycle and cleared.
    pub struct UpdateIntent: u32 {
        const PCH_ACTIVE = 0x01;
        const PCH_RECOVERY = 0x02;
        const CPLD_ACTIVE = 0x04;
        const CPLD_RECOVERY = 0x08;
        const BMC_ACTIVE = 0x10;
        const BMC_RECOVERY = 0x20;
    }
}

impl UpdateIntent {
    /// Intent bits belonging to one domain
    pub fn domain_bits(domain: FwDomain) -> UpdateIntent {
        match domain {
            FwDomain::Pch => UpdateIntent::PCH_ACTIVE | UpdateIntent::PCH_RECOVERY,
            FwDomain::Cpld => UpdateIntent::CPLD_ACTIVE | UpdateIntent::CPLD_RECOVERY,
            FwDomain::Bmc => UpdateIntent::BMC_ACTIVE | UpdateIntent::BMC_RECOVERY,
        }
    }

    /// The single domain this intent addresses, if exactly one
    pub fn domain(&self) -> Option<FwDomain> {
        for domain in [FwDomain::Cpld, FwDomain::Pch, FwDomain::Bmc] {
            if Self::domain_bits(domain).contains(*self) && !self.is_empty() {
                return Some(domain);
            }
        }
        None
    }

    /// True when the intent requests an active-image update without the
    /// matching recovery-image update.
    pub fn is_active_only(&self, domain: FwDomain) -> bool {
        let active = match domain {
            FwDomain::Pch => UpdateIntent::PCH_ACTIVE,
            FwDomain::Cpld => UpdateIntent::CPLD_ACTIVE,
            FwDomain::Bmc => UpdateIntent::BMC_ACTIVE,
        };
        let recovery = match domain {
            FwDomain::Pch => UpdateIntent::PCH_RECOVERY,
            FwDomain::Cpld => UpdateIntent::CPLD_RECOVERY,
            FwDomain::Bmc => UpdateIntent::BMC_RECOVERY,
        };
        self.contains(active) && !self.contains(recovery)
    }
}
