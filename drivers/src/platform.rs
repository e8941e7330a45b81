/*++

Licensed under the Apache-2.0 license.

File Name:

    platform.rs

Abstract:

    File contains the watchdog and platform port collaborator traits.

--*/

use crate::{FlashDevice, FwDomain, UpdateIntent};

/// Platform-visible major error code, reported alongside a minor code
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MajorError {
    PchAuthFailed = 0x01,
    BmcAuthFailed = 0x02,
    PchUpdateFailed = 0x03,
    BmcUpdateFailed = 0x04,
    CpldUpdateFailed = 0x05,
}

impl MajorError {
    /// Authentication-failure major code for a domain's flash regions
    pub fn auth_failed(domain: FwDomain) -> MajorError {
        match domain {
            FwDomain::Pch => MajorError::PchAuthFailed,
            // CPLD has no authenticated flash regions of its own; its
            // capsules are staged on and reported against the BMC flash.
            FwDomain::Bmc | FwDomain::Cpld => MajorError::BmcAuthFailed,
        }
    }

    /// Update-failure major code for a domain
    pub fn update_failed(domain: FwDomain) -> MajorError {
        match domain {
            FwDomain::Pch => MajorError::PchUpdateFailed,
            FwDomain::Bmc => MajorError::BmcUpdateFailed,
            FwDomain::Cpld => MajorError::CpldUpdateFailed,
        }
    }
}

/// Platform-visible minor error code
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MinorError {
    AuthActive = 0x01,
    AuthRecovery = 0x02,
    AuthActiveAndRecovery = 0x03,
    AuthAllRegions = 0x04,
    AuthStaging = 0x05,
    UpdateAuthFailed = 0x06,
    ExceededMaxAttempts = 0x07,
    ActiveUpdateBanned = 0x08,
    RecoveryUnavailable = 0x09,
}

/// Platform state milestones reported through the platform port
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PlatformState {
    AuthInProgress = 0x01,
    RecoveryInProgress = 0x02,
    UpdateInProgress = 0x03,
    RuntimeMonitoring = 0x04,
    Decommissioned = 0x05,
    Lockdown = 0x06,
}

/// Cooperative checkpoint for the external hardware watchdog
pub trait WatchdogPort {
    /// Service the watchdog. Called between erase spans and every few
    /// bitmap bits inside the patch engine's copy loop.
    fn service(&mut self);
}

/// Everything the core asks of the surrounding platform: intent and
/// force-recovery inputs, error/state reporting, and the protection
/// hardware driven from a validated PFM.
pub trait PlatformPort {
    /// Read and clear the update intent register
    fn take_update_intent(&mut self) -> UpdateIntent;

    /// External force-recovery signal for a domain
    fn force_recovery_asserted(&mut self, domain: FwDomain) -> bool;

    /// Report a (major, minor) error pair. Each failure is reported once.
    fn report_error(&mut self, major: MajorError, minor: MinorError);

    /// Report a platform state milestone
    fn report_state(&mut self, state: PlatformState);

    /// Enable SPI write protection over `[start, end)` of `device`
    fn apply_write_protection(&mut self, device: FlashDevice, start: u32, end: u32);

    /// Load one SMBus command whitelist rule
    fn apply_smbus_whitelist(&mut self, bus_id: u8, rule_id: u8, whitelist: &[u8; 32]);

    /// Hand control to the CPLD reconfiguration logic. Does not return
    /// control to the current cycle on real hardware.
    fn trigger_cpld_reconfig(&mut self);
}
