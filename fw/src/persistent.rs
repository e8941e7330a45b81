/*++

Licensed under the Apache-2.0 license.

File Name:

    persistent.rs

Abstract:

    File contains the persistent policy state: the provisioning word map,
    the SVN anti-rollback fields, and the CSK cancellation bitmaps.

--*/

use pfr_capsule_types::CSK_KEY_ID_MAX;
use pfr_drivers::{FwDomain, PolicyStorage, Sha256Digest};
use pfr_error::{PfrError, PfrResult};

// Provisioning word map. The page is erased to all-ones; programming can
// only clear bits.
const WORD_STATUS: u32 = 0;
const WORD_ROOT_KEY_DIGEST: u32 = 1; // 8 words
const WORD_SVN_BASE: u32 = 9; // 2 words per domain: CPLD, PCH, BMC
const WORD_CSK_BASE: u32 = 16; // 4 words per domain: CPLD, PCH, BMC
const WORD_PCH_REGIONS: u32 = 32; // active, recovery, staging
const WORD_BMC_REGIONS: u32 = 35; // active, recovery, staging
const WORD_CPLD_STAGING: u32 = 38;

/// Status word bit cleared once the page holds provisioned data
const STATUS_PROVISIONED: u32 = 1 << 0;

/// Highest representable anti-rollback threshold
pub const SVN_MAX: u8 = 64;

fn svn_word(domain: FwDomain) -> u32 {
    match domain {
        FwDomain::Cpld => WORD_SVN_BASE,
        FwDomain::Pch => WORD_SVN_BASE + 2,
        FwDomain::Bmc => WORD_SVN_BASE + 4,
    }
}

fn csk_word(domain: FwDomain) -> u32 {
    match domain {
        FwDomain::Cpld => WORD_CSK_BASE,
        FwDomain::Pch => WORD_CSK_BASE + 4,
        FwDomain::Bmc => WORD_CSK_BASE + 8,
    }
}

/// Provisioning values written at manufacturing time
#[derive(Default, Clone)]
pub struct ProvisionConfig {
    pub root_key_digest: Sha256Digest,

    /// PCH active / recovery / staging region offsets
    pub pch_regions: [u32; 3],

    /// BMC active / recovery / staging region offsets
    pub bmc_regions: [u32; 3],

    /// CPLD staging region offset on the BMC flash
    pub cpld_staging: u32,
}

/// Owned view over the persistent policy storage. All mutable policy
/// state lives here; the flows never touch the storage directly.
pub struct PersistentState<S: PolicyStorage> {
    storage: S,
}

impl<S: PolicyStorage> PersistentState<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn provisioned(&self) -> PfrResult<bool> {
        Ok(self.storage.read_word(WORD_STATUS)? & STATUS_PROVISIONED == 0)
    }

    /// Write the provisioning values into an erased page
    pub fn provision(&mut self, config: &ProvisionConfig) -> PfrResult<()> {
        for (i, chunk) in config.root_key_digest.chunks_exact(4).enumerate() {
            let word = u32::from_le_bytes(chunk.try_into().unwrap());
            self.storage.program_word(WORD_ROOT_KEY_DIGEST + i as u32, word)?;
        }
        for (i, &offset) in config.pch_regions.iter().enumerate() {
            self.storage.program_word(WORD_PCH_REGIONS + i as u32, offset)?;
        }
        for (i, &offset) in config.bmc_regions.iter().enumerate() {
            self.storage.program_word(WORD_BMC_REGIONS + i as u32, offset)?;
        }
        self.storage.program_word(WORD_CPLD_STAGING, config.cpld_staging)?;
        self.storage.program_word(WORD_STATUS, !STATUS_PROVISIONED)
    }

    /// Erase the whole policy page (decommission)
    pub fn erase(&mut self) {
        self.storage.erase();
    }

    pub fn root_key_digest(&self) -> PfrResult<Sha256Digest> {
        let mut digest = [0u8; 32];
        for (i, chunk) in digest.chunks_exact_mut(4).enumerate() {
            let word = self.storage.read_word(WORD_ROOT_KEY_DIGEST + i as u32)?;
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Ok(digest)
    }

    pub fn active_region(&self, domain: FwDomain) -> PfrResult<u32> {
        match domain {
            FwDomain::Pch => self.storage.read_word(WORD_PCH_REGIONS),
            FwDomain::Bmc => self.storage.read_word(WORD_BMC_REGIONS),
            FwDomain::Cpld => Err(PfrError::POLICY_STORE_WORD_OUT_OF_BOUNDS),
        }
    }

    pub fn recovery_region(&self, domain: FwDomain) -> PfrResult<u32> {
        match domain {
            FwDomain::Pch => self.storage.read_word(WORD_PCH_REGIONS + 1),
            FwDomain::Bmc => self.storage.read_word(WORD_BMC_REGIONS + 1),
            FwDomain::Cpld => Err(PfrError::POLICY_STORE_WORD_OUT_OF_BOUNDS),
        }
    }

    pub fn staging_region(&self, domain: FwDomain) -> PfrResult<u32> {
        match domain {
            FwDomain::Pch => self.storage.read_word(WORD_PCH_REGIONS + 2),
            FwDomain::Bmc => self.storage.read_word(WORD_BMC_REGIONS + 2),
            FwDomain::Cpld => self.storage.read_word(WORD_CPLD_STAGING),
        }
    }

    fn svn_field(&self, domain: FwDomain) -> PfrResult<u64> {
        let lo = self.storage.read_word(svn_word(domain))? as u64;
        let hi = self.storage.read_word(svn_word(domain) + 1)? as u64;
        Ok(hi << 32 | lo)
    }

    /// Anti-rollback threshold: the count of contiguous cleared low bits
    /// of the 64-bit field. The erased field (all ones) is threshold 0.
    pub fn svn_threshold(&self, domain: FwDomain) -> PfrResult<u8> {
        Ok(self.svn_field(domain)?.trailing_zeros() as u8)
    }

    pub fn svn_valid(&self, domain: FwDomain, svn: u8) -> PfrResult<bool> {
        Ok(svn >= self.svn_threshold(domain)?)
    }

    /// Raise the threshold to `svn` by clearing bits `[0, svn)`.
    /// Monotonic: bits already cleared stay cleared, so committing a
    /// lower svn than the current threshold never lowers it.
    pub fn svn_commit(&mut self, domain: FwDomain, svn: u8) -> PfrResult<()> {
        if svn > SVN_MAX {
            return Err(PfrError::POLICY_STORE_SVN_OUT_OF_BOUNDS);
        }
        let mask: u64 = if svn >= 64 { 0 } else { !0u64 << svn };
        self.storage.program_word(svn_word(domain), mask as u32)?;
        self.storage.program_word(svn_word(domain) + 1, (mask >> 32) as u32)
    }

    /// True when `key_id` is in range and bit `key_id` of the domain's
    /// cancellation bitmap is still set
    pub fn csk_key_valid(&self, domain: FwDomain, key_id: u32) -> PfrResult<bool> {
        if key_id > CSK_KEY_ID_MAX {
            return Ok(false);
        }
        let word = self.storage.read_word(csk_word(domain) + key_id / 32)?;
        Ok(word & (1 << (key_id % 32)) != 0)
    }

    /// Clear bit `key_id` of the domain's cancellation bitmap. Persisted
    /// immediately; irreversible; idempotent.
    pub fn cancel_csk_key(&mut self, domain: FwDomain, key_id: u32) -> PfrResult<()> {
        if key_id > CSK_KEY_ID_MAX {
            return Err(PfrError::POLICY_STORE_KEY_ID_OUT_OF_BOUNDS);
        }
        let idx = csk_word(domain) + key_id / 32;
        let word = self.storage.read_word(idx)?;
        self.storage.program_word(idx, word & !(1 << (key_id % 32)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RAM model of the provisioning page with bit-clearing semantics
    struct TestStorage {
        words: [u32; 64],
    }

    impl Default for TestStorage {
        fn default() -> Self {
            Self { words: [!0u32; 64] }
        }
    }

    impl PolicyStorage for TestStorage {
        fn read_word(&self, idx: u32) -> PfrResult<u32> {
            self.words
                .get(idx as usize)
                .copied()
                .ok_or(PfrError::POLICY_STORE_WORD_OUT_OF_BOUNDS)
        }

        fn program_word(&mut self, idx: u32, value: u32) -> PfrResult<()> {
            let word = self
                .words
                .get_mut(idx as usize)
                .ok_or(PfrError::POLICY_STORE_WORD_OUT_OF_BOUNDS)?;
            *word &= value;
            Ok(())
        }

        fn erase(&mut self) {
            self.words = [!0u32; 64];
        }
    }

    fn provisioned_state() -> PersistentState<TestStorage> {
        let mut state = PersistentState::new(TestStorage::default());
        state
            .provision(&ProvisionConfig {
                root_key_digest: [0xA5; 32],
                pch_regions: [0x1000, 0x2000, 0x3000],
                bmc_regions: [0x4000, 0x5000, 0x6000],
                cpld_staging: 0x7000,
            })
            .unwrap();
        state
    }

    #[test]
    fn test_provisioning() {
        let state = PersistentState::new(TestStorage::default());
        assert_eq!(state.provisioned(), Ok(false));

        let state = provisioned_state();
        assert_eq!(state.provisioned(), Ok(true));
        assert_eq!(state.root_key_digest(), Ok([0xA5; 32]));
        assert_eq!(state.active_region(FwDomain::Pch), Ok(0x1000));
        assert_eq!(state.staging_region(FwDomain::Cpld), Ok(0x7000));
        assert_eq!(state.recovery_region(FwDomain::Bmc), Ok(0x5000));
    }

    #[test]
    fn test_svn_threshold_monotonic() {
        let mut state = provisioned_state();
        assert_eq!(state.svn_threshold(FwDomain::Bmc), Ok(0));

        state.svn_commit(FwDomain::Bmc, 5).unwrap();
        assert_eq!(state.svn_threshold(FwDomain::Bmc), Ok(5));
        for svn in 0..=SVN_MAX {
            assert_eq!(state.svn_valid(FwDomain::Bmc, svn), Ok(svn >= 5));
        }

        // Committing a lower svn never lowers the threshold.
        state.svn_commit(FwDomain::Bmc, 3).unwrap();
        assert_eq!(state.svn_threshold(FwDomain::Bmc), Ok(5));

        state.svn_commit(FwDomain::Bmc, 64).unwrap();
        assert_eq!(state.svn_threshold(FwDomain::Bmc), Ok(64));

        // Other domains are untouched.
        assert_eq!(state.svn_threshold(FwDomain::Pch), Ok(0));
    }

    #[test]
    fn test_csk_cancellation_idempotent() {
        let mut state = provisioned_state();
        assert_eq!(state.csk_key_valid(FwDomain::Pch, 40), Ok(true));

        state.cancel_csk_key(FwDomain::Pch, 40).unwrap();
        assert_eq!(state.csk_key_valid(FwDomain::Pch, 40), Ok(false));
        assert_eq!(state.csk_key_valid(FwDomain::Pch, 41), Ok(true));
        assert_eq!(state.csk_key_valid(FwDomain::Bmc, 40), Ok(true));

        // Cancelling twice has the same observable effect as once.
        state.cancel_csk_key(FwDomain::Pch, 40).unwrap();
        assert_eq!(state.csk_key_valid(FwDomain::Pch, 40), Ok(false));
        assert_eq!(state.csk_key_valid(FwDomain::Pch, 39), Ok(true));

        assert_eq!(state.csk_key_valid(FwDomain::Pch, 128), Ok(false));
        assert_eq!(
            state.cancel_csk_key(FwDomain::Pch, 128),
            Err(PfrError::POLICY_STORE_KEY_ID_OUT_OF_BOUNDS)
        );
    }

    #[test]
    fn test_erase_resets_policy() {
        let mut state = provisioned_state();
        state.svn_commit(FwDomain::Bmc, 7).unwrap();
        state.cancel_csk_key(FwDomain::Bmc, 1).unwrap();

        state.erase();
        assert_eq!(state.provisioned(), Ok(false));
        assert_eq!(state.svn_threshold(FwDomain::Bmc), Ok(0));
        assert_eq!(state.csk_key_valid(FwDomain::Bmc, 1), Ok(true));
    }
}
