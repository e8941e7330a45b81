/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    In-memory platform model for integration tests: RAM-backed dual
    flash with NOR erase/program semantics, a RustCrypto engine, a RAM
    policy page, and scripted platform ports.

--*/

use pfr_drivers::{
    CryptoEngine, FlashDevice, FwDomain, MajorError, MinorError, PlatformPort, PlatformState,
    PolicyStorage, Sha256Digest, Sha256Hasher, SpiFlash, UpdateIntent, WatchdogPort,
    BLOCK_SIZE_64K, ERASED_BYTE, PAGE_SIZE_4K, POLICY_WORD_COUNT,
};
use pfr_error::{PfrError, PfrResult};

use {
    ecdsa::signature::hazmat::PrehashVerifier,
    p256::ecdsa::{Signature, VerifyingKey},
    p256::EncodedPoint,
    sha2::{Digest, Sha256},
};

/// RAM model of the two SPI flash devices behind the shared bus.
///
/// Programming can only clear bits, like the NOR parts it stands in for;
/// erase restores the erased pattern. `load` is a host-side backdoor for
/// seeding images.
pub struct ModelFlash {
    devices: [Vec<u8>; 2],
    selected: FlashDevice,
    erase_4k_count: usize,
    erase_64k_count: usize,
}

fn device_index(device: FlashDevice) -> usize {
    match device {
        FlashDevice::BmcFlash => 0,
        FlashDevice::PchFlash => 1,
    }
}

impl ModelFlash {
    /// Create both devices, `size` bytes each, zero-filled so stray
    /// writes are distinguishable from erased pages
    pub fn new(size: usize) -> Self {
        Self {
            devices: [vec![0u8; size], vec![0u8; size]],
            selected: FlashDevice::BmcFlash,
            erase_4k_count: 0,
            erase_64k_count: 0,
        }
    }

    /// Host-side image loader; bypasses the NOR program rules
    pub fn load(&mut self, device: FlashDevice, offset: u32, data: &[u8]) {
        let dev = &mut self.devices[device_index(device)];
        dev[offset as usize..offset as usize + data.len()].copy_from_slice(data);
    }

    pub fn data(&self, device: FlashDevice) -> &[u8] {
        &self.devices[device_index(device)]
    }

    pub fn erase_4k_count(&self) -> usize {
        self.erase_4k_count
    }

    pub fn erase_64k_count(&self) -> usize {
        self.erase_64k_count
    }

    fn selected_mut(&mut self) -> &mut Vec<u8> {
        &mut self.devices[device_index(self.selected)]
    }

    fn check_range(&self, offset: u32, len: usize, err: PfrError) -> PfrResult<()> {
        let end = offset as usize + len;
        if end > self.devices[device_index(self.selected)].len() {
            return Err(err);
        }
        Ok(())
    }
}

impl SpiFlash for ModelFlash {
    fn select(&mut self, device: FlashDevice) {
        self.selected = device;
    }

    fn read_exact(&mut self, offset: u32, buf: &mut [u8]) -> PfrResult<()> {
        self.check_range(offset, buf.len(), PfrError::DRIVER_FLASH_READ_OUT_OF_BOUNDS)?;
        let dev = &self.devices[device_index(self.selected)];
        buf.copy_from_slice(&dev[offset as usize..offset as usize + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> PfrResult<()> {
        self.check_range(offset, data.len(), PfrError::DRIVER_FLASH_WRITE_OUT_OF_BOUNDS)?;
        let dev = self.selected_mut();
        for (i, &byte) in data.iter().enumerate() {
            // NOR programming clears bits; it never sets them.
            dev[offset as usize + i] &= byte;
        }
        Ok(())
    }

    fn wait_write_done(&mut self) {}

    fn erase_4k(&mut self, offset: u32) -> PfrResult<()> {
        if offset % PAGE_SIZE_4K != 0 {
            return Err(PfrError::DRIVER_FLASH_ERASE_MISALIGNED);
        }
        self.check_range(offset, PAGE_SIZE_4K as usize, PfrError::DRIVER_FLASH_ERASE_MISALIGNED)?;
        self.erase_4k_count += 1;
        let dev = self.selected_mut();
        dev[offset as usize..(offset + PAGE_SIZE_4K) as usize].fill(ERASED_BYTE);
        Ok(())
    }

    fn erase_64k(&mut self, offset: u32) -> PfrResult<()> {
        if offset % BLOCK_SIZE_64K != 0 {
            return Err(PfrError::DRIVER_FLASH_ERASE_MISALIGNED);
        }
        self.check_range(offset, BLOCK_SIZE_64K as usize, PfrError::DRIVER_FLASH_ERASE_MISALIGNED)?;
        self.erase_64k_count += 1;
        let dev = self.selected_mut();
        dev[offset as usize..(offset + BLOCK_SIZE_64K) as usize].fill(ERASED_BYTE);
        Ok(())
    }
}

/// RustCrypto implementation of the blocking crypto engine
#[derive(Default)]
pub struct ModelCrypto;

pub struct ModelHasher(Sha256);

impl Sha256Hasher for ModelHasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finish(self) -> Sha256Digest {
        self.0.finalize().into()
    }
}

impl CryptoEngine for ModelCrypto {
    type Hasher = ModelHasher;

    fn sha256_start(&mut self) -> ModelHasher {
        ModelHasher(Sha256::new())
    }

    fn ecdsa_p256_verify(
        &mut self,
        pub_x: &[u8; 32],
        pub_y: &[u8; 32],
        sig_r: &[u8; 32],
        sig_s: &[u8; 32],
        digest: &Sha256Digest,
    ) -> bool {
        let point = EncodedPoint::from_affine_coordinates(pub_x.into(), pub_y.into(), false);
        let Ok(key) = VerifyingKey::from_encoded_point(&point) else {
            return false;
        };
        let Ok(sig) = Signature::from_scalars(*sig_r, *sig_s) else {
            return false;
        };
        key.verify_prehash(digest, &sig).is_ok()
    }
}

/// RAM model of the provisioning page: erased to all-ones, programming
/// clears bits
pub struct ModelPolicy {
    words: Vec<u32>,
}

impl Default for ModelPolicy {
    fn default() -> Self {
        Self {
            words: vec![!0u32; POLICY_WORD_COUNT as usize],
        }
    }
}

impl PolicyStorage for ModelPolicy {
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
        self.words.fill(!0u32);
    }
}

/// Watchdog port that counts its checkpoints
#[derive(Default)]
pub struct ModelWdt {
    services: usize,
}

impl ModelWdt {
    pub fn services(&self) -> usize {
        self.services
    }
}

impl WatchdogPort for ModelWdt {
    fn service(&mut self) {
        self.services += 1;
    }
}

/// Scripted platform port: queued update intents, per-domain
/// force-recovery flags, and recordings of everything the core reports
/// or applies.
#[derive(Default)]
pub struct ModelPort {
    pub intent_queue: Vec<UpdateIntent>,
    pub force_recovery: Vec<FwDomain>,
    pub errors: Vec<(MajorError, MinorError)>,
    pub states: Vec<PlatformState>,
    pub write_protections: Vec<(FlashDevice, u32, u32)>,
    pub smbus_rules: Vec<(u8, u8, [u8; 32])>,
    pub cpld_reconfigs: usize,
}

impl ModelPort {
    /// Queue an intent for the next cycle
    pub fn push_intent(&mut self, intent: UpdateIntent) {
        self.intent_queue.push(intent);
    }
}

impl PlatformPort for ModelPort {
    fn take_update_intent(&mut self) -> UpdateIntent {
        if self.intent_queue.is_empty() {
            UpdateIntent::empty()
        } else {
            self.intent_queue.remove(0)
        }
    }

    fn force_recovery_asserted(&mut self, domain: FwDomain) -> bool {
        self.force_recovery.contains(&domain)
    }

    fn report_error(&mut self, major: MajorError, minor: MinorError) {
        self.errors.push((major, minor));
    }

    fn report_state(&mut self, state: PlatformState) {
        self.states.push(state);
    }

    fn apply_write_protection(&mut self, device: FlashDevice, start: u32, end: u32) {
        self.write_protections.push((device, start, end));
    }

    fn apply_smbus_whitelist(&mut self, bus_id: u8, rule_id: u8, whitelist: &[u8; 32]) {
        self.smbus_rules.push((bus_id, rule_id, *whitelist));
    }

    fn trigger_cpld_reconfig(&mut self) {
        self.cpld_reconfigs += 1;
    }
}
