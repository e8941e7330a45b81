// Licensed under the Apache-2.0 license

//! Signature-chain tamper tests against the in-memory platform model:
//! a capsule signed with the real keys must stop verifying when any
//! single protected byte of its signature block changes.

use pfr_capsule_gen::{test_keys, CapsuleGenerator, PbcConfig, PfmConfig, RustCrypto};
use pfr_capsule_types::ProtectedContentType;
use pfr_capsule_verify::SignatureVerifier;
use pfr_drivers::{FlashDevice, SpiFlash};
use pfr_fw::{FwVerificationEnv, PersistentState, ProvisionConfig};
use pfr_model::{ModelCrypto, ModelFlash, ModelPolicy};

// KchSignature byte offsets of the fields the sweep flips.
const B0_RESERVED: std::ops::Range<u32> = 12..16;
const B0_SHA256: std::ops::Range<u32> = 16..48;
const B0_RESERVED2: std::ops::Range<u32> = 96..128;
const ROOT_PUBKEY: std::ops::Range<u32> = 128 + 16 + 16..128 + 16 + 16 + 96;
const CSK_PUBKEY: std::ops::Range<u32> = 128 + 148 + 16..128 + 148 + 16 + 96;

struct VerifyRig {
    flash: ModelFlash,
    crypto: ModelCrypto,
    persistent: PersistentState<ModelPolicy>,
}

fn build_rig(capsule: &[u8]) -> VerifyRig {
    let gen = CapsuleGenerator::new(RustCrypto::default());
    let keys = test_keys::default_keys();

    let mut persistent = PersistentState::new(ModelPolicy::default());
    persistent
        .provision(&ProvisionConfig {
            root_key_digest: gen.root_key_digest(&keys).unwrap(),
            ..Default::default()
        })
        .unwrap();

    let mut flash = ModelFlash::new(1 << 16);
    flash.select(FlashDevice::BmcFlash);
    flash.load(FlashDevice::BmcFlash, 0, capsule);

    VerifyRig {
        flash,
        crypto: ModelCrypto::default(),
        persistent,
    }
}

impl VerifyRig {
    fn verify(&mut self) -> bool {
        let mut venv = FwVerificationEnv {
            flash: &mut self.flash,
            crypto: &mut self.crypto,
            persistent: &mut self.persistent,
        };
        SignatureVerifier::new(&mut venv).verify_signature(0).is_ok()
    }

    fn flip(&mut self, offset: u32) {
        let byte = self.flash.data(FlashDevice::BmcFlash)[offset as usize] ^ 0x01;
        self.flash.load(FlashDevice::BmcFlash, offset, &[byte]);
    }
}

fn signed_capsule() -> Vec<u8> {
    let gen = CapsuleGenerator::new(RustCrypto::default());
    gen.gen_fw_update_capsule(
        ProtectedContentType::BmcUpdate,
        &PfmConfig::default(),
        &PbcConfig::default(),
        &test_keys::default_keys(),
    )
    .unwrap()
}

#[test]
fn test_untampered_capsule_verifies() {
    let mut rig = build_rig(&signed_capsule());
    assert!(rig.verify());
}

#[test]
fn test_any_flipped_protected_byte_fails_verification() {
    let capsule = signed_capsule();
    let sweeps = [
        ("block0 reserved", B0_RESERVED),
        ("content digest", B0_SHA256),
        ("block0 reserved2", B0_RESERVED2),
        ("root pubkey", ROOT_PUBKEY),
        ("csk pubkey", CSK_PUBKEY),
    ];

    for (field, range) in sweeps {
        for offset in range {
            let mut rig = build_rig(&capsule);
            rig.flip(offset);
            assert!(
                !rig.verify(),
                "flipped {field} byte at offset {offset} still verifies"
            );
        }
    }
}

#[test]
fn test_flipped_content_byte_fails_verification() {
    // The protected content itself is covered by the Block0 digest.
    let capsule = signed_capsule();
    let mut rig = build_rig(&capsule);
    rig.flip(1024 + 64);
    assert!(!rig.verify());
}
