/*++

Licensed under the Apache-2.0 license.

File Name:

   generator.rs

Abstract:

    PFR capsule generator

--*/
use anyhow::bail;
use pfr_capsule_types::*;
use zerocopy::{AsBytes, FromBytes};

use crate::*;

/// Capsule generator
pub struct CapsuleGenerator<Crypto: CapsuleGeneratorCrypto> {
    crypto: Crypto,
}

impl<Crypto: CapsuleGeneratorCrypto> CapsuleGenerator<Crypto> {
    /// Create an instance of `CapsuleGenerator`
    pub fn new(crypto: Crypto) -> Self {
        Self { crypto }
    }

    /// Place a 32-byte value in the low bytes of a 48-byte wire slot
    pub fn wire_scalar(value: &[u8; 32]) -> WireScalar {
        let mut slot = [0u8; WIRE_SCALAR_BYTE_SIZE];
        slot[..32].copy_from_slice(value);
        slot
    }

    /// Digest that pins the root key: SHA-256 of the X ‖ Y wire fields
    pub fn root_key_digest(&self, keys: &KeyConfig) -> anyhow::Result<[u8; 32]> {
        let (x, y) = self.crypto.ecdsa256_pub_key(&keys.root_priv)?;
        let mut buf = [0u8; 2 * WIRE_SCALAR_BYTE_SIZE];
        buf[..WIRE_SCALAR_BYTE_SIZE].copy_from_slice(&Self::wire_scalar(&x));
        buf[WIRE_SCALAR_BYTE_SIZE..].copy_from_slice(&Self::wire_scalar(&y));
        self.crypto.sha256_digest(&buf)
    }

    /// Generate the 1024-byte KCH signature for `content`
    ///
    /// # Arguments
    ///
    /// * `pc_type` - Full `pc_type` word, flag bits included
    /// * `content` - Protected content; length must be a nonzero multiple of 128
    /// * `keys`    - Signing keys
    pub fn gen_signature(
        &self,
        pc_type: u32,
        content: &[u8],
        keys: &KeyConfig,
    ) -> anyhow::Result<KchSignature> {
        if content.is_empty() || content.len() % PC_LENGTH_ALIGN as usize != 0 {
            bail!("content length {} not a nonzero multiple of 128", content.len());
        }

        let mut sig = KchSignature::new_zeroed();
        sig.block0.magic = BLOCK0_MAGIC;
        sig.block0.pc_length = content.len() as u32;
        sig.block0.pc_type = pc_type;
        sig.block0.sha256 = self.crypto.sha256_digest(content)?;

        sig.block1.header.magic = BLOCK1_MAGIC;

        let (root_x, root_y) = self.crypto.ecdsa256_pub_key(&keys.root_priv)?;
        let root = &mut sig.block1.root_entry;
        root.magic = ROOT_ENTRY_MAGIC;
        root.curve_magic = CURVE_MAGIC_SECP256;
        root.permissions = ROOT_ENTRY_SENTINEL;
        root.key_id = ROOT_ENTRY_SENTINEL;
        root.pubkey_x = Self::wire_scalar(&root_x);
        root.pubkey_y = Self::wire_scalar(&root_y);

        let b0_digest = self.crypto.sha256_digest(sig.block0.as_bytes())?;

        if pc_type & PC_TYPE_KEY_CANCELLATION != 0 {
            // Short chain: the root key signs Block0 directly through a
            // Block0 entry written into the CSK slot.
            let mut entry = Block0Entry::new_zeroed();
            entry.magic = B0_ENTRY_MAGIC;
            entry.curve_magic = CURVE_MAGIC_SECP256;
            let (r, s) = self.crypto.ecdsa256_sign(&b0_digest, &keys.root_priv)?;
            entry.sig_r = Self::wire_scalar(&r);
            entry.sig_s = Self::wire_scalar(&s);
            sig.block1.csk_entry.as_bytes_mut()[..core::mem::size_of::<Block0Entry>()]
                .copy_from_slice(entry.as_bytes());
        } else {
            let (csk_x, csk_y) = self.crypto.ecdsa256_pub_key(&keys.csk_priv)?;
            let csk = &mut sig.block1.csk_entry;
            csk.magic = CSK_ENTRY_MAGIC;
            csk.curve_magic = CURVE_MAGIC_SECP256;
            csk.permissions = keys.csk_permissions;
            csk.key_id = keys.csk_key_id;
            csk.pubkey_x = Self::wire_scalar(&csk_x);
            csk.pubkey_y = Self::wire_scalar(&csk_y);

            let body_digest = self
                .crypto
                .sha256_digest(&csk.as_bytes()[CSK_ENTRY_SIGNED_RANGE])?;
            let (r, s) = self.crypto.ecdsa256_sign(&body_digest, &keys.root_priv)?;
            let csk = &mut sig.block1.csk_entry;
            csk.sig_r = Self::wire_scalar(&r);
            csk.sig_s = Self::wire_scalar(&s);

            let b0 = &mut sig.block1.b0_entry;
            b0.magic = B0_ENTRY_MAGIC;
            b0.curve_magic = CURVE_MAGIC_SECP256;
            let (r, s) = self.crypto.ecdsa256_sign(&b0_digest, &keys.csk_priv)?;
            b0.sig_r = Self::wire_scalar(&r);
            b0.sig_s = Self::wire_scalar(&s);
        }

        Ok(sig)
    }

    /// Generate a PFM (header + body)
    pub fn gen_pfm(&self, config: &PfmConfig) -> Vec<u8> {
        let mut body = Vec::new();
        for (def, digest) in &config.regions {
            body.extend_from_slice(def.as_bytes());
            if let Some(digest) = digest {
                body.extend_from_slice(digest);
            }
        }
        for rule in &config.smbus_rules {
            body.extend_from_slice(rule.as_bytes());
        }

        let header = PfmHeader {
            tag: PFM_TAG,
            svn: config.svn,
            bkc: config.bkc,
            major: config.major,
            minor: config.minor,
            reserved: 0,
            oem: config.oem,
            length: (core::mem::size_of::<PfmHeader>() + body.len()) as u32,
        };

        let mut pfm = header.as_bytes().to_vec();
        pfm.extend_from_slice(&body);
        pfm
    }

    /// Generate a signed PFM: KCH signature followed by the manifest
    /// padded to the 128-byte signing boundary. This is the Active-region
    /// image format.
    pub fn gen_signed_pfm(
        &self,
        pfm_type: ProtectedContentType,
        config: &PfmConfig,
        keys: &KeyConfig,
    ) -> anyhow::Result<Vec<u8>> {
        let mut content = self.gen_pfm(config);
        content.resize(pc_align(content.len() as u32) as usize, 0);

        let sig = self.gen_signature(pfm_type as u32, &content, keys)?;
        let mut out = sig.as_bytes().to_vec();
        out.extend_from_slice(&content);
        Ok(out)
    }

    /// Generate a PBC structure: header, active bitmap, compression
    /// bitmap, payload stream
    pub fn gen_pbc(&self, config: &PbcConfig) -> Vec<u8> {
        let bitmap_bytes = (config.bitmap_nbit / 8) as usize;
        let mut active = vec![0u8; bitmap_bytes];
        let mut compression = vec![0u8; bitmap_bytes];

        // The MSB of each bitmap byte is the lowest-numbered page.
        let set_bit = |bitmap: &mut [u8], page: u32| {
            bitmap[(page / 8) as usize] |= 0x80 >> (page % 8);
        };

        for &page in &config.erase_pages {
            set_bit(&mut active, page);
        }

        let mut copy_pages = config.copy_pages.clone();
        copy_pages.sort_by_key(|(page, _)| *page);
        let mut payload = Vec::new();
        for (page, data) in &copy_pages {
            set_bit(&mut compression, *page);
            let mut chunk = data.clone();
            chunk.resize(PBC_PAGE_SIZE as usize, 0xFF);
            payload.extend_from_slice(&chunk);
        }

        let header = PbcHeader {
            tag: PBC_TAG,
            version: PBC_VERSION,
            page_size: PBC_PAGE_SIZE,
            pattern_size: PBC_PATTERN_SIZE,
            pattern: PBC_PATTERN,
            bitmap_nbit: config.bitmap_nbit,
            payload_len: payload.len() as u32,
            reserved: [0; 25],
        };

        let mut pbc = header.as_bytes().to_vec();
        pbc.extend_from_slice(&active);
        pbc.extend_from_slice(&compression);
        pbc.extend_from_slice(&payload);
        pbc
    }

    /// Generate a complete firmware update capsule: outer signature over
    /// a signed PFM followed by a PBC structure. Recovery and staging
    /// regions hold this format.
    pub fn gen_fw_update_capsule(
        &self,
        capsule_type: ProtectedContentType,
        pfm_config: &PfmConfig,
        pbc_config: &PbcConfig,
        keys: &KeyConfig,
    ) -> anyhow::Result<Vec<u8>> {
        let pfm_type = match capsule_type {
            ProtectedContentType::PchUpdate => ProtectedContentType::PchPfm,
            ProtectedContentType::BmcUpdate => ProtectedContentType::BmcPfm,
            other => bail!("not an update capsule type: {other:?}"),
        };

        let mut content = self.gen_signed_pfm(pfm_type, pfm_config, keys)?;
        content.extend_from_slice(&self.gen_pbc(pbc_config));
        content.resize(pc_align(content.len() as u32) as usize, 0);

        let sig = self.gen_signature(capsule_type as u32, &content, keys)?;
        let mut out = sig.as_bytes().to_vec();
        out.extend_from_slice(&content);
        Ok(out)
    }

    /// Generate a key-cancellation certificate for `csk_id` of the domain
    /// named by `content_type`
    pub fn gen_cancel_certificate(
        &self,
        content_type: ProtectedContentType,
        csk_id: u32,
        keys: &KeyConfig,
    ) -> anyhow::Result<Vec<u8>> {
        let mut payload = KeyCancellationPayload::new_zeroed();
        payload.csk_id = csk_id;

        let pc_type = content_type as u32 | PC_TYPE_KEY_CANCELLATION;
        let sig = self.gen_signature(pc_type, payload.as_bytes(), keys)?;
        let mut out = sig.as_bytes().to_vec();
        out.extend_from_slice(payload.as_bytes());
        Ok(out)
    }

    /// Generate a decommission capsule
    pub fn gen_decommission_capsule(&self, keys: &KeyConfig) -> anyhow::Result<Vec<u8>> {
        let payload = [0u8; CANCEL_PAYLOAD_BYTE_SIZE as usize];
        let pc_type = ProtectedContentType::CpldUpdate as u32 | PC_TYPE_DECOMMISSION;
        let sig = self.gen_signature(pc_type, &payload, keys)?;
        let mut out = sig.as_bytes().to_vec();
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Generate a CPLD update capsule. The bitstream's first word carries
    /// the capsule SVN; the content is fixed at `CPLD_UPDATE_PC_LENGTH`.
    pub fn gen_cpld_update_capsule(
        &self,
        svn: u8,
        keys: &KeyConfig,
    ) -> anyhow::Result<Vec<u8>> {
        let mut content = vec![0u8; CPLD_UPDATE_PC_LENGTH as usize];
        content[..4].copy_from_slice(&(svn as u32).to_le_bytes());

        let sig = self.gen_signature(ProtectedContentType::CpldUpdate as u32, &content, keys)?;
        let mut out = sig.as_bytes().to_vec();
        out.extend_from_slice(&content);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_keys;

    #[test]
    fn test_signature_shape() {
        let gen = CapsuleGenerator::new(RustCrypto::default());
        let keys = test_keys::default_keys();
        let content = [0u8; 128];
        let sig = gen
            .gen_signature(ProtectedContentType::BmcUpdate as u32, &content, &keys)
            .unwrap();

        assert_eq!(sig.block0.pc_length, 128);
        assert_eq!(sig.block1.csk_entry.key_id, 0);
        // Wire scalars keep their trailing 16 bytes zero.
        assert_eq!(sig.block1.root_entry.pubkey_x[32..], [0u8; 16]);
        assert_eq!(sig.block1.b0_entry.sig_s[32..], [0u8; 16]);
    }

    #[test]
    fn test_pbc_bitmap_bit_order() {
        let gen = CapsuleGenerator::new(RustCrypto::default());
        let pbc = gen.gen_pbc(&PbcConfig {
            bitmap_nbit: 16,
            erase_pages: vec![0, 9],
            copy_pages: vec![(9, vec![0xAA; 4096])],
        });

        let active = &pbc[PBC_HEADER_BYTE_SIZE..PBC_HEADER_BYTE_SIZE + 2];
        assert_eq!(active, &[0x80, 0x40]);
        let compression = &pbc[PBC_HEADER_BYTE_SIZE + 2..PBC_HEADER_BYTE_SIZE + 4];
        assert_eq!(compression, &[0x00, 0x40]);
        assert_eq!(pbc.len(), PBC_HEADER_BYTE_SIZE + 4 + 4096);
    }

    #[test]
    fn test_fw_update_capsule_layout() {
        let gen = CapsuleGenerator::new(RustCrypto::default());
        let keys = test_keys::default_keys();
        let capsule = gen
            .gen_fw_update_capsule(
                ProtectedContentType::BmcUpdate,
                &PfmConfig::default(),
                &PbcConfig::default(),
                &keys,
            )
            .unwrap();

        let sig = KchSignature::read_from_prefix(capsule.as_slice()).unwrap();
        assert_eq!(
            sig.block0.pc_length as usize,
            capsule.len() - KCH_SIGNATURE_BYTE_SIZE
        );
        let pfm_sig =
            KchSignature::read_from_prefix(&capsule[KCH_SIGNATURE_BYTE_SIZE..]).unwrap();
        assert_eq!(
            pfm_sig.block0.content_type(),
            Some(ProtectedContentType::BmcPfm)
        );
    }
}
