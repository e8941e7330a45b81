/*++

Licensed under the Apache-2.0 license.

File Name:

   rustcrypto.rs

Abstract:

    File contains the RustCrypto backend for the capsule generator.

--*/

use core::ops::Deref;

use anyhow::anyhow;

use crate::CapsuleGeneratorCrypto;

use {
    ecdsa::{elliptic_curve::sec1::ToEncodedPoint, signature::hazmat::PrehashSigner},
    sha2::{Digest, Sha256},
};

#[derive(Default)]
pub struct RustCrypto {}

impl CapsuleGeneratorCrypto for RustCrypto {
    fn sha256_digest(&self, data: &[u8]) -> anyhow::Result<[u8; 32]> {
        let mut engine = Sha256::new();
        engine.update(data);
        Ok(engine.finalize().into())
    }

    fn ecdsa256_sign(
        &self,
        digest: &[u8; 32],
        priv_key: &[u8; 32],
    ) -> anyhow::Result<([u8; 32], [u8; 32])> {
        let sig: p256::ecdsa::Signature =
            p256::ecdsa::SigningKey::from_slice(priv_key)?.sign_prehash(digest)?;

        let r = sig.r().deref().to_bytes();
        let s = sig.s().deref().to_bytes();
        Ok((r.into(), s.into()))
    }

    fn ecdsa256_pub_key(&self, priv_key: &[u8; 32]) -> anyhow::Result<([u8; 32], [u8; 32])> {
        let key = p256::ecdsa::SigningKey::from_slice(priv_key)?;
        let point = key.verifying_key().to_encoded_point(false);

        let x = point.x().ok_or(anyhow!("Error parsing x coordinate"))?;
        let y = point.y().ok_or(anyhow!("Error parsing y coordinate"))?;
        Ok(((*x).into(), (*y).into()))
    }
}
