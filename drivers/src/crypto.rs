/*++

Licensed under the Apache-2.0 license.

File Name:

    crypto.rs

Abstract:

    File contains the crypto collaborator trait.

--*/

/// SHA-256 digest
pub type Sha256Digest = [u8; 32];

/// P-256 scalar / coordinate size in bytes
pub const ECC256_SCALAR_BYTE_SIZE: usize = 32;

/// Incremental SHA-256 operation
pub trait Sha256Hasher {
    fn update(&mut self, data: &[u8]);

    fn finish(self) -> Sha256Digest;
}

/// Blocking hardware crypto operations.
///
/// Both operations busy-wait on the hardware engine; the calls return only
/// once the engine is done.
pub trait CryptoEngine {
    type Hasher: Sha256Hasher;

    /// Start an incremental SHA-256 operation
    fn sha256_start(&mut self) -> Self::Hasher;

    /// Calculate the SHA-256 digest of `data`
    fn sha256(&mut self, data: &[u8]) -> Sha256Digest {
        let mut hasher = self.sha256_start();
        hasher.update(data);
        hasher.finish()
    }

    /// Verify an ECDSA P-256 signature over a SHA-256 digest
    fn ecdsa_p256_verify(
        &mut self,
        pub_x: &[u8; ECC256_SCALAR_BYTE_SIZE],
        pub_y: &[u8; ECC256_SCALAR_BYTE_SIZE],
        sig_r: &[u8; ECC256_SCALAR_BYTE_SIZE],
        sig_s: &[u8; ECC256_SCALAR_BYTE_SIZE],
        digest: &Sha256Digest,
    ) -> bool;
}
