/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains API and macros used by the library for error handling

--*/
#![cfg_attr(not(feature = "std"), no_std)]
use core::convert::From;
use core::num::{NonZeroU32, TryFromIntError};

/// PFR Error Type
/// Derives debug, copy, clone, eq, and partial eq
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PfrError(pub NonZeroU32);

/// Macro to define error constants ensuring uniqueness
///
/// This macro takes a list of (name, value, doc) tuples and generates
/// constant definitions for each error code.
#[macro_export]
macro_rules! define_error_constants {
    ($(($name:ident, $value:expr, $doc:expr)),* $(,)?) => {
        $(
            #[doc = $doc]
            pub const $name: PfrError = PfrError::new_const($value);
        )*

        #[cfg(test)]
        /// Returns a vector of all defined error constants for testing uniqueness
        pub fn all_constants() -> Vec<(& 'static str, u32)> {
            vec![
                $(
                    (stringify!($name), $value),
                )*
            ]
        }
    };
}

impl PfrError {
    /// Create a PFR error; intended to only be used from const contexts, as we don't want
    /// runtime panics if val is zero. The preferred way to get a PfrError from a u32 is to
    /// use `PfrError::try_from()` from the `TryFrom` trait impl.
    const fn new_const(val: u32) -> Self {
        match NonZeroU32::new(val) {
            Some(val) => Self(val),
            None => panic!("PfrError cannot be 0"),
        }
    }

    // Use the macro to define all error constants.
    //
    // Code ranges by component:
    //   0x0001_xxxx  signature-chain verifier (format / authentication)
    //   0x0002_xxxx  capsule validator (content / policy)
    //   0x0003_xxxx  PBC patch engine
    //   0x0004_xxxx  recovery orchestrator
    //   0x0005_xxxx  persistent policy store
    //   0x0006_xxxx  firmware flows
    //   0x0007_xxxx  collaborator faults
    define_error_constants![
        (
            SIG_VERIFIER_BLOCK0_MAGIC_MISMATCH,
            0x0001_0001,
            "Block0 magic mismatch"
        ),
        (
            SIG_VERIFIER_PC_TYPE_INVALID,
            0x0001_0002,
            "Block0 protected-content type out of range"
        ),
        (
            SIG_VERIFIER_PC_LENGTH_INVALID,
            0x0001_0003,
            "Block0 protected-content length not a nonzero multiple of 128"
        ),
        (
            SIG_VERIFIER_PC_LENGTH_MISMATCH,
            0x0001_0004,
            "Block0 protected-content length violates the type's class rule"
        ),
        (
            SIG_VERIFIER_BLOCK0_RESERVED_NOT_ZERO,
            0x0001_0005,
            "Block0 reserved bytes not zero"
        ),
        (
            SIG_VERIFIER_PC_DIGEST_MISMATCH,
            0x0001_0006,
            "Protected-content digest mismatch"
        ),
        (
            SIG_VERIFIER_BLOCK1_MAGIC_MISMATCH,
            0x0001_0007,
            "Block1 header magic mismatch"
        ),
        (
            SIG_VERIFIER_ROOT_MAGIC_MISMATCH,
            0x0001_0008,
            "Root entry magic mismatch"
        ),
        (
            SIG_VERIFIER_ROOT_CURVE_MISMATCH,
            0x0001_0009,
            "Root entry curve magic mismatch"
        ),
        (
            SIG_VERIFIER_ROOT_PERMISSIONS_INVALID,
            0x0001_000A,
            "Root entry permissions field is not the all-ones sentinel"
        ),
        (
            SIG_VERIFIER_ROOT_KEY_ID_INVALID,
            0x0001_000B,
            "Root entry key id is not the non-cancellable sentinel"
        ),
        (
            SIG_VERIFIER_ROOT_KEY_DIGEST_MISMATCH,
            0x0001_000C,
            "Root public key does not match the provisioned digest"
        ),
        (
            SIG_VERIFIER_CSK_MAGIC_MISMATCH,
            0x0001_000D,
            "CSK entry magic mismatch"
        ),
        (
            SIG_VERIFIER_CSK_CURVE_MISMATCH,
            0x0001_000E,
            "CSK entry curve magic mismatch"
        ),
        (
            SIG_VERIFIER_CSK_PERMISSIONS_INSUFFICIENT,
            0x0001_000F,
            "CSK entry permissions lack the capability required by the signed type"
        ),
        (
            SIG_VERIFIER_CSK_KEY_ID_OUT_OF_BOUNDS,
            0x0001_0010,
            "CSK entry key id exceeds 127"
        ),
        (
            SIG_VERIFIER_CSK_KEY_CANCELLED,
            0x0001_0011,
            "CSK entry key is cancelled for the signed type's domain"
        ),
        (
            SIG_VERIFIER_CSK_SIGNATURE_INVALID,
            0x0001_0012,
            "CSK entry signature by the root key is invalid"
        ),
        (
            SIG_VERIFIER_B0_ENTRY_MAGIC_MISMATCH,
            0x0001_0013,
            "Block0 entry magic mismatch"
        ),
        (
            SIG_VERIFIER_B0_ENTRY_CURVE_MISMATCH,
            0x0001_0014,
            "Block0 entry curve magic mismatch"
        ),
        (
            SIG_VERIFIER_B0_ENTRY_SIGNATURE_INVALID,
            0x0001_0015,
            "Block0 entry signature is invalid"
        ),
        (
            SIG_VERIFIER_DECODE_FAILED,
            0x0001_0016,
            "Signature block could not be decoded"
        ),
        (
            VALIDATOR_PC_TYPE_INTENT_MISMATCH,
            0x0002_0001,
            "Capsule protected-content type does not match the update intent"
        ),
        (
            VALIDATOR_CANCEL_CERT_CSK_ID_INVALID,
            0x0002_0002,
            "Key-cancellation certificate csk id exceeds 127"
        ),
        (
            VALIDATOR_CANCEL_CERT_RESERVED_NOT_ZERO,
            0x0002_0003,
            "Key-cancellation certificate reserved bytes not zero"
        ),
        (
            VALIDATOR_DECOMMISSION_RESERVED_NOT_ZERO,
            0x0002_0004,
            "Decommission capsule payload bytes not zero"
        ),
        (
            VALIDATOR_PBC_TAG_MISMATCH,
            0x0002_0005,
            "PBC header tag mismatch"
        ),
        (
            VALIDATOR_PBC_VERSION_UNSUPPORTED,
            0x0002_0006,
            "PBC header version unsupported"
        ),
        (
            VALIDATOR_PBC_PAGE_SIZE_UNSUPPORTED,
            0x0002_0007,
            "PBC page size is not 4 KiB"
        ),
        (
            VALIDATOR_PBC_PATTERN_UNSUPPORTED,
            0x0002_0008,
            "PBC erased pattern is not a single 0xFF byte"
        ),
        (
            VALIDATOR_PBC_BITMAP_SIZE_INVALID,
            0x0002_0009,
            "PBC bitmap bit count is not a multiple of 8"
        ),
        (
            VALIDATOR_PBC_PAYLOAD_LEN_INVALID,
            0x0002_000A,
            "PBC payload length is not page aligned"
        ),
        (
            VALIDATOR_PFM_TAG_MISMATCH,
            0x0002_000B,
            "PFM header tag mismatch"
        ),
        (
            VALIDATOR_PFM_TYPE_MISMATCH,
            0x0002_000C,
            "Embedded PFM signature certifies the wrong content type"
        ),
        (
            VALIDATOR_PFM_SVN_INVALID,
            0x0002_000D,
            "PFM security version number exceeds 64"
        ),
        (
            VALIDATOR_SVN_TOO_LOW,
            0x0002_000E,
            "Security version number is below the anti-rollback threshold"
        ),
        (
            VALIDATOR_ACTIVE_UPDATE_SVN_MISMATCH,
            0x0002_000F,
            "Active-only update does not match the recovery image security version"
        ),
        (
            VALIDATOR_CPLD_SVN_INVALID,
            0x0002_0010,
            "CPLD capsule security version number exceeds 64"
        ),
        (
            VALIDATOR_DECODE_FAILED,
            0x0002_0011,
            "Capsule content structure could not be decoded"
        ),
        (
            PBC_TARGET_NOT_PAGE_ALIGNED,
            0x0003_0001,
            "Patch target range is not page aligned"
        ),
        (
            PBC_BITMAP_OUT_OF_BOUNDS,
            0x0003_0002,
            "Patch target range extends past the compression bitmaps"
        ),
        (
            PBC_PAYLOAD_OUT_OF_BOUNDS,
            0x0003_0003,
            "Compressed payload cursor ran past the payload stream"
        ),
        (
            RECOVERY_ACTIVE_AUTH_FAILED,
            0x0004_0001,
            "Active region failed authentication"
        ),
        (
            RECOVERY_RECOVERY_AUTH_FAILED,
            0x0004_0002,
            "Recovery region failed authentication"
        ),
        (
            RECOVERY_STAGING_AUTH_FAILED,
            0x0004_0003,
            "Staging region failed authentication"
        ),
        (
            RECOVERY_DOMAIN_UNRECOVERABLE,
            0x0004_0004,
            "Active, recovery and staging regions are all invalid"
        ),
        (
            POLICY_STORE_NOT_PROVISIONED,
            0x0005_0001,
            "Policy store has not been provisioned"
        ),
        (
            POLICY_STORE_WORD_OUT_OF_BOUNDS,
            0x0005_0002,
            "Policy store word index out of bounds"
        ),
        (
            POLICY_STORE_SVN_OUT_OF_BOUNDS,
            0x0005_0003,
            "Security version number exceeds 64"
        ),
        (
            POLICY_STORE_KEY_ID_OUT_OF_BOUNDS,
            0x0005_0004,
            "CSK key id exceeds 127"
        ),
        (
            FW_UPDATE_LOCKED_OUT,
            0x0006_0001,
            "Domain is locked out after too many failed update attempts"
        ),
        (
            FW_ACTIVE_UPDATE_BANNED,
            0x0006_0002,
            "Active-only updates are banned while recovery is unavailable"
        ),
        (
            FW_UPDATE_REAUTH_FAILED,
            0x0006_0003,
            "Patched active region failed re-authentication"
        ),
        (
            FW_STAGING_OFFSET_INVALID,
            0x0006_0004,
            "Provisioned staging region offset is invalid"
        ),
        (
            FW_PFM_TOO_LARGE,
            0x0006_0005,
            "PFM exceeds the manifest working buffer"
        ),
        (
            FW_REGION_DIGEST_MISMATCH,
            0x0006_0006,
            "SPI region contents do not match the PFM digest"
        ),
        (
            DRIVER_FLASH_READ_OUT_OF_BOUNDS,
            0x0007_0001,
            "Flash read out of bounds"
        ),
        (
            DRIVER_FLASH_WRITE_OUT_OF_BOUNDS,
            0x0007_0002,
            "Flash write out of bounds"
        ),
        (
            DRIVER_FLASH_ERASE_MISALIGNED,
            0x0007_0003,
            "Flash erase address or length misaligned"
        ),
        (
            DRIVER_CRYPTO_FAILURE,
            0x0007_0004,
            "Crypto collaborator reported a fault"
        ),
    ];
}

impl From<core::num::NonZeroU32> for crate::PfrError {
    fn from(val: core::num::NonZeroU32) -> Self {
        crate::PfrError(val)
    }
}

impl From<PfrError> for core::num::NonZeroU32 {
    fn from(val: PfrError) -> Self {
        val.0
    }
}

impl From<PfrError> for u32 {
    fn from(val: PfrError) -> Self {
        core::num::NonZeroU32::from(val).get()
    }
}

impl TryFrom<u32> for PfrError {
    type Error = TryFromIntError;
    fn try_from(val: u32) -> Result<Self, TryFromIntError> {
        match NonZeroU32::try_from(val) {
            Ok(val) => Ok(PfrError(val)),
            Err(err) => Err(err),
        }
    }
}

pub type PfrResult<T> = Result<T, PfrError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_try_from() {
        assert!(PfrError::try_from(0).is_err());
        assert_eq!(
            Ok(PfrError::SIG_VERIFIER_BLOCK0_MAGIC_MISMATCH),
            PfrError::try_from(0x0001_0001)
        );
    }

    #[test]
    fn test_error_constants_uniqueness() {
        let constants = PfrError::all_constants();
        let mut error_values = HashSet::new();
        let mut duplicates = Vec::new();

        for (name, value) in constants {
            if !error_values.insert(value) {
                duplicates.push((name, value));
            }
        }

        assert!(
            duplicates.is_empty(),
            "Found duplicate error codes: {:?}",
            duplicates
        );
    }
}
