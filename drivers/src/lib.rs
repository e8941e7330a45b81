/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the PFR collaborator trait library.

--*/

#![cfg_attr(not(feature = "std"), no_std)]

mod crypto;
mod domain;
mod flash;
mod platform;
mod policy;
pub mod printer;

pub use crypto::{CryptoEngine, Sha256Digest, Sha256Hasher, ECC256_SCALAR_BYTE_SIZE};
pub use domain::{FlashDevice, FwDomain, UpdateIntent};
pub use flash::{SpiFlash, BLOCK_SIZE_64K, ERASED_BYTE, PAGE_SIZE_4K};
pub use platform::{MajorError, MinorError, PlatformPort, PlatformState, WatchdogPort};
pub use policy::{PolicyStorage, POLICY_WORD_COUNT};

pub use pfr_error::{PfrError, PfrResult};
