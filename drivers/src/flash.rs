/*++

Licensed under the Apache-2.0 license.

File Name:

    flash.rs

Abstract:

    File contains the SPI flash collaborator trait.

--*/

use crate::FlashDevice;
use pfr_error::PfrResult;

/// Smallest erasable unit
pub const PAGE_SIZE_4K: u32 = 4096;

/// Largest erasable unit
pub const BLOCK_SIZE_64K: u32 = 64 * 1024;

/// Value every byte of an erased page reads back as
pub const ERASED_BYTE: u8 = 0xFF;

/// Byte-addressable SPI flash access.
///
/// Selecting a device is an exclusive-access operation on the shared bus:
/// select a device, complete all work against it, then select the other.
/// Reads and writes address the currently selected device.
pub trait SpiFlash {
    /// Select the device all subsequent operations address
    fn select(&mut self, device: FlashDevice);

    /// Read exactly `buf.len()` bytes starting at `offset`
    fn read_exact(&mut self, offset: u32, buf: &mut [u8]) -> PfrResult<()>;

    /// Program `data` starting at `offset`; the range must have been erased
    fn write(&mut self, offset: u32, data: &[u8]) -> PfrResult<()>;

    /// Block until the last program operation completes
    fn wait_write_done(&mut self);

    /// Erase one 4 KiB page; `offset` must be 4 KiB aligned
    fn erase_4k(&mut self, offset: u32) -> PfrResult<()>;

    /// Erase one 64 KiB block; `offset` must be 64 KiB aligned
    fn erase_64k(&mut self, offset: u32) -> PfrResult<()>;
}
