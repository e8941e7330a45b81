/*++

Licensed under the Apache-2.0 license.

File Name:

    pbc.rs

Abstract:

    File contains the bitmap-driven patch engine that reconstructs a
    flash region from an authenticated PBC structure.

--*/

use core::ops::Range;

use pfr_capsule_types::{PbcHeader, PBC_HEADER_BYTE_SIZE};
use pfr_drivers::{SpiFlash, WatchdogPort, BLOCK_SIZE_64K, PAGE_SIZE_4K};
use pfr_error::{PfrError, PfrResult};
use zerocopy::FromBytes;

const COPY_CHUNK: usize = 512;

/// Watchdog checkpoint interval in bitmap bits
const WDT_BIT_INTERVAL: u32 = 8;

/// Windowed reader over one flash-resident bitmap. Bit `i` governs the
/// 4 KiB page at byte offset `i * 4096`; the MSB of each bitmap byte is
/// the lowest-numbered page.
struct BitmapCursor {
    base: u32,
    window: [u8; 64],
    window_start: u32,
    loaded: bool,
}

impl BitmapCursor {
    fn new(base: u32) -> Self {
        Self {
            base,
            window: [0; 64],
            window_start: 0,
            loaded: false,
        }
    }

    fn bit<F: SpiFlash>(&mut self, flash: &mut F, index: u32) -> PfrResult<bool> {
        let byte_idx = index / 8;
        let in_window = self.loaded
            && byte_idx >= self.window_start
            && byte_idx < self.window_start + self.window.len() as u32;
        if !in_window {
            self.window_start = byte_idx - byte_idx % self.window.len() as u32;
            flash.read_exact(self.base + self.window_start, &mut self.window)?;
            self.loaded = true;
        }
        let byte = self.window[(byte_idx - self.window_start) as usize];
        Ok(byte & (0x80 >> (index % 8)) != 0)
    }
}

/// Apply the PBC structure at `pbc_offset` to the page-aligned `target`
/// range of the selected flash device.
///
/// The capsule holding the PBC must already be authenticated. The
/// compressed payload is one linear stream shared across all regions of
/// the capsule, so the payload cursor tracks compression bits from bit 0
/// even outside `target`.
pub fn apply<F: SpiFlash, W: WatchdogPort>(
    flash: &mut F,
    wdt: &mut W,
    pbc_offset: u32,
    target: Range<u32>,
) -> PfrResult<()> {
    if target.start % PAGE_SIZE_4K != 0 || target.end % PAGE_SIZE_4K != 0 {
        return Err(PfrError::PBC_TARGET_NOT_PAGE_ALIGNED);
    }

    let header = read_header(flash, pbc_offset)?;
    let first_page = target.start / PAGE_SIZE_4K;
    let end_page = target.end / PAGE_SIZE_4K;
    if end_page > header.bitmap_nbit {
        return Err(PfrError::PBC_BITMAP_OUT_OF_BOUNDS);
    }

    erase_pass(
        flash,
        wdt,
        pbc_offset + header.active_bitmap_offset(),
        first_page,
        end_page,
    )?;
    copy_pass(flash, wdt, &header, pbc_offset, first_page, end_page, target.start)
}

fn read_header<F: SpiFlash>(flash: &mut F, pbc_offset: u32) -> PfrResult<PbcHeader> {
    let mut buf = [0u8; PBC_HEADER_BYTE_SIZE];
    flash.read_exact(pbc_offset, &mut buf)?;
    PbcHeader::read_from(&buf[..]).ok_or(PfrError::VALIDATOR_DECODE_FAILED)
}

/// Pass 1: coalesce maximal runs of set active-bitmap bits and erase each
/// run with the largest aligned block available, to keep the erase
/// command count inside the watchdog deadline.
fn erase_pass<F: SpiFlash, W: WatchdogPort>(
    flash: &mut F,
    wdt: &mut W,
    bitmap_base: u32,
    first_page: u32,
    end_page: u32,
) -> PfrResult<()> {
    let mut bitmap = BitmapCursor::new(bitmap_base);
    let mut run_start: Option<u32> = None;

    for page in first_page..end_page {
        let set = bitmap.bit(flash, page)?;
        if set && run_start.is_none() {
            run_start = Some(page);
        }
        if !set {
            if let Some(start) = run_start.take() {
                erase_run(flash, start * PAGE_SIZE_4K, (page - start) * PAGE_SIZE_4K)?;
                wdt.service();
            }
        }
    }
    if let Some(start) = run_start {
        erase_run(flash, start * PAGE_SIZE_4K, (end_page - start) * PAGE_SIZE_4K)?;
        wdt.service();
    }
    Ok(())
}

fn erase_run<F: SpiFlash>(flash: &mut F, mut addr: u32, mut len: u32) -> PfrResult<()> {
    while len > 0 {
        if addr % BLOCK_SIZE_64K == 0 && len >= BLOCK_SIZE_64K {
            flash.erase_64k(addr)?;
            addr += BLOCK_SIZE_64K;
            len -= BLOCK_SIZE_64K;
        } else {
            flash.erase_4k(addr)?;
            addr += PAGE_SIZE_4K;
            len -= PAGE_SIZE_4K;
        }
    }
    Ok(())
}

/// Pass 2: walk the compression bitmap from bit 0 to the end of the
/// target, advancing the payload cursor once per set bit everywhere and
/// the destination once per in-range page.
fn copy_pass<F: SpiFlash, W: WatchdogPort>(
    flash: &mut F,
    wdt: &mut W,
    header: &PbcHeader,
    pbc_offset: u32,
    first_page: u32,
    end_page: u32,
    mut dest: u32,
) -> PfrResult<()> {
    let mut bitmap = BitmapCursor::new(pbc_offset + header.compression_bitmap_offset());
    let payload_base = pbc_offset + header.payload_offset();
    let mut payload_pages: u32 = 0;

    for page in 0..end_page {
        if page % WDT_BIT_INTERVAL == 0 {
            wdt.service();
        }
        let copy = bitmap.bit(flash, page)?;
        let in_range = page >= first_page;
        if in_range && copy {
            if (payload_pages + 1) * PAGE_SIZE_4K > header.payload_len {
                return Err(PfrError::PBC_PAYLOAD_OUT_OF_BOUNDS);
            }
            copy_page(flash, payload_base + payload_pages * PAGE_SIZE_4K, dest)?;
        }
        if copy {
            payload_pages += 1;
        }
        if in_range {
            dest += PAGE_SIZE_4K;
        }
    }
    Ok(())
}

fn copy_page<F: SpiFlash>(flash: &mut F, src: u32, dest: u32) -> PfrResult<()> {
    let mut buf = [0u8; COPY_CHUNK];
    for i in 0..(PAGE_SIZE_4K as usize / COPY_CHUNK) as u32 {
        let chunk_offset = i * COPY_CHUNK as u32;
        flash.read_exact(src + chunk_offset, &mut buf)?;
        flash.write(dest + chunk_offset, &buf)?;
        flash.wait_write_done();
    }
    Ok(())
}

/// Erase-and-copy `len` bytes from `src` to the page-aligned `dest` on
/// the selected device. Used to promote a staging capsule into the
/// recovery region and to restore an active PFM.
pub fn copy_region<F: SpiFlash, W: WatchdogPort>(
    flash: &mut F,
    wdt: &mut W,
    src: u32,
    dest: u32,
    len: u32,
) -> PfrResult<()> {
    if dest % PAGE_SIZE_4K != 0 {
        return Err(PfrError::PBC_TARGET_NOT_PAGE_ALIGNED);
    }

    let span = (len + PAGE_SIZE_4K - 1) & !(PAGE_SIZE_4K - 1);
    erase_run(flash, dest, span)?;
    wdt.service();

    let mut buf = [0u8; COPY_CHUNK];
    let mut done: u32 = 0;
    while done < len {
        let chunk = (len - done).min(COPY_CHUNK as u32);
        flash.read_exact(src + done, &mut buf[..chunk as usize])?;
        flash.write(dest + done, &buf[..chunk as usize])?;
        flash.wait_write_done();
        done += chunk;
        if done % (WDT_BIT_INTERVAL * PAGE_SIZE_4K) == 0 {
            wdt.service();
        }
    }
    Ok(())
}
