// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Guest physical memory as seen by the GPU.
//!
//! The GPU never owns guest RAM; it reaches it through [`GuestMemory`], which
//! the host implements over whatever backs the guest. [`MappedGuestMemory`]
//! is a self-contained implementation over an anonymous mmap.

use memmap2::MmapMut;
use parking_lot::RwLock;
use ruzu_common::PAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuestMemoryError {
    #[error("failed to map guest memory backing: {0}")]
    Map(#[from] std::io::Error),
}

/// Byte-level access to guest physical memory.
///
/// Accesses outside the backing are not errors: reads produce zeros and
/// writes are dropped, matching how the GPU treats faults.
pub trait GuestMemory: Send + Sync {
    fn size(&self) -> u64;

    fn read_bytes(&self, addr: PAddr, dst: &mut [u8]);

    fn write_bytes(&self, addr: PAddr, src: &[u8]);

    /// Make pending CPU-side writes to `[addr, addr + len)` visible before
    /// the GPU reads them.
    fn flush(&self, _addr: PAddr, _len: u64) {}
}

/// Guest memory backed by an anonymous, lazily committed mmap.
pub struct MappedGuestMemory {
    backing: RwLock<MmapMut>,
}

impl MappedGuestMemory {
    pub fn new(size: usize) -> Result<Self, GuestMemoryError> {
        let backing = MmapMut::map_anon(size)?;
        log::debug!("guest_mem: mapped 0x{:X} bytes of backing", size);
        Ok(Self {
            backing: RwLock::new(backing),
        })
    }
}

/// Clamp `[addr, addr + len)` to a backing of `total` bytes, returning the
/// in-bounds start and length.
fn clamp(total: usize, addr: PAddr, len: usize) -> Option<(usize, usize)> {
    let start = usize::try_from(addr).ok()?;
    if start >= total {
        return None;
    }
    Some((start, len.min(total - start)))
}

impl GuestMemory for MappedGuestMemory {
    fn size(&self) -> u64 {
        self.backing.read().len() as u64
    }

    fn read_bytes(&self, addr: PAddr, dst: &mut [u8]) {
        let backing = self.backing.read();
        match clamp(backing.len(), addr, dst.len()) {
            Some((start, len)) => {
                dst[..len].copy_from_slice(&backing[start..start + len]);
                dst[len..].fill(0);
                if len < dst.len() {
                    log::warn!("guest_mem: read past end at 0x{:X}", addr);
                }
            }
            None => {
                log::warn!("guest_mem: read of unbacked address 0x{:X}", addr);
                dst.fill(0);
            }
        }
    }

    fn write_bytes(&self, addr: PAddr, src: &[u8]) {
        let mut backing = self.backing.write();
        let total = backing.len();
        match clamp(total, addr, src.len()) {
            Some((start, len)) => {
                backing[start..start + len].copy_from_slice(&src[..len]);
                if len < src.len() {
                    log::warn!("guest_mem: write past end at 0x{:X}", addr);
                }
            }
            None => log::warn!("guest_mem: write to unbacked address 0x{:X}", addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write() {
        let mem = MappedGuestMemory::new(0x4000).unwrap();
        mem.write_bytes(0x100, &[1, 2, 3, 4]);
        let mut buf = [0u8; 6];
        mem.read_bytes(0xFF, &mut buf);
        assert_eq!(buf, [0, 1, 2, 3, 4, 0]);
        assert_eq!(mem.size(), 0x4000);
    }

    #[test]
    fn test_out_of_range_is_tolerated() {
        let mem = MappedGuestMemory::new(0x1000).unwrap();
        mem.write_bytes(0xFFE, &[0xAA, 0xBB, 0xCC, 0xDD]);
        let mut buf = [0xFFu8; 4];
        mem.read_bytes(0xFFE, &mut buf);
        assert_eq!(buf, [0xAA, 0xBB, 0, 0]);

        let mut far = [0xFFu8; 2];
        mem.read_bytes(0x10_0000, &mut far);
        assert_eq!(far, [0, 0]);
        mem.write_bytes(u64::MAX, &[1]);
    }
}
