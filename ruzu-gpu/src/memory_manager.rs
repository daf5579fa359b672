// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU virtual address space manager.
//!
//! Maps GPU virtual addresses (40-bit, 1 TiB) to guest physical (CPU) addresses
//! using a 2-level page table with 4 KB pages. Each page also carries the PTE
//! kind it was mapped with, which tells the copy engine whether the memory is
//! pitch-linear or block-linear.
//!
//! Layout: `[L0: 14 bits][L1: 14 bits][Offset: 12 bits]` = 40 bits total.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;
use ruzu_common::{GpuVAddr, PAddr, GPU_PAGE_BITS, GPU_PAGE_MASK, GPU_PAGE_SIZE, GPU_VA_BITS};

use crate::guest_memory::GuestMemory;

const PAGE_BITS: u32 = GPU_PAGE_BITS;
const PAGE_SIZE: u64 = GPU_PAGE_SIZE;
const L1_BITS: u32 = 14;
const L0_BITS: u32 = GPU_VA_BITS - L1_BITS - PAGE_BITS;
const L1_SIZE: usize = 1 << L1_BITS; // 16384 entries per L1 table

/// Sentinel for unmapped pages.
const INVALID_ENTRY: u64 = u64::MAX;

/// Low bits of an entry hold the kind; the page address is 4K aligned.
const KIND_MASK: u64 = 0xFF;

/// Page table entry kind (memory layout of the mapped page).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PteKind(pub u8);

impl PteKind {
    pub const PITCH: Self = Self(0x00);
    pub const PITCH_NO_SWIZZLE: Self = Self(0xFD);
    pub const GENERIC_16BX2: Self = Self(0xFE);
    pub const INVALID: Self = Self(0xFF);

    /// True for kinds whose pages hold pitch-linear data.
    #[inline]
    pub const fn is_pitch(self) -> bool {
        self.0 == Self::PITCH.0 || self.0 == Self::PITCH_NO_SWIZZLE.0
    }
}

type L1Table = Box<[u64]>;

/// 2-level page table. Lives behind the manager's lock.
struct PageTable {
    /// L0 table: each entry is an optional L1 page table.
    l0: Vec<Option<L1Table>>,
}

impl PageTable {
    fn new() -> Self {
        let l0_size = 1 << L0_BITS;
        let mut l0 = Vec::with_capacity(l0_size);
        l0.resize_with(l0_size, || None);
        Self { l0 }
    }

    fn l0_index(gpu_va: u64) -> usize {
        ((gpu_va >> (L1_BITS + PAGE_BITS)) & ((1 << L0_BITS) - 1)) as usize
    }

    fn l1_index(gpu_va: u64) -> usize {
        ((gpu_va >> PAGE_BITS) & ((1 << L1_BITS) - 1)) as usize
    }

    fn set_entry(&mut self, gpu_va: u64, entry: u64) {
        let l0 = Self::l0_index(gpu_va);
        let l1 = Self::l1_index(gpu_va);

        let table = match &mut self.l0[l0] {
            Some(table) => table,
            // No L1 table and we're unmapping: nothing to do.
            None if entry == INVALID_ENTRY => return,
            slot => slot.insert(vec![INVALID_ENTRY; L1_SIZE].into_boxed_slice()),
        };
        table[l1] = entry;
    }

    fn get_entry(&self, gpu_va: u64) -> u64 {
        let l0 = Self::l0_index(gpu_va);
        let l1 = Self::l1_index(gpu_va);

        match &self.l0[l0] {
            Some(table) => table[l1],
            None => INVALID_ENTRY,
        }
    }
}

/// GPU virtual memory manager with a 2-level page table.
///
/// All methods take `&self`; the page table is behind a reader/writer lock so
/// the manager can be shared between the GPU thread and the mapping layer.
pub struct GpuMemoryManager {
    page_table: RwLock<PageTable>,
    physical: Arc<dyn GuestMemory>,
}

impl GpuMemoryManager {
    pub fn new(physical: Arc<dyn GuestMemory>) -> Self {
        Self {
            page_table: RwLock::new(PageTable::new()),
            physical,
        }
    }

    pub fn physical(&self) -> &Arc<dyn GuestMemory> {
        &self.physical
    }

    /// Map a contiguous range of GPU VA to CPU addresses.
    pub fn map(&self, gpu_va: GpuVAddr, cpu_addr: PAddr, size: u64, kind: PteKind) {
        let mut table = self.page_table.write();
        let mut offset = 0u64;
        while offset < size {
            let entry = ((cpu_addr + offset) & !GPU_PAGE_MASK) | u64::from(kind.0);
            table.set_entry(gpu_va + offset, entry);
            offset += PAGE_SIZE;
        }
        log::trace!(
            "gpu_mm: map GPU 0x{:X}..0x{:X} -> CPU 0x{:X} kind 0x{:X}",
            gpu_va,
            gpu_va + size,
            cpu_addr,
            kind.0
        );
    }

    /// Unmap a contiguous GPU VA range.
    pub fn unmap(&self, gpu_va: GpuVAddr, size: u64) {
        let mut table = self.page_table.write();
        let mut offset = 0u64;
        while offset < size {
            table.set_entry(gpu_va + offset, INVALID_ENTRY);
            offset += PAGE_SIZE;
        }
        log::trace!("gpu_mm: unmap GPU 0x{:X}..0x{:X}", gpu_va, gpu_va + size);
    }

    /// Translate a GPU VA to a CPU/guest physical address.
    /// Returns `None` if the page is not mapped.
    pub fn translate(&self, gpu_va: GpuVAddr) -> Option<PAddr> {
        let entry = self.page_table.read().get_entry(gpu_va);
        Self::entry_address(entry, gpu_va)
    }

    /// Kind of the page holding `gpu_va`; `INVALID` when unmapped.
    pub fn kind(&self, gpu_va: GpuVAddr) -> PteKind {
        let entry = self.page_table.read().get_entry(gpu_va);
        if entry == INVALID_ENTRY {
            PteKind::INVALID
        } else {
            PteKind((entry & KIND_MASK) as u8)
        }
    }

    /// True if every page of `[gpu_va, gpu_va + size)` is mapped.
    pub fn is_mapped(&self, gpu_va: GpuVAddr, size: u64) -> bool {
        let table = self.page_table.read();
        let end = gpu_va.saturating_add(size.max(1));
        let mut page = gpu_va & !GPU_PAGE_MASK;
        while page < end {
            if table.get_entry(page) == INVALID_ENTRY {
                return false;
            }
            page += PAGE_SIZE;
        }
        true
    }

    fn entry_address(entry: u64, gpu_va: GpuVAddr) -> Option<PAddr> {
        if entry == INVALID_ENTRY {
            None
        } else {
            Some((entry & !GPU_PAGE_MASK) + (gpu_va & GPU_PAGE_MASK))
        }
    }

    /// Split `[gpu_va, gpu_va + len)` at page boundaries and call `f` with
    /// each chunk's physical address (if mapped), its offset into the range
    /// and its length.
    fn for_each_chunk(
        &self,
        gpu_va: GpuVAddr,
        len: usize,
        mut f: impl FnMut(Option<PAddr>, usize, usize),
    ) {
        let table = self.page_table.read();
        let mut offset = 0usize;
        while offset < len {
            let va = gpu_va + offset as u64;
            let page_off = (va & GPU_PAGE_MASK) as usize;
            let chunk_size = std::cmp::min(len - offset, PAGE_SIZE as usize - page_off);
            f(Self::entry_address(table.get_entry(va), va), offset, chunk_size);
            offset += chunk_size;
        }
    }

    /// Read bytes from GPU VA space. Unmapped pages read as zero.
    pub fn read(&self, gpu_va: GpuVAddr, dst: &mut [u8]) {
        let physical = &self.physical;
        self.for_each_chunk(gpu_va, dst.len(), |cpu, offset, len| {
            let chunk = &mut dst[offset..offset + len];
            match cpu {
                Some(cpu_addr) => physical.read_bytes(cpu_addr, chunk),
                None => chunk.fill(0),
            }
        });
    }

    /// Write bytes to GPU VA space. Writes to unmapped pages are dropped.
    pub fn write(&self, gpu_va: GpuVAddr, src: &[u8]) {
        let physical = &self.physical;
        let mut dropped = false;
        self.for_each_chunk(gpu_va, src.len(), |cpu, offset, len| match cpu {
            Some(cpu_addr) => physical.write_bytes(cpu_addr, &src[offset..offset + len]),
            None => dropped = true,
        });
        if dropped {
            log::debug!("gpu_mm: write to unmapped GPU 0x{:X} (0x{:X} bytes)", gpu_va, src.len());
        }
    }

    /// Read `len` bytes into a fresh buffer. With `flush` set, pending
    /// guest writes to the range are made visible first.
    pub fn get_span(&self, gpu_va: GpuVAddr, len: usize, flush: bool) -> Vec<u8> {
        if flush {
            let physical = &self.physical;
            self.for_each_chunk(gpu_va, len, |cpu, _, chunk_len| {
                if let Some(cpu_addr) = cpu {
                    physical.flush(cpu_addr, chunk_len as u64);
                }
            });
        }
        let mut data = vec![0u8; len];
        self.read(gpu_va, &mut data);
        data
    }

    pub fn read_u32(&self, gpu_va: GpuVAddr) -> u32 {
        let mut buf = [0u8; 4];
        self.read(gpu_va, &mut buf);
        LittleEndian::read_u32(&buf)
    }

    pub fn read_u64(&self, gpu_va: GpuVAddr) -> u64 {
        let mut buf = [0u8; 8];
        self.read(gpu_va, &mut buf);
        LittleEndian::read_u64(&buf)
    }

    pub fn write_u32(&self, gpu_va: GpuVAddr, value: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write(gpu_va, &buf);
    }

    pub fn write_u64(&self, gpu_va: GpuVAddr, value: u64) {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, value);
        self.write(gpu_va, &buf);
    }

    /// Fill `count` 32-bit words starting at `gpu_va` with `value`.
    pub fn fill_u32(&self, gpu_va: GpuVAddr, count: usize, value: u32) {
        let mut data = vec![0u8; count * 4];
        for word in data.chunks_exact_mut(4) {
            LittleEndian::write_u32(word, value);
        }
        self.write(gpu_va, &data);
    }

    /// Copy `size` bytes between two GPU VA ranges.
    pub fn copy(&self, src_va: GpuVAddr, dst_va: GpuVAddr, size: usize) {
        let data = self.get_span(src_va, size, true);
        self.write(dst_va, &data);
    }
}
