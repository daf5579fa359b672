// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU virtual address space of a process (`/dev/nvhost-as-gpu`).
//!
//! Ranges are carved out of the [`AddressSpaceAllocator`] either as
//! reservations (`alloc_space`), into which the guest later maps buffers at
//! fixed offsets, or directly by `map_buffer_ex` when the guest lets the
//! driver pick the address.

use std::collections::BTreeMap;
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;
use ruzu_common::{
    align_up, is_page_aligned, GpuVAddr, NvResult, PAddr, GPU_BIG_PAGE_SIZE, GPU_PAGE_SIZE,
};
use thiserror::Error;

use crate::address_allocator::{AddressSpaceAllocator, AllocatorError};
use crate::memory_manager::{GpuMemoryManager, PteKind};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocSpaceFlags: u32 {
        const FIXED_OFFSET = 1 << 0;
        const SPARSE = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapBufferFlags: u32 {
        const FIXED_OFFSET = 1 << 0;
        const REMAP = 1 << 8;
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressSpaceError {
    #[error(transparent)]
    Allocator(#[from] AllocatorError),

    #[error("unsupported page size 0x{0:X}")]
    InvalidPageSize(u32),

    #[error("offset 0x{0:X} is not page aligned")]
    Misaligned(GpuVAddr),

    #[error("mapping size must be non-zero and fit the existing mapping")]
    InvalidSize,

    #[error("no reservation of 0x{size:X} bytes at 0x{offset:X}")]
    UnknownReservation { offset: GpuVAddr, size: u64 },

    #[error("fixed mapping 0x{offset:X}+0x{size:X} lies outside every reservation")]
    NotReserved { offset: GpuVAddr, size: u64 },

    #[error("nothing is mapped at 0x{0:X}")]
    UnknownMapping(GpuVAddr),
}

impl From<AddressSpaceError> for NvResult {
    fn from(err: AddressSpaceError) -> Self {
        match err {
            AddressSpaceError::Allocator(AllocatorError::OutOfSpace { .. }) => {
                NvResult::INSUFFICIENT_MEMORY
            }
            AddressSpaceError::Allocator(AllocatorError::RangeNotFree { .. }) => {
                NvResult::ALREADY_ALLOCATED
            }
            AddressSpaceError::InvalidSize => NvResult::INVALID_SIZE,
            AddressSpaceError::Misaligned(_) => NvResult::INVALID_ADDRESS,
            _ => NvResult::BAD_VALUE,
        }
    }
}

pub type AddressSpaceResult<T> = Result<T, AddressSpaceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reservation {
    size: u64,
    page_size: u32,
    sparse: bool,
}

/// A buffer mapped into the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub cpu_addr: PAddr,
    pub size: u64,
    pub kind: PteKind,
    /// Placed inside a reservation rather than allocated on its own.
    pub fixed: bool,
}

#[derive(Default)]
struct Regions {
    reservations: BTreeMap<GpuVAddr, Reservation>,
    mappings: BTreeMap<GpuVAddr, Mapping>,
}

impl Regions {
    /// The reservation fully containing `[offset, offset + size)`.
    fn reservation_holding(&self, offset: GpuVAddr, size: u64) -> Option<(GpuVAddr, Reservation)> {
        let (&start, &reservation) = self.reservations.range(..=offset).next_back()?;
        let end = offset.checked_add(size)?;
        (end <= start + reservation.size).then_some((start, reservation))
    }
}

pub struct AddressSpace {
    memory: Arc<GpuMemoryManager>,
    allocator: AddressSpaceAllocator,
    regions: Mutex<Regions>,
}

impl AddressSpace {
    pub fn new(memory: Arc<GpuMemoryManager>) -> Self {
        Self {
            memory,
            allocator: AddressSpaceAllocator::new(),
            regions: Mutex::new(Regions::default()),
        }
    }

    pub fn allocator(&self) -> &AddressSpaceAllocator {
        &self.allocator
    }

    pub fn memory(&self) -> &Arc<GpuMemoryManager> {
        &self.memory
    }

    pub fn mapping(&self, offset: GpuVAddr) -> Option<Mapping> {
        self.regions.lock().mappings.get(&offset).copied()
    }

    /// Reserve `pages * page_size` bytes, at `offset` when fixed.
    pub fn alloc_space(
        &self,
        pages: u32,
        page_size: u32,
        flags: AllocSpaceFlags,
        offset: GpuVAddr,
    ) -> AddressSpaceResult<GpuVAddr> {
        if u64::from(page_size) != GPU_PAGE_SIZE && u64::from(page_size) != GPU_BIG_PAGE_SIZE {
            return Err(AddressSpaceError::InvalidPageSize(page_size));
        }
        let size = u64::from(pages) * u64::from(page_size);
        let mut regions = self.regions.lock();

        let offset = if flags.contains(AllocSpaceFlags::FIXED_OFFSET) {
            if offset % u64::from(page_size) != 0 {
                return Err(AddressSpaceError::Misaligned(offset));
            }
            self.allocator.allocate_fixed(offset, size)?;
            offset
        } else {
            self.allocator.allocate(size, u64::from(page_size), None)?
        };

        regions.reservations.insert(
            offset,
            Reservation {
                size,
                page_size,
                sparse: flags.contains(AllocSpaceFlags::SPARSE),
            },
        );
        log::debug!(
            "nvhost-as-gpu: AllocSpace 0x{:X} pages of 0x{:X} -> 0x{:X}",
            pages,
            page_size,
            offset
        );
        Ok(offset)
    }

    /// Release a reservation made by `alloc_space`, unmapping whatever was
    /// placed inside it.
    pub fn free_space(&self, offset: GpuVAddr, pages: u32, page_size: u32) -> AddressSpaceResult<()> {
        let size = u64::from(pages) * u64::from(page_size);
        let mut regions = self.regions.lock();
        let reservation = match regions.reservations.get(&offset) {
            Some(&r) if r.size == size && r.page_size == page_size => r,
            _ => return Err(AddressSpaceError::UnknownReservation { offset, size }),
        };
        regions.reservations.remove(&offset);
        regions
            .mappings
            .retain(|&va, mapping| !(mapping.fixed && va >= offset && va < offset + size));

        self.memory.unmap(offset, size);
        self.allocator.deallocate_range(offset, size);
        log::debug!(
            "nvhost-as-gpu: FreeSpace 0x{:X}+0x{:X} (sparse={})",
            offset,
            size,
            reservation.sparse
        );
        Ok(())
    }

    /// Map `size` bytes of guest memory at `cpu_addr`. Returns the GPU VA.
    pub fn map_buffer_ex(
        &self,
        flags: MapBufferFlags,
        kind: PteKind,
        cpu_addr: PAddr,
        size: u64,
        offset: GpuVAddr,
    ) -> AddressSpaceResult<GpuVAddr> {
        if size == 0 {
            return Err(AddressSpaceError::InvalidSize);
        }
        let size = align_up(size, GPU_PAGE_SIZE);
        let mut regions = self.regions.lock();

        if flags.contains(MapBufferFlags::REMAP) {
            let mapping = regions
                .mappings
                .get_mut(&offset)
                .ok_or(AddressSpaceError::UnknownMapping(offset))?;
            if size > mapping.size {
                return Err(AddressSpaceError::InvalidSize);
            }
            mapping.cpu_addr = cpu_addr;
            mapping.kind = kind;
            self.memory.map(offset, cpu_addr, size, kind);
            log::debug!("nvhost-as-gpu: Remap 0x{:X} -> CPU 0x{:X}", offset, cpu_addr);
            return Ok(offset);
        }

        let (gpu_va, fixed) = if flags.contains(MapBufferFlags::FIXED_OFFSET) {
            if !is_page_aligned(offset) {
                return Err(AddressSpaceError::Misaligned(offset));
            }
            if regions.reservation_holding(offset, size).is_none() {
                return Err(AddressSpaceError::NotReserved { offset, size });
            }
            (offset, true)
        } else {
            let alignment = if size >= GPU_BIG_PAGE_SIZE {
                GPU_BIG_PAGE_SIZE
            } else {
                GPU_PAGE_SIZE
            };
            (self.allocator.allocate(size, alignment, None)?, false)
        };

        self.memory.map(gpu_va, cpu_addr, size, kind);
        regions.mappings.insert(
            gpu_va,
            Mapping {
                cpu_addr,
                size,
                kind,
                fixed,
            },
        );
        log::debug!(
            "nvhost-as-gpu: MapBufferEx CPU 0x{:X} size=0x{:X} -> gpu_va=0x{:X}",
            cpu_addr,
            size,
            gpu_va
        );
        Ok(gpu_va)
    }

    /// Unmap the buffer mapped at `offset`.
    pub fn unmap_buffer(&self, offset: GpuVAddr) -> AddressSpaceResult<()> {
        let mapping = self
            .regions
            .lock()
            .mappings
            .remove(&offset)
            .ok_or(AddressSpaceError::UnknownMapping(offset))?;

        self.memory.unmap(offset, mapping.size);
        if !mapping.fixed {
            self.allocator.deallocate_range(offset, mapping.size);
        }
        log::debug!("nvhost-as-gpu: UnmapBuffer 0x{:X}", offset);
        Ok(())
    }
}
