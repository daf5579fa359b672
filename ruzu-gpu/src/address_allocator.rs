// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Free-range tracking for the 40-bit GPU virtual address space.
//!
//! Free space is a set of disjoint `[start, end)` intervals keyed by start
//! address. No two intervals ever touch: every deallocation merges with its
//! neighbours in both directions. The first page is never free, so a GPU VA
//! of 0 always means "no address".

use std::collections::BTreeMap;

use parking_lot::Mutex;
use ruzu_common::{GpuVAddr, GPU_PAGE_MASK, GPU_PAGE_SIZE, GPU_VA_SIZE};
use thiserror::Error;

/// Raw value used by the nvdrv layer for a failed address lookup.
pub const PTE_UNMAPPED: u64 = u64::MAX;

/// Lowest address that can ever be handed out.
pub const FIRST_FREE_ADDRESS: GpuVAddr = GPU_PAGE_SIZE;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    #[error("range 0x{va:X}+0x{size:X} is not inside a free interval")]
    RangeNotFree { va: GpuVAddr, size: u64 },

    #[error("no free interval starts at 0x{0:X}")]
    UnknownReference(GpuVAddr),

    #[error("zero-sized range")]
    ZeroSize,

    #[error("no free range of 0x{size:X} bytes with alignment 0x{alignment:X}")]
    OutOfSpace { size: u64, alignment: u64 },
}

pub type AllocatorResult<T> = Result<T, AllocatorError>;

/// Result of a free-space search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeAddress {
    /// Aligned address that fits the requested size.
    pub address: GpuVAddr,
    /// Start of the free interval holding `address`; pass it to
    /// [`AddressSpaceAllocator::allocate_range`] as the reference start.
    pub free_start: GpuVAddr,
}

pub struct AddressSpaceAllocator {
    free: Mutex<BTreeMap<GpuVAddr, GpuVAddr>>,
}

impl Default for AddressSpaceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpaceAllocator {
    /// Allocator with the whole space free except the first page.
    pub fn new() -> Self {
        let mut free = BTreeMap::new();
        free.insert(FIRST_FREE_ADDRESS, GPU_VA_SIZE);
        Self {
            free: Mutex::new(free),
        }
    }

    /// Mark `[va, va + size)` as used. `reference_start` names the free
    /// interval holding the range, as returned by
    /// [`get_free_address`](Self::get_free_address).
    ///
    /// On error the free set is left untouched.
    pub fn allocate_range(
        &self,
        va: GpuVAddr,
        size: u64,
        reference_start: GpuVAddr,
    ) -> AllocatorResult<()> {
        let mut free = self.free.lock();
        Self::allocate_locked(&mut free, va, size, reference_start)
    }

    fn allocate_locked(
        free: &mut BTreeMap<GpuVAddr, GpuVAddr>,
        va: GpuVAddr,
        size: u64,
        reference_start: GpuVAddr,
    ) -> AllocatorResult<()> {
        if size == 0 {
            return Err(AllocatorError::ZeroSize);
        }
        let end = *free
            .get(&reference_start)
            .ok_or(AllocatorError::UnknownReference(reference_start))?;
        let va_end = va
            .checked_add(size)
            .ok_or(AllocatorError::RangeNotFree { va, size })?;
        if va < reference_start || va_end > end {
            return Err(AllocatorError::RangeNotFree { va, size });
        }

        free.remove(&reference_start);
        if reference_start < va {
            free.insert(reference_start, va);
        }
        if va_end < end {
            free.insert(va_end, end);
        }
        log::trace!("as_alloc: allocated 0x{:X}..0x{:X}", va, va_end);
        Ok(())
    }

    /// Return `[va, va + size)` to the free set, merging it with every
    /// touching or overlapping interval. The first page stays reserved.
    pub fn deallocate_range(&self, va: GpuVAddr, size: u64) {
        let mut start = va.max(FIRST_FREE_ADDRESS);
        let mut end = va.saturating_add(size).min(GPU_VA_SIZE);
        if start >= end {
            return;
        }

        let mut free = self.free.lock();

        // Lower neighbours that reach our start.
        while let Some((&s, &e)) = free.range(..=start).next_back() {
            if e < start {
                break;
            }
            free.remove(&s);
            start = s;
            end = end.max(e);
        }
        // Higher neighbours that begin inside or right after us.
        while let Some((&s, &e)) = free.range(start..).next() {
            if s > end {
                break;
            }
            free.remove(&s);
            end = end.max(e);
        }

        free.insert(start, end);
        log::trace!("as_alloc: freed 0x{:X}+0x{:X} -> 0x{:X}..0x{:X}", va, size, start, end);
    }

    /// Find an aligned free range of `size` bytes.
    ///
    /// The scan starts at `search_start` (default: the start of the highest
    /// free interval) and walks up; if nothing fits it retries once from the
    /// lowest interval. `alignment` is rounded up to a whole page.
    pub fn get_free_address(
        &self,
        size: u64,
        alignment: u64,
        search_start: Option<GpuVAddr>,
    ) -> Option<FreeAddress> {
        let free = self.free.lock();
        Self::find_locked(&free, size, alignment, search_start)
    }

    fn find_locked(
        free: &BTreeMap<GpuVAddr, GpuVAddr>,
        size: u64,
        alignment: u64,
        search_start: Option<GpuVAddr>,
    ) -> Option<FreeAddress> {
        if size == 0 {
            return None;
        }
        let alignment = page_align(alignment.max(1));
        let search_start = match search_start {
            Some(start) => start,
            None => *free.keys().next_back()?,
        };

        let fits = |s: GpuVAddr, e: GpuVAddr, floor: GpuVAddr| -> Option<FreeAddress> {
            let address = align_to(s.max(floor), alignment)?;
            let address_end = address.checked_add(size)?;
            (address_end <= e).then_some(FreeAddress {
                address,
                free_start: s,
            })
        };

        // The interval containing the search start, then everything above it.
        let first_key = match free.range(..=search_start).next_back() {
            Some((&s, &e)) if e > search_start => s,
            _ => search_start,
        };
        for (&s, &e) in free.range(first_key..) {
            if let Some(found) = fits(s, e, search_start) {
                return Some(found);
            }
        }

        // Wrap around once.
        for (&s, &e) in free.iter() {
            if let Some(found) = fits(s, e, 0) {
                return Some(found);
            }
        }
        log::debug!(
            "as_alloc: no free range for 0x{:X} bytes (alignment 0x{:X})",
            size,
            alignment
        );
        None
    }

    /// Search and allocate under one lock.
    pub fn allocate(
        &self,
        size: u64,
        alignment: u64,
        search_start: Option<GpuVAddr>,
    ) -> AllocatorResult<GpuVAddr> {
        let mut free = self.free.lock();
        let found = Self::find_locked(&free, size, alignment, search_start)
            .ok_or(AllocatorError::OutOfSpace { size, alignment })?;
        Self::allocate_locked(&mut free, found.address, size, found.free_start)?;
        Ok(found.address)
    }

    /// Allocate `[va, va + size)` from whichever free interval holds it.
    pub fn allocate_fixed(&self, va: GpuVAddr, size: u64) -> AllocatorResult<()> {
        let mut free = self.free.lock();
        let reference_start = free
            .range(..=va)
            .next_back()
            .map(|(&s, _)| s)
            .ok_or(AllocatorError::RangeNotFree { va, size })?;
        Self::allocate_locked(&mut free, va, size, reference_start)
    }

    /// True unless a single free interval covers all of `[va, va + size)`.
    pub fn is_region_in_use(&self, va: GpuVAddr, size: u64) -> bool {
        let Some(end) = va.checked_add(size) else {
            return true;
        };
        let free = self.free.lock();
        match free.range(..=va).next_back() {
            Some((_, &e)) => end > e,
            None => true,
        }
    }

    /// Snapshot of the free intervals in address order.
    pub fn free_ranges(&self) -> Vec<(GpuVAddr, GpuVAddr)> {
        self.free.lock().iter().map(|(&s, &e)| (s, e)).collect()
    }

    /// Total number of free bytes.
    pub fn total_free(&self) -> u64 {
        self.free.lock().iter().map(|(&s, &e)| e - s).sum()
    }
}

fn page_align(value: u64) -> u64 {
    (value + GPU_PAGE_MASK) & !GPU_PAGE_MASK
}

/// Round up to a multiple of `alignment`, which need not be a power of two.
fn align_to(value: u64, alignment: u64) -> Option<u64> {
    let rem = value % alignment;
    if rem == 0 {
        Some(value)
    } else {
        value.checked_add(alignment - rem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_invariants(alloc: &AddressSpaceAllocator) {
        let ranges = alloc.free_ranges();
        for &(s, e) in &ranges {
            assert!(s < e, "empty interval 0x{:X}", s);
            assert!(s >= FIRST_FREE_ADDRESS);
            assert!(e <= GPU_VA_SIZE);
        }
        for pair in ranges.windows(2) {
            // Strictly less: touching intervals must have been merged.
            assert!(pair[0].1 < pair[1].0, "{:X?} touches {:X?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_initial_state() {
        let alloc = AddressSpaceAllocator::new();
        assert_eq!(alloc.free_ranges(), vec![(0x1000, 1 << 40)]);
        assert_eq!(alloc.total_free(), (1 << 40) - 0x1000);
    }

    #[test]
    fn test_full_allocate_free_cycle() {
        let alloc = AddressSpaceAllocator::new();
        alloc.allocate_range(0x1000, 0x2000, 0x1000).unwrap();
        assert_eq!(alloc.free_ranges(), vec![(0x3000, 1 << 40)]);

        alloc.allocate_range(0x10000, 0x1000, 0x3000).unwrap();
        assert_eq!(
            alloc.free_ranges(),
            vec![(0x3000, 0x10000), (0x11000, 1 << 40)]
        );

        alloc.deallocate_range(0x1000, 0x2000);
        assert_eq!(
            alloc.free_ranges(),
            vec![(0x1000, 0x10000), (0x11000, 1 << 40)]
        );
        alloc.deallocate_range(0x10000, 0x1000);
        assert_eq!(alloc.free_ranges(), vec![(0x1000, 1 << 40)]);
    }

    #[test]
    fn test_allocate_fixed() {
        let alloc = AddressSpaceAllocator::new();
        alloc.allocate_fixed(0x20000, 0x4000).unwrap();
        assert_eq!(
            alloc.free_ranges(),
            vec![(0x1000, 0x20000), (0x24000, 1 << 40)]
        );
        assert_eq!(
            alloc.allocate_fixed(0x22000, 0x1000),
            Err(AllocatorError::RangeNotFree { va: 0x22000, size: 0x1000 })
        );
        assert_eq!(
            alloc.allocate_fixed(0, 0x1000),
            Err(AllocatorError::RangeNotFree { va: 0, size: 0x1000 })
        );
    }

    #[test]
    fn test_allocate_precondition_violations() {
        let alloc = AddressSpaceAllocator::new();
        alloc.allocate_range(0x5000, 0x1000, 0x1000).unwrap();
        let before = alloc.free_ranges();

        assert_eq!(
            alloc.allocate_range(0x5000, 0x1000, 0x6000),
            Err(AllocatorError::RangeNotFree { va: 0x5000, size: 0x1000 })
        );
        assert_eq!(
            alloc.allocate_range(0x4000, 0x2000, 0x1000),
            Err(AllocatorError::RangeNotFree { va: 0x4000, size: 0x2000 })
        );
        assert_eq!(
            alloc.allocate_range(0x8000, 0x1000, 0x7000),
            Err(AllocatorError::UnknownReference(0x7000))
        );
        assert_eq!(
            alloc.allocate_range(0x8000, 0, 0x6000),
            Err(AllocatorError::ZeroSize)
        );
        assert_eq!(alloc.free_ranges(), before);
    }

    #[test]
    fn test_deallocate_merges_overlap() {
        let alloc = AddressSpaceAllocator::new();
        alloc.allocate_range(0x1000, 0x10000, 0x1000).unwrap();
        alloc.deallocate_range(0x2000, 0x1000);
        alloc.deallocate_range(0x6000, 0x1000);
        assert_eq!(alloc.free_ranges().len(), 3);
        // Spans both holes and touches the tail interval.
        alloc.deallocate_range(0x2800, 0xE800);
        assert_eq!(
            alloc.free_ranges(),
            vec![(0x2000, 1 << 40)]
        );
        assert_invariants(&alloc);
    }

    #[test]
    fn test_deallocate_never_frees_first_page() {
        let alloc = AddressSpaceAllocator::new();
        alloc.deallocate_range(0, 0x3000);
        assert_eq!(alloc.free_ranges(), vec![(0x1000, 1 << 40)]);
    }

    #[test]
    fn test_get_free_address_defaults_to_highest_interval() {
        let alloc = AddressSpaceAllocator::new();
        let first = alloc.get_free_address(0x2000, 0x1000, None).unwrap();
        assert_eq!(first, FreeAddress { address: 0x1000, free_start: 0x1000 });
        alloc.allocate_range(first.address, 0x2000, first.free_start).unwrap();

        // Punch a low hole; the default search still starts at the top interval.
        alloc.allocate_range(0x3000, 0x5000, 0x3000).unwrap();
        alloc.deallocate_range(0x1000, 0x1000);
        let next = alloc.get_free_address(0x1000, 0x1000, None).unwrap();
        assert_eq!(next.address, 0x8000);
    }

    #[test]
    fn test_get_free_address_alignment() {
        let alloc = AddressSpaceAllocator::new();
        let found = alloc.get_free_address(0x1000, 0x10000, None).unwrap();
        assert_eq!(found.address, 0x10000);
        assert_eq!(found.free_start, 0x1000);
        // Sub-page alignment rounds up to a page.
        let found = alloc.get_free_address(0x10, 3, Some(0x1800)).unwrap();
        assert_eq!(found.address, 0x2000);
    }

    #[test]
    fn test_get_free_address_wraps_around() {
        let alloc = AddressSpaceAllocator::new();
        // Leave [0x1000, 0x9000) and a tiny tail free.
        let tail = GPU_VA_SIZE - 0x1000;
        alloc.allocate_range(0x9000, tail - 0x9000, 0x1000).unwrap();
        assert_eq!(alloc.free_ranges(), vec![(0x1000, 0x9000), (tail, GPU_VA_SIZE)]);

        // Default start is the tail, which is too small; the retry finds the low range.
        let found = alloc.get_free_address(0x4000, 0x1000, None).unwrap();
        assert_eq!(found, FreeAddress { address: 0x1000, free_start: 0x1000 });
        assert!(alloc.get_free_address(0x10000, 0x1000, None).is_none());
    }

    #[test]
    fn test_search_start_inside_interval() {
        let alloc = AddressSpaceAllocator::new();
        let found = alloc.get_free_address(0x1000, 0x1000, Some(0x4_0000)).unwrap();
        assert_eq!(found, FreeAddress { address: 0x4_0000, free_start: 0x1000 });
        alloc.allocate_range(found.address, 0x1000, found.free_start).unwrap();
        assert_eq!(
            alloc.free_ranges(),
            vec![(0x1000, 0x4_0000), (0x4_1000, 1 << 40)]
        );
    }

    #[test]
    fn test_allocate_combined() {
        let alloc = AddressSpaceAllocator::new();
        let a = alloc.allocate(0x3000, 0x1000, None).unwrap();
        let b = alloc.allocate(0x1000, 0x1000, None).unwrap();
        assert_eq!(a, 0x1000);
        assert_eq!(b, 0x4000);
        assert!(alloc.is_region_in_use(a, 0x3000));
        assert!(matches!(
            alloc.allocate(1 << 41, 0x1000, None),
            Err(AllocatorError::OutOfSpace { .. })
        ));
    }

    #[test]
    fn test_is_region_in_use() {
        let alloc = AddressSpaceAllocator::new();
        assert!(alloc.is_region_in_use(0, 0x1000));
        assert!(!alloc.is_region_in_use(0x1000, 0x1000));
        alloc.allocate_range(0x4000, 0x1000, 0x1000).unwrap();
        assert!(alloc.is_region_in_use(0x4000, 0x1000));
        // Straddles the boundary between two free intervals.
        assert!(alloc.is_region_in_use(0x3000, 0x3000));
        assert!(!alloc.is_region_in_use(0x5000, 0x1000));
        assert!(alloc.is_region_in_use(u64::MAX - 1, 0x10));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Alloc { pages: u64, align_pages: u64 },
        Free { index: usize },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u64..64, 1u64..17).prop_map(|(pages, align_pages)| Op::Alloc { pages, align_pages }),
            (0usize..32).prop_map(|index| Op::Free { index }),
        ]
    }

    proptest! {
        #[test]
        fn prop_free_set_stays_canonical(ops in proptest::collection::vec(op_strategy(), 1..60)) {
            let alloc = AddressSpaceAllocator::new();
            let total = alloc.total_free();
            let mut live: Vec<(u64, u64)> = Vec::new();

            for op in ops {
                match op {
                    Op::Alloc { pages, align_pages } => {
                        let size = pages * GPU_PAGE_SIZE;
                        let va = alloc.allocate(size, align_pages * GPU_PAGE_SIZE, None).unwrap();
                        prop_assert!(live.iter().all(|&(a, s)| va + size <= a || a + s <= va));
                        live.push((va, size));
                    }
                    Op::Free { index } => {
                        if !live.is_empty() {
                            let (va, size) = live.remove(index % live.len());
                            alloc.deallocate_range(va, size);
                        }
                    }
                }
                assert_invariants(&alloc);
                let used: u64 = live.iter().map(|&(_, s)| s).sum();
                prop_assert_eq!(alloc.total_free() + used, total);
            }

            for (va, size) in live.drain(..) {
                alloc.deallocate_range(va, size);
            }
            prop_assert_eq!(alloc.free_ranges(), vec![(FIRST_FREE_ADDRESS, GPU_VA_SIZE)]);
        }

        #[test]
        fn prop_allocate_then_free_restores(
            holes in proptest::collection::vec((1u64..256, 1u64..8), 0..8),
            pages in 1u64..32,
        ) {
            let alloc = AddressSpaceAllocator::new();
            for (offset, len) in holes {
                let va = offset * 0x10000;
                if !alloc.is_region_in_use(va, len * GPU_PAGE_SIZE) {
                    let found = alloc.get_free_address(len * GPU_PAGE_SIZE, GPU_PAGE_SIZE, Some(va)).unwrap();
                    alloc.allocate_range(found.address, len * GPU_PAGE_SIZE, found.free_start).unwrap();
                }
            }
            let before = alloc.free_ranges();
            let size = pages * GPU_PAGE_SIZE;
            let found = alloc.get_free_address(size, GPU_PAGE_SIZE, Some(0)).unwrap();
            alloc.allocate_range(found.address, size, found.free_start).unwrap();
            alloc.deallocate_range(found.address, size);
            prop_assert_eq!(alloc.free_ranges(), before);
        }
    }
}
