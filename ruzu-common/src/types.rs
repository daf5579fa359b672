// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

/// GPU virtual address (40 significant bits).
pub type GpuVAddr = u64;

/// Guest physical address backing a GPU mapping.
pub type PAddr = u64;

/// GPU MMU page shift (4 KiB small pages).
pub const GPU_PAGE_BITS: u32 = 12;

/// GPU MMU page size.
pub const GPU_PAGE_SIZE: u64 = 1 << GPU_PAGE_BITS;

/// Page mask for alignment checks.
pub const GPU_PAGE_MASK: u64 = GPU_PAGE_SIZE - 1;

/// Big page size used for large buffer mappings (64 KiB).
pub const GPU_BIG_PAGE_SIZE: u64 = 0x1_0000;

/// GPU virtual address space width.
pub const GPU_VA_BITS: u32 = 40;

/// GPU virtual address space size: 1 TiB.
pub const GPU_VA_SIZE: u64 = 1 << GPU_VA_BITS;

/// Align a value up to the given power-of-two alignment.
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

/// Check if a value is GPU page-aligned.
#[inline]
pub const fn is_page_aligned(value: u64) -> bool {
    value & GPU_PAGE_MASK == 0
}

/// Integer division rounding towards positive infinity.
#[inline]
pub const fn div_round_up(value: usize, divisor: usize) -> usize {
    (value + divisor - 1) / divisor
}
