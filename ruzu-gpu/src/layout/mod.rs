// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Pixel layout math for pitch-linear and block-linear surfaces.
//!
//! Block-linear surfaces are built from GOBs (groups of bytes): 64-byte wide,
//! 8-row tall tiles of 512 bytes. GOBs are stacked into blocks that are
//! `gob_blocks_in_y` GOBs tall and `gob_blocks_in_z` GOBs deep, and blocks are
//! laid out row-of-blocks by row-of-blocks, slice by slice.

pub mod block_linear;
pub mod converter;
pub mod offset_calculator;

pub use block_linear::BlockLinearLayout;
pub use converter::{
    convert_block_linear_to_linear, convert_gob_linear_to_block_linear_address,
    convert_linear_strided_to_linear, convert_linear_to_block_linear,
};
pub use offset_calculator::OffsetCalculator;

use thiserror::Error;

/// Width of a GOB in bytes.
pub const GOB_STRIDE: i32 = 64;

/// Height of a GOB in rows.
pub const GOB_HEIGHT: i32 = 8;

/// Size of a GOB in bytes.
pub const GOB_SIZE: i32 = GOB_STRIDE * GOB_HEIGHT;

/// Byte distance between two consecutive rows inside a GOB sector.
pub const GOB_SECTOR_ROW_STRIDE: i32 = 16;

/// Pitch alignment of linear surfaces, in bytes.
pub const STRIDE_ALIGNMENT: i32 = 32;

/// Row alignment of block-linear surfaces, in bytes.
pub const GOB_ALIGNMENT: i32 = 64;

/// Row alignment of tightly packed host-side linear data, in bytes.
pub const HOST_STRIDE_ALIGNMENT: i32 = 4;

/// Bytes-per-pixel values with a fixed-size element copy.
pub const SUPPORTED_BYTES_PER_PIXEL: [i32; 6] = [1, 2, 4, 8, 12, 16];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("unsupported bytes per pixel: {0}")]
    UnsupportedBytesPerPixel(i32),

    #[error("GOB block counts must be powers of two (y={y}, z={z})")]
    InvalidGobBlocks { y: i32, z: i32 },

    #[error("invalid surface dimensions {width}x{height}x{depth}")]
    InvalidDimensions { width: i32, height: i32, depth: i32 },

    #[error("buffer too small: need {needed} bytes, have {len}")]
    BufferTooSmall { needed: usize, len: usize },
}

pub type LayoutResult<T> = Result<T, LayoutError>;

/// Validate a bytes-per-pixel value against the fixed-size element copies.
pub fn check_bytes_per_pixel(bpp: i32) -> LayoutResult<()> {
    if SUPPORTED_BYTES_PER_PIXEL.contains(&bpp) {
        Ok(())
    } else {
        Err(LayoutError::UnsupportedBytesPerPixel(bpp))
    }
}

/// Round `value` up to a multiple of `alignment` (any positive alignment),
/// saturating at `i32::MAX`.
#[inline]
pub(crate) fn align_up_i32(value: i32, alignment: i32) -> i32 {
    let alignment = i64::from(alignment);
    let aligned = (i64::from(value) + alignment - 1) / alignment * alignment;
    i32::try_from(aligned).unwrap_or(i32::MAX)
}
