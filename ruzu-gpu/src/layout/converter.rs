// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Whole-surface conversions between block-linear, strided linear and
//! tightly packed linear data.
//!
//! Packed linear output uses rows aligned to [`HOST_STRIDE_ALIGNMENT`].
//! Block-linear data is moved in 16-byte sector runs, which are contiguous
//! on both sides.

use super::{
    check_bytes_per_pixel, BlockLinearLayout, LayoutError, LayoutResult,
    GOB_SECTOR_ROW_STRIDE, HOST_STRIDE_ALIGNMENT,
};

/// Rearrange an address inside a pitch-linear GOB (64-byte rows) into the
/// matching address inside a block-linear GOB. Bits above the GOB are kept.
#[inline]
pub const fn convert_gob_linear_to_block_linear_address(address: u64) -> u64 {
    (address & !0x1f0)
        | ((address & 0x40) >> 2)
        | ((address & 0x10) << 1)
        | ((address & 0x180) >> 1)
        | ((address & 0x20) << 3)
}

fn packed_stride(width: i32, bytes_per_pixel: i32) -> usize {
    let row_bytes = width.max(0) as usize * bytes_per_pixel.max(0) as usize;
    let alignment = HOST_STRIDE_ALIGNMENT as usize;
    row_bytes.div_ceil(alignment) * alignment
}

/// Bytes of `height` x `depth` packed rows.
fn packed_size(stride: usize, height: i32, depth: i32) -> LayoutResult<usize> {
    stride
        .checked_mul(height as usize)
        .and_then(|size| size.checked_mul(depth as usize))
        .ok_or(LayoutError::InvalidDimensions {
            width: stride as i32,
            height,
            depth,
        })
}

fn check_len(needed: usize, len: usize) -> LayoutResult<()> {
    if len < needed {
        return Err(LayoutError::BufferTooSmall { needed, len });
    }
    Ok(())
}

fn check_dimensions(width: i32, height: i32, depth: i32) -> LayoutResult<()> {
    if width <= 0 || height <= 0 || depth <= 0 {
        return Err(LayoutError::InvalidDimensions {
            width,
            height,
            depth,
        });
    }
    Ok(())
}

/// Walk every 16-byte run of every row, yielding `(linear, block_linear)`
/// byte offsets and the run length. The caller has checked the region with
/// [`BlockLinearLayout::extent`], so block-linear offsets fit an `i32`.
fn for_each_run(
    layout: &BlockLinearLayout,
    height: i32,
    depth: i32,
    linear_stride: usize,
    mut f: impl FnMut(usize, usize, usize),
) {
    let row_bytes = layout.width() * layout.bytes_per_pixel();
    let slice_stride = linear_stride * height as usize;
    for z in 0..depth {
        let z_part = layout.z_part(z);
        for y in 0..height {
            let yz = z_part + layout.y_part(y);
            let row_base = z as usize * slice_stride + y as usize * linear_stride;
            let mut x = 0;
            while x < row_bytes {
                let run = (row_bytes - x).min(GOB_SECTOR_ROW_STRIDE);
                let bl = yz + layout.x_part_bytes(x);
                f(row_base + x as usize, bl as usize, run as usize);
                x += run;
            }
        }
    }
}

/// Untile a block-linear surface into packed linear rows.
///
/// `data` must reach the last byte of the last row; padding rows of a
/// partly filled block may be missing.
pub fn convert_block_linear_to_linear(
    width: i32,
    height: i32,
    depth: i32,
    gob_blocks_in_y: i32,
    gob_blocks_in_z: i32,
    bytes_per_pixel: i32,
    data: &[u8],
) -> LayoutResult<Vec<u8>> {
    check_bytes_per_pixel(bytes_per_pixel)?;
    check_dimensions(width, height, depth)?;
    let layout =
        BlockLinearLayout::new(width, height, gob_blocks_in_y, gob_blocks_in_z, bytes_per_pixel)?;
    check_len(layout.extent(width, height, depth)?, data.len())?;

    let stride = packed_stride(width, bytes_per_pixel);
    let mut output = vec![0u8; packed_size(stride, height, depth)?];
    for_each_run(&layout, height, depth, stride, |lin, bl, len| {
        output[lin..lin + len].copy_from_slice(&data[bl..bl + len]);
    });
    Ok(output)
}

/// Tile packed linear rows into a block-linear surface.
///
/// The output covers the whole surface, including padding GOBs, which are
/// left zeroed.
pub fn convert_linear_to_block_linear(
    width: i32,
    height: i32,
    depth: i32,
    gob_blocks_in_y: i32,
    gob_blocks_in_z: i32,
    bytes_per_pixel: i32,
    data: &[u8],
) -> LayoutResult<Vec<u8>> {
    check_bytes_per_pixel(bytes_per_pixel)?;
    check_dimensions(width, height, depth)?;
    let layout =
        BlockLinearLayout::new(width, height, gob_blocks_in_y, gob_blocks_in_z, bytes_per_pixel)?;

    let stride = packed_stride(width, bytes_per_pixel);
    check_len(packed_size(stride, height, depth)?, data.len())?;
    layout.extent(width, height, depth)?;

    let mut output = vec![0u8; layout.size(depth)?];
    for_each_run(&layout, height, depth, stride, |lin, bl, len| {
        output[bl..bl + len].copy_from_slice(&data[lin..lin + len]);
    });
    Ok(output)
}

/// Repack rows of a pitch-linear surface with an arbitrary pitch into packed
/// linear rows.
pub fn convert_linear_strided_to_linear(
    width: i32,
    height: i32,
    bytes_per_pixel: i32,
    stride: i32,
    data: &[u8],
) -> LayoutResult<Vec<u8>> {
    check_bytes_per_pixel(bytes_per_pixel)?;
    check_dimensions(width, height, 1)?;
    let row_bytes = width as usize * bytes_per_pixel as usize;
    let in_stride = stride.unsigned_abs() as usize;
    check_len(in_stride * (height as usize - 1) + row_bytes, data.len())?;

    let out_stride = packed_stride(width, bytes_per_pixel);
    if out_stride == in_stride && stride > 0 {
        let mut output = data[..out_stride * (height as usize - 1) + row_bytes].to_vec();
        output.resize(out_stride * height as usize, 0);
        return Ok(output);
    }

    let mut output = vec![0u8; out_stride * height as usize];
    for y in 0..height as usize {
        let src = y * in_stride;
        let dst = y * out_stride;
        output[dst..dst + row_bytes].copy_from_slice(&data[src..src + row_bytes]);
    }
    Ok(output)
}
