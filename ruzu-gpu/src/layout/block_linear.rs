// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use super::{LayoutError, LayoutResult, GOB_HEIGHT, GOB_SIZE, GOB_STRIDE};

/// Byte-offset function of a block-linear surface.
///
/// The offset of a pixel splits into three independent parts (x, y and z),
/// each monotonically non-decreasing in its coordinate, so the byte range
/// covered by a rectangle always runs from its top-left to its bottom-right
/// pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLinearLayout {
    width: i32,
    height: i32,
    bytes_per_pixel: i32,
    gob_blocks_in_y: i32,
    gob_blocks_in_z: i32,

    bh_mask: i32,
    bd_mask: i32,
    bh_shift: u32,
    bd_shift: u32,
    x_shift: u32,

    rob_size: i32,
    slice_size: i32,
}

impl BlockLinearLayout {
    /// Build the layout of a `width` x `height` surface (in pixels).
    ///
    /// GOB block counts must be non-zero powers of two.
    pub fn new(
        width: i32,
        height: i32,
        gob_blocks_in_y: i32,
        gob_blocks_in_z: i32,
        bytes_per_pixel: i32,
    ) -> LayoutResult<Self> {
        if !is_pow2(gob_blocks_in_y) || !is_pow2(gob_blocks_in_z) {
            return Err(LayoutError::InvalidGobBlocks {
                y: gob_blocks_in_y,
                z: gob_blocks_in_z,
            });
        }
        let invalid = || LayoutError::InvalidDimensions {
            width,
            height,
            depth: 1,
        };
        if width < 0 || height < 0 || bytes_per_pixel <= 0 {
            return Err(invalid());
        }

        // Sized in 64 bits; every offset inside the surface must fit an i32.
        let block_size =
            i64::from(GOB_SIZE) * i64::from(gob_blocks_in_y) * i64::from(gob_blocks_in_z);
        let row_bytes = i64::from(width) * i64::from(bytes_per_pixel);
        let width_in_gobs = div_round_up_i64(row_bytes, i64::from(GOB_STRIDE));
        let rob_size = block_size * width_in_gobs;
        let block_height = i64::from(gob_blocks_in_y) * i64::from(GOB_HEIGHT);
        let slice_size = div_round_up_i64(i64::from(height), block_height) * rob_size;
        let fits = |value: i64| i32::try_from(value).map_err(|_| invalid());
        let block_size = fits(block_size)?;
        let rob_size = fits(rob_size)?;
        let slice_size = fits(slice_size)?;

        Ok(Self {
            width,
            height,
            bytes_per_pixel,
            gob_blocks_in_y,
            gob_blocks_in_z,
            bh_mask: gob_blocks_in_y - 1,
            bd_mask: gob_blocks_in_z - 1,
            bh_shift: gob_blocks_in_y.trailing_zeros(),
            bd_shift: gob_blocks_in_z.trailing_zeros(),
            x_shift: block_size.trailing_zeros(),
            rob_size,
            slice_size,
        })
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn bytes_per_pixel(&self) -> i32 {
        self.bytes_per_pixel
    }

    pub fn gob_blocks_in_y(&self) -> i32 {
        self.gob_blocks_in_y
    }

    pub fn gob_blocks_in_z(&self) -> i32 {
        self.gob_blocks_in_z
    }

    /// Bytes covered by one row of blocks.
    pub fn rob_size(&self) -> i32 {
        self.rob_size
    }

    /// Bytes covered by one slab of `gob_blocks_in_z` slices.
    pub fn slice_size(&self) -> i32 {
        self.slice_size
    }

    /// Total bytes of a surface `depth` slices deep, padding included.
    pub fn size(&self, depth: i32) -> LayoutResult<usize> {
        let slabs = div_round_up_i64(i64::from(depth.max(1)), i64::from(self.gob_blocks_in_z));
        usize::try_from(slabs * i64::from(self.slice_size)).map_err(|_| self.invalid(depth))
    }

    /// One past the last byte read or written when walking the rows of a
    /// `width` x `height` x `depth` region from the origin. Unlike
    /// [`size`](Self::size) this excludes padding below the last row. Fails
    /// when the region reaches past an `i32` offset.
    pub fn extent(&self, width: i32, height: i32, depth: i32) -> LayoutResult<usize> {
        if width <= 0 || height <= 0 || depth <= 0 {
            return Ok(0);
        }
        let last_x = i64::from(width) * i64::from(self.bytes_per_pixel) - 1;
        let end = self.z_part_wide(i64::from(depth) - 1)
            + self.y_part_wide(i64::from(height) - 1)
            + self.x_part_wide(last_x)
            + 1;
        i32::try_from(end)
            .map(|end| end as usize)
            .map_err(|_| self.invalid(depth))
    }

    fn invalid(&self, depth: i32) -> LayoutError {
        LayoutError::InvalidDimensions {
            width: self.width,
            height: self.height,
            depth,
        }
    }

    fn x_part_wide(&self, x_bytes: i64) -> i64 {
        let mut offset = (x_bytes / i64::from(GOB_STRIDE)) << self.x_shift;
        offset += ((x_bytes & 0x3f) >> 5) << 8;
        offset += ((x_bytes & 0x1f) >> 4) << 5;
        offset + (x_bytes & 0xf)
    }

    fn y_part_wide(&self, y: i64) -> i64 {
        let yh = y / i64::from(GOB_HEIGHT);
        let mut offset = (yh >> self.bh_shift) * i64::from(self.rob_size);
        offset += (yh & i64::from(self.bh_mask)) * i64::from(GOB_SIZE);
        offset += ((y & 0x07) >> 1) << 6;
        offset + ((y & 0x01) << 4)
    }

    fn z_part_wide(&self, z: i64) -> i64 {
        (z >> self.bd_shift) * i64::from(self.slice_size)
            + (((z & i64::from(self.bd_mask)) * i64::from(GOB_SIZE)) << self.bh_shift)
    }

    // The i32 parts are exact for coordinates inside a range accepted by
    // `rectangle_range` or `extent`, and truncate outside it.

    /// X contribution of a byte column inside a row.
    #[inline]
    pub fn x_part_bytes(&self, x_bytes: i32) -> i32 {
        self.x_part_wide(i64::from(x_bytes)) as i32
    }

    /// X contribution of a pixel column.
    #[inline]
    pub fn x_part(&self, x: i32) -> i32 {
        self.x_part_wide(i64::from(x) * i64::from(self.bytes_per_pixel)) as i32
    }

    /// Y contribution of a row.
    #[inline]
    pub fn y_part(&self, y: i32) -> i32 {
        self.y_part_wide(i64::from(y)) as i32
    }

    /// Z contribution of a slice.
    #[inline]
    pub fn z_part(&self, z: i32) -> i32 {
        self.z_part_wide(i64::from(z)) as i32
    }

    /// Byte offset of pixel `(x, y, z)`.
    #[inline]
    pub fn offset(&self, x: i32, y: i32, z: i32) -> i32 {
        self.x_part(x)
            .wrapping_add(self.y_part(y))
            .wrapping_add(self.z_part(z))
    }

    /// `(start, length)` of the bytes covered by a `width` x `height`
    /// rectangle at `(x, y)` in slice 0. Fails when the rectangle reaches
    /// past what an `i32` offset can address, so per-pixel offsets inside
    /// it never overflow.
    pub fn rectangle_range(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> LayoutResult<(i32, i32)> {
        let bpp = i64::from(self.bytes_per_pixel);
        let at = |x: i64, y: i64| self.x_part_wide(x * bpp) + self.y_part_wide(y);
        let (x, y) = (i64::from(x), i64::from(y));
        let start = at(x, y);
        let end = at(x + i64::from(width) - 1, y + i64::from(height) - 1) + bpp;
        let invalid = || LayoutError::InvalidDimensions {
            width,
            height,
            depth: 1,
        };
        let end = i32::try_from(end).map_err(|_| invalid())?;
        let start = i32::try_from(start).map_err(|_| invalid())?;
        Ok((start, end - start))
    }
}

fn div_round_up_i64(value: i64, divisor: i64) -> i64 {
    (value + divisor - 1) / divisor
}

fn is_pow2(value: i32) -> bool {
    value > 0 && value & (value - 1) == 0
}
