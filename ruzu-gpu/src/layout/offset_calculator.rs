// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use super::{align_up_i32, BlockLinearLayout, LayoutError, LayoutResult, GOB_STRIDE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Linear,
    BlockLinear(BlockLinearLayout),
}

/// Maps pixel coordinates of one surface to byte offsets, for either
/// pitch-linear or block-linear storage.
///
/// Row loops call [`set_y`](Self::set_y) once per row and then
/// [`offset_x`](Self::offset_x) per pixel, which only adds the column part.
#[derive(Debug, Clone, Copy)]
pub struct OffsetCalculator {
    width: i32,
    height: i32,
    stride: i32,
    gob_blocks_in_y: i32,
    gob_blocks_in_z: i32,
    bytes_per_pixel: i32,
    kind: Kind,
    row_part: i32,
}

impl OffsetCalculator {
    /// `stride` is only meaningful for linear surfaces and may be negative
    /// (bottom-up rows). Block-linear widths are padded to a whole GOB row.
    pub fn new(
        width: i32,
        height: i32,
        stride: i32,
        is_linear: bool,
        gob_blocks_in_y: i32,
        gob_blocks_in_z: i32,
        bytes_per_pixel: i32,
    ) -> LayoutResult<Self> {
        let kind = if is_linear {
            Kind::Linear
        } else {
            let width_alignment = (GOB_STRIDE / bytes_per_pixel.max(1)).max(1);
            let width_aligned = align_up_i32(width, width_alignment);
            Kind::BlockLinear(BlockLinearLayout::new(
                width_aligned,
                height,
                gob_blocks_in_y,
                gob_blocks_in_z,
                bytes_per_pixel,
            )?)
        };
        Ok(Self {
            width,
            height,
            stride,
            gob_blocks_in_y,
            gob_blocks_in_z,
            bytes_per_pixel,
            kind,
            row_part: 0,
        })
    }

    pub fn is_linear(&self) -> bool {
        matches!(self.kind, Kind::Linear)
    }

    pub fn bytes_per_pixel(&self) -> i32 {
        self.bytes_per_pixel
    }

    pub fn stride(&self) -> i32 {
        self.stride
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Byte offset of pixel `(x, y)` relative to the surface base.
    #[inline]
    pub fn offset(&self, x: i32, y: i32) -> i32 {
        match &self.kind {
            Kind::Linear => x
                .wrapping_mul(self.bytes_per_pixel)
                .wrapping_add(y.wrapping_mul(self.stride)),
            Kind::BlockLinear(layout) => layout.offset(x, y, 0),
        }
    }

    /// Select the row used by [`offset_x`](Self::offset_x).
    #[inline]
    pub fn set_y(&mut self, y: i32) {
        self.row_part = match &self.kind {
            Kind::Linear => y.wrapping_mul(self.stride),
            Kind::BlockLinear(layout) => layout.y_part(y),
        };
    }

    /// Byte offset of column `x` in the row selected by `set_y`.
    #[inline]
    pub fn offset_x(&self, x: i32) -> i32 {
        match &self.kind {
            Kind::Linear => x.wrapping_mul(self.bytes_per_pixel).wrapping_add(self.row_part),
            Kind::BlockLinear(layout) => layout.x_part(x).wrapping_add(self.row_part),
        }
    }

    /// `(start, length)` of the bytes touched by a `width` x `height`
    /// rectangle at `(x, y)`. For negative linear strides `start` is the
    /// offset of the first row, which lies above the lowest touched byte.
    ///
    /// Fails with [`LayoutError::InvalidDimensions`] when some byte of the
    /// rectangle lies beyond an `i32` offset; inside an accepted rectangle
    /// [`set_y`](Self::set_y) and [`offset_x`](Self::offset_x) cannot
    /// overflow.
    pub fn rectangle_range(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> LayoutResult<(i32, i32)> {
        match &self.kind {
            Kind::Linear => {
                let (x, y) = (i64::from(x), i64::from(y));
                let last_y = y + i64::from(height) - 1;
                let bpp = i64::from(self.bytes_per_pixel);
                let stride = i64::from(self.stride);
                let pitch = stride.abs();
                let start = y * pitch + x * bpp;
                let end = last_y * pitch + (x + i64::from(width)) * bpp;
                let fits = |value: i64| {
                    i32::try_from(value).map_err(|_| LayoutError::InvalidDimensions {
                        width,
                        height,
                        depth: 1,
                    })
                };
                // The last row sits lowest for negative strides.
                fits(last_y * stride + x * bpp)?;
                fits(end)?;
                Ok((fits(y * stride + x * bpp)?, fits(end - start)?))
            }
            Kind::BlockLinear(layout) => layout.rectangle_range(x, y, width, height),
        }
    }

    /// True when both calculators produce identical offsets for every pixel.
    pub fn layout_matches(&self, other: &OffsetCalculator) -> bool {
        if self.bytes_per_pixel != other.bytes_per_pixel {
            return false;
        }
        match (&self.kind, &other.kind) {
            (Kind::Linear, Kind::Linear) => self.stride == other.stride,
            (Kind::BlockLinear(a), Kind::BlockLinear(b)) => {
                a == b && self.gob_blocks_in_y == other.gob_blocks_in_y
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_offsets() {
        let calc = OffsetCalculator::new(64, 4, 256, true, 1, 1, 4).unwrap();
        assert_eq!(calc.offset(0, 0), 0);
        assert_eq!(calc.offset(3, 0), 12);
        assert_eq!(calc.offset(1, 2), 516);
    }

    #[test]
    fn test_linear_rectangle_range() {
        let calc = OffsetCalculator::new(64, 8, 256, true, 1, 1, 4).unwrap();
        assert_eq!(calc.rectangle_range(2, 1, 4, 3), Ok((256 + 8, 2 * 256 + 16)));
    }

    #[test]
    fn test_negative_stride_range() {
        let calc = OffsetCalculator::new(16, 4, -64, true, 1, 1, 4).unwrap();
        let (start, len) = calc.rectangle_range(0, 0, 16, 4).unwrap();
        assert_eq!(start, 0);
        assert_eq!(len, 3 * 64 + 64);
        assert_eq!(calc.offset(0, 3), -192);
    }

    #[test]
    fn test_linear_range_overflow_rejected() {
        let calc = OffsetCalculator::new(1, 1, 0x1_0000, true, 1, 1, 1).unwrap();
        assert!(matches!(
            calc.rectangle_range(0, 0, 1, 0x10_0000),
            Err(LayoutError::InvalidDimensions { .. })
        ));
        let flipped = OffsetCalculator::new(1, 1, -0x1_0000, true, 1, 1, 1).unwrap();
        assert!(flipped.rectangle_range(0, 0, 1, 0x10_0000).is_err());
        assert!(calc.rectangle_range(0, 0, i32::MAX, 1).is_err());
        // Just inside the limit.
        assert_eq!(calc.rectangle_range(0, 0, 1, 0x7FFF), Ok((0, 0x7FFE_0001)));
    }

    #[test]
    fn test_block_linear_width_padding() {
        // 10 pixels of 4 bytes pad to 16 pixels, one GOB wide.
        let calc = OffsetCalculator::new(10, 16, 0, false, 2, 1, 4).unwrap();
        let direct = BlockLinearLayout::new(16, 16, 2, 1, 4).unwrap();
        for y in 0..16 {
            for x in 0..10 {
                assert_eq!(calc.offset(x, y), direct.offset(x, y, 0));
            }
        }
        assert_eq!(calc.rectangle_range(0, 0, 10, 16).unwrap().0, 0);
    }

    #[test]
    fn test_set_y_matches_offset() {
        let mut lin = OffsetCalculator::new(20, 10, 96, true, 1, 1, 4).unwrap();
        let mut bl = OffsetCalculator::new(20, 40, 0, false, 4, 1, 4).unwrap();
        for y in [0, 1, 7, 9] {
            lin.set_y(y);
            bl.set_y(y);
            for x in [0, 3, 16, 19] {
                assert_eq!(lin.offset_x(x), lin.offset(x, y));
                assert_eq!(bl.offset_x(x), bl.offset(x, y));
            }
        }
    }

    #[test]
    fn test_layout_matches() {
        let a = OffsetCalculator::new(32, 32, 0, false, 2, 1, 4).unwrap();
        let b = OffsetCalculator::new(32, 32, 0, false, 2, 1, 4).unwrap();
        let c = OffsetCalculator::new(32, 32, 0, false, 4, 1, 4).unwrap();
        let lin = OffsetCalculator::new(32, 32, 128, true, 1, 1, 4).unwrap();
        let lin2 = OffsetCalculator::new(16, 64, 128, true, 1, 1, 4).unwrap();
        assert!(a.layout_matches(&b));
        assert!(!a.layout_matches(&c));
        assert!(!a.layout_matches(&lin));
        assert!(lin.layout_matches(&lin2));
    }

    #[test]
    fn test_invalid_gob_blocks_propagate() {
        assert!(OffsetCalculator::new(32, 32, 0, false, 5, 1, 4).is_err());
        // Linear surfaces ignore block parameters.
        assert!(OffsetCalculator::new(32, 32, 128, true, 5, 1, 4).is_ok());
    }
}
