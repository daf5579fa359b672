// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Maxwell DMA engine (NV class B0B5).
//!
//! A write to `LAUNCH_DMA` copies a buffer or a 2D region between GPU
//! addresses. Either side can be pitch-linear or block-linear, and the copy
//! may remap pixel components on the way. Copies that line up with whole
//! textures are first offered to the backend, so a host-resident texture can
//! be copied or refreshed without a guest memory round trip. After the copy
//! an optional semaphore release reports completion.
//!
//! 1D copies between pitch and block-linear pages convert addresses inside
//! each GOB, which is how guest drivers move data into and out of
//! swizzled buffers without describing a surface.

use bitflags::bitflags;
use thiserror::Error;

use super::{ClassId, Engine, EngineContext, EngineError, EngineResult, RegisterFile};
use crate::backend::{TextureInfo, TextureSearch};
use crate::layout::{
    align_up_i32, convert_block_linear_to_linear, convert_gob_linear_to_block_linear_address,
    convert_linear_strided_to_linear, BlockLinearLayout, LayoutError, OffsetCalculator,
    GOB_ALIGNMENT, STRIDE_ALIGNMENT, SUPPORTED_BYTES_PER_PIXEL,
};

// ── Register constants ─────────────────────────────────────────────────────

pub const SEMAPHORE_A: u32 = 0x90;
pub const SEMAPHORE_B: u32 = 0x91;
pub const SEMAPHORE_PAYLOAD: u32 = 0x92;
pub const LAUNCH_DMA: u32 = 0xC0;
pub const OFFSET_IN_UPPER: u32 = 0x100;
pub const OFFSET_IN_LOWER: u32 = 0x101;
pub const OFFSET_OUT_UPPER: u32 = 0x102;
pub const OFFSET_OUT_LOWER: u32 = 0x103;
pub const PITCH_IN: u32 = 0x104;
pub const PITCH_OUT: u32 = 0x105;
pub const LINE_LENGTH_IN: u32 = 0x106;
pub const LINE_COUNT: u32 = 0x107;
pub const REMAP_CONST_A: u32 = 0x1C0;
pub const REMAP_CONST_B: u32 = 0x1C1;
pub const REMAP_COMPONENTS: u32 = 0x1C2;

/// First of the six destination texture words (block size, width, height,
/// depth, layer, origin).
pub const DST_BLOCK_SIZE: u32 = 0x1C3;
pub const DST_WIDTH: u32 = 0x1C4;
pub const DST_HEIGHT: u32 = 0x1C5;
pub const DST_DEPTH: u32 = 0x1C6;
pub const DST_LAYER: u32 = 0x1C7;
pub const DST_ORIGIN: u32 = 0x1C8;

/// First of the six source texture words, same order as the destination.
pub const SRC_BLOCK_SIZE: u32 = 0x1CA;
pub const SRC_WIDTH: u32 = 0x1CB;
pub const SRC_HEIGHT: u32 = 0x1CC;
pub const SRC_DEPTH: u32 = 0x1CD;
pub const SRC_LAYER: u32 = 0x1CE;
pub const SRC_ORIGIN: u32 = 0x1CF;

const TEXTURE_WORDS: usize = 6;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DmaError {
    #[error("unsupported bytes per pixel for DMA copy: {0}")]
    UnsupportedBytesPerPixel(i32),

    #[error("unsupported remap component size: {0}")]
    UnsupportedComponentSize(i32),
}

bitflags! {
    /// Flags of a `LAUNCH_DMA` argument that select the copy shape.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CopyFlags: u32 {
        const SRC_LINEAR = 1 << 7;
        const DST_LINEAR = 1 << 8;
        const MULTI_LINE = 1 << 9;
        const REMAP      = 1 << 10;
    }
}

/// Semaphore release requested by a `LAUNCH_DMA` argument (bits 4:3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SemaphoreType {
    None,
    ReleaseOneWord,
    ReleaseFourWord,
}

impl SemaphoreType {
    fn from_launch(arg: u32) -> Self {
        match (arg >> 3) & 3 {
            1 => Self::ReleaseOneWord,
            2 => Self::ReleaseFourWord,
            _ => Self::None,
        }
    }
}

/// Source of one destination component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapComponent {
    SrcX,
    SrcY,
    SrcZ,
    SrcW,
    ConstA,
    ConstB,
    NoWrite,
}

impl RemapComponent {
    pub fn from_raw(value: u32) -> Self {
        match value & 7 {
            0 => Self::SrcX,
            1 => Self::SrcY,
            2 => Self::SrcZ,
            3 => Self::SrcW,
            4 => Self::ConstA,
            5 => Self::ConstB,
            _ => Self::NoWrite,
        }
    }

    fn source_index(self) -> Option<usize> {
        match self {
            Self::SrcX => Some(0),
            Self::SrcY => Some(1),
            Self::SrcZ => Some(2),
            Self::SrcW => Some(3),
            _ => None,
        }
    }
}

/// Decoded `REMAP_COMPONENTS` register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapComponents {
    pub dst: [RemapComponent; 4],
    pub component_size: i32,
    pub num_src_components: i32,
    pub num_dst_components: i32,
}

impl RemapComponents {
    pub fn from_raw(value: u32) -> Self {
        Self {
            dst: [0, 4, 8, 12].map(|shift| RemapComponent::from_raw(value >> shift)),
            component_size: ((value >> 16) & 3) as i32 + 1,
            num_src_components: ((value >> 20) & 3) as i32 + 1,
            num_dst_components: ((value >> 24) & 3) as i32 + 1,
        }
    }

    /// True when every written destination component comes from the
    /// source component at the same position.
    pub fn is_identity(&self) -> bool {
        const SOURCES: [RemapComponent; 4] = [
            RemapComponent::SrcX,
            RemapComponent::SrcY,
            RemapComponent::SrcZ,
            RemapComponent::SrcW,
        ];
        (0..self.num_dst_components as usize).all(|i| self.dst[i] == SOURCES[i])
    }

    fn fills_const_a(&self) -> bool {
        self.dst.iter().all(|&c| c == RemapComponent::ConstA)
    }
}

/// One side of a 2D copy as described by its six texture registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaTexture {
    pub block_size: u32,
    pub width: i32,
    pub height: i32,
    pub depth: i32,
    pub layer: i32,
    pub region_x: i32,
    pub region_y: i32,
}

impl DmaTexture {
    pub fn from_array(words: [u32; TEXTURE_WORDS]) -> Self {
        let [block_size, width, height, depth, layer, origin] = words;
        Self {
            block_size,
            width: width as i32,
            height: height as i32,
            depth: depth as i32,
            layer: layer as i32,
            region_x: (origin & 0xFFFF) as i32,
            region_y: (origin >> 16) as i32,
        }
    }

    /// Decode from the six consecutive texture words. Returns `None` when
    /// fewer words are supplied.
    pub fn from_words(words: &[u32]) -> Option<Self> {
        Some(Self::from_array(words.get(..TEXTURE_WORDS)?.try_into().ok()?))
    }

    pub fn gob_blocks_in_y(&self) -> i32 {
        1 << ((self.block_size >> 4) & 0xF)
    }

    pub fn gob_blocks_in_z(&self) -> i32 {
        1 << ((self.block_size >> 8) & 0xF)
    }
}

/// One side of a 2D copy while it runs.
struct CopySurface {
    va: u64,
    texture: DmaTexture,
    calc: OffsetCalculator,
    region_x: i32,
    region_y: i32,
    stride: i32,
    bytes_per_pixel: i32,
    base: i32,
    size: i32,
}

impl CopySurface {
    fn new(
        va: u64,
        texture: DmaTexture,
        is_linear: bool,
        stride: i32,
        bytes_per_pixel: i32,
        x_count: i32,
        y_count: i32,
    ) -> EngineResult<Self> {
        // Linear surfaces are addressed from their start; the origin only
        // applies to block-linear ones.
        let (region_x, region_y) = if is_linear {
            (0, 0)
        } else {
            (texture.region_x, texture.region_y)
        };
        let calc = OffsetCalculator::new(
            texture.width,
            texture.height,
            stride,
            is_linear,
            texture.gob_blocks_in_y(),
            texture.gob_blocks_in_z(),
            bytes_per_pixel,
        )?;
        let (mut base, size) = calc.rectangle_range(region_x, region_y, x_count, y_count)?;
        if is_linear && stride < 0 {
            base = stride
                .checked_mul(y_count - 1)
                .and_then(|rows| base.checked_add(rows))
                .ok_or(LayoutError::InvalidDimensions {
                    width: x_count,
                    height: y_count,
                    depth: 1,
                })?;
        }
        Ok(Self {
            va,
            texture,
            calc,
            region_x,
            region_y,
            stride,
            bytes_per_pixel,
            base,
            size,
        })
    }

    fn is_linear(&self) -> bool {
        self.calc.is_linear()
    }

    fn span_va(&self) -> u64 {
        self.va.wrapping_add_signed(self.base as i64)
    }

    fn span_len(&self) -> usize {
        self.size.max(0) as usize
    }

    fn set_row(&mut self, y: i32) {
        self.calc.set_y(self.region_y + y);
    }

    /// Index into this surface's span of column `x` in the current row.
    #[inline]
    fn index(&self, x: i32) -> Option<usize> {
        usize::try_from(self.calc.offset_x(self.region_x + x).wrapping_sub(self.base)).ok()
    }

    /// True when the copy covers the whole surface, so a cached texture at
    /// this address can stand in for the guest memory.
    fn is_copy_complete(&self, x_count: i32, y_count: i32) -> bool {
        let bpp = self.bytes_per_pixel.max(1);
        if self.is_linear() {
            let align_width = (STRIDE_ALIGNMENT / bpp).max(1);
            self.stride > 0 && self.stride / bpp == align_up_i32(x_count, align_width)
        } else {
            let align_width = (GOB_ALIGNMENT / bpp).max(1);
            self.region_x == 0
                && self.region_y == 0
                && self.texture.width == align_up_i32(x_count, align_width)
                && self.texture.height == y_count
        }
    }

    fn search(&self, x_count: i32, y_count: i32) -> TextureSearch {
        TextureSearch {
            gpu_va: self.va,
            bytes_per_pixel: self.bytes_per_pixel,
            stride: self.stride,
            x_count,
            y_count,
            is_linear: self.is_linear(),
            gob_blocks_in_y: self.texture.gob_blocks_in_y(),
            gob_blocks_in_z: self.texture.gob_blocks_in_z(),
        }
    }
}

// ── Engine ─────────────────────────────────────────────────────────────────

pub struct MaxwellDMA {
    regs: RegisterFile,
}

impl MaxwellDMA {
    pub fn new() -> Self {
        Self {
            regs: RegisterFile::new(),
        }
    }

    pub fn offset_in(&self) -> u64 {
        ((self.regs.get(OFFSET_IN_UPPER) as u64 & 0xFF) << 32) | self.regs.get(OFFSET_IN_LOWER) as u64
    }

    pub fn offset_out(&self) -> u64 {
        ((self.regs.get(OFFSET_OUT_UPPER) as u64 & 0xFF) << 32)
            | self.regs.get(OFFSET_OUT_LOWER) as u64
    }

    pub fn semaphore_address(&self) -> u64 {
        ((self.regs.get(SEMAPHORE_A) as u64) << 32) | self.regs.get(SEMAPHORE_B) as u64
    }

    fn texture(&self, first: u32) -> DmaTexture {
        DmaTexture::from_array(std::array::from_fn(|i| self.regs.get(first + i as u32)))
    }

    pub fn src_texture(&self) -> DmaTexture {
        self.texture(SRC_BLOCK_SIZE)
    }

    pub fn dst_texture(&self) -> DmaTexture {
        self.texture(DST_BLOCK_SIZE)
    }

    pub fn remap(&self) -> RemapComponents {
        RemapComponents::from_raw(self.regs.get(REMAP_COMPONENTS))
    }

    fn launch(&mut self, ctx: &EngineContext<'_>, arg: u32) -> EngineResult<()> {
        let flags = CopyFlags::from_bits_truncate(arg);
        self.copy(ctx, flags)?;
        self.release_semaphore(ctx, arg);
        Ok(())
    }

    fn release_semaphore(&self, ctx: &EngineContext<'_>, arg: u32) {
        let address = self.semaphore_address();
        let payload = self.regs.get(SEMAPHORE_PAYLOAD);
        match SemaphoreType::from_launch(arg) {
            SemaphoreType::None => {}
            SemaphoreType::ReleaseOneWord => {
                ctx.memory.write_u32(address, payload);
                log::trace!("MaxwellDMA: semaphore 0x{:X} = {}", address, payload);
            }
            SemaphoreType::ReleaseFourWord => {
                ctx.memory.write_u64(address + 8, ctx.clock.ticks());
                ctx.memory.write_u64(address, payload as u64);
                log::trace!("MaxwellDMA: semaphore 0x{:X} = {} (timestamped)", address, payload);
            }
        }
    }

    fn copy(&self, ctx: &EngineContext<'_>, flags: CopyFlags) -> EngineResult<()> {
        let size = self.regs.get(LINE_LENGTH_IN);
        if size == 0 {
            return Ok(());
        }

        let src_va = self.offset_in();
        let dst_va = self.offset_out();
        log::debug!(
            "MaxwellDMA: copy 0x{:X} -> 0x{:X} len={} lines={} {:?}",
            src_va,
            dst_va,
            size,
            self.regs.get(LINE_COUNT),
            flags
        );

        if flags.contains(CopyFlags::MULTI_LINE) {
            match self.copy_2d(ctx, flags, src_va, dst_va) {
                // Surfaces past the 32-bit offset range cannot be addressed.
                Err(EngineError::Layout(err @ LayoutError::InvalidDimensions { .. })) => {
                    log::warn!("MaxwellDMA: skipping copy: {}", err);
                    Ok(())
                }
                result => result,
            }
        } else {
            self.copy_1d(ctx, flags, src_va, dst_va, size as u64);
            Ok(())
        }
    }

    // ── 1D copies ──────────────────────────────────────────────────────

    fn copy_1d(&self, ctx: &EngineContext<'_>, flags: CopyFlags, src: u64, dst: u64, size: u64) {
        let remap = self.remap();
        if flags.contains(CopyFlags::REMAP)
            && remap.fills_const_a()
            && remap.num_src_components == 1
            && remap.num_dst_components == 1
            && remap.component_size == 4
        {
            let value = self.regs.get(REMAP_CONST_A);
            ctx.memory.fill_u32(dst, size as usize, value);
            return;
        }

        let src_pitch = ctx.memory.kind(src).is_pitch();
        let dst_pitch = ctx.memory.kind(dst).is_pitch();
        match (src_pitch, dst_pitch) {
            (false, true) => copy_gob(ctx, src, dst, size, true),
            (true, false) => copy_gob(ctx, src, dst, size, false),
            _ => ctx.memory.copy(src, dst, size as usize),
        }
    }

    // ── 2D copies ──────────────────────────────────────────────────────

    fn copy_2d(
        &self,
        ctx: &EngineContext<'_>,
        flags: CopyFlags,
        src_va: u64,
        dst_va: u64,
    ) -> EngineResult<()> {
        let x_count = self.regs.get(LINE_LENGTH_IN) as i32;
        let y_count = self.regs.get(LINE_COUNT) as i32;
        if x_count <= 0 || y_count <= 0 {
            return Ok(());
        }

        let remap_enabled = flags.contains(CopyFlags::REMAP);
        let remap = self.remap();
        let (src_bpp, dst_bpp) = if remap_enabled {
            (
                remap.num_src_components * remap.component_size,
                remap.num_dst_components * remap.component_size,
            )
        } else {
            (1, 1)
        };
        let is_identity = !remap_enabled || remap.is_identity();

        if is_identity && !SUPPORTED_BYTES_PER_PIXEL.contains(&src_bpp) {
            return Err(DmaError::UnsupportedBytesPerPixel(src_bpp).into());
        }
        if !is_identity && !(1..=4).contains(&remap.component_size) {
            return Err(DmaError::UnsupportedComponentSize(remap.component_size).into());
        }

        let mut src = CopySurface::new(
            src_va,
            self.src_texture(),
            flags.contains(CopyFlags::SRC_LINEAR),
            self.regs.get(PITCH_IN) as i32,
            src_bpp,
            x_count,
            y_count,
        )?;
        let mut dst = CopySurface::new(
            dst_va,
            self.dst_texture(),
            flags.contains(CopyFlags::DST_LINEAR),
            self.regs.get(PITCH_OUT) as i32,
            dst_bpp,
            x_count,
            y_count,
        )?;

        let complete =
            src.is_copy_complete(x_count, y_count) && dst.is_copy_complete(x_count, y_count);

        if complete && is_identity && !src.is_linear() {
            let mut backend = ctx.backend.lock();
            if let Some(source) = backend.find_texture(&src.search(x_count, y_count)) {
                if source.height == y_count {
                    if let Some(target) =
                        backend.find_or_create_texture(&source, &dst.search(x_count, y_count))
                    {
                        backend.copy_texture(&source, &target);
                        log::trace!("MaxwellDMA: texture copy {} -> {}", source.id, target.id);
                        return Ok(());
                    }
                }
            }
        }

        let src_span = ctx.memory.get_span(src.span_va(), src.span_len(), true);

        if complete && is_identity && !(dst.is_linear() && !src.is_linear()) {
            let target = ctx.backend.lock().find_texture(&dst.search(x_count, y_count));
            if let Some(target) = target {
                self.upload_to_texture(ctx, &src, &target, &src_span)?;
                return Ok(());
            }
            if src.calc.layout_matches(&dst.calc) {
                ctx.memory.write(dst.span_va(), &src_span);
                return Ok(());
            }
        }

        let mut dst_span = ctx.memory.get_span(dst.span_va(), dst.span_len(), true);

        if is_identity {
            if src.is_linear() && dst.is_linear() && src_bpp == dst_bpp {
                copy_rows(&mut src, &mut dst, &src_span, &mut dst_span, x_count, y_count);
            } else {
                let copy = match src_bpp {
                    1 => copy_pixels::<1>,
                    2 => copy_pixels::<2>,
                    4 => copy_pixels::<4>,
                    8 => copy_pixels::<8>,
                    12 => copy_pixels::<12>,
                    16 => copy_pixels::<16>,
                    _ => return Err(DmaError::UnsupportedBytesPerPixel(src_bpp).into()),
                };
                copy(&mut src, &mut dst, &src_span, &mut dst_span, x_count, y_count);
            }
        } else {
            let shuffle = match remap.component_size {
                1 => shuffle_components::<1>,
                2 => shuffle_components::<2>,
                3 => shuffle_components::<3>,
                4 => shuffle_components::<4>,
                size => return Err(DmaError::UnsupportedComponentSize(size).into()),
            };
            let constants = [self.regs.get(REMAP_CONST_A), self.regs.get(REMAP_CONST_B)];
            let copy = ShuffleCopy {
                remap: &remap,
                constants,
                x_count,
                y_count,
            };
            shuffle(&copy, &mut src, &mut dst, &src_span, &mut dst_span);
        }

        ctx.memory.write(dst.span_va(), &dst_span);
        Ok(())
    }

    fn upload_to_texture(
        &self,
        ctx: &EngineContext<'_>,
        src: &CopySurface,
        target: &TextureInfo,
        src_span: &[u8],
    ) -> EngineResult<()> {
        let data = if src.is_linear() {
            convert_linear_strided_to_linear(
                target.width,
                target.height,
                target.bytes_per_pixel,
                src.stride,
                src_span,
            )?
        } else {
            let (width, height, depth) =
                (src.texture.width, src.texture.height, src.texture.depth.max(1));
            let (gob_blocks_in_y, gob_blocks_in_z) =
                (src.texture.gob_blocks_in_y(), src.texture.gob_blocks_in_z());
            // The surface can be wider than the copied columns.
            let layout = BlockLinearLayout::new(
                width,
                height,
                gob_blocks_in_y,
                gob_blocks_in_z,
                src.bytes_per_pixel,
            )?;
            let needed = layout.extent(width, height, depth)?;
            let widened;
            let tiled = if src_span.len() < needed {
                widened = ctx.memory.get_span(src.span_va(), needed, true);
                &widened[..]
            } else {
                src_span
            };
            convert_block_linear_to_linear(
                width,
                height,
                depth,
                gob_blocks_in_y,
                gob_blocks_in_z,
                src.bytes_per_pixel,
                tiled,
            )?
        };
        ctx.backend.lock().upload_texture(target, &data);
        log::trace!("MaxwellDMA: uploaded {} bytes to texture {}", data.len(), target.id);
        Ok(())
    }
}

impl Default for MaxwellDMA {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MaxwellDMA {
    fn class_id(&self) -> ClassId {
        ClassId::Dma
    }

    fn read_reg(&self, method: u32) -> u32 {
        self.regs.get(method)
    }

    fn write_reg(&mut self, ctx: &EngineContext<'_>, method: u32, value: u32) -> EngineResult<()> {
        self.regs.set(method, value);
        log::trace!("MaxwellDMA: reg[0x{:X}] = 0x{:X}", method, value);
        if method == LAUNCH_DMA {
            self.launch(ctx, value)?;
        }
        Ok(())
    }
}

// ── Copy kernels ───────────────────────────────────────────────────────────

/// Copy between pitch and block-linear pages, converting the block-linear
/// side's addresses within each GOB. `from_block_linear` selects which side
/// is swizzled.
fn copy_gob(ctx: &EngineContext<'_>, src: u64, dst: u64, size: u64, from_block_linear: bool) {
    let translate = |src_addr: u64, dst_addr: u64| {
        if from_block_linear {
            (convert_gob_linear_to_block_linear_address(src_addr), dst_addr)
        } else {
            (src_addr, convert_gob_linear_to_block_linear_address(dst_addr))
        }
    };

    if (src | dst | size) & 0xF == 0 {
        let mut chunk = [0u8; 16];
        for offset in (0..size).step_by(16) {
            let (s, d) = translate(src + offset, dst + offset);
            ctx.memory.read(s, &mut chunk);
            ctx.memory.write(d, &chunk);
        }
    } else {
        let mut byte = [0u8; 1];
        for offset in 0..size {
            let (s, d) = translate(src + offset, dst + offset);
            ctx.memory.read(s, &mut byte);
            ctx.memory.write(d, &byte);
        }
    }
}

/// Whole-row copy between two linear surfaces with equal pixel size.
fn copy_rows(
    src: &mut CopySurface,
    dst: &mut CopySurface,
    src_span: &[u8],
    dst_span: &mut [u8],
    x_count: i32,
    y_count: i32,
) {
    let row_len = (x_count * src.bytes_per_pixel) as usize;
    for y in 0..y_count {
        src.set_row(y);
        dst.set_row(y);
        let (Some(s), Some(d)) = (src.index(0), dst.index(0)) else {
            continue;
        };
        if let (Some(row), Some(out)) =
            (src_span.get(s..s + row_len), dst_span.get_mut(d..d + row_len))
        {
            out.copy_from_slice(row);
        }
    }
}

fn copy_pixels<const BPP: usize>(
    src: &mut CopySurface,
    dst: &mut CopySurface,
    src_span: &[u8],
    dst_span: &mut [u8],
    x_count: i32,
    y_count: i32,
) {
    for y in 0..y_count {
        src.set_row(y);
        dst.set_row(y);
        for x in 0..x_count {
            let (Some(s), Some(d)) = (src.index(x), dst.index(x)) else {
                continue;
            };
            if let (Some(pixel), Some(out)) =
                (src_span.get(s..s + BPP), dst_span.get_mut(d..d + BPP))
            {
                out.copy_from_slice(pixel);
            }
        }
    }
}

struct ShuffleCopy<'a> {
    remap: &'a RemapComponents,
    constants: [u32; 2],
    x_count: i32,
    y_count: i32,
}

/// Per-component copy for non-identity remaps, `SIZE` bytes per component.
fn shuffle_components<const SIZE: usize>(
    copy: &ShuffleCopy<'_>,
    src: &mut CopySurface,
    dst: &mut CopySurface,
    src_span: &[u8],
    dst_span: &mut [u8],
) {
    let const_a = copy.constants[0].to_le_bytes();
    let const_b = copy.constants[1].to_le_bytes();
    let components = &copy.remap.dst[..copy.remap.num_dst_components as usize];

    for y in 0..copy.y_count {
        src.set_row(y);
        dst.set_row(y);
        for x in 0..copy.x_count {
            let (Some(s), Some(d)) = (src.index(x), dst.index(x)) else {
                continue;
            };
            for (i, &component) in components.iter().enumerate() {
                let value = match component {
                    RemapComponent::ConstA => &const_a[..SIZE],
                    RemapComponent::ConstB => &const_b[..SIZE],
                    RemapComponent::NoWrite => continue,
                    source => {
                        let Some(index) = source.source_index() else {
                            continue;
                        };
                        let start = s + index * SIZE;
                        match src_span.get(start..start + SIZE) {
                            Some(bytes) => bytes,
                            None => continue,
                        }
                    }
                };
                let start = d + i * SIZE;
                if let Some(out) = dst_span.get_mut(start..start + SIZE) {
                    out.copy_from_slice(value);
                }
            }
        }
    }
}
