// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU rendering backend abstraction.
//!
//! The command processor never talks to a renderer directly. Engines that
//! can skip guest memory traffic when a surface is already resident on the
//! host (the DMA engine, mostly) go through this trait. Every hook has a
//! default that reports "not resident", so a backend only overrides what it
//! actually caches.

pub mod null_backend;

/// Describes a surface by its placement in GPU memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureSearch {
    pub gpu_va: u64,
    pub bytes_per_pixel: i32,
    /// Pitch in bytes; only meaningful when `is_linear`.
    pub stride: i32,
    /// Width of the copied region in pixels.
    pub x_count: i32,
    /// Height of the copied region in rows.
    pub y_count: i32,
    pub is_linear: bool,
    pub gob_blocks_in_y: i32,
    pub gob_blocks_in_z: i32,
}

/// A host-resident texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub id: u64,
    pub width: i32,
    pub height: i32,
    pub bytes_per_pixel: i32,
}

/// Trait for GPU rendering backends.
///
/// All methods have default no-op implementations so that backends only
/// need to override the operations they support.
pub trait GpuBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Look up a cached texture covering `search`.
    fn find_texture(&mut self, _search: &TextureSearch) -> Option<TextureInfo> {
        None
    }

    /// Look up or create a texture at `search` compatible with `like`.
    fn find_or_create_texture(
        &mut self,
        _like: &TextureInfo,
        _search: &TextureSearch,
    ) -> Option<TextureInfo> {
        None
    }

    /// Host-side copy between two resident textures.
    fn copy_texture(&mut self, _src: &TextureInfo, _dst: &TextureInfo) {}

    /// Replace the contents of a resident texture with packed linear rows.
    fn upload_texture(&mut self, _dst: &TextureInfo, _data: &[u8]) {}
}
