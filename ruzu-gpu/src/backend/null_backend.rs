// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Backend without a texture cache. Every lookup misses, so engines always
//! fall back to copying through guest memory.

use super::{GpuBackend, TextureSearch};

pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }
}
