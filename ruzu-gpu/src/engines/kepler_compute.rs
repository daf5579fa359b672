// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Kepler Compute engine (NV class B1C0).
//!
//! Register file plus the embedded inline-to-memory block used to upload
//! compute launch descriptors. Dispatch itself belongs to the renderer.

use super::inline_to_memory::InlineToMemoryUnit;
use super::{ClassId, Engine, EngineContext, EngineResult, RegisterFile};

pub struct KeplerCompute {
    regs: RegisterFile,
    upload: InlineToMemoryUnit,
}

impl KeplerCompute {
    pub fn new() -> Self {
        Self {
            regs: RegisterFile::new(),
            upload: InlineToMemoryUnit::new(),
        }
    }
}

impl Default for KeplerCompute {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for KeplerCompute {
    fn class_id(&self) -> ClassId {
        ClassId::Compute
    }

    fn read_reg(&self, method: u32) -> u32 {
        self.regs.get(method)
    }

    fn write_reg(&mut self, ctx: &EngineContext<'_>, method: u32, value: u32) -> EngineResult<()> {
        self.regs.set(method, value);
        log::trace!("KeplerCompute: reg[0x{:X}] = 0x{:X}", method, value);
        if InlineToMemoryUnit::owns(method) {
            self.upload.write(ctx.memory, method, value)?;
        }
        Ok(())
    }

    fn load_inline_data(&mut self, ctx: &EngineContext<'_>, data: &[u32]) -> EngineResult<()> {
        self.upload.load_data(ctx.memory, data)
    }
}
