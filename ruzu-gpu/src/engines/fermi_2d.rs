// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Fermi 2D engine (NV class 902D).
//!
//! Register file for the 2D class, which is also a macro target on
//! subchannel 3. The blit trigger performs a pitch-to-pitch row copy;
//! scaling, format conversion and block-linear surfaces belong to the
//! renderer and are not handled here.

use super::{ClassId, Engine, EngineContext, EngineResult, RegisterFile};

// ── Register constants ─────────────────────────────────────────────────────

// Destination surface descriptor
pub const DST_FORMAT: u32 = 0x80;
pub const DST_PITCH: u32 = 0x85;
pub const DST_WIDTH: u32 = 0x86;
pub const DST_HEIGHT: u32 = 0x87;
pub const DST_ADDR_HIGH: u32 = 0x88;
pub const DST_ADDR_LOW: u32 = 0x89;

// Source surface descriptor
pub const SRC_FORMAT: u32 = 0x8C;
pub const SRC_PITCH: u32 = 0x91;
pub const SRC_WIDTH: u32 = 0x92;
pub const SRC_HEIGHT: u32 = 0x93;
pub const SRC_ADDR_HIGH: u32 = 0x94;
pub const SRC_ADDR_LOW: u32 = 0x95;

/// Writing the source Y coordinate launches the blit.
pub const BLIT_TRIGGER: u32 = 0x237;

pub struct Fermi2D {
    regs: RegisterFile,
    blits: u64,
}

impl Fermi2D {
    pub fn new() -> Self {
        Self {
            regs: RegisterFile::new(),
            blits: 0,
        }
    }

    /// Number of blits executed so far.
    pub fn blit_count(&self) -> u64 {
        self.blits
    }

    // ── Typed accessors ────────────────────────────────────────────────

    pub fn dst_addr(&self) -> u64 {
        ((self.regs.get(DST_ADDR_HIGH) as u64) << 32) | self.regs.get(DST_ADDR_LOW) as u64
    }

    pub fn src_addr(&self) -> u64 {
        ((self.regs.get(SRC_ADDR_HIGH) as u64) << 32) | self.regs.get(SRC_ADDR_LOW) as u64
    }

    pub fn dst_pitch(&self) -> u32 {
        self.regs.get(DST_PITCH)
    }

    pub fn dst_height(&self) -> u32 {
        self.regs.get(DST_HEIGHT)
    }

    pub fn src_pitch(&self) -> u32 {
        self.regs.get(SRC_PITCH)
    }

    pub fn src_height(&self) -> u32 {
        self.regs.get(SRC_HEIGHT)
    }

    // ── Blit handling ──────────────────────────────────────────────────

    fn handle_blit(&mut self, ctx: &EngineContext<'_>) {
        self.blits += 1;
        let height = self.src_height().min(self.dst_height()) as u64;
        let (sp, dp) = (self.src_pitch() as u64, self.dst_pitch() as u64);
        let width = sp.min(dp) as usize;
        if height == 0 || width == 0 {
            log::debug!("Fermi2D: empty blit skipped");
            return;
        }

        let (src, dst) = (self.src_addr(), self.dst_addr());
        for line in 0..height {
            let row = ctx.memory.get_span(src + line * sp, width, true);
            ctx.memory.write(dst + line * dp, &row);
        }

        log::debug!(
            "Fermi2D: blit {}x{} (sp={} dp={}) src=0x{:X} -> dst=0x{:X}",
            width,
            height,
            sp,
            dp,
            src,
            dst
        );
    }
}

impl Default for Fermi2D {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for Fermi2D {
    fn class_id(&self) -> ClassId {
        ClassId::Twod
    }

    fn read_reg(&self, method: u32) -> u32 {
        self.regs.get(method)
    }

    fn write_reg(&mut self, ctx: &EngineContext<'_>, method: u32, value: u32) -> EngineResult<()> {
        self.regs.set(method, value);
        log::trace!("Fermi2D: reg[0x{:X}] = 0x{:X}", method, value);

        if method == BLIT_TRIGGER {
            self.handle_blit(ctx);
        }
        Ok(())
    }
}
