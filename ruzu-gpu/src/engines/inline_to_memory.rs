// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Inline-to-Memory engine (NV class A140).
//!
//! Copies inline data from pushbuffer commands directly into GPU memory.
//! LAUNCH_DMA arms a transfer of `line_count` lines of `line_length_in`
//! bytes; the data then arrives as LOAD_INLINE_DATA words, one word at a
//! time or in bulk from the command processor. Each line starts on a word
//! boundary in the stream. Once the last word lands, the lines are written
//! to the destination, either pitch-linear or block-linear.
//!
//! The same register block (0x60..=0x6D) also exists in the 3D and compute
//! classes, which embed an [`InlineToMemoryUnit`].

use byteorder::{ByteOrder, LittleEndian};
use ruzu_common::{div_round_up, GpuVAddr};

use super::{ClassId, Engine, EngineContext, EngineResult, RegisterFile};
use crate::layout::OffsetCalculator;
use crate::memory_manager::GpuMemoryManager;

// ── Register constants (method addresses) ────────────────────────────────────

pub const LINE_LENGTH_IN: u32 = 0x60;
pub const LINE_COUNT: u32 = 0x61;
pub const OFFSET_OUT_UPPER: u32 = 0x62;
pub const OFFSET_OUT: u32 = 0x63;
pub const PITCH_OUT: u32 = 0x64;
pub const DST_BLOCK_SIZE: u32 = 0x65;
pub const DST_WIDTH: u32 = 0x66;
pub const DST_HEIGHT: u32 = 0x67;
pub const DST_DEPTH: u32 = 0x68;
pub const DST_LAYER: u32 = 0x69;
pub const DST_ORIGIN_X: u32 = 0x6A;
pub const DST_ORIGIN_Y: u32 = 0x6B;
pub const LAUNCH_DMA: u32 = 0x6C;
pub const LOAD_INLINE_DATA: u32 = 0x6D;

const FIRST_REG: u32 = LINE_LENGTH_IN;
const REG_COUNT: usize = (LOAD_INLINE_DATA - FIRST_REG + 1) as usize;

/// Transfer state of one inline-to-memory register block.
pub struct InlineToMemoryUnit {
    regs: [u32; REG_COUNT],
    /// Bytes received for the current transfer.
    buffer: Vec<u8>,
    /// Bytes expected, with every line padded to a word.
    expected: usize,
    is_linear: bool,
    active: bool,
}

impl InlineToMemoryUnit {
    pub fn new() -> Self {
        Self {
            regs: [0; REG_COUNT],
            buffer: Vec::new(),
            expected: 0,
            is_linear: true,
            active: false,
        }
    }

    /// True for methods handled by the unit.
    pub fn owns(method: u32) -> bool {
        (FIRST_REG..=LOAD_INLINE_DATA).contains(&method)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn read(&self, method: u32) -> u32 {
        if Self::owns(method) {
            self.regs[(method - FIRST_REG) as usize]
        } else {
            0
        }
    }

    fn reg(&self, method: u32) -> u32 {
        self.regs[(method - FIRST_REG) as usize]
    }

    // ── Typed accessors ──────────────────────────────────────────────────

    fn dst_address(&self) -> GpuVAddr {
        let high = (self.reg(OFFSET_OUT_UPPER) & 0xFF) as u64;
        (high << 32) | self.reg(OFFSET_OUT) as u64
    }

    fn line_length_in(&self) -> usize {
        self.reg(LINE_LENGTH_IN) as usize
    }

    fn line_count(&self) -> usize {
        self.reg(LINE_COUNT) as usize
    }

    fn padded_line_length(&self) -> usize {
        div_round_up(self.line_length_in(), 4) * 4
    }

    fn gob_blocks_in_y(&self) -> i32 {
        1 << ((self.reg(DST_BLOCK_SIZE) >> 4) & 0xF)
    }

    // ── Method handlers ──────────────────────────────────────────────────

    pub fn write(&mut self, memory: &GpuMemoryManager, method: u32, value: u32) -> EngineResult<()> {
        if !Self::owns(method) {
            return Ok(());
        }
        match method {
            LAUNCH_DMA => {
                self.regs[(method - FIRST_REG) as usize] = value;
                self.launch(value);
                Ok(())
            }
            LOAD_INLINE_DATA => self.load_data(memory, std::slice::from_ref(&value)),
            _ => {
                self.regs[(method - FIRST_REG) as usize] = value;
                Ok(())
            }
        }
    }

    fn launch(&mut self, value: u32) {
        self.is_linear = (value & 1) != 0;
        self.expected = self.padded_line_length().saturating_mul(self.line_count());
        self.buffer.clear();
        self.buffer.reserve(self.expected);
        self.active = self.expected > 0;

        log::debug!(
            "InlineToMemory: launch dst=0x{:X} line_len={} lines={} linear={}",
            self.dst_address(),
            self.line_length_in(),
            self.line_count(),
            self.is_linear,
        );
    }

    /// Append data words to the current transfer, completing it once every
    /// expected byte has arrived. Words outside a transfer are dropped.
    pub fn load_data(&mut self, memory: &GpuMemoryManager, data: &[u32]) -> EngineResult<()> {
        if !self.active {
            log::trace!("InlineToMemory: {} data words without a transfer", data.len());
            return Ok(());
        }
        let remaining_words = div_round_up(self.expected - self.buffer.len(), 4);
        let take = data.len().min(remaining_words);
        let start = self.buffer.len();
        self.buffer.resize(start + take * 4, 0);
        LittleEndian::write_u32_into(&data[..take], &mut self.buffer[start..]);
        if take < data.len() {
            log::trace!("InlineToMemory: dropping {} extra data words", data.len() - take);
        }

        if self.buffer.len() >= self.expected {
            self.active = false;
            self.finish(memory)?;
        }
        Ok(())
    }

    fn finish(&mut self, memory: &GpuMemoryManager) -> EngineResult<()> {
        let line_length = self.line_length_in();
        let line_count = self.line_count();
        let dst = self.dst_address();

        if self.is_linear && line_count == 1 {
            memory.write(dst, &self.buffer[..line_length]);
            log::debug!("InlineToMemory: wrote {} bytes to 0x{:X}", line_length, dst);
            return Ok(());
        }

        let mut calculator = OffsetCalculator::new(
            self.reg(DST_WIDTH) as i32,
            self.reg(DST_HEIGHT) as i32,
            self.reg(PITCH_OUT) as i32,
            self.is_linear,
            self.gob_blocks_in_y(),
            1,
            1,
        )?;
        let origin_x = self.reg(DST_ORIGIN_X) as i32;
        let origin_y = self.reg(DST_ORIGIN_Y) as i32;
        let padded = self.padded_line_length();

        for line in 0..line_count {
            calculator.set_y(origin_y + line as i32);
            let src = &self.buffer[line * padded..line * padded + line_length];
            write_line(memory, dst, &calculator, origin_x, src);
        }

        log::debug!(
            "InlineToMemory: wrote {} lines of {} bytes to 0x{:X} (linear={})",
            line_count,
            line_length,
            dst,
            self.is_linear
        );
        Ok(())
    }
}

impl Default for InlineToMemoryUnit {
    fn default() -> Self {
        Self::new()
    }
}

/// Write one line starting at column `x0` of the row selected on
/// `calculator`. Runs of 16 aligned bytes are contiguous in both layouts and
/// go out in one write.
fn write_line(
    memory: &GpuMemoryManager,
    base: GpuVAddr,
    calculator: &OffsetCalculator,
    x0: i32,
    src: &[u8],
) {
    let dst_of = |x: i32| base.wrapping_add_signed(calculator.offset_x(x) as i64);
    let x_end = x0 + src.len() as i32;
    let mut x = x0;
    let mut i = 0usize;

    while x < x_end {
        if x % 16 == 0 && x + 16 <= x_end {
            memory.write(dst_of(x), &src[i..i + 16]);
            x += 16;
            i += 16;
        } else {
            memory.write(dst_of(x), &src[i..i + 1]);
            x += 1;
            i += 1;
        }
    }
}

/// Standalone inline-to-memory class bound on subchannel 2.
pub struct InlineToMemory {
    regs: RegisterFile,
    unit: InlineToMemoryUnit,
}

impl InlineToMemory {
    pub fn new() -> Self {
        Self {
            regs: RegisterFile::new(),
            unit: InlineToMemoryUnit::new(),
        }
    }
}

impl Default for InlineToMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for InlineToMemory {
    fn class_id(&self) -> ClassId {
        ClassId::InlineToMemory
    }

    fn read_reg(&self, method: u32) -> u32 {
        if InlineToMemoryUnit::owns(method) {
            self.unit.read(method)
        } else {
            self.regs.get(method)
        }
    }

    fn write_reg(&mut self, ctx: &EngineContext<'_>, method: u32, value: u32) -> EngineResult<()> {
        log::trace!("InlineToMemory: reg[0x{:X}] = 0x{:X}", method, value);
        if InlineToMemoryUnit::owns(method) {
            self.unit.write(ctx.memory, method, value)
        } else {
            self.regs.set(method, value);
            Ok(())
        }
    }

    fn load_inline_data(&mut self, ctx: &EngineContext<'_>, data: &[u32]) -> EngineResult<()> {
        self.unit.load_data(ctx.memory, data)
    }
}
