// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Maxwell 3D engine (NV class B197), front-end subset.
//!
//! Only the state the command front end depends on is modelled: the flat
//! register file that macros read and write, the MME shadow RAM, constant
//! buffer uploads, the embedded inline-to-memory block and report
//! semaphores. Rendering state lives in the register file untouched.

use byteorder::{ByteOrder, LittleEndian};

use super::inline_to_memory::InlineToMemoryUnit;
use super::{ClassId, Engine, EngineContext, EngineResult, RegisterFile, ENGINE_REG_COUNT};

// ── Constant buffer registers ───────────────────────────────────────────────

pub const CB_SIZE: u32 = 0x8E0;
pub const CB_ADDRESS_HIGH: u32 = 0x8E1;
pub const CB_ADDRESS_LOW: u32 = 0x8E2;
/// Byte offset of the next upload inside the bound buffer.
pub const CB_OFFSET: u32 = 0x8E3;
/// Sixteen data methods; any of them uploads one word.
pub const CB_DATA_FIRST: u32 = 0x8E4;
pub const CB_DATA_LAST: u32 = 0x8F3;

// ── Report semaphore registers ──────────────────────────────────────────────

/// Report semaphore block: address high, address low, payload, trigger.
pub const REPORT_SEMAPHORE_BASE: u32 = 0x6C0;
pub const REPORT_SEMAPHORE_TRIGGER: u32 = REPORT_SEMAPHORE_BASE + 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOperation {
    Release = 0,
    Acquire = 1,
    ReportOnly = 2,
    Trap = 3,
}

impl ReportOperation {
    pub fn from_raw(value: u32) -> Self {
        match value & 0x3 {
            0 => Self::Release,
            1 => Self::Acquire,
            2 => Self::ReportOnly,
            _ => Self::Trap,
        }
    }
}

/// How register writes interact with the MME shadow copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowRamControl {
    /// Store the value in both the registers and the shadow copy.
    Track,
    /// Same as `Track`; filtering is not modelled.
    TrackWithFilter,
    /// Store the value in the registers only.
    Passthrough,
    /// Ignore the written value and store the shadow copy instead.
    Replay,
}

impl ShadowRamControl {
    pub fn from_raw(value: u32) -> Self {
        match value & 0x3 {
            0 => Self::Track,
            1 => Self::TrackWithFilter,
            2 => Self::Passthrough,
            _ => Self::Replay,
        }
    }
}

pub struct Maxwell3D {
    regs: RegisterFile,
    shadow: RegisterFile,
    shadow_control: ShadowRamControl,
    upload: InlineToMemoryUnit,
    /// Set when derived state must be rebuilt before the next draw.
    state_dirty: bool,
}

impl Maxwell3D {
    pub fn new() -> Self {
        Self {
            regs: RegisterFile::new(),
            shadow: RegisterFile::new(),
            shadow_control: ShadowRamControl::Track,
            upload: InlineToMemoryUnit::new(),
            state_dirty: true,
        }
    }

    pub fn shadow_ram_control(&self) -> ShadowRamControl {
        self.shadow_control
    }

    pub fn shadow_reg(&self, method: u32) -> u32 {
        self.shadow.get(method)
    }

    pub fn is_state_dirty(&self) -> bool {
        self.state_dirty
    }

    /// Return and clear the dirty flag.
    pub fn take_state_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.state_dirty, false)
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn const_buffer_address(&self) -> u64 {
        let high = (self.regs.get(CB_ADDRESS_HIGH) & 0xFF) as u64;
        (high << 32) | self.regs.get(CB_ADDRESS_LOW) as u64
    }

    pub fn const_buffer_offset(&self) -> u32 {
        self.regs.get(CB_OFFSET)
    }

    /// Report semaphore GPU virtual address (high << 32 | low).
    pub fn report_semaphore_address(&self) -> u64 {
        let high = self.regs.get(REPORT_SEMAPHORE_BASE) as u64;
        let low = self.regs.get(REPORT_SEMAPHORE_BASE + 1) as u64;
        (high << 32) | low
    }

    pub fn report_semaphore_payload(&self) -> u32 {
        self.regs.get(REPORT_SEMAPHORE_BASE + 2)
    }

    // ── Side-effect handlers ─────────────────────────────────────────────

    /// Upload `data` at the current constant buffer offset and advance it.
    fn upload_const_buffer(&mut self, ctx: &EngineContext<'_>, data: &[u32]) {
        let offset = self.const_buffer_offset();
        let size = self.regs.get(CB_SIZE);
        if offset as u64 + data.len() as u64 * 4 > size as u64 {
            log::trace!(
                "Maxwell3D: CB upload of {} words at 0x{:X} exceeds size 0x{:X}",
                data.len(),
                offset,
                size
            );
        }

        let address = self.const_buffer_address() + offset as u64;
        let mut bytes = vec![0u8; data.len() * 4];
        LittleEndian::write_u32_into(data, &mut bytes);
        ctx.memory.write(address, &bytes);

        self.regs
            .set(CB_OFFSET, offset.wrapping_add(data.len() as u32 * 4));
        log::trace!("Maxwell3D: CB upload {} words to 0x{:X}", data.len(), address);
    }

    fn handle_report_semaphore(&mut self, ctx: &EngineContext<'_>, value: u32) {
        let operation = ReportOperation::from_raw(value);
        match operation {
            ReportOperation::Release | ReportOperation::ReportOnly => {
                let gpu_va = self.report_semaphore_address();
                let payload = self.report_semaphore_payload();
                let short_query = (value >> 28) & 1 != 0;

                if short_query {
                    ctx.memory.write_u32(gpu_va, payload);
                } else {
                    ctx.memory.write_u64(gpu_va, payload as u64);
                    ctx.memory.write_u64(gpu_va + 8, ctx.clock.ticks());
                }

                log::debug!(
                    "Maxwell3D: report_semaphore {:?} va=0x{:X} payload=0x{:X} short={}",
                    operation,
                    gpu_va,
                    payload,
                    short_query,
                );
            }
            ReportOperation::Acquire | ReportOperation::Trap => {
                log::debug!("Maxwell3D: report_semaphore {:?} (no-op)", operation);
            }
        }
    }
}

impl Default for Maxwell3D {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for Maxwell3D {
    fn class_id(&self) -> ClassId {
        ClassId::Threed
    }

    fn read_reg(&self, method: u32) -> u32 {
        self.regs.get(method)
    }

    fn write_reg(&mut self, ctx: &EngineContext<'_>, method: u32, value: u32) -> EngineResult<()> {
        if method as usize >= ENGINE_REG_COUNT {
            log::trace!("Maxwell3D: write to out-of-range method 0x{:X}", method);
            return Ok(());
        }

        let value = match self.shadow_control {
            ShadowRamControl::Track | ShadowRamControl::TrackWithFilter => {
                self.shadow.set(method, value);
                value
            }
            ShadowRamControl::Passthrough => value,
            ShadowRamControl::Replay => self.shadow.get(method),
        };

        if self.regs.get(method) != value {
            self.state_dirty = true;
        }
        self.regs.set(method, value);
        log::trace!("Maxwell3D: reg[0x{:X}] = 0x{:X}", method, value);

        match method {
            CB_DATA_FIRST..=CB_DATA_LAST => self.upload_const_buffer(ctx, &[value]),
            REPORT_SEMAPHORE_TRIGGER => self.handle_report_semaphore(ctx, value),
            m if InlineToMemoryUnit::owns(m) => self.upload.write(ctx.memory, m, value)?,
            _ => {}
        }
        Ok(())
    }

    fn load_inline_data(&mut self, ctx: &EngineContext<'_>, data: &[u32]) -> EngineResult<()> {
        self.upload.load_data(ctx.memory, data)
    }

    fn constant_buffer_update(&mut self, ctx: &EngineContext<'_>, data: &[u32]) -> EngineResult<()> {
        if let Some(&last) = data.last() {
            self.regs.set(CB_DATA_FIRST, last);
        }
        self.upload_const_buffer(ctx, data);
        Ok(())
    }

    fn set_shadow_ram_control(&mut self, control: u32) {
        self.shadow_control = ShadowRamControl::from_raw(control);
        log::debug!("Maxwell3D: shadow RAM control {:?}", self.shadow_control);
    }

    fn force_state_dirty(&mut self) {
        self.state_dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::inline_to_memory::{LAUNCH_DMA, LINE_COUNT, LINE_LENGTH_IN, OFFSET_OUT};
    use crate::engines::tests::TestHarness;
    use crate::engines::LOAD_INLINE_DATA;

    const BASE: u64 = 0x30_0000;

    fn bind_cb(engine: &mut Maxwell3D, h: &TestHarness, address: u64, size: u32) {
        let ctx = h.ctx();
        engine.write_reg(&ctx, CB_SIZE, size).unwrap();
        engine.write_reg(&ctx, CB_ADDRESS_HIGH, (address >> 32) as u32).unwrap();
        engine.write_reg(&ctx, CB_ADDRESS_LOW, address as u32).unwrap();
        engine.write_reg(&ctx, CB_OFFSET, 0).unwrap();
    }

    #[test]
    fn test_write_reg() {
        let h = TestHarness::new(BASE);
        let mut engine = Maxwell3D::new();
        engine.write_reg(&h.ctx(), 0x100, 0xDEAD).unwrap();
        assert_eq!(engine.read_reg(0x100), 0xDEAD);
        assert_eq!(engine.class_id(), ClassId::Threed);
    }

    #[test]
    fn test_out_of_range_write_ignored() {
        let h = TestHarness::new(BASE);
        let mut engine = Maxwell3D::new();
        engine.write_reg(&h.ctx(), 0x19D0, 0x1234).unwrap();
        assert_eq!(engine.read_reg(0x19D0), 0);
    }

    #[test]
    fn test_cb_data_writes_and_increments_offset() {
        let h = TestHarness::new(BASE);
        let mut engine = Maxwell3D::new();
        bind_cb(&mut engine, &h, BASE + 0x1000, 0x100);
        let ctx = h.ctx();
        engine.write_reg(&ctx, CB_OFFSET, 0x10).unwrap();

        engine.write_reg(&ctx, CB_DATA_FIRST, 0xAAAA).unwrap();
        assert_eq!(engine.const_buffer_offset(), 0x14);
        // Every data method uploads at the running offset.
        engine.write_reg(&ctx, CB_DATA_FIRST + 5, 0xBBBB).unwrap();
        assert_eq!(engine.const_buffer_offset(), 0x18);

        assert_eq!(h.memory.read_u32(BASE + 0x1010), 0xAAAA);
        assert_eq!(h.memory.read_u32(BASE + 0x1014), 0xBBBB);
    }

    #[test]
    fn test_constant_buffer_update_batch() {
        let h = TestHarness::new(BASE);
        let mut engine = Maxwell3D::new();
        bind_cb(&mut engine, &h, BASE + 0x2000, 0x100);
        engine
            .constant_buffer_update(&h.ctx(), &[1, 2, 3, 4])
            .unwrap();

        assert_eq!(engine.const_buffer_offset(), 16);
        for i in 0..4u64 {
            assert_eq!(h.memory.read_u32(BASE + 0x2000 + i * 4), i as u32 + 1);
        }
        assert_eq!(engine.read_reg(CB_DATA_FIRST), 4);
    }

    #[test]
    fn test_shadow_ram_track_and_replay() {
        let h = TestHarness::new(BASE);
        let mut engine = Maxwell3D::new();
        let ctx = h.ctx();
        engine.write_reg(&ctx, 0x200, 0x11).unwrap();
        assert_eq!(engine.shadow_reg(0x200), 0x11);

        engine.set_shadow_ram_control(2);
        engine.write_reg(&ctx, 0x200, 0x22).unwrap();
        assert_eq!(engine.read_reg(0x200), 0x22);
        assert_eq!(engine.shadow_reg(0x200), 0x11);

        engine.set_shadow_ram_control(3);
        assert_eq!(engine.shadow_ram_control(), ShadowRamControl::Replay);
        engine.write_reg(&ctx, 0x200, 0x33).unwrap();
        assert_eq!(engine.read_reg(0x200), 0x11);

        engine.set_shadow_ram_control(1);
        engine.write_reg(&ctx, 0x200, 0x44).unwrap();
        assert_eq!(engine.shadow_reg(0x200), 0x44);
    }

    #[test]
    fn test_state_dirty_tracking() {
        let h = TestHarness::new(BASE);
        let mut engine = Maxwell3D::new();
        assert!(engine.take_state_dirty());
        assert!(!engine.is_state_dirty());

        engine.write_reg(&h.ctx(), 0x300, 0).unwrap();
        assert!(!engine.is_state_dirty());
        engine.write_reg(&h.ctx(), 0x300, 5).unwrap();
        assert!(engine.take_state_dirty());

        engine.force_state_dirty();
        assert!(engine.is_state_dirty());
    }

    #[test]
    fn test_embedded_inline_to_memory() {
        let h = TestHarness::new(BASE);
        let mut engine = Maxwell3D::new();
        let ctx = h.ctx();
        engine.write_reg(&ctx, OFFSET_OUT, (BASE + 0x3000) as u32).unwrap();
        engine.write_reg(&ctx, LINE_LENGTH_IN, 8).unwrap();
        engine.write_reg(&ctx, LINE_COUNT, 1).unwrap();
        engine.write_reg(&ctx, LAUNCH_DMA, 1).unwrap();
        engine.write_reg(&ctx, LOAD_INLINE_DATA, 0x1234).unwrap();
        engine.load_inline_data(&ctx, &[0x5678]).unwrap();

        assert_eq!(h.memory.read_u32(BASE + 0x3000), 0x1234);
        assert_eq!(h.memory.read_u32(BASE + 0x3004), 0x5678);
        assert_eq!(engine.read_reg(LINE_LENGTH_IN), 8);
    }

    // ── Report semaphore ─────────────────────────────────────────────────

    fn report(engine: &mut Maxwell3D, h: &TestHarness, address: u64, payload: u32, query: u32) {
        let ctx = h.ctx();
        engine.write_reg(&ctx, REPORT_SEMAPHORE_BASE, (address >> 32) as u32).unwrap();
        engine.write_reg(&ctx, REPORT_SEMAPHORE_BASE + 1, address as u32).unwrap();
        engine.write_reg(&ctx, REPORT_SEMAPHORE_BASE + 2, payload).unwrap();
        engine.write_reg(&ctx, REPORT_SEMAPHORE_TRIGGER, query).unwrap();
    }

    #[test]
    fn test_report_operation_from_raw() {
        assert_eq!(ReportOperation::from_raw(0), ReportOperation::Release);
        assert_eq!(ReportOperation::from_raw(1), ReportOperation::Acquire);
        assert_eq!(ReportOperation::from_raw(2), ReportOperation::ReportOnly);
        assert_eq!(ReportOperation::from_raw(3), ReportOperation::Trap);
        // Bits above [1:0] are ignored for operation extraction.
        assert_eq!(ReportOperation::from_raw(0xFFFF_FF00), ReportOperation::Release);
    }

    #[test]
    fn test_report_semaphore_address() {
        let h = TestHarness::new(BASE);
        let mut engine = Maxwell3D::new();
        engine.write_reg(&h.ctx(), REPORT_SEMAPHORE_BASE, 1).unwrap();
        engine.write_reg(&h.ctx(), REPORT_SEMAPHORE_BASE + 1, 0xABCD_0000).unwrap();
        assert_eq!(engine.report_semaphore_address(), 0x0001_ABCD_0000);
    }

    #[test]
    fn test_report_semaphore_short_query() {
        let h = TestHarness::new(BASE);
        let mut engine = Maxwell3D::new();
        h.memory.write_u32(BASE + 0x1004, 0x7777);
        report(&mut engine, &h, BASE + 0x1000, 0xDEAD_BEEF, 1 << 28);
        assert_eq!(h.memory.read_u32(BASE + 0x1000), 0xDEAD_BEEF);
        assert_eq!(h.memory.read_u32(BASE + 0x1004), 0x7777);
    }

    #[test]
    fn test_report_semaphore_long_query() {
        let h = TestHarness::new(BASE);
        let mut engine = Maxwell3D::new();
        std::thread::sleep(std::time::Duration::from_millis(1));
        report(&mut engine, &h, BASE + 0x2000, 0x42, 0);
        assert_eq!(h.memory.read_u64(BASE + 0x2000), 0x42);
        assert!(h.memory.read_u64(BASE + 0x2008) > 0);
    }

    #[test]
    fn test_report_semaphore_acquire_no_write() {
        let h = TestHarness::new(BASE);
        let mut engine = Maxwell3D::new();
        report(&mut engine, &h, BASE + 0x4000, 0xFF, 1);
        assert_eq!(h.memory.read_u32(BASE + 0x4000), 0);
    }
}
