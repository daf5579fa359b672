// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Puller (GPFIFO host class) methods.
//!
//! Methods below 0x60 are handled by the channel itself regardless of the
//! subchannel: semaphores, syncpoints, wait-for-idle, subchannel binding and
//! macro code upload. Effects on the channel's engines are returned as a
//! [`PullerAction`] for the command processor to apply.

use std::time::{Duration, Instant};

use super::EngineContext;
use crate::macro_engine::MacroEngine;

// ── Method constants ────────────────────────────────────────────────────────

pub const SET_OBJECT: u32 = 0x00;
pub const NOP: u32 = 0x02;
pub const SEMAPHORE_A: u32 = 0x04;
pub const SEMAPHORE_B: u32 = 0x05;
pub const SEMAPHORE_C: u32 = 0x06;
pub const SEMAPHORE_D: u32 = 0x07;
pub const NON_STALL_INTERRUPT: u32 = 0x08;
pub const FB_FLUSH: u32 = 0x09;
pub const SET_REFERENCE: u32 = 0x14;
pub const SYNCPOINT_A: u32 = 0x1C;
pub const SYNCPOINT_B: u32 = 0x1D;
pub const WAIT_FOR_IDLE: u32 = 0x1E;
pub const LOAD_MME_INSTRUCTION_RAM_POINTER: u32 = 0x45;
pub const LOAD_MME_INSTRUCTION_RAM: u32 = 0x46;
pub const LOAD_MME_START_ADDRESS_RAM_POINTER: u32 = 0x47;
pub const LOAD_MME_START_ADDRESS_RAM: u32 = 0x48;
pub const SET_MME_SHADOW_RAM_CONTROL: u32 = 0x49;

/// Methods below this index belong to the puller.
pub const PULLER_METHOD_COUNT: u32 = 0x60;

const NUM_SUBCHANNELS: usize = 8;

/// Poll interval for semaphore acquires.
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_micros(50);

// ── Semaphore D fields ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SemaphoreOperation {
    Acquire,
    Release,
    AcquireGequal,
    AcquireAnd,
    Reduction,
}

impl SemaphoreOperation {
    fn from_raw(v: u32) -> Option<Self> {
        match v & 0x1F {
            1 => Some(Self::Acquire),
            2 => Some(Self::Release),
            4 => Some(Self::AcquireGequal),
            8 => Some(Self::AcquireAnd),
            16 => Some(Self::Reduction),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reduction {
    Min,
    Max,
    Xor,
    And,
    Or,
    Add,
    Inc,
    Dec,
}

impl Reduction {
    fn from_raw(v: u32) -> Self {
        match v & 0xF {
            0 => Self::Min,
            1 => Self::Max,
            2 => Self::Xor,
            3 => Self::And,
            4 => Self::Or,
            5 => Self::Add,
            6 => Self::Inc,
            _ => Self::Dec,
        }
    }

    fn apply(self, memory: u32, operand: u32, signed: bool) -> u32 {
        match self {
            Self::Min if signed => (memory as i32).min(operand as i32) as u32,
            Self::Min => memory.min(operand),
            Self::Max if signed => (memory as i32).max(operand as i32) as u32,
            Self::Max => memory.max(operand),
            Self::Xor => memory ^ operand,
            Self::And => memory & operand,
            Self::Or => memory | operand,
            Self::Add => memory.wrapping_add(operand),
            Self::Inc => {
                if memory < operand {
                    memory + 1
                } else {
                    0
                }
            }
            Self::Dec => {
                if memory > 0 && memory <= operand {
                    memory - 1
                } else {
                    operand
                }
            }
        }
    }
}

/// Work the command processor performs on the puller's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullerAction {
    None,
    /// Drain every engine before continuing.
    WaitForIdle,
    /// Forward the shadow RAM mode to the 3D engine.
    ShadowRamControl(u32),
}

pub struct Puller {
    regs: [u32; PULLER_METHOD_COUNT as usize],
    bound_classes: [u32; NUM_SUBCHANNELS],
}

impl Puller {
    pub fn new() -> Self {
        Self {
            regs: [0; PULLER_METHOD_COUNT as usize],
            bound_classes: [0; NUM_SUBCHANNELS],
        }
    }

    pub fn read_reg(&self, method: u32) -> u32 {
        self.regs.get(method as usize).copied().unwrap_or(0)
    }

    /// Class bound to `subchannel` by SET_OBJECT, zero if none.
    pub fn bound_class(&self, subchannel: u32) -> u32 {
        self.bound_classes
            .get(subchannel as usize)
            .copied()
            .unwrap_or(0)
    }

    fn semaphore_address(&self) -> u64 {
        let high = (self.regs[SEMAPHORE_A as usize] & 0xFF) as u64;
        (high << 32) | (self.regs[SEMAPHORE_B as usize] & !3) as u64
    }

    fn semaphore_payload(&self) -> u32 {
        self.regs[SEMAPHORE_C as usize]
    }

    pub fn write(
        &mut self,
        ctx: &EngineContext<'_>,
        macros: &mut MacroEngine,
        subchannel: u32,
        method: u32,
        value: u32,
    ) -> PullerAction {
        log::trace!("Puller: method 0x{:X} = 0x{:X}", method, value);
        if let Some(slot) = self.regs.get_mut(method as usize) {
            *slot = value;
        }

        match method {
            SET_OBJECT => {
                let class = value & 0xFFFF;
                if let Some(bound) = self.bound_classes.get_mut(subchannel as usize) {
                    *bound = class;
                }
                log::debug!("Puller: subchannel {} bound to class 0x{:X}", subchannel, class);
            }
            NOP | SEMAPHORE_A | SEMAPHORE_B | SEMAPHORE_C | SET_REFERENCE | SYNCPOINT_A => {}
            SEMAPHORE_D => self.process_semaphore(ctx, value),
            NON_STALL_INTERRUPT => log::debug!("Puller: non-stall interrupt 0x{:X}", value),
            FB_FLUSH => log::trace!("Puller: framebuffer flush"),
            SYNCPOINT_B => self.process_syncpoint(ctx, value),
            WAIT_FOR_IDLE => return PullerAction::WaitForIdle,
            LOAD_MME_INSTRUCTION_RAM_POINTER => macros.load_instruction_ram_pointer(value),
            LOAD_MME_INSTRUCTION_RAM => macros.load_instruction_ram(value),
            LOAD_MME_START_ADDRESS_RAM_POINTER => macros.load_start_address_ram_pointer(value),
            LOAD_MME_START_ADDRESS_RAM => macros.load_start_address_ram(value),
            SET_MME_SHADOW_RAM_CONTROL => return PullerAction::ShadowRamControl(value),
            _ => log::trace!("Puller: unhandled method 0x{:X}", method),
        }
        PullerAction::None
    }

    // ── Semaphores ───────────────────────────────────────────────────────

    fn process_semaphore(&self, ctx: &EngineContext<'_>, value: u32) {
        let address = self.semaphore_address();
        let payload = self.semaphore_payload();
        let Some(op) = SemaphoreOperation::from_raw(value) else {
            log::warn!("Puller: unknown semaphore operation 0x{:X}", value & 0x1F);
            return;
        };

        match op {
            SemaphoreOperation::Release => {
                let four_byte = (value >> 24) & 1 != 0;
                ctx.memory.write_u32(address, payload);
                if !four_byte {
                    ctx.memory.write_u32(address + 4, 0);
                    ctx.memory.write_u64(address + 8, ctx.clock.ticks());
                }
                log::debug!("Puller: semaphore release 0x{:X} = 0x{:X}", address, payload);
            }
            SemaphoreOperation::Acquire => {
                self.acquire(ctx, address, |mem| mem == payload);
            }
            SemaphoreOperation::AcquireGequal => {
                self.acquire(ctx, address, |mem| mem.wrapping_sub(payload) as i32 >= 0);
            }
            SemaphoreOperation::AcquireAnd => {
                self.acquire(ctx, address, |mem| mem & payload != 0);
            }
            SemaphoreOperation::Reduction => {
                let reduction = Reduction::from_raw(value >> 27);
                let signed = (value >> 31) & 1 == 0;
                let current = ctx.memory.read_u32(address);
                let result = reduction.apply(current, payload, signed);
                ctx.memory.write_u32(address, result);
                log::debug!(
                    "Puller: semaphore {:?} 0x{:X}: 0x{:X} -> 0x{:X}",
                    reduction,
                    address,
                    current,
                    result
                );
            }
        }
    }

    /// Poll the semaphore word until `done` holds or the configured timeout
    /// elapses.
    fn acquire(&self, ctx: &EngineContext<'_>, address: u64, done: impl Fn(u32) -> bool) {
        let deadline = Instant::now() + ctx.settings.semaphore_acquire_timeout();
        loop {
            if done(ctx.memory.read_u32(address)) {
                return;
            }
            if Instant::now() >= deadline {
                log::warn!(
                    "Puller: semaphore acquire at 0x{:X} timed out (value 0x{:X}, payload 0x{:X})",
                    address,
                    ctx.memory.read_u32(address),
                    self.semaphore_payload()
                );
                return;
            }
            std::thread::sleep(ACQUIRE_POLL_INTERVAL);
        }
    }

    // ── Syncpoints ───────────────────────────────────────────────────────

    fn process_syncpoint(&self, ctx: &EngineContext<'_>, value: u32) {
        let increment = value & 1 != 0;
        let id = (value >> 8) & 0xFFF;
        if increment {
            ctx.syncpoints.increment(id);
            return;
        }

        let threshold = self.regs[SYNCPOINT_A as usize];
        if !ctx
            .syncpoints
            .wait(id, threshold, ctx.settings.syncpoint_wait_timeout())
        {
            log::warn!(
                "Puller: syncpoint {} wait for {} timed out at {}",
                id,
                threshold,
                ctx.syncpoints.value(id)
            );
        }
    }
}

impl Default for Puller {
    fn default() -> Self {
        Self::new()
    }
}
