// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU engine trait and subchannel definitions.
//!
//! The Tegra X1 GPU has several engines, each responsible for a class of
//! operations. Engines are addressed by subchannel in GPFIFO commands.
//! Every call into an engine carries an [`EngineContext`] with the channel's
//! memory manager and the shared GPU services, so engines never hold
//! back-references to the processor that drives them.

pub mod fermi_2d;
pub mod inline_to_memory;
pub mod kepler_compute;
pub mod maxwell_3d;
pub mod maxwell_dma;
pub mod puller;

use parking_lot::Mutex;
use ruzu_common::GpuSettings;
use thiserror::Error;

use crate::backend::GpuBackend;
use crate::clock::GpuClock;
use crate::layout::LayoutError;
use crate::memory_manager::GpuMemoryManager;
use crate::syncpoint::SyncpointManager;

use self::maxwell_dma::DmaError;

/// GPU engine class IDs (NV device class numbers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ClassId {
    Twod = 0x902D,
    Threed = 0xB197,
    Compute = 0xB1C0,
    InlineToMemory = 0xA140,
    Dma = 0xB0B5,
}

/// GPFIFO subchannel assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubChannel {
    Maxwell3D = 0,
    Compute = 1,
    InlineToMemory = 2,
    Fermi2D = 3,
    MaxwellDMA = 4,
}

impl SubChannel {
    pub fn from_raw(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Maxwell3D),
            1 => Some(Self::Compute),
            2 => Some(Self::InlineToMemory),
            3 => Some(Self::Fermi2D),
            4 => Some(Self::MaxwellDMA),
            _ => None,
        }
    }

    pub fn class_id(self) -> ClassId {
        match self {
            Self::Maxwell3D => ClassId::Threed,
            Self::Compute => ClassId::Compute,
            Self::InlineToMemory => ClassId::InlineToMemory,
            Self::Fermi2D => ClassId::Twod,
            Self::MaxwellDMA => ClassId::Dma,
        }
    }
}

/// Number of registers per engine. Engine methods end where macro methods
/// begin (0xE00), so 0x1000 covers every routable method.
pub const ENGINE_REG_COUNT: usize = 0x1000;

/// Inline data method shared by the 3D, compute and inline-to-memory classes.
pub const LOAD_INLINE_DATA: u32 = 0x6D;

/// First constant buffer data method of the 3D class.
pub const CB_DATA: u32 = 0x8E4;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Dma(#[from] DmaError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Services an engine may touch while handling a method.
pub struct EngineContext<'a> {
    pub memory: &'a GpuMemoryManager,
    pub syncpoints: &'a SyncpointManager,
    pub backend: &'a Mutex<Box<dyn GpuBackend>>,
    pub settings: &'a GpuSettings,
    pub clock: &'a GpuClock,
}

/// Trait for a GPU engine that accepts register writes.
pub trait Engine: Send {
    /// The class ID of this engine.
    fn class_id(&self) -> ClassId;

    /// Read back a method register. Unknown registers read as zero.
    fn read_reg(&self, method: u32) -> u32;

    /// Write a value to a method register, running any side effect bound to
    /// it.
    fn write_reg(&mut self, ctx: &EngineContext<'_>, method: u32, value: u32) -> EngineResult<()>;

    /// Bulk ingest of `LOAD_INLINE_DATA` words.
    fn load_inline_data(&mut self, ctx: &EngineContext<'_>, data: &[u32]) -> EngineResult<()> {
        for &word in data {
            self.write_reg(ctx, LOAD_INLINE_DATA, word)?;
        }
        Ok(())
    }

    /// Bulk ingest of constant buffer data words.
    fn constant_buffer_update(&mut self, ctx: &EngineContext<'_>, data: &[u32]) -> EngineResult<()> {
        for &word in data {
            self.write_reg(ctx, CB_DATA, word)?;
        }
        Ok(())
    }

    /// Shadow RAM mode selected through the puller.
    fn set_shadow_ram_control(&mut self, _control: u32) {}

    /// Mark all derived state stale, e.g. after a channel switch.
    fn force_state_dirty(&mut self) {}

    /// Complete any deferred work before the puller continues.
    fn wait_for_idle(&mut self, _ctx: &EngineContext<'_>) {}
}

/// Flat register file shared by the engine implementations.
pub(crate) struct RegisterFile {
    regs: Box<[u32]>,
}

impl RegisterFile {
    pub(crate) fn new() -> Self {
        Self {
            regs: vec![0u32; ENGINE_REG_COUNT].into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn get(&self, method: u32) -> u32 {
        self.regs.get(method as usize).copied().unwrap_or(0)
    }

    /// Store `value`, returning false for methods outside the file.
    #[inline]
    pub(crate) fn set(&mut self, method: u32, value: u32) -> bool {
        match self.regs.get_mut(method as usize) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}
