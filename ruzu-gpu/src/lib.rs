// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Maxwell GPU command front end for ruzu.
//!
//! GPFIFO submission and decoding, the puller and MME macro engine, the
//! engine register files with the DMA copy engine, block-linear layout math
//! and the GPU virtual address space.

pub mod address_allocator;
pub mod address_space;
pub mod backend;
pub mod clock;
pub mod command_processor;
pub mod engines;
pub mod gpfifo;
pub mod gpu_context;
pub mod guest_memory;
pub mod layout;
pub mod macro_engine;
pub mod macro_interpreter;
pub mod memory_manager;
pub mod syncpoint;

pub use gpu_context::{GpuContext, GpuWorker};
