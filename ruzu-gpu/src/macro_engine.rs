// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Macro code memory and macro slots.
//!
//! The guest uploads MME programs into a flat code memory through the puller
//! and binds up to 128 slots to start addresses in it. Writing an even macro
//! method starts a slot with its first argument, odd macro methods queue more
//! arguments, and the last write of the method sequence runs the program.

use std::collections::VecDeque;

use crate::macro_interpreter::{MacroInterpreter, MacroProcessor};

/// Macro code memory size in 32-bit words.
pub const MACRO_CODE_SIZE: usize = 0x2000;

/// Number of macro slots.
pub const NUM_MACRO_SLOTS: usize = 0x80;

#[derive(Debug, Clone, Default)]
pub struct MacroSlot {
    /// Word index of the program in code memory.
    pub start_address: u32,
    /// Arguments queued after the first one.
    pub pending: VecDeque<u32>,
    /// Set by `start`, cleared when the program runs.
    pub execution_pending: bool,
    pub first_argument: u32,
}

pub struct MacroEngine {
    code: Box<[u32]>,
    slots: Vec<MacroSlot>,
    interpreter: MacroInterpreter,
    /// Next code word written by `load_instruction_ram`.
    instruction_pointer: u32,
    /// Next slot bound by `load_start_address_ram`.
    start_address_pointer: u32,
    params: Vec<u32>,
}

impl Default for MacroEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MacroEngine {
    pub fn new() -> Self {
        Self {
            code: vec![0u32; MACRO_CODE_SIZE].into_boxed_slice(),
            slots: vec![MacroSlot::default(); NUM_MACRO_SLOTS],
            interpreter: MacroInterpreter::new(),
            instruction_pointer: 0,
            start_address_pointer: 0,
            params: Vec::new(),
        }
    }

    pub fn code(&self) -> &[u32] {
        &self.code
    }

    pub fn slot(&self, index: usize) -> &MacroSlot {
        &self.slots[index % NUM_MACRO_SLOTS]
    }

    // ── Upload ──────────────────────────────────────────────────────────

    pub fn load_instruction_ram_pointer(&mut self, pointer: u32) {
        self.instruction_pointer = pointer;
    }

    /// Store one code word and advance the upload pointer (wrapping).
    pub fn load_instruction_ram(&mut self, word: u32) {
        let index = self.instruction_pointer as usize % MACRO_CODE_SIZE;
        self.code[index] = word;
        self.instruction_pointer = self.instruction_pointer.wrapping_add(1);
    }

    pub fn load_start_address_ram_pointer(&mut self, pointer: u32) {
        self.start_address_pointer = pointer;
    }

    /// Bind the next slot to `address` and advance the slot pointer.
    pub fn load_start_address_ram(&mut self, address: u32) {
        let index = self.start_address_pointer as usize % NUM_MACRO_SLOTS;
        self.slots[index].start_address = address;
        self.start_address_pointer = self.start_address_pointer.wrapping_add(1);
        log::trace!("Macro slot {} bound to 0x{:X}", index, address);
    }

    // ── Invocation ──────────────────────────────────────────────────────

    /// Begin a call of `slot` with its first argument.
    pub fn start(&mut self, slot: usize, argument: u32) {
        let slot = &mut self.slots[slot % NUM_MACRO_SLOTS];
        slot.first_argument = argument;
        slot.execution_pending = true;
    }

    /// Queue an extra argument for `slot`.
    pub fn push_argument(&mut self, slot: usize, argument: u32) {
        self.slots[slot % NUM_MACRO_SLOTS].pending.push_back(argument);
    }

    /// Run `slot` if a call was started, consuming its first argument and all
    /// queued ones. Returns whether the program ran. The argument queue is
    /// empty afterwards either way.
    pub fn call(&mut self, slot: usize, processor: &mut dyn MacroProcessor) -> bool {
        let index = slot % NUM_MACRO_SLOTS;
        let slot = &mut self.slots[index];
        if !slot.execution_pending {
            if !slot.pending.is_empty() {
                log::trace!("Macro slot {}: dropping {} unstarted args", index, slot.pending.len());
            }
            slot.pending.clear();
            return false;
        }
        slot.execution_pending = false;

        self.params.clear();
        self.params.push(slot.first_argument);
        self.params.extend(slot.pending.drain(..));
        let start = slot.start_address;

        log::trace!(
            "Macro slot {} at 0x{:X} with {} params",
            index,
            start,
            self.params.len()
        );
        self.interpreter
            .execute(&self.code, start, &self.params, processor);
        true
    }
}
