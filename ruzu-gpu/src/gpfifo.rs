// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPFIFO submission.
//!
//! Guest threads push GPFIFO entries for a channel; the worker thread drains
//! them in order and feeds the fetched words to the channel's command
//! processor.
//!
//! ## GPFIFO entry (64 bits)
//!
//! | Word | Bits   | Field                                   |
//! |------|--------|-----------------------------------------|
//! | 0    | 0      | Fetch (unconditional / conditional)     |
//! | 0    | 31:2   | Address bits 31:2                       |
//! | 1    | 7:0    | Address bits 39:32                      |
//! | 1    | 8      | Privileged                              |
//! | 1    | 9      | Level (main / subroutine)               |
//! | 1    | 30:10  | Length in words                         |
//! | 1    | 31     | Sync (proceed / wait)                   |
//!
//! Entries up to the first "wait" entry of a push are fetched immediately.
//! The wait entry and everything after it in the same push are fetched when
//! dispatched, since their contents may depend on GPU work queued before
//! them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::command_processor::{ChannelResources, CommandProcessor, CompressedMethod, SecOp};
use crate::engines::puller::{SYNCPOINT_A, SYNCPOINT_B, WAIT_FOR_IDLE};
use crate::engines::EngineResult;
use crate::memory_manager::GpuMemoryManager;

/// Size of one GPFIFO entry in bytes.
pub const GP_ENTRY_SIZE: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{len} bytes is not a whole number of {element}-byte entries")]
    Misaligned { len: usize, element: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Unconditional,
    Conditional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Main,
    Subroutine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Proceed,
    Wait,
}

/// GPFIFO entry: address and length of a pushbuffer segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpEntry {
    pub entry0: u32,
    pub entry1: u32,
}

impl GpEntry {
    /// Entry for `length` words at `address`.
    pub fn new(address: u64, length: u32, sync: SyncMode) -> Self {
        let entry0 = (address as u32) & !3;
        let entry1 = ((address >> 32) as u32 & 0xFF)
            | ((length & 0x1F_FFFF) << 10)
            | (((sync == SyncMode::Wait) as u32) << 31);
        Self { entry0, entry1 }
    }

    pub fn from_raw(raw: u64) -> Self {
        Self {
            entry0: raw as u32,
            entry1: (raw >> 32) as u32,
        }
    }

    /// Split little-endian guest bytes into entries.
    pub fn parse_entries(bytes: &[u8]) -> Result<Vec<GpEntry>, DecodeError> {
        if bytes.len() % GP_ENTRY_SIZE != 0 {
            return Err(DecodeError::Misaligned {
                len: bytes.len(),
                element: GP_ENTRY_SIZE,
            });
        }
        Ok(bytes
            .chunks_exact(GP_ENTRY_SIZE)
            .map(|chunk| GpEntry::from_raw(LittleEndian::read_u64(chunk)))
            .collect())
    }

    pub fn fetch(&self) -> FetchMode {
        if self.entry0 & 1 == 0 {
            FetchMode::Unconditional
        } else {
            FetchMode::Conditional
        }
    }

    /// GPU virtual address of the pushbuffer (word-aligned).
    pub fn address(&self) -> u64 {
        let lo = (self.entry0 as u64 >> 2) << 2;
        let hi = (self.entry1 as u64 & 0xFF) << 32;
        hi | lo
    }

    pub fn privileged(&self) -> bool {
        (self.entry1 >> 8) & 1 != 0
    }

    pub fn level(&self) -> Level {
        if (self.entry1 >> 9) & 1 == 0 {
            Level::Main
        } else {
            Level::Subroutine
        }
    }

    /// Length of the pushbuffer in 32-bit words.
    pub fn length(&self) -> u32 {
        (self.entry1 >> 10) & 0x1F_FFFF
    }

    pub fn sync(&self) -> SyncMode {
        if self.entry1 >> 31 == 0 {
            SyncMode::Proceed
        } else {
            SyncMode::Wait
        }
    }
}

bitflags! {
    /// Flags of a channel GPFIFO submission.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SubmitGpfifoFlags: u32 {
        const FENCE_WAIT = 1 << 0;
        const FENCE_INCREMENT = 1 << 1;
        const HW_FORMAT = 1 << 2;
        const SUPPRESS_WFI = 1 << 4;
        const INCREMENT_WITH_VALUE = 1 << 8;
    }
}

/// Syncpoint threshold handed to and returned from a submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NvFence {
    pub id: u32,
    pub value: u32,
}

// ── Command buffers ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferKind {
    /// Words were read when the entry was pushed.
    Prefetch,
    /// Words are read when the entry is dispatched.
    NoPrefetch,
}

/// One queued pushbuffer segment.
pub struct CommandBuffer {
    pub channel: Arc<GpuChannel>,
    pub kind: CommandBufferKind,
    words: Option<Vec<u32>>,
    pub entry_address: u64,
    pub entry_count: u32,
}

impl CommandBuffer {
    fn from_entry(channel: &Arc<GpuChannel>, entry: &GpEntry, kind: CommandBufferKind) -> Self {
        Self {
            channel: Arc::clone(channel),
            kind,
            words: None,
            entry_address: entry.address(),
            entry_count: entry.length(),
        }
    }

    /// Buffer built by the host rather than read from guest memory.
    fn host(channel: &Arc<GpuChannel>, words: Vec<u32>) -> Self {
        Self {
            channel: Arc::clone(channel),
            kind: CommandBufferKind::Prefetch,
            entry_address: 0,
            entry_count: words.len() as u32,
            words: Some(words),
        }
    }

    /// The buffer's words, read from GPU memory on first use.
    pub fn fetch(&mut self, memory: &GpuMemoryManager, flush: bool) -> &[u32] {
        let (address, count) = (self.entry_address, self.entry_count as usize);
        self.words.get_or_insert_with(|| {
            let bytes = memory.get_span(address, count * 4, flush);
            let mut words = vec![0u32; count];
            LittleEndian::read_u32_into(&bytes, &mut words);
            words
        })
    }

    pub fn is_fetched(&self) -> bool {
        self.words.is_some()
    }
}

// ── Channels ────────────────────────────────────────────────────────────

/// A GPU channel: one command stream with its own engine state.
pub struct GpuChannel {
    id: u32,
    syncpoint_id: u32,
    resources: ChannelResources,
    processor: Mutex<CommandProcessor>,
}

impl GpuChannel {
    pub fn new(id: u32, syncpoint_id: u32, resources: ChannelResources) -> Self {
        let processor = CommandProcessor::new(resources.clone());
        Self::with_processor(id, syncpoint_id, processor)
    }

    pub fn with_processor(id: u32, syncpoint_id: u32, processor: CommandProcessor) -> Self {
        Self {
            id,
            syncpoint_id,
            resources: processor.resources().clone(),
            processor: Mutex::new(processor),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Syncpoint incremented by this channel's fences.
    pub fn syncpoint_id(&self) -> u32 {
        self.syncpoint_id
    }

    pub fn memory(&self) -> &GpuMemoryManager {
        &self.resources.memory
    }

    pub fn processor(&self) -> &Mutex<CommandProcessor> {
        &self.processor
    }

    pub fn process(&self, base_va: u64, words: &[u32]) -> EngineResult<()> {
        self.processor.lock().process(base_va, words)
    }

    pub fn force_all_dirty(&self) {
        self.processor.lock().force_all_dirty();
    }

    /// Queue `entries`, wrapped in the fence wait and increment the flags
    /// ask for, and wake the worker. Returns the fence the guest can wait
    /// on for completion.
    pub fn submit_gpfifo(
        self: &Arc<Self>,
        device: &GpFifoDevice,
        entries: &[GpEntry],
        flags: SubmitGpfifoFlags,
        fence: NvFence,
    ) -> NvFence {
        let syncpoints = &self.resources.syncpoints;
        if flags.intersects(SubmitGpfifoFlags::INCREMENT_WITH_VALUE | SubmitGpfifoFlags::HW_FORMAT) {
            log::warn!("GpuChannel {}: unsupported submit flags {:?}", self.id, flags);
        }

        if flags.contains(SubmitGpfifoFlags::FENCE_WAIT)
            && !syncpoints.is_expired(fence.id, fence.value)
        {
            device.push_host_command_buffer(self, fence_wait_words(fence));
        }

        device.push_entries(self, entries);

        let value = if flags.contains(SubmitGpfifoFlags::FENCE_INCREMENT) {
            let value = syncpoints.increment_max(self.syncpoint_id, 2);
            let wfi = !flags.contains(SubmitGpfifoFlags::SUPPRESS_WFI);
            device.push_host_command_buffer(self, fence_increment_words(self.syncpoint_id, wfi));
            value
        } else {
            syncpoints.max_value(self.syncpoint_id)
        };

        device.signal();
        NvFence {
            id: self.syncpoint_id,
            value,
        }
    }
}

fn puller_word(method: u32, count: u32) -> u32 {
    CompressedMethod::encode(SecOp::IncMethod, method, 0, count)
}

/// Stall until `fence` is reached.
fn fence_wait_words(fence: NvFence) -> Vec<u32> {
    vec![
        puller_word(SYNCPOINT_A, 1),
        fence.value,
        puller_word(SYNCPOINT_B, 1),
        (fence.id << 8) | 0x10,
    ]
}

/// Bump `id` twice, optionally after draining the engines.
fn fence_increment_words(id: u32, wait_for_idle: bool) -> Vec<u32> {
    let mut words = Vec::with_capacity(8);
    if wait_for_idle {
        words.extend_from_slice(&[puller_word(WAIT_FOR_IDLE, 1), 0]);
    }
    words.extend_from_slice(&[
        puller_word(SYNCPOINT_A, 1),
        0,
        puller_word(SYNCPOINT_B, 1),
        (id << 8) | 1,
        puller_word(SYNCPOINT_B, 1),
        (id << 8) | 1,
    ]);
    words
}

// ── FIFO device ─────────────────────────────────────────────────────────

/// Queue of command buffers shared by every channel, drained by one worker.
pub struct GpFifoDevice {
    queue: Mutex<VecDeque<CommandBuffer>>,
    event: Mutex<bool>,
    event_cond: Condvar,
    interrupted: AtomicBool,
    flush_skips: AtomicU32,
    current_channel: Mutex<Option<u32>>,
    wait_timeout: Duration,
}

impl GpFifoDevice {
    pub fn new(wait_timeout: Duration, initial_flush_skips: u32) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            event: Mutex::new(false),
            event_cond: Condvar::new(),
            interrupted: AtomicBool::new(false),
            flush_skips: AtomicU32::new(initial_flush_skips),
            current_channel: Mutex::new(None),
            wait_timeout,
        }
    }

    /// Queue the pushbuffers named by `entries`. Does not wake the worker.
    pub fn push_entries(&self, channel: &Arc<GpuChannel>, entries: &[GpEntry]) {
        let mut kind = CommandBufferKind::Prefetch;
        let mut buffers = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.sync() == SyncMode::Wait {
                kind = CommandBufferKind::NoPrefetch;
            }
            if entry.length() == 0 {
                log::trace!("GpFifo: skipping empty entry at 0x{:X}", entry.address());
                continue;
            }
            let mut buffer = CommandBuffer::from_entry(channel, entry, kind);
            if kind == CommandBufferKind::Prefetch {
                buffer.fetch(channel.memory(), true);
            }
            buffers.push(buffer);
        }
        log::debug!(
            "GpFifo: channel {} queued {} of {} entries",
            channel.id(),
            buffers.len(),
            entries.len()
        );
        self.queue.lock().extend(buffers);
    }

    /// Queue words built by the host, e.g. fence commands.
    pub fn push_host_command_buffer(&self, channel: &Arc<GpuChannel>, words: Vec<u32>) {
        self.queue.lock().push_back(CommandBuffer::host(channel, words));
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Skip the guest memory flush on the next `count` dispatched fetches.
    pub fn set_flush_skips(&self, count: u32) {
        self.flush_skips.store(count, Ordering::Release);
    }

    /// Wake the worker.
    pub fn signal(&self) {
        *self.event.lock() = true;
        self.event_cond.notify_all();
    }

    /// Stop the running `dispatch_calls` after its current buffer.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        self.signal();
    }

    /// Block until signalled or the wait timeout passes. Returns whether
    /// buffers are queued.
    pub fn wait_for_commands(&self) -> bool {
        if !self.queue.lock().is_empty() {
            return true;
        }
        let mut signalled = self.event.lock();
        if !*signalled {
            self.event_cond.wait_for(&mut signalled, self.wait_timeout);
        }
        *signalled = false;
        drop(signalled);
        !self.queue.lock().is_empty()
    }

    /// Run queued buffers in order until the queue is empty or the device
    /// is interrupted.
    pub fn dispatch_calls(&self) {
        while !self.interrupted.load(Ordering::Acquire) {
            let Some(mut buffer) = self.queue.lock().pop_front() else {
                break;
            };
            let channel = Arc::clone(&buffer.channel);
            self.bind_channel(&channel);

            let flush = self.take_flush();
            let entry_address = buffer.entry_address;
            let words = buffer.fetch(channel.memory(), flush);
            if let Err(err) = channel.process(entry_address, words) {
                log::warn!(
                    "GpFifo: channel {} buffer at 0x{:X} failed: {}",
                    channel.id(),
                    entry_address,
                    err
                );
            }
        }
        self.interrupted.store(false, Ordering::Release);
    }

    fn bind_channel(&self, channel: &GpuChannel) {
        let mut current = self.current_channel.lock();
        if *current != Some(channel.id()) {
            log::debug!("GpFifo: switching to channel {}", channel.id());
            channel.force_all_dirty();
            *current = Some(channel.id());
        }
    }

    /// Whether the next fetch must flush, consuming one skip if not.
    fn take_flush(&self) -> bool {
        self.flush_skips
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_err()
    }
}
