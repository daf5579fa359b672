// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Central GPU context.
//!
//! Owns the GPU memory manager, syncpoint manager, address space and the
//! GPFIFO device. Services create channels and submit GPFIFO entries through
//! it; a [`GpuWorker`] thread drains the FIFO.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use ruzu_common::GpuSettings;

use crate::address_space::AddressSpace;
use crate::backend::null_backend::NullBackend;
use crate::backend::GpuBackend;
use crate::clock::GpuClock;
use crate::command_processor::ChannelResources;
use crate::gpfifo::{GpEntry, GpFifoDevice, GpuChannel, NvFence, SubmitGpfifoFlags};
use crate::guest_memory::GuestMemory;
use crate::memory_manager::GpuMemoryManager;
use crate::syncpoint::SyncpointManager;

/// Central GPU state shared between the service layer and the GPU worker.
pub struct GpuContext {
    settings: Arc<GpuSettings>,
    memory: Arc<GpuMemoryManager>,
    syncpoints: Arc<SyncpointManager>,
    backend: Arc<Mutex<Box<dyn GpuBackend>>>,
    clock: Arc<GpuClock>,
    address_space: AddressSpace,
    fifo: Arc<GpFifoDevice>,
    next_channel_id: AtomicU32,
}

impl GpuContext {
    /// Create a context with default settings and the null backend.
    pub fn new(physical: Arc<dyn GuestMemory>) -> Self {
        Self::with_settings(physical, GpuSettings::default(), Box::new(NullBackend::new()))
    }

    pub fn with_settings(
        physical: Arc<dyn GuestMemory>,
        settings: GpuSettings,
        backend: Box<dyn GpuBackend>,
    ) -> Self {
        log::info!("GpuContext: backend {}", backend.name());
        let memory = Arc::new(GpuMemoryManager::new(physical));
        let fifo = GpFifoDevice::new(settings.command_wait_timeout(), settings.initial_flush_skips);
        Self {
            address_space: AddressSpace::new(Arc::clone(&memory)),
            memory,
            syncpoints: Arc::new(SyncpointManager::new()),
            backend: Arc::new(Mutex::new(backend)),
            clock: Arc::new(GpuClock::new()),
            fifo: Arc::new(fifo),
            settings: Arc::new(settings),
            next_channel_id: AtomicU32::new(1),
        }
    }

    pub fn settings(&self) -> &GpuSettings {
        &self.settings
    }

    pub fn memory(&self) -> &Arc<GpuMemoryManager> {
        &self.memory
    }

    pub fn syncpoints(&self) -> &Arc<SyncpointManager> {
        &self.syncpoints
    }

    pub fn address_space(&self) -> &AddressSpace {
        &self.address_space
    }

    pub fn fifo(&self) -> &Arc<GpFifoDevice> {
        &self.fifo
    }

    /// GPU timestamp in GPU clock ticks.
    pub fn gpu_ticks(&self) -> u64 {
        self.clock.ticks()
    }

    fn resources(&self) -> ChannelResources {
        ChannelResources {
            memory: Arc::clone(&self.memory),
            syncpoints: Arc::clone(&self.syncpoints),
            backend: Arc::clone(&self.backend),
            settings: Arc::clone(&self.settings),
            clock: Arc::clone(&self.clock),
        }
    }

    /// Open a channel with fresh engine state. Channel `n` signals its fences
    /// on syncpoint `n`.
    pub fn create_channel(&self) -> Arc<GpuChannel> {
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        log::debug!("GpuContext: created channel {}", id);
        Arc::new(GpuChannel::new(id, id, self.resources()))
    }

    /// Queue GPFIFO entries on `channel` (called by nvhost-gpu SubmitGpfifo).
    pub fn submit(
        &self,
        channel: &Arc<GpuChannel>,
        entries: &[GpEntry],
        flags: SubmitGpfifoFlags,
        fence: NvFence,
    ) -> NvFence {
        log::debug!(
            "GpuContext: channel {} submit {} entries {:?}",
            channel.id(),
            entries.len(),
            flags
        );
        channel.submit_gpfifo(&self.fifo, entries, flags, fence)
    }

    /// Start the thread that drains the FIFO.
    pub fn spawn_worker(&self) -> io::Result<GpuWorker> {
        GpuWorker::spawn(Arc::clone(&self.fifo))
    }
}

/// The thread running queued command buffers. Stopped on drop.
pub struct GpuWorker {
    fifo: Arc<GpFifoDevice>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GpuWorker {
    fn spawn(fifo: Arc<GpFifoDevice>) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let (fifo, stop) = (Arc::clone(&fifo), Arc::clone(&stop));
            thread::Builder::new()
                .name("GPU".into())
                .spawn(move || {
                    log::debug!("GpuWorker: started");
                    while !stop.load(Ordering::Acquire) {
                        if fifo.wait_for_commands() {
                            fifo.dispatch_calls();
                        }
                    }
                    log::debug!("GpuWorker: stopped");
                })?
        };
        Ok(Self {
            fifo,
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        self.fifo.interrupt();
        if handle.join().is_err() {
            log::error!("GpuWorker: thread panicked");
        }
    }
}

impl Drop for GpuWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
