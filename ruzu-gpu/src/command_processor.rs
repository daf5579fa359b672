// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPFIFO command processor.
//!
//! Decodes the 32-bit words of fetched command buffers: compressed method
//! headers followed by their data words. Each data word becomes one method
//! call, routed by address:
//!
//! | Method          | Target                                          |
//! |-----------------|-------------------------------------------------|
//! | `0x000..0x060`  | Puller (semaphores, syncpoints, MME upload)     |
//! | `0x060..0xE00`  | Engine bound to the header's subchannel         |
//! | `0xE00..`       | Macro start/argument for subchannels 0 and 3    |
//!
//! ## Compressed Method Header (32 bits)
//!
//! | Bits    | Field             |
//! |---------|-------------------|
//! | 12:0    | Method address    |
//! | 15:13   | Subchannel        |
//! | 28:16   | Method count / Immd data |
//! | 31:29   | SecOp             |
//!
//! Decoder state survives across command buffers, so a method sequence may
//! continue in the next fetched buffer.

use std::sync::Arc;

use parking_lot::Mutex;
use ruzu_common::GpuSettings;

use crate::backend::GpuBackend;
use crate::clock::GpuClock;
use crate::engines::fermi_2d::Fermi2D;
use crate::engines::inline_to_memory::InlineToMemory;
use crate::engines::kepler_compute::KeplerCompute;
use crate::engines::maxwell_3d::Maxwell3D;
use crate::engines::maxwell_dma::MaxwellDMA;
use crate::engines::puller::{Puller, PullerAction, PULLER_METHOD_COUNT};
use crate::engines::{
    Engine, EngineContext, EngineError, EngineResult, SubChannel, CB_DATA, LOAD_INLINE_DATA,
};
use crate::macro_engine::MacroEngine;
use crate::macro_interpreter::MacroProcessor;
use crate::memory_manager::GpuMemoryManager;
use crate::syncpoint::SyncpointManager;

/// First method routed to the macro engine.
pub const MACRO_METHOD_START: u32 = 0xE00;

/// Number of engine subchannels.
const NUM_SUBCHANNELS: usize = 8;

/// Highest subchannel served by the inline-data bulk path (3D, compute, I2M).
const INLINE_DATA_MAX_SUBCHANNEL: u32 = 2;

/// Secondary operation type from compressed method header bits [31:29].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SecOp {
    Grp0UseTert = 0,
    IncMethod = 1,
    Grp2UseTert = 2,
    NonIncMethod = 3,
    ImmdDataMethod = 4,
    OneInc = 5,
    Reserved6 = 6,
    EndPbSegment = 7,
}

impl SecOp {
    fn from_raw(v: u32) -> Self {
        match v & 7 {
            0 => Self::Grp0UseTert,
            1 => Self::IncMethod,
            2 => Self::Grp2UseTert,
            3 => Self::NonIncMethod,
            4 => Self::ImmdDataMethod,
            5 => Self::OneInc,
            6 => Self::Reserved6,
            _ => Self::EndPbSegment,
        }
    }
}

/// A parsed compressed method header.
#[derive(Debug, Clone, Copy)]
pub struct CompressedMethod(u32);

impl CompressedMethod {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Build a header word; the inverse of the accessors below.
    pub fn encode(sec_op: SecOp, method: u32, subchannel: u32, count: u32) -> u32 {
        ((sec_op as u32) << 29) | ((count & 0x1FFF) << 16) | ((subchannel & 7) << 13) | (method & 0x1FFF)
    }

    /// Method register address (bits [12:0]).
    pub fn method_address(&self) -> u32 {
        self.0 & 0x1FFF
    }

    /// Subchannel index (bits [15:13]).
    pub fn subchannel(&self) -> u32 {
        (self.0 >> 13) & 0x7
    }

    /// Method count (bits [28:16]) for IncMethod, NonIncMethod, OneInc.
    pub fn method_count(&self) -> u32 {
        (self.0 >> 16) & 0x1FFF
    }

    /// Immediate data (bits [28:16]) for ImmdDataMethod.
    pub fn immd_data(&self) -> u32 {
        (self.0 >> 16) & 0x1FFF
    }

    /// Secondary operation (bits [31:29]).
    pub fn sec_op(&self) -> SecOp {
        SecOp::from_raw(self.0 >> 29)
    }
}

/// Method sequence being decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmaState {
    pub method: u32,
    pub subchannel: u32,
    pub method_count: u32,
    pub non_incrementing: bool,
    pub increment_once: bool,
}

/// Shared services a channel's engines run against.
#[derive(Clone)]
pub struct ChannelResources {
    pub memory: Arc<GpuMemoryManager>,
    pub syncpoints: Arc<SyncpointManager>,
    pub backend: Arc<Mutex<Box<dyn GpuBackend>>>,
    pub settings: Arc<GpuSettings>,
    pub clock: Arc<GpuClock>,
}

impl ChannelResources {
    pub fn context(&self) -> EngineContext<'_> {
        EngineContext {
            memory: &self.memory,
            syncpoints: &self.syncpoints,
            backend: &self.backend,
            settings: &self.settings,
            clock: &self.clock,
        }
    }
}

/// Lets a macro drive one engine's registers. The first engine error is
/// kept and reported once the macro finishes.
struct EngineMacroProcessor<'a, 'c> {
    engine: &'a mut dyn Engine,
    ctx: &'a EngineContext<'c>,
    error: Option<EngineError>,
}

impl MacroProcessor for EngineMacroProcessor<'_, '_> {
    fn macro_read(&self, method: u32) -> u32 {
        self.engine.read_reg(method)
    }

    fn macro_write(&mut self, method: u32, value: u32) {
        if let Err(err) = self.engine.write_reg(self.ctx, method, value) {
            log::warn!("CommandProcessor: macro write 0x{:X} failed: {}", method, err);
            self.error.get_or_insert(err);
        }
    }
}

/// Decodes command buffers and dispatches the resulting method calls.
pub struct CommandProcessor {
    resources: ChannelResources,
    state: DmaState,
    puller: Puller,
    macros: MacroEngine,
    engines: Vec<Option<Box<dyn Engine>>>,
}

impl CommandProcessor {
    /// Processor with the standard engine on each subchannel.
    pub fn new(resources: ChannelResources) -> Self {
        let engines: Vec<Option<Box<dyn Engine>>> = vec![
            Some(Box::new(Maxwell3D::new())),      // subchannel 0
            Some(Box::new(KeplerCompute::new())),  // subchannel 1
            Some(Box::new(InlineToMemory::new())), // subchannel 2
            Some(Box::new(Fermi2D::new())),        // subchannel 3
            Some(Box::new(MaxwellDMA::new())),     // subchannel 4
        ];
        Self::with_engines(resources, engines)
    }

    /// Processor with caller-supplied engines, indexed by subchannel.
    /// Missing subchannels ignore their methods.
    pub fn with_engines(resources: ChannelResources, engines: Vec<Option<Box<dyn Engine>>>) -> Self {
        let mut engines = engines;
        engines.truncate(NUM_SUBCHANNELS);
        engines.resize_with(NUM_SUBCHANNELS, || None);
        Self {
            resources,
            state: DmaState::default(),
            puller: Puller::new(),
            macros: MacroEngine::new(),
            engines,
        }
    }

    pub fn resources(&self) -> &ChannelResources {
        &self.resources
    }

    pub fn state(&self) -> DmaState {
        self.state
    }

    pub fn puller(&self) -> &Puller {
        &self.puller
    }

    pub fn macros(&self) -> &MacroEngine {
        &self.macros
    }

    pub fn engine(&self, subchannel: SubChannel) -> Option<&dyn Engine> {
        self.engines.get(subchannel as usize)?.as_deref()
    }

    /// Mark every engine's derived state stale.
    pub fn force_all_dirty(&mut self) {
        for engine in self.engines.iter_mut().flatten() {
            engine.force_state_dirty();
        }
    }

    /// Decode one fetched command buffer.
    ///
    /// Engine errors abort only the method that raised them: decoding carries
    /// on with the next word and the first error is returned at the end.
    pub fn process(&mut self, base_va: u64, words: &[u32]) -> EngineResult<()> {
        log::trace!(
            "CommandProcessor: {} words from 0x{:X}",
            words.len(),
            base_va
        );
        let fast_inline = self.resources.settings.fast_inline_data;
        let fast_uniform = self.resources.settings.fast_uniform_update;
        let mut first_error = None;

        let mut index = 0;
        while index < words.len() {
            let word = words[index];

            if self.state.method_count != 0 {
                let state = self.state;
                if fast_inline
                    && state.non_incrementing
                    && state.method == LOAD_INLINE_DATA
                    && state.subchannel <= INLINE_DATA_MAX_SUBCHANNEL
                {
                    let available = words.len() - index;
                    let consume = (state.method_count as usize).min(available);
                    let data = &words[index..index + consume];
                    record(&mut first_error, self.load_inline_data(state.subchannel, data));
                    self.state.method_count -= consume as u32;
                    index += consume;
                    continue;
                }

                let is_last_call = state.method_count <= 1;
                let result = self.send(state.method, word, state.subchannel, is_last_call);
                record(&mut first_error, result);

                if !self.state.non_incrementing {
                    self.state.method += 1;
                }
                if self.state.increment_once {
                    self.state.non_incrementing = true;
                }
                self.state.method_count -= 1;
            } else {
                let header = CompressedMethod::new(word);
                let count = header.method_count() as usize;

                if fast_uniform
                    && header.sec_op() == SecOp::NonIncMethod
                    && header.method_address() == CB_DATA
                    && header.subchannel() == SubChannel::Maxwell3D as u32
                    && count < words.len() - index
                {
                    let data = &words[index + 1..index + 1 + count];
                    record(&mut first_error, self.constant_buffer_update(data));
                    index += count;
                } else {
                    self.decode_header(&header, &mut first_error);
                }
            }
            index += 1;
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn decode_header(&mut self, header: &CompressedMethod, first_error: &mut Option<EngineError>) {
        let sequence = |non_incrementing, increment_once| DmaState {
            method: header.method_address(),
            subchannel: header.subchannel(),
            method_count: header.method_count(),
            non_incrementing,
            increment_once,
        };

        match header.sec_op() {
            SecOp::IncMethod => self.state = sequence(false, false),
            SecOp::NonIncMethod => self.state = sequence(true, false),
            SecOp::OneInc => self.state = sequence(false, true),
            SecOp::ImmdDataMethod => {
                let result = self.send(
                    header.method_address(),
                    header.immd_data(),
                    header.subchannel(),
                    true,
                );
                record(first_error, result);
            }
            SecOp::Grp0UseTert | SecOp::Grp2UseTert | SecOp::Reserved6 | SecOp::EndPbSegment => {
                log::trace!("CommandProcessor: ignoring SecOp {:?}", header.sec_op());
            }
        }
    }

    /// Route one method call.
    fn send(&mut self, method: u32, value: u32, subchannel: u32, is_last_call: bool) -> EngineResult<()> {
        let Self {
            resources,
            puller,
            macros,
            engines,
            ..
        } = self;
        let ctx = resources.context();

        if method < PULLER_METHOD_COUNT {
            match puller.write(&ctx, macros, subchannel, method, value) {
                PullerAction::None => {}
                PullerAction::WaitForIdle => {
                    for engine in engines.iter_mut().flatten() {
                        engine.wait_for_idle(&ctx);
                    }
                }
                PullerAction::ShadowRamControl(control) => {
                    if let Some(engine) = &mut engines[SubChannel::Maxwell3D as usize] {
                        engine.set_shadow_ram_control(control);
                    }
                }
            }
            return Ok(());
        }

        if method < MACRO_METHOD_START {
            return match engines.get_mut(subchannel as usize).and_then(Option::as_mut) {
                Some(engine) => engine.write_reg(&ctx, method, value),
                None => {
                    log::trace!(
                        "CommandProcessor: no engine on subchannel {} (method=0x{:X}, value=0x{:X})",
                        subchannel,
                        method,
                        value
                    );
                    Ok(())
                }
            };
        }

        // Only the 3D and 2D classes own macros.
        let owner = match SubChannel::from_raw(subchannel) {
            Some(sub @ (SubChannel::Maxwell3D | SubChannel::Fermi2D)) => sub,
            _ => {
                log::trace!(
                    "CommandProcessor: macro method 0x{:X} on subchannel {} ignored",
                    method,
                    subchannel
                );
                return Ok(());
            }
        };

        let slot = ((method >> 1) & 0x7F) as usize;
        if method & 1 != 0 {
            macros.push_argument(slot, value);
        } else {
            macros.start(slot, value);
        }

        if !is_last_call {
            return Ok(());
        }
        let Some(engine) = engines[owner as usize].as_mut() else {
            return Ok(());
        };
        let mut processor = EngineMacroProcessor {
            engine: &mut **engine,
            ctx: &ctx,
            error: None,
        };
        macros.call(slot, &mut processor);
        match processor.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn load_inline_data(&mut self, subchannel: u32, data: &[u32]) -> EngineResult<()> {
        let ctx = self.resources.context();
        match self.engines.get_mut(subchannel as usize).and_then(Option::as_mut) {
            Some(engine) => engine.load_inline_data(&ctx, data),
            None => Ok(()),
        }
    }

    fn constant_buffer_update(&mut self, data: &[u32]) -> EngineResult<()> {
        let ctx = self.resources.context();
        match self.engines[SubChannel::Maxwell3D as usize].as_mut() {
            Some(engine) => engine.constant_buffer_update(&ctx, data),
            None => Ok(()),
        }
    }
}

fn record(first_error: &mut Option<EngineError>, result: EngineResult<()>) {
    if let Err(err) = result {
        log::warn!("CommandProcessor: {}", err);
        first_error.get_or_insert(err);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::null_backend::NullBackend;
    use crate::engines::maxwell_dma::DmaError;
    use crate::engines::puller::{
        LOAD_MME_INSTRUCTION_RAM, LOAD_MME_INSTRUCTION_RAM_POINTER, LOAD_MME_START_ADDRESS_RAM,
        LOAD_MME_START_ADDRESS_RAM_POINTER, SET_MME_SHADOW_RAM_CONTROL, WAIT_FOR_IDLE,
    };
    use crate::engines::ClassId;
    use crate::memory_manager::tests::mapped_manager;
    use crate::memory_manager::PteKind;
    use proptest::prelude::*;

    pub(crate) const BASE: u64 = 0x100_0000;

    pub(crate) fn resources(settings: GpuSettings) -> ChannelResources {
        ChannelResources {
            memory: Arc::new(mapped_manager(BASE, 0x10_0000, PteKind::PITCH)),
            syncpoints: Arc::new(SyncpointManager::new()),
            backend: Arc::new(Mutex::new(Box::new(NullBackend::new()))),
            settings: Arc::new(settings),
            clock: Arc::new(GpuClock::new()),
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Write(u32, u32),
        Inline(Vec<u32>),
        Uniform(Vec<u32>),
        Shadow(u32),
        Idle,
        Dirty,
    }

    /// Engine that records every call; method 0x123 fails.
    struct RecordingEngine {
        calls: Arc<Mutex<Vec<Call>>>,
    }

    const FAILING_METHOD: u32 = 0x123;

    impl Engine for RecordingEngine {
        fn class_id(&self) -> ClassId {
            ClassId::Threed
        }
        fn read_reg(&self, method: u32) -> u32 {
            method * 2
        }
        fn write_reg(&mut self, _ctx: &EngineContext<'_>, method: u32, value: u32) -> EngineResult<()> {
            self.calls.lock().push(Call::Write(method, value));
            if method == FAILING_METHOD {
                return Err(DmaError::UnsupportedComponentSize(value as i32).into());
            }
            Ok(())
        }
        fn load_inline_data(&mut self, _ctx: &EngineContext<'_>, data: &[u32]) -> EngineResult<()> {
            self.calls.lock().push(Call::Inline(data.to_vec()));
            Ok(())
        }
        fn constant_buffer_update(&mut self, _ctx: &EngineContext<'_>, data: &[u32]) -> EngineResult<()> {
            self.calls.lock().push(Call::Uniform(data.to_vec()));
            Ok(())
        }
        fn set_shadow_ram_control(&mut self, control: u32) {
            self.calls.lock().push(Call::Shadow(control));
        }
        fn force_state_dirty(&mut self) {
            self.calls.lock().push(Call::Dirty);
        }
        fn wait_for_idle(&mut self, _ctx: &EngineContext<'_>) {
            self.calls.lock().push(Call::Idle);
        }
    }

    /// Processor with recording engines on subchannels 0..5.
    fn recording(settings: GpuSettings) -> (CommandProcessor, Vec<Arc<Mutex<Vec<Call>>>>) {
        let logs: Vec<_> = (0..5).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
        let engines = logs
            .iter()
            .map(|calls| {
                Some(Box::new(RecordingEngine {
                    calls: Arc::clone(calls),
                }) as Box<dyn Engine>)
            })
            .collect();
        (CommandProcessor::with_engines(resources(settings), engines), logs)
    }

    fn header(op: SecOp, method: u32, subchannel: u32, count: u32) -> u32 {
        CompressedMethod::encode(op, method, subchannel, count)
    }

    fn calls(log: &Arc<Mutex<Vec<Call>>>) -> Vec<Call> {
        log.lock().clone()
    }

    #[test]
    fn test_compressed_method_fields() {
        let raw = (1u32 << 29) | (3 << 16) | (2 << 13) | 0x100;
        let hdr = CompressedMethod::new(raw);
        assert_eq!(hdr.sec_op(), SecOp::IncMethod);
        assert_eq!(hdr.subchannel(), 2);
        assert_eq!(hdr.method_address(), 0x100);
        assert_eq!(hdr.method_count(), 3);
        assert_eq!(header(SecOp::IncMethod, 0x100, 2, 3), raw);
    }

    #[test]
    fn test_process_inc_method() {
        let (mut proc, logs) = recording(GpuSettings::default());
        let data = [header(SecOp::IncMethod, 0x100, 0, 2), 0xAAAA, 0xBBBB];
        proc.process(BASE, &data).unwrap();
        assert_eq!(
            calls(&logs[0]),
            vec![Call::Write(0x100, 0xAAAA), Call::Write(0x101, 0xBBBB)]
        );
        assert_eq!(proc.state().method_count, 0);
    }

    #[test]
    fn test_process_non_inc_method() {
        let (mut proc, logs) = recording(GpuSettings::default());
        let data = [header(SecOp::NonIncMethod, 0x200, 1, 3), 0x11, 0x22, 0x33];
        proc.process(BASE, &data).unwrap();
        assert_eq!(
            calls(&logs[1]),
            vec![
                Call::Write(0x200, 0x11),
                Call::Write(0x200, 0x22),
                Call::Write(0x200, 0x33)
            ]
        );
    }

    #[test]
    fn test_process_one_inc() {
        let (mut proc, logs) = recording(GpuSettings::default());
        let data = [header(SecOp::OneInc, 0x150, 0, 3), 0xAA, 0xBB, 0xCC];
        proc.process(BASE, &data).unwrap();
        assert_eq!(
            calls(&logs[0]),
            vec![
                Call::Write(0x150, 0xAA),
                Call::Write(0x151, 0xBB),
                Call::Write(0x151, 0xCC)
            ]
        );
    }

    #[test]
    fn test_process_immediate() {
        let (mut proc, logs) = recording(GpuSettings::default());
        proc.process(BASE, &[header(SecOp::ImmdDataMethod, 0x300, 4, 0x42)]).unwrap();
        assert_eq!(calls(&logs[4]), vec![Call::Write(0x300, 0x42)]);
        assert_eq!(proc.state().method_count, 0);
    }

    #[test]
    fn test_sequence_continues_in_next_buffer() {
        let (mut proc, logs) = recording(GpuSettings::default());
        proc.process(BASE, &[header(SecOp::IncMethod, 0x100, 0, 3), 1]).unwrap();
        assert_eq!(proc.state().method, 0x101);
        assert_eq!(proc.state().method_count, 2);
        proc.process(BASE + 8, &[2, 3]).unwrap();
        assert_eq!(
            calls(&logs[0]),
            vec![Call::Write(0x100, 1), Call::Write(0x101, 2), Call::Write(0x102, 3)]
        );
    }

    #[test]
    fn test_ignored_sec_ops_consume_only_the_header() {
        let (mut proc, logs) = recording(GpuSettings::default());
        let data = [
            header(SecOp::Grp0UseTert, 0x100, 0, 2),
            header(SecOp::EndPbSegment, 0x100, 0, 2),
            header(SecOp::ImmdDataMethod, 0x100, 0, 9),
        ];
        proc.process(BASE, &data).unwrap();
        assert_eq!(calls(&logs[0]), vec![Call::Write(0x100, 9)]);
    }

    #[test]
    fn test_bulk_inline_data() {
        let (mut proc, logs) = recording(GpuSettings::default());
        let data = [header(SecOp::NonIncMethod, LOAD_INLINE_DATA, 2, 4), 1, 2, 3, 4];
        proc.process(BASE, &data).unwrap();
        assert_eq!(calls(&logs[2]), vec![Call::Inline(vec![1, 2, 3, 4])]);
        assert_eq!(proc.state().method_count, 0);
    }

    #[test]
    fn test_bulk_inline_data_split_across_buffers() {
        let (mut proc, logs) = recording(GpuSettings::default());
        proc.process(BASE, &[header(SecOp::NonIncMethod, LOAD_INLINE_DATA, 0, 4), 1, 2])
            .unwrap();
        assert_eq!(proc.state().method_count, 2);
        proc.process(BASE + 12, &[3, 4, header(SecOp::ImmdDataMethod, 0x100, 0, 5)])
            .unwrap();
        assert_eq!(
            calls(&logs[0]),
            vec![
                Call::Inline(vec![1, 2]),
                Call::Inline(vec![3, 4]),
                Call::Write(0x100, 5)
            ]
        );
    }

    #[test]
    fn test_inline_data_word_by_word_when_disabled() {
        let settings = GpuSettings {
            fast_inline_data: false,
            ..GpuSettings::default()
        };
        let (mut proc, logs) = recording(settings);
        let data = [header(SecOp::NonIncMethod, LOAD_INLINE_DATA, 2, 2), 7, 8];
        proc.process(BASE, &data).unwrap();
        assert_eq!(
            calls(&logs[2]),
            vec![Call::Write(LOAD_INLINE_DATA, 7), Call::Write(LOAD_INLINE_DATA, 8)]
        );
    }

    #[test]
    fn test_inline_data_on_dma_subchannel_is_not_bulk() {
        let (mut proc, logs) = recording(GpuSettings::default());
        let data = [header(SecOp::NonIncMethod, LOAD_INLINE_DATA, 4, 2), 7, 8];
        proc.process(BASE, &data).unwrap();
        assert_eq!(calls(&logs[4]).len(), 2);
    }

    #[test]
    fn test_bulk_uniform_update() {
        let (mut proc, logs) = recording(GpuSettings::default());
        let data = [
            header(SecOp::NonIncMethod, CB_DATA, 0, 3),
            10,
            20,
            30,
            header(SecOp::ImmdDataMethod, 0x100, 0, 1),
        ];
        proc.process(BASE, &data).unwrap();
        assert_eq!(
            calls(&logs[0]),
            vec![Call::Uniform(vec![10, 20, 30]), Call::Write(0x100, 1)]
        );
    }

    #[test]
    fn test_uniform_update_never_spans_buffers() {
        let (mut proc, logs) = recording(GpuSettings::default());
        proc.process(BASE, &[header(SecOp::NonIncMethod, CB_DATA, 0, 3), 10, 20])
            .unwrap();
        proc.process(BASE + 12, &[30]).unwrap();
        assert_eq!(
            calls(&logs[0]),
            vec![
                Call::Write(CB_DATA, 10),
                Call::Write(CB_DATA, 20),
                Call::Write(CB_DATA, 30)
            ]
        );
    }

    #[test]
    fn test_puller_wait_for_idle_reaches_every_engine() {
        let (mut proc, logs) = recording(GpuSettings::default());
        proc.process(BASE, &[header(SecOp::ImmdDataMethod, WAIT_FOR_IDLE, 3, 0)])
            .unwrap();
        for log in &logs {
            assert_eq!(calls(log), vec![Call::Idle]);
        }
    }

    #[test]
    fn test_shadow_ram_control_goes_to_3d() {
        let (mut proc, logs) = recording(GpuSettings::default());
        proc.process(
            BASE,
            &[header(SecOp::ImmdDataMethod, SET_MME_SHADOW_RAM_CONTROL, 2, 1)],
        )
        .unwrap();
        assert_eq!(calls(&logs[0]), vec![Call::Shadow(1)]);
        assert!(calls(&logs[2]).is_empty());
    }

    #[test]
    fn test_unknown_subchannel_is_ignored() {
        let (mut proc, logs) = recording(GpuSettings::default());
        proc.process(BASE, &[header(SecOp::ImmdDataMethod, 0x100, 6, 1)])
            .unwrap();
        assert!(logs.iter().all(|log| calls(log).is_empty()));
    }

    fn add_imm(result_op: u32, exit: bool, dst: u32, src_a: u32, imm: i32) -> u32 {
        1 | ((result_op & 7) << 4)
            | ((exit as u32) << 7)
            | ((dst & 7) << 8)
            | ((src_a & 7) << 11)
            | (((imm as u32) & 0x3FFFF) << 14)
    }

    /// Uploads a macro to slot 0 that sends its second argument to the method
    /// named by its first.
    fn upload_forwarding_macro(proc: &mut CommandProcessor) {
        // Move r1 to the method register, fetch, send; exit.
        let code = [add_imm(6, true, 0, 1, 0), 0];
        let mut words = vec![
            header(SecOp::ImmdDataMethod, LOAD_MME_INSTRUCTION_RAM_POINTER, 0, 0),
            header(SecOp::NonIncMethod, LOAD_MME_INSTRUCTION_RAM, 0, code.len() as u32),
        ];
        words.extend_from_slice(&code);
        words.push(header(SecOp::ImmdDataMethod, LOAD_MME_START_ADDRESS_RAM_POINTER, 0, 0));
        words.push(header(SecOp::ImmdDataMethod, LOAD_MME_START_ADDRESS_RAM, 0, 0));
        proc.process(BASE, &words).unwrap();
    }

    #[test]
    fn test_macro_runs_on_last_call() {
        let (mut proc, logs) = recording(GpuSettings::default());
        upload_forwarding_macro(&mut proc);

        let call = [header(SecOp::IncMethod, MACRO_METHOD_START, 0, 2), 0x456, 0xAB];
        proc.process(BASE, &call).unwrap();
        assert_eq!(calls(&logs[0]), vec![Call::Write(0x456, 0xAB)]);
        assert!(!proc.macros().slot(0).execution_pending);
    }

    #[test]
    fn test_macro_waits_for_arguments_across_buffers() {
        let (mut proc, logs) = recording(GpuSettings::default());
        upload_forwarding_macro(&mut proc);

        proc.process(BASE, &[header(SecOp::IncMethod, MACRO_METHOD_START, 3, 2), 0x456])
            .unwrap();
        assert!(calls(&logs[3]).is_empty());
        assert!(proc.macros().slot(0).execution_pending);

        proc.process(BASE + 8, &[0xCD]).unwrap();
        assert_eq!(calls(&logs[3]), vec![Call::Write(0x456, 0xCD)]);
    }

    #[test]
    fn test_macro_on_compute_is_ignored() {
        let (mut proc, logs) = recording(GpuSettings::default());
        upload_forwarding_macro(&mut proc);
        proc.process(BASE, &[header(SecOp::IncMethod, MACRO_METHOD_START, 1, 2), 0x456, 1])
            .unwrap();
        assert!(calls(&logs[1]).is_empty());
        assert!(!proc.macros().slot(0).execution_pending);
    }

    #[test]
    fn test_macro_write_error_is_reported() {
        let (mut proc, _logs) = recording(GpuSettings::default());
        upload_forwarding_macro(&mut proc);
        let call = [header(SecOp::IncMethod, MACRO_METHOD_START, 0, 2), FAILING_METHOD, 3];
        let err = proc.process(BASE, &call).unwrap_err();
        assert!(matches!(err, EngineError::Dma(DmaError::UnsupportedComponentSize(3))));
    }

    #[test]
    fn test_engine_error_does_not_stop_decoding() {
        let (mut proc, logs) = recording(GpuSettings::default());
        let data = [
            header(SecOp::ImmdDataMethod, FAILING_METHOD, 0, 7),
            header(SecOp::ImmdDataMethod, FAILING_METHOD, 0, 8),
            header(SecOp::ImmdDataMethod, 0x100, 0, 1),
        ];
        let err = proc.process(BASE, &data).unwrap_err();
        assert!(matches!(err, EngineError::Dma(DmaError::UnsupportedComponentSize(7))));
        assert_eq!(calls(&logs[0]).last(), Some(&Call::Write(0x100, 1)));
    }

    #[test]
    fn test_force_all_dirty() {
        let (mut proc, logs) = recording(GpuSettings::default());
        proc.force_all_dirty();
        assert!(logs.iter().all(|log| calls(log) == vec![Call::Dirty]));
    }

    #[test]
    fn test_default_engines_bound() {
        let proc = CommandProcessor::new(resources(GpuSettings::default()));
        assert_eq!(
            proc.engine(SubChannel::MaxwellDMA).map(|e| e.class_id()),
            Some(ClassId::Dma)
        );
        assert_eq!(
            proc.engine(SubChannel::Fermi2D).map(|e| e.class_id()),
            Some(ClassId::Twod)
        );
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Inc,
        NonInc,
        OneInc,
        Immd,
    }

    fn op_strategy() -> impl Strategy<Value = (Op, u32, u32, u32)> {
        (
            prop_oneof![Just(Op::Inc), Just(Op::NonInc), Just(Op::OneInc), Just(Op::Immd)],
            0x200u32..0x400,
            0u32..5,
            0u32..6,
        )
    }

    proptest! {
        #[test]
        fn prop_decoder_writes_land_where_predicted(
            headers in proptest::collection::vec(op_strategy(), 1..12)
        ) {
            let (mut proc, logs) = recording(GpuSettings::default());
            let mut words = Vec::new();
            let mut expected: Vec<Vec<Call>> = vec![Vec::new(); 5];
            let mut value = 1u32;

            for &(op, method, subchannel, count) in &headers {
                let sub = subchannel as usize;
                match op {
                    Op::Immd => {
                        words.push(header(SecOp::ImmdDataMethod, method, subchannel, count));
                        expected[sub].push(Call::Write(method, count));
                    }
                    _ => {
                        let sec_op = match op {
                            Op::Inc => SecOp::IncMethod,
                            Op::NonInc => SecOp::NonIncMethod,
                            _ => SecOp::OneInc,
                        };
                        words.push(header(sec_op, method, subchannel, count));
                        for i in 0..count {
                            let target = match op {
                                Op::Inc => method + i,
                                Op::NonInc => method,
                                _ => method + i.min(1),
                            };
                            words.push(value);
                            expected[sub].push(Call::Write(target, value));
                            value += 1;
                        }
                    }
                }
            }

            proc.process(BASE, &words).unwrap();
            for (sub, log) in logs.iter().enumerate() {
                prop_assert_eq!(calls(log), expected[sub].clone());
            }
        }
    }
}
