//! Recording sink
//!
//! Emulates the register file in memory and logs every call, so the pump
//! can be driven from a scripted tick schedule and inspected afterwards.
//! The log is shared through a cloneable [`SinkLog`] handle that stays
//! valid after the sink itself has been boxed into a pump.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::sample::{ChunkRef, SampleWidth};

use super::{ChannelMask, HardwareSink, SinkConfig, VoiceSpan};

/// One register-level call received by the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    ProgramChannel {
        channel: usize,
        register: u32,
        width: SampleWidth,
        samples: Vec<i16>,
    },
    SetPeriod {
        channel: usize,
        period: u16,
    },
    SetVolume {
        channel: usize,
        volume: u8,
    },
    SetMode {
        channel: usize,
        width: SampleWidth,
    },
    EnableChannels(ChannelMask),
    DisableChannels(ChannelMask),
    GlobalVolume(u8),
    EnableInterrupts,
    DisableInterrupts,
    ProgramVoice {
        channel: usize,
        span: VoiceSpan,
    },
    StageVoice {
        channel: usize,
        span: VoiceSpan,
    },
    CommitStaged,
    EndOfBlock,
    SaveState,
    RestoreState,
}

/// Global register state of the emulated chip
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub dma_enabled: ChannelMask,
    pub interrupts_enabled: bool,
    pub global_volume: u8,
}

#[derive(Debug, Default)]
struct Recorder {
    calls: Vec<SinkCall>,
    registers: RegisterSnapshot,
    saved: Option<RegisterSnapshot>,
    periods: Vec<u16>,
    volumes: Vec<u8>,
    live: Vec<Option<VoiceSpan>>,
    staged: Vec<Option<VoiceSpan>>,
}

/// Shared view of a [`RecordingSink`]'s state
#[derive(Debug, Clone)]
pub struct SinkLog {
    inner: Arc<Mutex<Recorder>>,
}

impl SinkLog {
    /// Every call received so far
    pub fn calls(&self) -> Vec<SinkCall> {
        self.inner.lock().calls.clone()
    }

    /// Number of calls matching a predicate
    pub fn count(&self, pred: impl Fn(&SinkCall) -> bool) -> usize {
        self.inner.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Forget the recorded calls (register state is kept)
    pub fn clear(&self) {
        self.inner.lock().calls.clear();
    }

    /// Current global register state
    pub fn registers(&self) -> RegisterSnapshot {
        self.inner.lock().registers
    }

    /// Current period of a channel
    pub fn period(&self, channel: usize) -> Option<u16> {
        self.inner.lock().periods.get(channel).copied()
    }

    /// Current volume of a channel
    pub fn volume(&self, channel: usize) -> Option<u8> {
        self.inner.lock().volumes.get(channel).copied()
    }

    /// Span currently loaded in a channel
    pub fn live_voice(&self, channel: usize) -> Option<VoiceSpan> {
        self.inner.lock().live.get(channel).cloned().flatten()
    }

    /// Span staged for a channel
    pub fn staged_voice(&self, channel: usize) -> Option<VoiceSpan> {
        self.inner.lock().staged.get(channel).cloned().flatten()
    }

    /// Chunks programmed into a channel, oldest first
    pub fn programmed_chunks(&self, channel: usize) -> Vec<Vec<i16>> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                SinkCall::ProgramChannel {
                    channel: ch,
                    samples,
                    ..
                } if *ch == channel => Some(samples.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Sink that records calls against an in-memory register file
pub struct RecordingSink {
    config: SinkConfig,
    log: SinkLog,
}

impl RecordingSink {
    pub fn new(config: SinkConfig) -> Self {
        Self::with_registers(config, RegisterSnapshot::default())
    }

    /// Create a sink whose registers start in a given state
    pub fn with_registers(config: SinkConfig, registers: RegisterSnapshot) -> Self {
        let channels = config.channels;
        let recorder = Recorder {
            registers,
            periods: vec![0; channels],
            volumes: vec![0; channels],
            live: vec![None; channels],
            staged: vec![None; channels],
            ..Recorder::default()
        };
        Self {
            config,
            log: SinkLog {
                inner: Arc::new(Mutex::new(recorder)),
            },
        }
    }

    /// Handle to the shared log
    pub fn log(&self) -> SinkLog {
        self.log.clone()
    }

    fn record(&self, call: SinkCall) {
        self.log.inner.lock().calls.push(call);
    }
}

impl HardwareSink for RecordingSink {
    fn config(&self) -> &SinkConfig {
        &self.config
    }

    fn program_channel(&mut self, channel: usize, data: ChunkRef<'_>) {
        let register = self.config.driver().channel_register(channel);
        dp_core::dma_trace!(
            channel,
            register = %format!("{:#x}", register),
            len = data.len(),
            "program"
        );
        self.record(SinkCall::ProgramChannel {
            channel,
            register,
            width: data.width(),
            samples: data.to_i16_vec(),
        });
    }

    fn set_channel_period(&mut self, channel: usize, period: u16) {
        let mut rec = self.log.inner.lock();
        if let Some(slot) = rec.periods.get_mut(channel) {
            *slot = period;
        }
        rec.calls.push(SinkCall::SetPeriod { channel, period });
    }

    fn set_channel_volume(&mut self, channel: usize, volume: u8) {
        let mut rec = self.log.inner.lock();
        if let Some(slot) = rec.volumes.get_mut(channel) {
            *slot = volume;
        }
        rec.calls.push(SinkCall::SetVolume { channel, volume });
    }

    fn set_channel_mode(&mut self, channel: usize, width: SampleWidth) {
        self.record(SinkCall::SetMode { channel, width });
    }

    fn enable_channels(&mut self, mask: ChannelMask) {
        let mut rec = self.log.inner.lock();
        rec.registers.dma_enabled.insert(mask);
        rec.calls.push(SinkCall::EnableChannels(mask));
    }

    fn disable_channels(&mut self, mask: ChannelMask) {
        let mut rec = self.log.inner.lock();
        rec.registers.dma_enabled.remove(mask);
        rec.calls.push(SinkCall::DisableChannels(mask));
    }

    fn set_global_volume(&mut self, level: u8) {
        let mut rec = self.log.inner.lock();
        rec.registers.global_volume = level;
        rec.calls.push(SinkCall::GlobalVolume(level));
    }

    fn enable_interrupts(&mut self) {
        let mut rec = self.log.inner.lock();
        rec.registers.interrupts_enabled = true;
        rec.calls.push(SinkCall::EnableInterrupts);
    }

    fn disable_interrupts(&mut self) {
        let mut rec = self.log.inner.lock();
        rec.registers.interrupts_enabled = false;
        rec.calls.push(SinkCall::DisableInterrupts);
    }

    fn program_voice(&mut self, channel: usize, span: &VoiceSpan) {
        let mut rec = self.log.inner.lock();
        if let Some(slot) = rec.live.get_mut(channel) {
            *slot = Some(span.clone());
        }
        rec.calls.push(SinkCall::ProgramVoice {
            channel,
            span: span.clone(),
        });
    }

    fn stage_voice(&mut self, channel: usize, span: VoiceSpan) {
        let mut rec = self.log.inner.lock();
        if let Some(slot) = rec.staged.get_mut(channel) {
            *slot = Some(span.clone());
        }
        rec.calls.push(SinkCall::StageVoice { channel, span });
    }

    fn commit_staged_channels(&mut self) {
        let mut rec = self.log.inner.lock();
        let staged = rec.staged.clone();
        for (live, staged) in rec.live.iter_mut().zip(staged) {
            if staged.is_some() {
                *live = staged;
            }
        }
        rec.calls.push(SinkCall::CommitStaged);
    }

    fn end_of_block(&mut self) {
        self.record(SinkCall::EndOfBlock);
    }

    fn save_state(&mut self) {
        let mut rec = self.log.inner.lock();
        rec.saved = Some(rec.registers);
        rec.calls.push(SinkCall::SaveState);
    }

    fn restore_state(&mut self) {
        let mut rec = self.log.inner.lock();
        if let Some(saved) = rec.saved.take() {
            rec.registers = saved;
        }
        rec.calls.push(SinkCall::RestoreState);
    }
}
