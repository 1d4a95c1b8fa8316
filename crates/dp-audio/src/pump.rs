//! Audio pump
//!
//! Owns the ring buffer, the mix proxy and the hardware sink, and runs the
//! two tick handlers:
//!
//! - DMA tick (consumer, high priority): the hardware latched the chunk it
//!   was programmed with, so the read cursor advances one chunk and every
//!   lane is re-armed with the chunk now at the read cursor.
//! - Buffering tick (producer, lower rate): when the ring gate allows a
//!   fill (see [`RingBuffer::can_write`]), the engine fills one block
//!   through the proxy and the write cursor advances. Otherwise the cycle
//!   is skipped and counted.
//!
//! The pump is a plain value; callers serialize access (the tick driver
//! keeps it behind a mutex), so the handlers never run concurrently.

use std::time::Instant;

use bitflags::bitflags;
use dp_core::config::{AudioConfig, OutputTopology};
use dp_core::error::{AudioError, Result};
use dp_core::{dma_trace, pump_debug, pump_trace};

use crate::engine::MixingEngine;
use crate::profile::{DriverProfile, MAX_VOLUME};
use crate::proxy::{FilterHook, MixProxy};
use crate::ring::RingBuffer;
use crate::sample::MAX_PRECISION_SHIFT;
use crate::sink::{ChannelMask, HardwareSink};
use crate::stats::{PumpStats, StatKey};
use crate::voice::{ChannelEventAdapter, VoiceBus};

/// Pump lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    /// Not open, no buffers allocated
    Stopped,
    /// Open, DMA and interrupts disabled
    Armed,
    /// DMA and interrupts enabled
    Running,
}

bitflags! {
    /// Tick sources waiting to be serviced
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PendingTicks: u32 {
        const DMA = 1 << 0;
        const TIMER = 1 << 1;
        const BUFFER = 1 << 2;
    }
}

/// Ring-buffered audio pump
pub struct AudioPump {
    state: PumpState,
    paused: bool,
    topology: OutputTopology,
    precision_shift: u32,
    refresh_rate: u32,
    sink: Box<dyn HardwareSink>,
    engine: Box<dyn MixingEngine>,
    filter: Option<Box<dyn FilterHook + Send>>,
    ring: RingBuffer,
    proxy: Option<MixProxy>,
    voices: Option<ChannelEventAdapter>,
    /// Channels whose DMA the pump gates
    active_mask: ChannelMask,
    block_size: usize,
    sample_rate: u32,
    period: u16,
    stats: PumpStats,
}

impl AudioPump {
    /// Create a closed pump
    pub fn new(
        sink: Box<dyn HardwareSink>,
        engine: Box<dyn MixingEngine>,
        config: &AudioConfig,
    ) -> Self {
        Self {
            state: PumpState::Stopped,
            paused: false,
            topology: config.topology,
            precision_shift: config.precision_shift,
            refresh_rate: config.refresh_rate.max(1),
            sink,
            engine,
            filter: None,
            ring: RingBuffer::new(),
            proxy: None,
            voices: None,
            active_mask: ChannelMask::empty(),
            block_size: 0,
            sample_rate: 0,
            period: 0,
            stats: PumpStats::new(config.refresh_rate, config.underrun_threshold),
        }
    }

    /// Install an effects pass that runs on the accumulator before narrowing
    pub fn set_filter(&mut self, filter: Box<dyn FilterHook + Send>) {
        self.filter = Some(filter);
    }

    pub fn clear_filter(&mut self) {
        self.filter = None;
    }

    /// Open the device: negotiate the rate, allocate buffers and program
    /// the sink with the initial chunk. Returns the actual block size.
    pub fn open(&mut self, requested_block: usize, requested_rate: u32) -> Result<usize> {
        if self.state != PumpState::Stopped {
            return Err(AudioError::AlreadyOpen);
        }

        let sink_config = self.sink.config().clone();
        let driver = DriverProfile::new(sink_config.profile);
        let rate = driver.negotiate_rate(requested_rate)?;
        let block = RingBuffer::round_block_size(requested_block)?;
        if self.precision_shift > MAX_PRECISION_SHIFT {
            return Err(AudioError::InvalidPrecisionShift(self.precision_shift));
        }
        let channels = sink_config.channels;
        let lanes = driver.lanes_for(self.topology, channels);
        if channels == 0 || channels > ChannelMask::MAX_CHANNELS || lanes > channels {
            return Err(AudioError::InvalidChannelCount(channels));
        }

        pump_debug!(
            driver = driver.driver_id(),
            topology = ?self.topology,
            requested_block,
            block,
            rate,
            "opening audio pump"
        );

        self.sink.save_state();
        self.sink.disable_interrupts();
        self.sink.set_global_volume(0);
        self.sink.disable_channels(sink_config.all_channels());

        if lanes > 0 {
            if let Err(e) = self.ring.allocate(block, lanes, sink_config.width) {
                self.sink.restore_state();
                return Err(e);
            }
        }

        let (proxy_channels, active_mask) = match self.topology {
            OutputTopology::HardwareOut => (channels, sink_config.all_channels()),
            _ => (lanes, ChannelMask::first(lanes)),
        };
        self.proxy = Some(MixProxy::for_topology(self.topology, proxy_channels));
        self.voices = match self.topology {
            OutputTopology::HardwareOut => Some(ChannelEventAdapter::new(
                channels,
                sink_config.hardware_clock,
                self.refresh_rate,
            )),
            _ => None,
        };
        self.active_mask = active_mask;
        self.block_size = block;
        self.sample_rate = rate;
        self.period = driver.period_for(rate);
        self.engine.set_sample_rate(rate);

        for lane in 0..self.ring.lane_count() {
            self.sink.set_channel_mode(lane, sink_config.width);
            self.sink.set_channel_period(lane, self.period);
            self.sink.set_channel_volume(lane, MAX_VOLUME);
            self.sink.program_channel(lane, self.ring.read_chunk(lane));
        }
        if self.ring.is_allocated() {
            self.sink.end_of_block();
        }

        self.stats.reset();
        self.paused = false;
        self.state = PumpState::Armed;
        tracing::info!(
            "Audio pump opened: {} at {} Hz, block {}",
            driver.driver_id(),
            rate,
            block
        );
        Ok(block)
    }

    /// Raise the output level and enable DMA and interrupts
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            PumpState::Stopped => Err(AudioError::NotOpen),
            PumpState::Running => Ok(()),
            PumpState::Armed => {
                if self.topology != OutputTopology::HardwareOut {
                    self.sink.set_global_volume(MAX_VOLUME);
                    self.sink.enable_channels(self.active_mask);
                }
                self.sink.enable_interrupts();
                self.paused = false;
                self.state = PumpState::Running;
                tracing::info!("Audio pump started");
                Ok(())
            }
        }
    }

    /// Silence and disable DMA and interrupts, keeping the buffers
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            PumpState::Stopped => Err(AudioError::NotOpen),
            PumpState::Armed => Ok(()),
            PumpState::Running => {
                self.sink.disable_interrupts();
                self.sink.set_global_volume(0);
                self.sink.disable_channels(self.active_mask);
                self.paused = false;
                self.state = PumpState::Armed;
                tracing::info!("Audio pump stopped");
                Ok(())
            }
        }
    }

    /// Freeze playback by gating DMA only
    pub fn pause(&mut self) {
        if self.state == PumpState::Running && !self.paused {
            self.sink.disable_channels(self.active_mask);
            self.paused = true;
            pump_debug!("paused");
        }
    }

    /// Resume playback frozen by [`AudioPump::pause`]
    pub fn resume(&mut self) {
        if self.state == PumpState::Running && self.paused {
            self.sink.enable_channels(self.active_mask);
            self.paused = false;
            pump_debug!("resumed");
        }
    }

    /// Disable everything, free the buffers and restore the sink's
    /// saved register state
    pub fn close(&mut self) {
        if self.state == PumpState::Stopped {
            return;
        }
        self.sink.disable_interrupts();
        self.sink.set_global_volume(0);
        self.sink.disable_channels(self.sink.config().all_channels());
        self.ring.release();
        self.proxy = None;
        self.voices = None;
        self.active_mask = ChannelMask::empty();
        self.sink.restore_state();
        self.paused = false;
        self.state = PumpState::Stopped;
        tracing::info!("Audio pump closed");
    }

    /// Consumer tick: the hardware consumed one chunk
    pub fn dma_tick(&mut self) {
        if self.state != PumpState::Running || !self.ring.is_allocated() {
            return;
        }

        self.ring.advance_read(self.ring.chunk_size());
        for lane in 0..self.ring.lane_count() {
            self.sink.program_channel(lane, self.ring.read_chunk(lane));
        }
        self.sink.end_of_block();
        self.stats.on_dma_tick();
        dma_trace!(read = self.ring.read_cursor(), "chunk re-armed");
    }

    /// Producer tick: fill one block if the gate allows it
    pub fn buffer_tick(&mut self) {
        if self.state != PumpState::Running {
            return;
        }
        self.stats.on_buffer_tick();

        if self.topology != OutputTopology::HardwareOut && !self.ring.can_write() {
            pump_trace!(
                read = self.ring.read_cursor(),
                write = self.ring.write_cursor(),
                "ring buffer full, skipping fill"
            );
            if self.stats.on_ring_full() {
                tracing::warn!(
                    "Audio underrun: {} consecutive buffering ticks found no free block",
                    self.stats.underrun_threshold()
                );
            }
            return;
        }

        let started = Instant::now();
        if self.fill_block() {
            let elapsed = started.elapsed().as_secs_f64();
            let percent = (elapsed * self.refresh_rate as f64 * 100.0) as i32;
            self.stats.on_fill(percent);
        }
    }

    /// Run one lock/engine/unlock pass. Returns `false` if no pass ran.
    fn fill_block(&mut self) -> bool {
        let Some(proxy) = self.proxy.as_mut() else {
            return false;
        };
        let fetch = match self.topology {
            OutputTopology::HardwareOut => self.block_size,
            _ => self.ring.fetch_size(),
        };
        if let Err(e) = proxy.lock(fetch, self.precision_shift) {
            pump_trace!("proxy lock failed: {}", e);
            return false;
        }

        if self.engine.is_active() {
            match self.topology {
                OutputTopology::MixDown => {
                    let channels = proxy.channels();
                    if let Some(accumulator) = proxy.accumulator_mut() {
                        self.engine
                            .mix_interleaved(accumulator, channels, self.precision_shift);
                    }
                }
                OutputTopology::DirectOut => {
                    if let Some(buffers) = proxy.channel_buffers_mut() {
                        self.engine.mix_channels(buffers);
                    }
                }
                OutputTopology::HardwareOut => {
                    if let Some(adapter) = self.voices.as_mut() {
                        let mut bus = VoiceBus {
                            adapter,
                            sink: self.sink.as_mut(),
                        };
                        self.engine.drive_voices(&mut bus);
                    }
                }
            }
        } else {
            proxy.mark_silent();
        }

        let filter = self
            .filter
            .as_deref_mut()
            .map(|f| f as &mut dyn FilterHook);
        if let Err(e) = proxy.unlock(filter, &mut self.ring) {
            pump_trace!("proxy unlock failed: {}", e);
            return false;
        }

        if self.topology != OutputTopology::HardwareOut {
            self.ring.advance_write(fetch);
        }
        pump_trace!(write = self.ring.write_cursor(), "block filled");
        true
    }

    /// One-shot timer of the hardware voice path fired
    pub fn timer_fired(&mut self) {
        if self.state != PumpState::Running {
            return;
        }
        if let Some(adapter) = self.voices.as_mut() {
            adapter.timer_fired(self.sink.as_mut());
        }
    }

    /// Service pending ticks; DMA always goes first
    pub fn dispatch(&mut self, pending: PendingTicks) {
        if pending.contains(PendingTicks::DMA) {
            self.dma_tick();
        }
        if pending.contains(PendingTicks::TIMER) {
            self.timer_fired();
        }
        if pending.contains(PendingTicks::BUFFER) {
            self.buffer_tick();
        }
    }

    /// Read one diagnostic
    pub fn statistic(&self, key: StatKey) -> i32 {
        self.stats.get(key)
    }

    /// Read one diagnostic by raw key
    pub fn stat_value(&self, raw: u32) -> i32 {
        self.stats.get_raw(raw)
    }

    pub fn stats(&self) -> &PumpStats {
        &self.stats
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn state(&self) -> PumpState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn topology(&self) -> OutputTopology {
        self.topology
    }

    /// Negotiated block size (0 while closed)
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Negotiated sample rate (0 while closed)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Hardware period programmed at open
    pub fn period(&self) -> u16 {
        self.period
    }

    pub fn proxy(&self) -> Option<&MixProxy> {
        self.proxy.as_ref()
    }

    /// Voice adapter (hardware-voice topology only)
    pub fn voices(&self) -> Option<&ChannelEventAdapter> {
        self.voices.as_ref()
    }

    /// Whether the voice path wants its one-shot timer
    pub fn timer_armed(&self) -> bool {
        self.voices
            .as_ref()
            .is_some_and(ChannelEventAdapter::timer_armed)
    }

    pub fn sink(&self) -> &dyn HardwareSink {
        self.sink.as_ref()
    }
}

impl Drop for AudioPump {
    fn drop(&mut self) {
        self.close();
    }
}
