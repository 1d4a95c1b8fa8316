//! Hardware sinks
//!
//! A sink is the register-level surface the pump drives: per-channel DMA
//! pointer/length, period and volume, the channel enable mask, the master
//! volume and interrupt gating. Sinks receive their [`SinkConfig`] at
//! construction and must be usable from the tick thread.

use std::sync::{Arc, OnceLock};

use bitflags::bitflags;

use crate::sample::{ChunkRef, SampleWidth};

#[cfg(feature = "cpal")]
pub mod cpal_sink;
pub mod null;
pub mod recording;

#[cfg(feature = "cpal")]
pub use cpal_sink::{CpalSink, CpalStream};
pub use null::NullSink;
pub use recording::{RecordingSink, RegisterSnapshot, SinkCall, SinkLog};

pub use crate::profile::SinkConfig;

bitflags! {
    /// Set of hardware channels, bit `n` standing for channel `n`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelMask: u32 {
        const _ = !0;
    }
}

impl ChannelMask {
    /// Highest channel count a mask can describe
    pub const MAX_CHANNELS: usize = 32;

    /// Mask with a single channel set
    pub fn single(channel: usize) -> Self {
        if channel >= Self::MAX_CHANNELS {
            return Self::empty();
        }
        Self::from_bits_retain(1 << channel)
    }

    /// Mask covering channels `0..count`
    pub fn first(count: usize) -> Self {
        if count >= Self::MAX_CHANNELS {
            Self::from_bits_retain(u32::MAX)
        } else {
            Self::from_bits_retain((1u32 << count) - 1)
        }
    }

    /// Channel numbers in the mask, lowest first
    pub fn channels(self) -> impl Iterator<Item = usize> {
        (0..Self::MAX_CHANNELS).filter(move |&ch| self.bits() & (1 << ch) != 0)
    }
}

impl Default for ChannelMask {
    fn default() -> Self {
        Self::empty()
    }
}

/// Run of an 8-bit voice sample handed to a hardware channel
#[derive(Debug, Clone)]
pub struct VoiceSpan {
    pub sample: Arc<[i8]>,
    pub offset: usize,
    pub len: usize,
}

impl VoiceSpan {
    pub fn new(sample: Arc<[i8]>, offset: usize, len: usize) -> Self {
        Self {
            sample,
            offset,
            len,
        }
    }

    /// The shared one-sample silent span used by stopped channels
    pub fn silence() -> Self {
        Self::new(zero_sample(), 0, 1)
    }

    /// Check whether this span points at the shared zero sample
    pub fn is_silence(&self) -> bool {
        Arc::ptr_eq(&self.sample, &zero_sample())
    }

    /// Samples covered by the span (clipped to the sample data)
    pub fn data(&self) -> &[i8] {
        let start = self.offset.min(self.sample.len());
        let end = (self.offset + self.len).min(self.sample.len());
        &self.sample[start..end]
    }
}

impl PartialEq for VoiceSpan {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.sample, &other.sample)
            && self.offset == other.offset
            && self.len == other.len
    }
}

impl Eq for VoiceSpan {}

fn zero_sample() -> Arc<[i8]> {
    static ZERO: OnceLock<Arc<[i8]>> = OnceLock::new();
    ZERO.get_or_init(|| Arc::from([0i8; 2].as_slice())).clone()
}

/// Register-level output surface driven by the audio pump
pub trait HardwareSink: Send {
    /// Configuration this sink was built with
    fn config(&self) -> &SinkConfig;

    /// Point a channel's DMA at a chunk of the ring buffer
    fn program_channel(&mut self, channel: usize, data: ChunkRef<'_>);

    /// Set a channel's playback period in hardware clock ticks
    fn set_channel_period(&mut self, channel: usize, period: u16);

    /// Set a channel's volume (0..=64)
    fn set_channel_volume(&mut self, channel: usize, volume: u8);

    /// Set a channel's sample width
    fn set_channel_mode(&mut self, channel: usize, width: SampleWidth);

    /// Start DMA on the masked channels
    fn enable_channels(&mut self, mask: ChannelMask);

    /// Stop DMA on the masked channels
    fn disable_channels(&mut self, mask: ChannelMask);

    /// Set the master output level (0..=64)
    fn set_global_volume(&mut self, level: u8);

    /// Unmask the completion interrupts
    fn enable_interrupts(&mut self);

    /// Mask the completion interrupts
    fn disable_interrupts(&mut self);

    /// Load a voice span into a channel's live registers
    fn program_voice(&mut self, channel: usize, span: &VoiceSpan);

    /// Stage the span a channel latches after its current block
    fn stage_voice(&mut self, channel: usize, span: VoiceSpan);

    /// Push every staged span into the live registers
    fn commit_staged_channels(&mut self);

    /// All lanes of one DMA block have been programmed
    fn end_of_block(&mut self) {}

    /// Remember the register state found at open time
    fn save_state(&mut self) {}

    /// Reinstate the state remembered by [`HardwareSink::save_state`]
    fn restore_state(&mut self) {}
}
