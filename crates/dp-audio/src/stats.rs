//! Pump statistics
//!
//! Counters are gathered per epoch of `refresh_rate` buffering ticks. At the
//! end of each epoch the epoch counts are folded into running medians with
//! `median = (median + sample) >> 1` and reset.

/// Statistic selectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatKey {
    /// Smoothed share of a frame spent mixing, in percent
    VerticalBlankMix,
    /// Smoothed DMA completions per epoch
    BufferReset,
    /// Smoothed gated buffering ticks per epoch
    RingBufferFull,
    /// Number of underrun episodes
    Underruns,
}

impl StatKey {
    pub const ALL: [StatKey; 4] = [
        StatKey::VerticalBlankMix,
        StatKey::BufferReset,
        StatKey::RingBufferFull,
        StatKey::Underruns,
    ];

    /// Decode a raw statistic index
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            StatKey::VerticalBlankMix => "VerticalBlankMix",
            StatKey::BufferReset => "BufferReset",
            StatKey::RingBufferFull => "RingBufferFull",
            StatKey::Underruns => "Underruns",
        }
    }
}

#[inline]
fn smooth(median: i32, sample: i32) -> i32 {
    (median + sample) >> 1
}

/// Running counters of the audio pump
#[derive(Debug, Clone, Default)]
pub struct PumpStats {
    epoch_len: u32,
    epoch_ticks: u32,
    mix_median: i32,
    buffer_resets: i32,
    buffer_reset_median: i32,
    ring_full: i32,
    ring_full_median: i32,
    consecutive_full: u32,
    underrun_threshold: u32,
    underruns: i32,
    in_underrun: bool,
    fills: u64,
}

impl PumpStats {
    /// Create counters for epochs of `refresh_rate` ticks
    pub fn new(refresh_rate: u32, underrun_threshold: u32) -> Self {
        Self {
            epoch_len: refresh_rate.max(1),
            underrun_threshold: underrun_threshold.max(1),
            ..Self::default()
        }
    }

    /// Clear every counter, keeping the epoch configuration
    pub fn reset(&mut self) {
        *self = Self::new(self.epoch_len, self.underrun_threshold);
    }

    /// Account for one buffering tick; closes the epoch when it is full
    pub fn on_buffer_tick(&mut self) {
        self.epoch_ticks += 1;
        if self.epoch_ticks >= self.epoch_len {
            self.buffer_reset_median = smooth(self.buffer_reset_median, self.buffer_resets);
            self.ring_full_median = smooth(self.ring_full_median, self.ring_full);
            self.buffer_resets = 0;
            self.ring_full = 0;
            self.epoch_ticks = 0;
        }
    }

    /// Account for one DMA completion
    pub fn on_dma_tick(&mut self) {
        self.buffer_resets += 1;
    }

    /// Account for a gated buffering tick.
    ///
    /// Returns `true` when this tick starts a new underrun episode.
    pub fn on_ring_full(&mut self) -> bool {
        self.ring_full += 1;
        self.consecutive_full += 1;
        if self.consecutive_full >= self.underrun_threshold && !self.in_underrun {
            self.in_underrun = true;
            self.underruns += 1;
            return true;
        }
        false
    }

    /// Account for a completed fill that took `mix_percent` of a frame
    pub fn on_fill(&mut self, mix_percent: i32) {
        self.consecutive_full = 0;
        self.in_underrun = false;
        self.fills += 1;
        self.mix_median = smooth(self.mix_median, mix_percent);
    }

    /// Gated ticks that make up one underrun
    pub fn underrun_threshold(&self) -> u32 {
        self.underrun_threshold
    }

    /// Number of completed fills
    pub fn fills(&self) -> u64 {
        self.fills
    }

    /// Read one statistic
    pub fn get(&self, key: StatKey) -> i32 {
        match key {
            StatKey::VerticalBlankMix => self.mix_median,
            StatKey::BufferReset => self.buffer_reset_median,
            StatKey::RingBufferFull => self.ring_full_median,
            StatKey::Underruns => self.underruns,
        }
    }

    /// Read one statistic by raw index (unknown indices read as 0)
    pub fn get_raw(&self, raw: u32) -> i32 {
        StatKey::from_raw(raw).map_or(0, |key| self.get(key))
    }
}
