//! Null sink (no sound output)

use crate::sample::{ChunkRef, SampleWidth};

use super::{ChannelMask, HardwareSink, SinkConfig, VoiceSpan};

/// Sink that accepts every register write and discards it
pub struct NullSink {
    config: SinkConfig,
    pub(crate) dma_enabled: ChannelMask,
    pub(crate) interrupts_enabled: bool,
    pub(crate) blocks: u64,
}

impl NullSink {
    pub fn new(config: SinkConfig) -> Self {
        Self {
            config,
            dma_enabled: ChannelMask::empty(),
            interrupts_enabled: false,
            blocks: 0,
        }
    }

    /// Channels with DMA currently running
    pub fn dma_enabled(&self) -> ChannelMask {
        self.dma_enabled
    }

    /// Number of DMA blocks programmed so far
    pub fn blocks(&self) -> u64 {
        self.blocks
    }
}

impl HardwareSink for NullSink {
    fn config(&self) -> &SinkConfig {
        &self.config
    }

    fn program_channel(&mut self, _channel: usize, _data: ChunkRef<'_>) {}

    fn set_channel_period(&mut self, _channel: usize, _period: u16) {}

    fn set_channel_volume(&mut self, _channel: usize, _volume: u8) {}

    fn set_channel_mode(&mut self, _channel: usize, _width: SampleWidth) {}

    fn enable_channels(&mut self, mask: ChannelMask) {
        self.dma_enabled.insert(mask);
    }

    fn disable_channels(&mut self, mask: ChannelMask) {
        self.dma_enabled.remove(mask);
    }

    fn set_global_volume(&mut self, _level: u8) {}

    fn enable_interrupts(&mut self) {
        self.interrupts_enabled = true;
    }

    fn disable_interrupts(&mut self) {
        self.interrupts_enabled = false;
    }

    fn program_voice(&mut self, _channel: usize, _span: &VoiceSpan) {}

    fn stage_voice(&mut self, _channel: usize, _span: VoiceSpan) {}

    fn commit_staged_channels(&mut self) {}

    fn end_of_block(&mut self) {
        self.blocks += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dp_core::config::HardwareProfile;

    #[test]
    fn test_null_sink_tracks_gates() {
        let mut sink = NullSink::new(SinkConfig::new(HardwareProfile::Paula, 0));
        sink.enable_channels(ChannelMask::first(4));
        sink.enable_interrupts();
        assert_eq!(sink.dma_enabled().bits(), 0xf);
        assert!(sink.interrupts_enabled);

        sink.disable_channels(ChannelMask::single(1));
        assert_eq!(sink.dma_enabled().bits(), 0xd);

        sink.end_of_block();
        assert_eq!(sink.blocks(), 1);
    }
}
