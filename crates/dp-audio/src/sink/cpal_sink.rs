//! Portable sink on a cpal output stream
//!
//! Each DMA block programmed by the pump is folded to stereo and pushed into
//! a lock-free queue read by the output stream callback. The callback plays
//! the part of DMA hardware: when DMA is first enabled the latched block
//! starts playing and a completion is raised at once, and from then on one
//! completion is raised each time the callback has drained a full chunk.
//! The queue therefore holds the playing chunk plus the one armed behind it.
//!
//! A completion raised while interrupts are masked stays pending and is
//! delivered when they are unmasked.
//!
//! Hardware voice playback is not available on this sink.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use dp_core::error::SinkError;
use dp_core::{dma_trace, voice_debug};
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

use crate::driver::TickSource;
use crate::profile::MAX_VOLUME;
use crate::ring::RING_DEPTH;
use crate::sample::{to_f32, ChunkRef, SampleWidth};

use super::{ChannelMask, HardwareSink, SinkConfig, VoiceSpan};

/// State shared between the sink and the stream callback
#[derive(Debug, Default)]
struct DmaClock {
    /// Frames per DMA chunk
    chunk_frames: AtomicUsize,
    /// DMA running (callback consumes the queue)
    playing: AtomicBool,
    /// Completion interrupts unmasked
    interrupts: AtomicBool,
}

/// Output stream handle; keep it alive on the thread that created it
pub struct CpalStream {
    _stream: cpal::Stream,
    sample_rate: u32,
    channels: u16,
}

impl CpalStream {
    /// Device sample rate; open the pump at this rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

/// Hardware sink backed by the default cpal output device
pub struct CpalSink {
    config: SinkConfig,
    producer: HeapProd<f32>,
    clock: Arc<DmaClock>,
    ticks: TickSource,
    /// Programmed chunk per lane
    lanes: Vec<Vec<i16>>,
    volumes: Vec<u8>,
    global_volume: u8,
    dma_enabled: ChannelMask,
    /// A programmed block waits for DMA enable
    latched: bool,
    /// Completion raised while interrupts were masked
    irq_pending: bool,
    scratch: Vec<f32>,
}

impl CpalSink {
    /// Open the default output device.
    ///
    /// `max_block` bounds the block size the pump will request; `ticks`
    /// receives a `DmaComplete` for every chunk played.
    pub fn open(
        config: SinkConfig,
        max_block: usize,
        ticks: TickSource,
    ) -> Result<(Self, CpalStream), SinkError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(SinkError::NoDevice)?;
        let supported = device
            .default_output_config()
            .map_err(|e| SinkError::Stream(format!("Failed to get default output config: {}", e)))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let (sink, mut state) = Self::with_queue(config, max_block, ticks);
        let out_channels = channels.max(1) as usize;
        let stream_config: cpal::StreamConfig = supported.config();

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    state.render(data, out_channels, |s| s);
                },
                |err| tracing::error!("Audio stream error: {}", err),
                None,
            ),
            cpal::SampleFormat::I16 => device.build_output_stream(
                &stream_config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    state.render(data, out_channels, |s| {
                        (s * 32767.0).clamp(-32768.0, 32767.0) as i16
                    });
                },
                |err| tracing::error!("Audio stream error: {}", err),
                None,
            ),
            format => {
                return Err(SinkError::Stream(format!(
                    "Unsupported sample format: {:?}",
                    format
                )))
            }
        }
        .map_err(|e| SinkError::Stream(format!("Failed to build audio stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| SinkError::Stream(format!("Failed to play audio stream: {}", e)))?;
        tracing::debug!("cpal stream started at {} Hz, {} channels", sample_rate, channels);

        Ok((
            sink,
            CpalStream {
                _stream: stream,
                sample_rate,
                channels,
            },
        ))
    }

    /// Build the sink and the callback end of its output queue
    fn with_queue(
        config: SinkConfig,
        max_block: usize,
        ticks: TickSource,
    ) -> (Self, CallbackState) {
        let capacity = max_block.next_power_of_two() * RING_DEPTH * 2;
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let clock = Arc::new(DmaClock::default());

        let state = CallbackState {
            consumer,
            clock: clock.clone(),
            ticks: ticks.clone(),
            drained: 0,
        };
        let lanes = config.channels;
        let sink = Self {
            config,
            producer,
            clock,
            ticks,
            lanes: vec![Vec::new(); lanes],
            volumes: vec![MAX_VOLUME; lanes],
            global_volume: 0,
            dma_enabled: ChannelMask::empty(),
            latched: false,
            irq_pending: false,
            scratch: Vec::new(),
        };
        (sink, state)
    }

    /// Fold the programmed lanes to interleaved stereo and queue them
    fn push_block(&mut self) {
        let frames = self.lanes.iter().map(Vec::len).max().unwrap_or(0);
        let master = self.global_volume as f32 / MAX_VOLUME as f32;
        let active: Vec<usize> = self
            .dma_enabled
            .channels()
            .filter(|&lane| lane < self.lanes.len())
            .collect();
        let stereo = self.lanes.len() == 2;
        let (left_count, right_count) = active.iter().fold((0u32, 0u32), |(l, r), &lane| {
            if stereo {
                if lane == 0 { (l + 1, r) } else { (l, r + 1) }
            } else if is_left(lane) {
                (l + 1, r)
            } else {
                (l, r + 1)
            }
        });

        self.scratch.clear();
        for i in 0..frames {
            let (mut left, mut right) = (0.0f32, 0.0f32);
            for &lane in &active {
                let sample = self.lanes[lane].get(i).copied().map_or(0.0, to_f32)
                    * self.volumes[lane] as f32
                    / MAX_VOLUME as f32;
                let to_left = if stereo { lane == 0 } else { is_left(lane) };
                if to_left {
                    left += sample;
                } else {
                    right += sample;
                }
            }
            self.scratch.push(left * master / left_count.max(1) as f32);
            self.scratch.push(right * master / right_count.max(1) as f32);
        }

        let pushed = self.producer.push_slice(&self.scratch);
        if pushed < self.scratch.len() {
            dma_trace!(
                dropped = self.scratch.len() - pushed,
                vacant = self.producer.vacant_len(),
                "output queue overflow"
            );
        }
    }
}

/// Channels 0 and 3 of each group of four sit on the left
fn is_left(channel: usize) -> bool {
    matches!(channel & 3, 0 | 3)
}

impl HardwareSink for CpalSink {
    fn config(&self) -> &SinkConfig {
        &self.config
    }

    fn program_channel(&mut self, channel: usize, data: ChunkRef<'_>) {
        let Some(lane) = self.lanes.get_mut(channel) else {
            return;
        };
        lane.clear();
        lane.extend((0..data.len()).filter_map(|i| data.get_i16(i)));
        self.clock.chunk_frames.store(data.len(), Ordering::Release);
    }

    fn set_channel_period(&mut self, _channel: usize, _period: u16) {}

    fn set_channel_volume(&mut self, channel: usize, volume: u8) {
        if let Some(slot) = self.volumes.get_mut(channel) {
            *slot = volume.min(MAX_VOLUME);
        }
    }

    fn set_channel_mode(&mut self, _channel: usize, _width: SampleWidth) {}

    fn enable_channels(&mut self, mask: ChannelMask) {
        self.dma_enabled.insert(mask);
        if self.dma_enabled.is_empty() {
            return;
        }
        self.clock.playing.store(true, Ordering::Release);
        if self.latched {
            self.latched = false;
            self.push_block();
            // The latched block starts playing now
            if self.clock.interrupts.load(Ordering::Acquire) {
                self.ticks.dma_complete();
            } else {
                self.irq_pending = true;
            }
        }
    }

    fn disable_channels(&mut self, mask: ChannelMask) {
        self.dma_enabled.remove(mask);
        if self.dma_enabled.is_empty() {
            self.clock.playing.store(false, Ordering::Release);
            self.irq_pending = false;
        }
    }

    fn set_global_volume(&mut self, level: u8) {
        self.global_volume = level.min(MAX_VOLUME);
    }

    fn enable_interrupts(&mut self) {
        self.clock.interrupts.store(true, Ordering::Release);
        if self.irq_pending {
            self.irq_pending = false;
            self.ticks.dma_complete();
        }
    }

    fn disable_interrupts(&mut self) {
        self.clock.interrupts.store(false, Ordering::Release);
    }

    fn program_voice(&mut self, channel: usize, _span: &VoiceSpan) {
        voice_debug!(channel, "hardware voices are not supported by the cpal sink");
    }

    fn stage_voice(&mut self, _channel: usize, _span: VoiceSpan) {}

    fn commit_staged_channels(&mut self) {}

    fn end_of_block(&mut self) {
        if self.dma_enabled.is_empty() {
            self.latched = true;
        } else {
            self.push_block();
        }
    }
}

/// State owned by the stream callback
struct CallbackState {
    consumer: HeapCons<f32>,
    clock: Arc<DmaClock>,
    ticks: TickSource,
    /// Frames played since the last completion
    drained: usize,
}

impl CallbackState {
    fn render<T: Copy + Default>(
        &mut self,
        data: &mut [T],
        out_channels: usize,
        convert: impl Fn(f32) -> T,
    ) {
        if !self.clock.playing.load(Ordering::Acquire) {
            data.fill(T::default());
            return;
        }

        let mut frames = 0;
        for frame in data.chunks_mut(out_channels) {
            let (left, right) = match (self.consumer.try_pop(), self.consumer.try_pop()) {
                (Some(left), Some(right)) => {
                    frames += 1;
                    (left, right)
                }
                _ => (0.0, 0.0),
            };
            for (i, out) in frame.iter_mut().enumerate() {
                *out = convert(match i {
                    0 => left,
                    1 => right,
                    _ => (left + right) * 0.5,
                });
            }
        }

        let chunk = self.clock.chunk_frames.load(Ordering::Acquire);
        if chunk == 0 || !self.clock.interrupts.load(Ordering::Acquire) {
            return;
        }
        self.drained += frames;
        while self.drained >= chunk {
            self.drained -= chunk;
            self.ticks.dma_complete();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{tick_channel, Tick};
    use crate::engine::{ToneEngine, Waveform};
    use crate::AudioPump;
    use dp_core::config::{AudioConfig, HardwareProfile, OutputTopology};

    #[test]
    fn test_start_raises_first_completion() {
        let (ticks, rx) = tick_channel();
        let config = SinkConfig::new(HardwareProfile::Portable, 2);
        let (sink, mut state) = CpalSink::with_queue(config, 256, ticks);
        let audio = AudioConfig {
            profile: HardwareProfile::Portable,
            topology: OutputTopology::MixDown,
            portable_channels: 2,
            ..AudioConfig::default()
        };
        let engine = Box::new(ToneEngine::new(Waveform::Square, 440.0, 48000));
        let mut pump = AudioPump::new(Box::new(sink), engine, &audio);

        pump.open(256, 48000).unwrap();
        assert!(rx.try_recv().is_err());

        pump.start().unwrap();
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![Tick::DmaComplete]);

        // Draining the latched chunk raises the next completion
        let mut out = vec![0.0f32; 256 * 2];
        state.render(&mut out, 2, |s| s);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![Tick::DmaComplete]);
    }

    #[test]
    fn test_stop_before_interrupts_drops_pending_completion() {
        let (ticks, rx) = tick_channel();
        let config = SinkConfig::new(HardwareProfile::Portable, 2);
        let (mut sink, _state) = CpalSink::with_queue(config, 64, ticks);

        sink.end_of_block();
        sink.enable_channels(ChannelMask::first(2));
        sink.disable_channels(ChannelMask::first(2));
        sink.enable_interrupts();
        assert!(rx.try_recv().is_err());
    }
}
