//! Mixing engine contract and reference engines
//!
//! The pump calls exactly one engine entry point per buffering tick,
//! selected by the output topology: `mix_interleaved` for mix-down,
//! `mix_channels` for direct output, `drive_voices` for hardware voices.

use std::sync::Arc;

use crate::profile::PAULA_CLOCK_PAL;
use crate::voice::{Voice, VoiceCallbacks, FULL_VOLUME};

/// Producer of audio for the pump
pub trait MixingEngine: Send {
    /// Whether the engine has anything to play; inactive engines are not
    /// called and their block is written as silence.
    fn is_active(&self) -> bool;

    /// Add one block of interleaved samples for `channels` outputs.
    ///
    /// Full scale is `32768 << shift`; the accumulator arrives zeroed.
    fn mix_interleaved(&mut self, accumulator: &mut [i32], channels: usize, shift: u32);

    /// Render one block per hardware channel
    fn mix_channels(&mut self, buffers: &mut [Vec<i16>]);

    /// Issue voice events for one engine tick
    fn drive_voices(&mut self, voices: &mut dyn VoiceCallbacks) {
        voices.tick_done();
    }

    /// The device opened at `rate`, which may differ from the requested rate
    fn set_sample_rate(&mut self, _rate: u32) {}
}

/// Engine that never produces sound
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentEngine;

impl MixingEngine for SilentEngine {
    fn is_active(&self) -> bool {
        false
    }

    fn mix_interleaved(&mut self, _accumulator: &mut [i32], _channels: usize, _shift: u32) {}

    fn mix_channels(&mut self, _buffers: &mut [Vec<i16>]) {}
}

/// Test tone shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Square,
    Triangle,
}

/// Samples in the looping voice of the hardware-voice topology
const VOICE_CYCLE_LEN: usize = 32;

/// Periodic test tone for every topology
#[derive(Debug, Clone)]
pub struct ToneEngine {
    waveform: Waveform,
    frequency: f32,
    sample_rate: u32,
    volume: f32,
    phase: f32,
    active: bool,
    voice_started: bool,
    volume_dirty: bool,
}

impl ToneEngine {
    pub fn new(waveform: Waveform, frequency: f32, sample_rate: u32) -> Self {
        Self {
            waveform,
            frequency,
            sample_rate: sample_rate.max(1),
            volume: 1.0,
            phase: 0.0,
            active: true,
            voice_started: false,
            volume_dirty: false,
        }
    }

    /// Set master volume (clamped between 0.0 and 1.0)
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.volume_dirty = true;
    }

    /// Get the current volume
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Mute or unmute the engine
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn shape(&self, phase: f32) -> f32 {
        match self.waveform {
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }

    /// Next sample in `[-1.0, 1.0]`, scaled by volume
    fn next_sample(&mut self) -> f32 {
        let value = self.shape(self.phase) * self.volume;
        self.phase += self.frequency / self.sample_rate as f32;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }
        value
    }

    fn voice(&self) -> Voice {
        let sample: Arc<[i8]> = (0..VOICE_CYCLE_LEN)
            .map(|i| (self.shape(i as f32 / VOICE_CYCLE_LEN as f32) * 127.0) as i8)
            .collect::<Vec<_>>()
            .into();
        let period = PAULA_CLOCK_PAL as f32 / (self.frequency.max(1.0) * VOICE_CYCLE_LEN as f32);
        let mut voice = Voice::looping(0, sample, (period as u32) << 10);
        voice.volume_left = (FULL_VOLUME as f32 * self.volume) as i32;
        voice.volume_right = voice.volume_left;
        voice
    }
}

impl MixingEngine for ToneEngine {
    fn is_active(&self) -> bool {
        self.active
    }

    fn mix_interleaved(&mut self, accumulator: &mut [i32], channels: usize, shift: u32) {
        for frame in accumulator.chunks_mut(channels.max(1)) {
            let value = ((self.next_sample() * 32767.0) as i32) << shift;
            for slot in frame {
                *slot += value;
            }
        }
    }

    fn mix_channels(&mut self, buffers: &mut [Vec<i16>]) {
        let frames = buffers.iter().map(Vec::len).min().unwrap_or(0);
        for i in 0..frames {
            let value = (self.next_sample() * 32767.0) as i16;
            for buffer in buffers.iter_mut() {
                buffer[i] = value;
            }
        }
    }

    fn set_sample_rate(&mut self, rate: u32) {
        self.sample_rate = rate.max(1);
    }

    fn drive_voices(&mut self, voices: &mut dyn VoiceCallbacks) {
        if !self.voice_started {
            voices.play_sample(&self.voice());
            self.voice_started = true;
            self.volume_dirty = false;
        } else if self.volume_dirty {
            voices.set_channel_volume(&self.voice());
            self.volume_dirty = false;
        }
        voices.tick_done();
    }
}
