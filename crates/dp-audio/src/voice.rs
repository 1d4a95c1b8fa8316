//! Hardware voice playback
//!
//! In the hardware-output topology the mixing engine does not render
//! samples. It describes voices (sample, loop points, period, volume) and
//! this module turns each voice event into channel register programming.
//!
//! Hardware channels latch a new pointer/length only after the current
//! block ends. A looping voice is therefore started as a one-shot over
//! `[position, loop_end)` with the loop span staged behind it; the channel
//! is marked as pending a loop transition until its tracked position passes
//! the one-shot end. Channels whose DMA must be (re)enabled are collected
//! in a pending mask and enabled from a one-shot timer, which fires twice:
//! first to enable DMA, then to commit the staged spans.

use std::sync::Arc;

use bitflags::bitflags;
use dp_core::{voice_debug, voice_trace};

use crate::profile::MAX_VOLUME;
use crate::sink::{ChannelMask, HardwareSink, VoiceSpan};

/// Voice volume that maps to full hardware volume
pub const FULL_VOLUME: i32 = 1 << 30;

bitflags! {
    /// Loop mode of a voice
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VoiceFlags: u32 {
        const LOOP_FORWARD = 1 << 0;
        const LOOP_PINGPONG = 1 << 1;
    }
}

/// Where playback of a voice starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoicePosition {
    /// Start at this sample offset
    At(usize),
    /// Resume from the channel's last tracked position
    Continue,
}

/// Voice description supplied by the mixing engine
#[derive(Debug, Clone)]
pub struct Voice {
    /// Hardware channel the voice is bound to
    pub channel: usize,
    /// Signed 8-bit sample data
    pub sample: Arc<[i8]>,
    pub position: VoicePosition,
    pub loop_start: usize,
    pub loop_end: usize,
    pub flags: VoiceFlags,
    /// Playback period in 22.10 fixed point
    pub period: u32,
    /// Left volume, full scale at `1 << 30`
    pub volume_left: i32,
    /// Right volume, full scale at `1 << 30`
    pub volume_right: i32,
}

impl Voice {
    /// Voice that plays `sample` once from the start
    pub fn one_shot(channel: usize, sample: Arc<[i8]>, period: u32) -> Self {
        let len = sample.len();
        Self {
            channel,
            sample,
            position: VoicePosition::At(0),
            loop_start: 0,
            loop_end: len,
            flags: VoiceFlags::empty(),
            period,
            volume_left: FULL_VOLUME,
            volume_right: FULL_VOLUME,
        }
    }

    /// Voice that loops over the whole of `sample`
    pub fn looping(channel: usize, sample: Arc<[i8]>, period: u32) -> Self {
        Self {
            flags: VoiceFlags::LOOP_FORWARD,
            ..Self::one_shot(channel, sample, period)
        }
    }

    /// Check whether the voice has a usable loop
    pub fn is_looping(&self) -> bool {
        self.flags.intersects(VoiceFlags::LOOP_FORWARD | VoiceFlags::LOOP_PINGPONG)
            && self.loop_end > self.loop_start
    }

    /// End of the playable data
    fn end(&self) -> usize {
        self.loop_end.min(self.sample.len())
    }
}

/// Callbacks the mixing engine invokes to drive hardware voices
pub trait VoiceCallbacks {
    fn play_sample(&mut self, voice: &Voice);
    fn stop_sample(&mut self, voice: &Voice);
    fn set_channel_frequency(&mut self, voice: &Voice);
    fn set_channel_volume(&mut self, voice: &Voice);
    /// End of one engine tick
    fn tick_done(&mut self);
}

/// Playback state of a hardware channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Stopped,
    Playing,
}

/// Tracked state of one hardware channel
#[derive(Debug, Clone)]
pub struct HardwareChannel {
    pub status: ChannelStatus,
    pub sample: Option<Arc<[i8]>>,
    /// Tracked play position in samples
    pub position: usize,
    /// End of the span currently playing
    pub end: usize,
    pub loop_start: usize,
    pub loop_length: usize,
    pub looping: bool,
    /// Playing the one-shot lead-in of a looping voice
    pub pending_loop: bool,
    pub period: u16,
    pub volume: u8,
}

impl Default for HardwareChannel {
    fn default() -> Self {
        Self {
            status: ChannelStatus::Stopped,
            sample: None,
            position: 0,
            end: 0,
            loop_start: 0,
            loop_length: 1,
            looping: false,
            pending_loop: false,
            period: 0,
            volume: 0,
        }
    }
}

impl HardwareChannel {
    pub fn is_playing(&self) -> bool {
        self.status == ChannelStatus::Playing
    }
}

/// State of the DMA-enable timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Idle,
    /// Next firing enables pending DMA
    EnablePending,
    /// Next firing commits staged spans
    CommitStaged,
}

/// Converts voice events into hardware channel programming
#[derive(Debug)]
pub struct ChannelEventAdapter {
    channels: Vec<HardwareChannel>,
    pending_dma: ChannelMask,
    timer: TimerPhase,
    hardware_clock: u32,
    refresh_rate: u32,
}

impl ChannelEventAdapter {
    pub fn new(channels: usize, hardware_clock: u32, refresh_rate: u32) -> Self {
        Self {
            channels: vec![HardwareChannel::default(); channels],
            pending_dma: ChannelMask::empty(),
            timer: TimerPhase::Idle,
            hardware_clock,
            refresh_rate: refresh_rate.max(1),
        }
    }

    /// Tracked state of a channel
    pub fn channel(&self, channel: usize) -> Option<&HardwareChannel> {
        self.channels.get(channel)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Channels waiting for DMA enable
    pub fn pending_dma(&self) -> ChannelMask {
        self.pending_dma
    }

    pub fn timer_phase(&self) -> TimerPhase {
        self.timer
    }

    /// Check whether the one-shot timer should be running
    pub fn timer_armed(&self) -> bool {
        self.timer != TimerPhase::Idle
    }

    /// Start (or restart) a voice on its channel
    pub fn play_sample(&mut self, voice: &Voice, sink: &mut dyn HardwareSink) {
        let ch = voice.channel;
        if ch >= self.channels.len() {
            voice_debug!(channel = ch, "play on a channel the hardware does not have");
            return;
        }
        sink.disable_channels(ChannelMask::single(ch));

        let position = match voice.position {
            VoicePosition::At(pos) => pos,
            VoicePosition::Continue => self.channels[ch].position,
        };
        let end = voice.end();
        let looping = voice.is_looping() && end > voice.loop_start;

        if !looping && position >= end {
            voice_trace!(channel = ch, position, end, "one-shot already finished");
            self.stop_sample(voice, sink);
            return;
        }

        let position = if position >= end { voice.loop_start } else { position };
        let loop_length = if looping { end - voice.loop_start } else { 1 };

        sink.program_voice(ch, &VoiceSpan::new(voice.sample.clone(), position, end - position));
        let staged = if looping {
            VoiceSpan::new(voice.sample.clone(), voice.loop_start, loop_length)
        } else {
            VoiceSpan::silence()
        };
        sink.stage_voice(ch, staged);

        {
            let state = &mut self.channels[ch];
            state.status = ChannelStatus::Playing;
            state.sample = Some(voice.sample.clone());
            state.position = position;
            state.end = end;
            state.loop_start = voice.loop_start;
            state.loop_length = loop_length;
            state.looping = looping;
            state.pending_loop = looping;
        }

        self.set_channel_frequency(voice, sink);
        self.set_channel_volume(voice, sink);
        self.pending_dma.insert(ChannelMask::single(ch));
        voice_trace!(channel = ch, position, end, looping, "play");
    }

    /// Silence a channel and point it at the shared zero sample
    pub fn stop_sample(&mut self, voice: &Voice, sink: &mut dyn HardwareSink) {
        let ch = voice.channel;
        let Some(state) = self.channels.get_mut(ch) else {
            return;
        };
        sink.disable_channels(ChannelMask::single(ch));
        sink.stage_voice(ch, VoiceSpan::silence());

        state.status = ChannelStatus::Stopped;
        state.sample = None;
        state.end = 0;
        state.loop_start = 0;
        state.loop_length = 1;
        state.looping = false;
        state.pending_loop = false;
        state.period = 0;
        self.pending_dma.remove(ChannelMask::single(ch));
        voice_trace!(channel = ch, "stop");
    }

    /// Program a channel's period from the voice's fixed-point period
    pub fn set_channel_frequency(&mut self, voice: &Voice, sink: &mut dyn HardwareSink) {
        let Some(state) = self.channels.get_mut(voice.channel) else {
            return;
        };
        let period = (voice.period >> 10).min(u16::MAX as u32) as u16;
        state.period = period;
        sink.set_channel_period(voice.channel, period);
    }

    /// Program a channel's volume from the voice's side volume
    pub fn set_channel_volume(&mut self, voice: &Voice, sink: &mut dyn HardwareSink) {
        let Some(state) = self.channels.get_mut(voice.channel) else {
            return;
        };
        let side = match voice.channel & 3 {
            0 | 3 => voice.volume_left,
            _ => voice.volume_right,
        };
        let volume = hardware_volume(side);
        state.volume = volume;
        sink.set_channel_volume(voice.channel, volume);
    }

    /// Advance every playing channel by one engine tick
    pub fn tick_done(&mut self, sink: &mut dyn HardwareSink) {
        let mut restaged = false;
        for (ch, state) in self.channels.iter_mut().enumerate() {
            if !state.is_playing() {
                continue;
            }

            if state.pending_loop && state.position >= state.end {
                let overshoot = state.position - state.end;
                state.pending_loop = false;
                state.position = state.loop_start + overshoot % state.loop_length;
                state.end = state.loop_start + state.loop_length;
                if let Some(sample) = &state.sample {
                    sink.stage_voice(
                        ch,
                        VoiceSpan::new(sample.clone(), state.loop_start, state.loop_length),
                    );
                    restaged = true;
                }
                voice_trace!(channel = ch, position = state.position, "entered loop");
            }

            if state.period > 0 {
                let step = self.hardware_clock / self.refresh_rate / state.period as u32;
                state.position += step as usize;
            }

            if state.position >= state.end {
                if !state.looping {
                    state.status = ChannelStatus::Stopped;
                    voice_trace!(channel = ch, "one-shot ended");
                } else if !state.pending_loop {
                    let into_loop = state.position - state.loop_start;
                    state.position = state.loop_start + into_loop % state.loop_length;
                }
            }
        }

        if !self.pending_dma.is_empty() {
            self.timer = TimerPhase::EnablePending;
        } else if restaged && self.timer == TimerPhase::Idle {
            self.timer = TimerPhase::CommitStaged;
        }
    }

    /// Handle one firing of the DMA-enable timer
    pub fn timer_fired(&mut self, sink: &mut dyn HardwareSink) {
        match self.timer {
            TimerPhase::Idle => {}
            TimerPhase::EnablePending => {
                sink.enable_channels(self.pending_dma);
                voice_trace!(mask = self.pending_dma.bits(), "DMA enabled");
                self.pending_dma = ChannelMask::empty();
                self.timer = TimerPhase::CommitStaged;
            }
            TimerPhase::CommitStaged => {
                sink.commit_staged_channels();
                self.timer = TimerPhase::Idle;
            }
        }
    }
}

/// Map a voice volume (full scale at `1 << 30`) to the hardware range
pub fn hardware_volume(volume: i32) -> u8 {
    (((volume >> 21) + 6) >> 3).clamp(0, MAX_VOLUME as i32) as u8
}

/// Voice callbacks bound to an adapter and the sink it programs
pub struct VoiceBus<'a> {
    pub adapter: &'a mut ChannelEventAdapter,
    pub sink: &'a mut dyn HardwareSink,
}

impl VoiceCallbacks for VoiceBus<'_> {
    fn play_sample(&mut self, voice: &Voice) {
        self.adapter.play_sample(voice, self.sink);
    }

    fn stop_sample(&mut self, voice: &Voice) {
        self.adapter.stop_sample(voice, self.sink);
    }

    fn set_channel_frequency(&mut self, voice: &Voice) {
        self.adapter.set_channel_frequency(voice, self.sink);
    }

    fn set_channel_volume(&mut self, voice: &Voice) {
        self.adapter.set_channel_volume(voice, self.sink);
    }

    fn tick_done(&mut self) {
        self.adapter.tick_done(self.sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{SinkConfig, PAULA_CLOCK_PAL};
    use crate::sink::{RecordingSink, SinkCall};
    use dp_core::config::HardwareProfile;

    fn setup() -> (ChannelEventAdapter, RecordingSink) {
        let sink = RecordingSink::new(SinkConfig::new(HardwareProfile::Paula, 0));
        (ChannelEventAdapter::new(4, PAULA_CLOCK_PAL, 50), sink)
    }

    fn sample(len: usize) -> Arc<[i8]> {
        (0..len).map(|i| (i % 100) as i8).collect::<Vec<_>>().into()
    }

    #[test]
    fn test_volume_mapping() {
        assert_eq!(hardware_volume(0), 0);
        assert_eq!(hardware_volume(FULL_VOLUME), 64);
        assert_eq!(hardware_volume(i32::MAX), 64);
        assert_eq!(hardware_volume(-FULL_VOLUME), 0);
        assert_eq!(hardware_volume(FULL_VOLUME / 2), 32);
    }

    #[test]
    fn test_volume_side_selection() {
        let (mut adapter, mut sink) = setup();
        let log = sink.log();
        for ch in 0..4 {
            let mut voice = Voice::one_shot(ch, sample(16), 428 << 10);
            voice.volume_left = FULL_VOLUME;
            voice.volume_right = 0;
            adapter.set_channel_volume(&voice, &mut sink);
        }
        assert_eq!(log.volume(0), Some(64));
        assert_eq!(log.volume(1), Some(0));
        assert_eq!(log.volume(2), Some(0));
        assert_eq!(log.volume(3), Some(64));
    }

    #[test]
    fn test_frequency_uses_integer_period() {
        let (mut adapter, mut sink) = setup();
        let voice = Voice::one_shot(1, sample(16), (428 << 10) | 0x3ff);
        adapter.set_channel_frequency(&voice, &mut sink);
        assert_eq!(sink.log().period(1), Some(428));
        assert_eq!(adapter.channel(1).unwrap().period, 428);
    }

    #[test]
    fn test_play_one_shot_stages_silence() {
        let (mut adapter, mut sink) = setup();
        let log = sink.log();
        let data = sample(1000);
        let voice = Voice::one_shot(2, data.clone(), 428 << 10);

        adapter.play_sample(&voice, &mut sink);

        assert_eq!(log.live_voice(2), Some(VoiceSpan::new(data, 0, 1000)));
        assert!(log.staged_voice(2).unwrap().is_silence());
        assert!(adapter.pending_dma().contains(ChannelMask::single(2)));
        let state = adapter.channel(2).unwrap();
        assert!(state.is_playing());
        assert!(!state.pending_loop);
    }

    #[test]
    fn test_play_finished_one_shot_stops() {
        let (mut adapter, mut sink) = setup();
        let log = sink.log();
        let mut voice = Voice::one_shot(0, sample(100), 428 << 10);
        voice.position = VoicePosition::At(100);

        adapter.play_sample(&voice, &mut sink);

        assert_eq!(log.count(|c| matches!(c, SinkCall::ProgramVoice { .. })), 0);
        assert!(log.staged_voice(0).unwrap().is_silence());
        assert!(!log.registers().dma_enabled.contains(ChannelMask::single(0)));
        assert!(!adapter.channel(0).unwrap().is_playing());
        assert!(adapter.pending_dma().is_empty());
    }

    #[test]
    fn test_loop_transition_after_lead_in() {
        let (mut adapter, mut sink) = setup();
        let log = sink.log();
        let data = sample(400);
        let mut voice = Voice::looping(0, data.clone(), 428 << 10);
        voice.loop_start = 100;
        voice.loop_end = 400;
        voice.position = VoicePosition::At(0);

        adapter.play_sample(&voice, &mut sink);
        assert!(adapter.channel(0).unwrap().pending_loop);
        assert_eq!(log.staged_voice(0), Some(VoiceSpan::new(data.clone(), 100, 300)));

        // 3546895 / 50 / 428 = 165 samples per tick
        adapter.tick_done(&mut sink);
        assert_eq!(adapter.channel(0).unwrap().position, 165);
        adapter.tick_done(&mut sink);
        adapter.tick_done(&mut sink);
        assert_eq!(adapter.channel(0).unwrap().position, 495);
        assert!(adapter.channel(0).unwrap().pending_loop);

        // The next tick flips to loop mode, folding the overshoot into the loop
        log.clear();
        adapter.tick_done(&mut sink);
        let state = adapter.channel(0).unwrap();
        assert!(!state.pending_loop);
        assert!(state.is_playing());
        assert!(state.position >= 100 && state.position < 400);
        assert_eq!(
            log.count(|c| matches!(c, SinkCall::StageVoice { channel: 0, .. })),
            1
        );
    }

    #[test]
    fn test_one_shot_stops_at_end() {
        let (mut adapter, mut sink) = setup();
        let voice = Voice::one_shot(3, sample(300), 428 << 10);
        adapter.play_sample(&voice, &mut sink);

        adapter.tick_done(&mut sink);
        assert!(adapter.channel(3).unwrap().is_playing());
        adapter.tick_done(&mut sink);
        assert!(!adapter.channel(3).unwrap().is_playing());
    }

    #[test]
    fn test_timer_enables_then_commits() {
        let (mut adapter, mut sink) = setup();
        let log = sink.log();
        adapter.play_sample(&Voice::one_shot(0, sample(1000), 428 << 10), &mut sink);
        adapter.play_sample(&Voice::one_shot(1, sample(1000), 428 << 10), &mut sink);
        assert!(!adapter.timer_armed());

        adapter.tick_done(&mut sink);
        assert_eq!(adapter.timer_phase(), TimerPhase::EnablePending);

        adapter.timer_fired(&mut sink);
        assert_eq!(log.registers().dma_enabled.bits(), 0b11);
        assert!(adapter.pending_dma().is_empty());
        assert_eq!(adapter.timer_phase(), TimerPhase::CommitStaged);

        adapter.timer_fired(&mut sink);
        assert_eq!(adapter.timer_phase(), TimerPhase::Idle);
        assert_eq!(log.count(|c| matches!(c, SinkCall::CommitStaged)), 1);
        assert!(log.live_voice(0).unwrap().is_silence());
    }

    #[test]
    fn test_out_of_range_channel_is_ignored() {
        let (mut adapter, mut sink) = setup();
        let log = sink.log();
        adapter.play_sample(&Voice::one_shot(9, sample(10), 428 << 10), &mut sink);
        adapter.stop_sample(&Voice::one_shot(9, sample(10), 428 << 10), &mut sink);
        assert!(log.calls().is_empty());
    }
}
