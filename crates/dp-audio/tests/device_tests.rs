//! Device facade and dispatch thread tests

use std::thread;
use std::time::{Duration, Instant};

use dp_audio::engine::{ToneEngine, Waveform};
use dp_audio::profile::SinkConfig;
use dp_audio::sink::{RecordingSink, SinkCall};
use dp_audio::{AudioDevice, AudioPump, PumpState, StatKey};
use dp_core::config::{AudioConfig, HardwareProfile, OutputTopology};
use dp_core::error::AudioError;

fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    done()
}

fn pamela_config() -> AudioConfig {
    AudioConfig {
        profile: HardwareProfile::Pamela,
        topology: OutputTopology::MixDown,
        ..AudioConfig::default()
    }
}

#[test]
fn test_ticks_are_dispatched_on_thread() {
    let config = pamela_config();
    let sink = RecordingSink::new(SinkConfig::new(config.profile, 4));
    let log = sink.log();
    let engine = Box::new(ToneEngine::new(Waveform::Square, 440.0, 44100));
    let mut device = AudioDevice::new(AudioPump::new(Box::new(sink), engine, &config));

    assert_eq!(device.open(1024, 44100).unwrap(), 1024);
    let ticks = device.start().unwrap();

    // However the pairs get batched, the write lead stays within one block
    // of half the ring, so no buffering tick is gated
    for _ in 0..3 {
        assert!(ticks.vertical_blank());
        assert!(ticks.dma_complete());
    }

    let pump = device.pump();
    assert!(wait_for(|| pump.lock().ring().read_cursor() == 3072));
    assert!(wait_for(|| pump.lock().stats().fills() == 3));
    assert!(device.dispatched_rounds() >= 3);
    assert_eq!(ticks.dropped(), 0);
    assert_eq!(device.statistic(StatKey::Underruns), 0);
    assert_eq!(pump.lock().ring().distance_to_read(), 2048);
    // Initial chunk plus one per DMA completion
    assert_eq!(log.programmed_chunks(0).len(), 4);

    device.close();
    assert_eq!(device.state(), PumpState::Stopped);
    assert!(!log.registers().interrupts_enabled);
}

#[test]
fn test_ticks_while_stopped_are_ignored() {
    let config = pamela_config();
    let sink = RecordingSink::new(SinkConfig::new(config.profile, 4));
    let log = sink.log();
    let engine = Box::new(ToneEngine::new(Waveform::Square, 440.0, 44100));
    let mut device = AudioDevice::new(AudioPump::new(Box::new(sink), engine, &config));

    device.open(512, 44100).unwrap();
    let ticks = device.start().unwrap();
    device.stop().unwrap();
    let rounds_before = device.dispatched_rounds();

    ticks.vertical_blank();
    ticks.dma_complete();
    assert!(wait_for(|| device.dispatched_rounds() > rounds_before));

    let pump = device.pump();
    assert_eq!(pump.lock().stats().fills(), 0);
    assert_eq!(pump.lock().ring().read_cursor(), 0);
    assert_eq!(
        log.count(|c| matches!(c, SinkCall::EnableInterrupts)),
        1,
        "stop must not re-enable interrupts"
    );

    // The dispatch thread survives a stop/start cycle
    device.start().unwrap();
    ticks.vertical_blank();
    assert!(wait_for(|| pump.lock().stats().fills() == 1));
}

#[test]
fn test_device_reopens_after_close() {
    let config = AudioConfig {
        profile: HardwareProfile::Arne,
        topology: OutputTopology::DirectOut,
        ..AudioConfig::default()
    };
    let mut device =
        AudioDevice::with_null_sink(&config, Box::new(ToneEngine::new(Waveform::Square, 440.0, 44100)));

    assert_eq!(device.open(4096, 96000).unwrap(), 4096);
    assert_eq!(device.pump().lock().sample_rate(), 44100);
    assert_eq!(device.pump().lock().ring().lane_count(), 16);
    device.start().unwrap();
    device.close();
    assert!(matches!(device.stop(), Err(AudioError::NotOpen)));

    assert_eq!(device.open(256, 22050).unwrap(), 256);
    assert_eq!(device.pump().lock().sample_rate(), 22050);
    device.start().unwrap();
    assert_eq!(device.state(), PumpState::Running);
    assert_eq!(device.stat_value(StatKey::Underruns as u32), 0);
    assert_eq!(device.stat_value(99), 0);
}
